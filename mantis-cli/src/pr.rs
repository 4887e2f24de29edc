//! Pull request service capability
//!
//! Abstraction over the PR platform (GitHub/GitLab/Bitbucket/Azure). The
//! pipeline only consumes this surface; platform client implementations live
//! outside the execution core and are injected by the embedding driver.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PrError {
    #[error("pull request service error: {0}")]
    Service(String),
}

/// State of a commit status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl std::fmt::Display for CommitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
        };
        write!(f, "{}", s)
    }
}

/// A published PR comment.
#[derive(Debug, Clone)]
pub struct Comment {
    pub id: String,
    pub url: String,
}

/// Capability surface of the PR platform.
#[async_trait]
pub trait PrService: Send + Sync {
    async fn publish_comment(&self, pr_number: u64, body: &str) -> Result<Comment, PrError>;

    async fn edit_comment(
        &self,
        pr_number: u64,
        comment_id: &str,
        body: &str,
    ) -> Result<(), PrError>;

    /// Sets a commit status, e.g. `web/plan` to `pending`.
    async fn set_status(
        &self,
        pr_number: u64,
        state: CommitState,
        context: &str,
    ) -> Result<(), PrError>;

    /// Combined state of all status checks on the PR head.
    async fn combined_status(&self, pr_number: u64) -> Result<String, PrError>;

    async fn is_merged(&self, pr_number: u64) -> Result<bool, PrError>;

    async fn is_mergeable(&self, pr_number: u64) -> Result<bool, PrError>;

    async fn merge_pull_request(&self, pr_number: u64) -> Result<(), PrError>;
}

/// PR service for runs without a platform client: every action is logged
/// and answered with a benign default.
pub struct DryRunPrService;

#[async_trait]
impl PrService for DryRunPrService {
    async fn publish_comment(&self, pr_number: u64, body: &str) -> Result<Comment, PrError> {
        info!("[dry-run] comment on PR #{}:\n{}", pr_number, body);
        Ok(Comment {
            id: "0".to_string(),
            url: String::new(),
        })
    }

    async fn edit_comment(
        &self,
        pr_number: u64,
        comment_id: &str,
        body: &str,
    ) -> Result<(), PrError> {
        info!(
            "[dry-run] edit comment {} on PR #{}:\n{}",
            comment_id, pr_number, body
        );
        Ok(())
    }

    async fn set_status(
        &self,
        pr_number: u64,
        state: CommitState,
        context: &str,
    ) -> Result<(), PrError> {
        info!("[dry-run] status {} = {} on PR #{}", context, state, pr_number);
        Ok(())
    }

    async fn combined_status(&self, _pr_number: u64) -> Result<String, PrError> {
        Ok("success".to_string())
    }

    async fn is_merged(&self, _pr_number: u64) -> Result<bool, PrError> {
        Ok(false)
    }

    async fn is_mergeable(&self, _pr_number: u64) -> Result<bool, PrError> {
        Ok(true)
    }

    async fn merge_pull_request(&self, pr_number: u64) -> Result<(), PrError> {
        info!("[dry-run] merge PR #{}", pr_number);
        Ok(())
    }
}
