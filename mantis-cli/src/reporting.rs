//! Progress reporting into the pull request
//!
//! The reporter is an ordered append-only log with a commit point: `report`
//! buffers, `flush` publishes the buffered bodies as one PR comment.
//! `suppress` is a sticky flag observed at flush time, used to discard
//! "no changes" notices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::pr::{Comment, PrError, PrService};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Pr(#[from] PrError),
}

/// How a report body is shaped for the venue.
#[derive(Debug, Clone)]
pub enum CommentFormat {
    /// Heading line above the body.
    Comment { heading: String },
    /// Collapsible block (markdown venues only).
    Collapsible { summary: String, open: bool },
    /// Collapsible block with the body fenced as terraform output.
    TerraformOutput { summary: String, open: bool },
    /// Body passed through untouched.
    Identity,
}

impl CommentFormat {
    /// Renders `body` for a venue with or without markdown support.
    pub fn render(&self, body: &str, markdown: bool) -> String {
        match self {
            CommentFormat::Comment { heading } => format!("{}\n{}", heading, body),
            CommentFormat::Collapsible { summary, open } => {
                if markdown {
                    format!(
                        "<details{}><summary>{}</summary>\n\n{}\n</details>",
                        if *open { " open=\"true\"" } else { "" },
                        summary,
                        body
                    )
                } else {
                    format!("{}\n{}", summary, body)
                }
            }
            CommentFormat::TerraformOutput { summary, open } => {
                let fenced = format!("```terraform\n{}\n```", body);
                if markdown {
                    format!(
                        "<details{}><summary>{}</summary>\n\n{}\n</details>",
                        if *open { " open=\"true\"" } else { "" },
                        summary,
                        fenced
                    )
                } else {
                    format!("{}\n{}", summary, fenced)
                }
            }
            CommentFormat::Identity => body.to_string(),
        }
    }
}

/// A posted report, returned from the flush commit point.
pub type PostedComment = Comment;

/// Capability surface of the progress reporter.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Buffers one report body.
    async fn report(&self, body: &str, format: CommentFormat) -> Result<(), ReportError>;

    /// Publishes everything buffered since the last flush. Returns the
    /// posted comment, or `None` when there was nothing to publish (or the
    /// buffer was suppressed).
    async fn flush(&self) -> Result<Option<PostedComment>, ReportError>;

    fn supports_markdown(&self) -> bool;

    /// Marks the buffered reports as discardable.
    fn suppress(&self);
}

/// Reporter that publishes buffered reports as a PR comment.
pub struct CiReporter {
    pr_service: Arc<dyn PrService>,
    pr_number: u64,
    buffer: Mutex<Vec<String>>,
    suppressed: AtomicBool,
}

impl CiReporter {
    pub fn new(pr_service: Arc<dyn PrService>, pr_number: u64) -> Self {
        Self {
            pr_service,
            pr_number,
            buffer: Mutex::new(Vec::new()),
            suppressed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Reporter for CiReporter {
    async fn report(&self, body: &str, format: CommentFormat) -> Result<(), ReportError> {
        let rendered = format.render(body, true);
        self.buffer.lock().unwrap().push(rendered);
        Ok(())
    }

    async fn flush(&self) -> Result<Option<PostedComment>, ReportError> {
        let bodies: Vec<String> = std::mem::take(&mut *self.buffer.lock().unwrap());

        if bodies.is_empty() {
            return Ok(None);
        }
        if self.suppressed.load(Ordering::SeqCst) {
            info!("Discarding {} suppressed report(s)", bodies.len());
            return Ok(None);
        }

        let comment = self
            .pr_service
            .publish_comment(self.pr_number, &bodies.join("\n\n"))
            .await?;
        Ok(Some(comment))
    }

    fn supports_markdown(&self) -> bool {
        true
    }

    fn suppress(&self) {
        self.suppressed.store(true, Ordering::SeqCst);
    }
}

/// Reporter for non-CI runs: reports go straight to the log.
pub struct StdOutReporter;

#[async_trait]
impl Reporter for StdOutReporter {
    async fn report(&self, body: &str, format: CommentFormat) -> Result<(), ReportError> {
        info!("{}", format.render(body, false));
        Ok(())
    }

    async fn flush(&self) -> Result<Option<PostedComment>, ReportError> {
        Ok(None)
    }

    fn supports_markdown(&self) -> bool {
        false
    }

    fn suppress(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_format_prepends_heading() {
        let format = CommentFormat::Comment {
            heading: "Plan output".to_string(),
        };
        assert_eq!(format.render("body", true), "Plan output\nbody");
    }

    #[test]
    fn test_collapsible_format_markdown() {
        let format = CommentFormat::Collapsible {
            summary: "Policy violation".to_string(),
            open: false,
        };
        let rendered = format.render("denied", true);
        assert!(rendered.starts_with("<details><summary>Policy violation</summary>"));
        assert!(rendered.contains("denied"));
    }

    #[test]
    fn test_collapsible_format_plain_venue() {
        let format = CommentFormat::Collapsible {
            summary: "Policy violation".to_string(),
            open: false,
        };
        assert_eq!(format.render("denied", false), "Policy violation\ndenied");
    }

    #[test]
    fn test_terraform_output_is_fenced() {
        let format = CommentFormat::TerraformOutput {
            summary: "Plan output".to_string(),
            open: true,
        };
        let rendered = format.render("+ resource", true);
        assert!(rendered.contains("open=\"true\""));
        assert!(rendered.contains("```terraform\n+ resource\n```"));
    }
}
