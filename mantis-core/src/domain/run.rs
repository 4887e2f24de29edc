//! Run record domain types
//!
//! A run record is the persisted history of one command execution against one
//! project. Its lifecycle is an explicit state machine; illegal transitions
//! are rejected with a typed error instead of mutating fields ad hoc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Forbidden,
    PendingApproval,
    Approved,
    Applied,
}

impl RunStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Applied`, `Failed` and `Forbidden` are terminal; any non-terminal
    /// state may be forced to `Forbidden`.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        if matches!(self, Applied | Failed | Forbidden) {
            return false;
        }
        if next == Forbidden {
            return true;
        }
        matches!(
            (self, next),
            (Queued, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, PendingApproval)
                | (PendingApproval, Approved)
                | (Approved, Applied)
                | (Approved, Failed)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Queued => "Queued",
            RunStatus::Running => "Running",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
            RunStatus::Forbidden => "Forbidden",
            RunStatus::PendingApproval => "PendingApproval",
            RunStatus::Approved => "Approved",
            RunStatus::Applied => "Applied",
        };
        write!(f, "{}", s)
    }
}

/// Rejected state machine operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal run transition from {from} to {to}")]
    Illegal { from: RunStatus, to: RunStatus },

    #[error("run is not awaiting approval (status: {0})")]
    NotApprovable(RunStatus),
}

/// Persisted history of one command execution against one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub project_id: i64,
    pub repo_id: i64,
    pub status: RunStatus,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output: String,
    pub plan_json: Option<String>,
    pub is_approved: bool,
    pub approval_author: Option<String>,
    pub approval_date: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Moves the record to `next`, enforcing the state machine.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Approves a run awaiting approval.
    ///
    /// Only a run in `PendingApproval` may be approved. Approval is
    /// idempotent: a second call on an already-approved run is a no-op that
    /// reports success. Returns `true` when the record changed.
    pub fn approve(
        &mut self,
        author: &str,
        when: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        if self.is_approved {
            return Ok(false);
        }
        if self.status != RunStatus::PendingApproval {
            return Err(TransitionError::NotApprovable(self.status));
        }
        self.transition(RunStatus::Approved)?;
        self.is_approved = true;
        self.approval_author = Some(author.to_string());
        self.approval_date = Some(when);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_record() -> RunRecord {
        RunRecord {
            id: 7,
            project_id: 1,
            repo_id: 1,
            status: RunStatus::PendingApproval,
            command: "mantis apply".to_string(),
            started_at: Utc::now(),
            ended_at: None,
            output: String::new(),
            plan_json: None,
            is_approved: false,
            approval_author: None,
            approval_date: None,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = pending_record();
        run.status = RunStatus::Queued;

        assert!(run.transition(RunStatus::Running).is_ok());
        assert!(run.transition(RunStatus::Succeeded).is_ok());
        assert!(run.transition(RunStatus::PendingApproval).is_ok());
        assert!(run.transition(RunStatus::Approved).is_ok());
        assert!(run.transition(RunStatus::Applied).is_ok());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut run = pending_record();
        run.status = RunStatus::Queued;

        let err = run.transition(RunStatus::Applied).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: RunStatus::Queued,
                to: RunStatus::Applied,
            }
        );
    }

    #[test]
    fn test_applied_is_immutable() {
        let mut run = pending_record();
        run.status = RunStatus::Applied;

        assert!(run.transition(RunStatus::Failed).is_err());
        assert!(run.transition(RunStatus::Forbidden).is_err());
        assert!(run.approve("a_user", Utc::now()).is_err());
    }

    #[test]
    fn test_forbidden_reachable_from_non_terminal_states() {
        for status in [RunStatus::Queued, RunStatus::Running, RunStatus::PendingApproval] {
            let mut run = pending_record();
            run.status = status;
            assert!(run.transition(RunStatus::Forbidden).is_ok());
        }
    }

    #[test]
    fn test_approve_is_idempotent() {
        let mut run = pending_record();
        let t1 = Utc::now();

        assert!(run.approve("a_user", t1).unwrap());
        assert!(run.is_approved);
        assert_eq!(run.approval_author.as_deref(), Some("a_user"));
        assert_eq!(run.approval_date, Some(t1));
        assert_eq!(run.status, RunStatus::Approved);

        // Second call is a no-op that still succeeds
        let t2 = t1 + chrono::Duration::seconds(60);
        assert!(!run.approve("another_user", t2).unwrap());
        assert_eq!(run.approval_author.as_deref(), Some("a_user"));
        assert_eq!(run.approval_date, Some(t1));
    }

    #[test]
    fn test_approve_requires_pending_approval() {
        let mut run = pending_record();
        run.status = RunStatus::Running;

        let err = run.approve("a_user", Utc::now()).unwrap_err();
        assert_eq!(err, TransitionError::NotApprovable(RunStatus::Running));
    }
}
