//! Policy decision types

use serde::{Deserialize, Serialize};

/// Outcome of a policy evaluation.
///
/// `reasons` surface to the pull request comment when the decision denies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reasons: Vec<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        PolicyDecision {
            allowed: true,
            reasons: Vec::new(),
        }
    }

    pub fn deny(reasons: Vec<String>) -> Self {
        PolicyDecision {
            allowed: false,
            reasons,
        }
    }
}
