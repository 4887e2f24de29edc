//! Policy gating
//!
//! Pure decision-making evaluated before every command. Access checks
//! receive the plan policy violations collected so far: empty means "no
//! plan was run", populated means "plan had these issues" — an access
//! policy may decide differently in each case.

use async_trait::async_trait;
use thiserror::Error;

use mantis_core::domain::policy::PolicyDecision;
use mantis_core::dto::plan::PlanSummary;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy evaluation failed: {0}")]
    Evaluation(String),
}

/// Capability surface of the policy engine.
#[async_trait]
pub trait PolicyChecker: Send + Sync {
    /// Whether `requested_by` may run `command` against the project.
    #[allow(clippy::too_many_arguments)]
    async fn check_access(
        &self,
        organisation: &str,
        repository: &str,
        project_name: &str,
        project_dir: &str,
        command: &str,
        pr_number: Option<u64>,
        requested_by: &str,
        plan_violations: &[String],
    ) -> Result<PolicyDecision, PolicyError>;

    /// Validates a plan JSON rendering; violations come back as reasons.
    async fn check_plan(
        &self,
        organisation: &str,
        repository: &str,
        project_name: &str,
        project_dir: &str,
        plan_json: &str,
    ) -> Result<PolicyDecision, PolicyError>;

    /// Whether drift detection is enabled for the project.
    async fn check_drift(
        &self,
        organisation: &str,
        repository: &str,
        project_name: &str,
    ) -> Result<bool, PolicyError>;
}

/// Policy checker for setups without any policy configuration: everything
/// is allowed, drift detection is off.
pub struct AllowAllPolicyChecker;

#[async_trait]
impl PolicyChecker for AllowAllPolicyChecker {
    async fn check_access(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        _: Option<u64>,
        _: &str,
        _: &[String],
    ) -> Result<PolicyDecision, PolicyError> {
        Ok(PolicyDecision::allow())
    }

    async fn check_plan(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<PolicyDecision, PolicyError> {
        Ok(PolicyDecision::allow())
    }

    async fn check_drift(&self, _: &str, _: &str, _: &str) -> Result<bool, PolicyError> {
        Ok(false)
    }
}

/// Static policy rules evaluated locally.
#[derive(Debug, Clone, Default)]
pub struct PolicyRules {
    /// Users denied every command
    pub blocked_users: Vec<String>,
    /// Deny apply when the stored plan carries violations
    pub apply_requires_clean_plan: bool,
    /// Deny plans deleting more than this many resources
    pub max_deletions: Option<u32>,
    /// Projects with drift detection enabled
    pub drift_enabled_projects: Vec<String>,
}

impl PolicyRules {
    pub fn is_empty(&self) -> bool {
        self.blocked_users.is_empty()
            && !self.apply_requires_clean_plan
            && self.max_deletions.is_none()
            && self.drift_enabled_projects.is_empty()
    }
}

/// Policy checker driven by [`PolicyRules`].
pub struct RuleBasedPolicyChecker {
    rules: PolicyRules,
}

impl RuleBasedPolicyChecker {
    pub fn new(rules: PolicyRules) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl PolicyChecker for RuleBasedPolicyChecker {
    async fn check_access(
        &self,
        _organisation: &str,
        _repository: &str,
        _project_name: &str,
        _project_dir: &str,
        command: &str,
        _pr_number: Option<u64>,
        requested_by: &str,
        plan_violations: &[String],
    ) -> Result<PolicyDecision, PolicyError> {
        if self.rules.blocked_users.iter().any(|u| u == requested_by) {
            return Ok(PolicyDecision::deny(vec![format!(
                "user {} is blocked by policy",
                requested_by
            )]));
        }

        if command == "mantis apply"
            && self.rules.apply_requires_clean_plan
            && !plan_violations.is_empty()
        {
            return Ok(PolicyDecision::deny(plan_violations.to_vec()));
        }

        Ok(PolicyDecision::allow())
    }

    async fn check_plan(
        &self,
        _organisation: &str,
        _repository: &str,
        _project_name: &str,
        _project_dir: &str,
        plan_json: &str,
    ) -> Result<PolicyDecision, PolicyError> {
        let Some(max_deletions) = self.rules.max_deletions else {
            return Ok(PolicyDecision::allow());
        };

        let summary = PlanSummary::from_terraform_json(plan_json)
            .map_err(|e| PolicyError::Evaluation(format!("invalid plan json: {}", e)))?;

        if summary.resources_deleted > max_deletions {
            return Ok(PolicyDecision::deny(vec![format!(
                "plan deletes {} resources, policy allows at most {}",
                summary.resources_deleted, max_deletions
            )]));
        }

        Ok(PolicyDecision::allow())
    }

    async fn check_drift(
        &self,
        _organisation: &str,
        _repository: &str,
        project_name: &str,
    ) -> Result<bool, PolicyError> {
        Ok(self
            .rules
            .drift_enabled_projects
            .iter()
            .any(|p| p == project_name))
    }
}
