//! Plan artifact DTOs
//!
//! Summaries and results of IaC plan/apply invocations, exchanged between
//! the executor, the reporter and the backend.

use serde::{Deserialize, Serialize};

/// Resource change counts extracted from a terraform plan JSON rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub resources_created: u32,
    pub resources_updated: u32,
    pub resources_deleted: u32,
}

impl PlanSummary {
    /// Parses a `terraform show -json` rendering and counts resource
    /// changes. A replace counts as one create and one delete.
    pub fn from_terraform_json(plan_json: &str) -> Result<Self, serde_json::Error> {
        if plan_json.trim().is_empty() {
            return Ok(PlanSummary::default());
        }

        let plan: TerraformPlan = serde_json::from_str(plan_json)?;
        let mut summary = PlanSummary::default();
        for change in plan.resource_changes {
            for action in &change.change.actions {
                match action.as_str() {
                    "create" => summary.resources_created += 1,
                    "update" => summary.resources_updated += 1,
                    "delete" => summary.resources_deleted += 1,
                    _ => {}
                }
            }
        }
        Ok(summary)
    }

    pub fn has_changes(&self) -> bool {
        self.resources_created > 0 || self.resources_updated > 0 || self.resources_deleted > 0
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy.",
            self.resources_created, self.resources_updated, self.resources_deleted
        )
    }
}

#[derive(Debug, Deserialize)]
struct TerraformPlan {
    #[serde(default)]
    resource_changes: Vec<ResourceChange>,
}

#[derive(Debug, Deserialize)]
struct ResourceChange {
    change: Change,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    actions: Vec<String>,
}

/// Artifacts of a successful plan invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub summary: PlanSummary,
    pub terraform_json: String,
}

/// Artifacts of a successful apply invocation. Opaque for now; apply
/// summaries may grow change accounting later.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {}

/// Structured result of one executor invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorResult {
    pub terraform_output: String,
    pub plan_result: Option<PlanResult>,
    pub apply_result: Option<ApplyResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_actions() {
        let json = r#"{
            "resource_changes": [
                {"change": {"actions": ["create"]}},
                {"change": {"actions": ["update"]}},
                {"change": {"actions": ["delete", "create"]}},
                {"change": {"actions": ["no-op"]}}
            ]
        }"#;

        let summary = PlanSummary::from_terraform_json(json).unwrap();
        assert_eq!(summary.resources_created, 2);
        assert_eq!(summary.resources_updated, 1);
        assert_eq!(summary.resources_deleted, 1);
        assert!(summary.has_changes());
    }

    #[test]
    fn test_empty_plan_has_no_changes() {
        let summary = PlanSummary::from_terraform_json(r#"{"resource_changes": []}"#).unwrap();
        assert!(!summary.has_changes());

        let summary = PlanSummary::from_terraform_json("").unwrap();
        assert!(!summary.has_changes());
    }

    #[test]
    fn test_summary_display() {
        let summary = PlanSummary {
            resources_created: 2,
            resources_updated: 0,
            resources_deleted: 1,
        };
        assert_eq!(
            summary.to_string(),
            "Plan: 2 to add, 0 to change, 1 to destroy."
        );
    }
}
