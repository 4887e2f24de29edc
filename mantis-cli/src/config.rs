//! CLI configuration
//!
//! Everything tunable comes from the environment and is read once at
//! startup: backend connection, lock store, plan store variant, timeouts,
//! the plan-upload side channel and static policy rules. No ambient reads
//! happen inside the batch loop.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Method;

use crate::policy::PolicyRules;

/// Which plan store variant to use.
#[derive(Debug, Clone)]
pub enum PlanStoreKind {
    Local {
        dir: PathBuf,
    },
    Bucket {
        url: String,
    },
    Rest {
        endpoint: String,
        method: Method,
        pr_url: String,
    },
}

/// Plan JSON upload destination.
#[derive(Debug, Clone)]
pub struct PlanUpload {
    pub endpoint: String,
    pub method: Method,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Orchestrator base URL; `None` disables backend reporting
    pub backend_url: Option<String>,
    /// Organisation identifier sent to the backend
    pub organisation: String,
    /// Postgres URL for the shared lock store; `None` selects the
    /// in-process store
    pub database_url: Option<String>,
    pub lock_ttl: Duration,
    pub http_timeout: Duration,
    /// Budget for each IaC child process; the longest timeout in the system
    pub iac_timeout: Duration,
    pub plan_store: PlanStoreKind,
    pub plan_upload: Option<PlanUpload>,
    pub drift_webhook_url: Option<String>,
    pub policy_rules: PolicyRules,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Recognised variables:
    /// - MANTIS_BACKEND_URL, MANTIS_ORGANISATION
    /// - MANTIS_LOCK_DATABASE_URL, MANTIS_LOCK_TTL (seconds)
    /// - MANTIS_HTTP_TIMEOUT, MANTIS_IAC_TIMEOUT (seconds)
    /// - MANTIS_PLAN_STORE (local | bucket | rest), MANTIS_PLAN_DIR,
    ///   MANTIS_PLAN_BUCKET_URL, MANTIS_PLAN_REST_ENDPOINT,
    ///   MANTIS_PLAN_REST_METHOD, MANTIS_PR_URL
    /// - PLAN_UPLOAD_DESTINATION, PLAN_UPLOAD_HTTP_ENDPOINT,
    ///   PLAN_UPLOAD_HTTP_METHOD
    /// - MANTIS_DRIFT_WEBHOOK_URL
    /// - MANTIS_POLICY_BLOCKED_USERS, MANTIS_POLICY_MAX_DELETIONS,
    ///   MANTIS_POLICY_DRIFT_PROJECTS,
    ///   MANTIS_POLICY_APPLY_REQUIRES_CLEAN_PLAN
    pub fn from_env() -> Result<Self> {
        let config = Self {
            backend_url: env_var("MANTIS_BACKEND_URL"),
            organisation: env_var("MANTIS_ORGANISATION").unwrap_or_else(|| "default".to_string()),
            database_url: env_var("MANTIS_LOCK_DATABASE_URL"),
            lock_ttl: env_duration("MANTIS_LOCK_TTL", Duration::from_secs(3600))?,
            http_timeout: env_duration("MANTIS_HTTP_TIMEOUT", Duration::from_secs(30))?,
            iac_timeout: env_duration("MANTIS_IAC_TIMEOUT", Duration::from_secs(3600))?,
            plan_store: plan_store_from_env()?,
            plan_upload: plan_upload_from_env()?,
            drift_webhook_url: env_var("MANTIS_DRIFT_WEBHOOK_URL"),
            policy_rules: policy_rules_from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.backend_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("MANTIS_BACKEND_URL must start with http:// or https://");
            }
        }
        if self.lock_ttl.as_secs() == 0 {
            bail!("MANTIS_LOCK_TTL must be greater than 0");
        }
        if self.iac_timeout.as_secs() == 0 {
            bail!("MANTIS_IAC_TIMEOUT must be greater than 0");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            organisation: "default".to_string(),
            database_url: None,
            lock_ttl: Duration::from_secs(3600),
            http_timeout: Duration::from_secs(30),
            iac_timeout: Duration::from_secs(3600),
            plan_store: PlanStoreKind::Local {
                dir: PathBuf::from(".mantis/plans"),
            },
            plan_upload: None,
            drift_webhook_url: None,
            policy_rules: PolicyRules::default(),
        }
    }
}

/// Non-empty environment variable lookup.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_duration(key: &str, default: Duration) -> Result<Duration> {
    match env_var(key) {
        Some(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("{} must be a number of seconds", key))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}

fn parse_method(key: &str, value: &str) -> Result<Method> {
    value
        .parse::<Method>()
        .map_err(|_| anyhow::anyhow!("{} is not a valid HTTP method for {}", value, key))
}

fn plan_store_from_env() -> Result<PlanStoreKind> {
    match env_var("MANTIS_PLAN_STORE").as_deref() {
        None | Some("local") => Ok(PlanStoreKind::Local {
            dir: env_var("MANTIS_PLAN_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".mantis/plans")),
        }),
        Some("bucket") => {
            let url = env_var("MANTIS_PLAN_BUCKET_URL")
                .context("MANTIS_PLAN_BUCKET_URL is required for the bucket plan store")?;
            Ok(PlanStoreKind::Bucket { url })
        }
        Some("rest") => {
            let endpoint = env_var("MANTIS_PLAN_REST_ENDPOINT")
                .context("MANTIS_PLAN_REST_ENDPOINT is required for the rest plan store")?;
            let method = match env_var("MANTIS_PLAN_REST_METHOD") {
                Some(m) => parse_method("MANTIS_PLAN_REST_METHOD", &m)?,
                None => Method::POST,
            };
            Ok(PlanStoreKind::Rest {
                endpoint,
                method,
                pr_url: env_var("MANTIS_PR_URL").unwrap_or_default(),
            })
        }
        Some(other) => bail!("Unknown plan store kind: {}", other),
    }
}

fn plan_upload_from_env() -> Result<Option<PlanUpload>> {
    match env_var("PLAN_UPLOAD_DESTINATION").as_deref() {
        None => Ok(None),
        Some("rest") => {
            let endpoint = env_var("PLAN_UPLOAD_HTTP_ENDPOINT")
                .context("PLAN_UPLOAD_HTTP_ENDPOINT is required when PLAN_UPLOAD_DESTINATION=rest")?;
            let method = env_var("PLAN_UPLOAD_HTTP_METHOD")
                .context("PLAN_UPLOAD_HTTP_METHOD is required when PLAN_UPLOAD_DESTINATION=rest")?;
            Ok(Some(PlanUpload {
                endpoint,
                method: parse_method("PLAN_UPLOAD_HTTP_METHOD", &method)?,
            }))
        }
        Some(other) => bail!("Unknown plan upload destination: {}", other),
    }
}

fn policy_rules_from_env() -> Result<PolicyRules> {
    let csv = |key: &str| -> Vec<String> {
        env_var(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    };

    let max_deletions = match env_var("MANTIS_POLICY_MAX_DELETIONS") {
        Some(value) => Some(
            value
                .parse::<u32>()
                .context("MANTIS_POLICY_MAX_DELETIONS must be a number")?,
        ),
        None => None,
    };

    Ok(PolicyRules {
        blocked_users: csv("MANTIS_POLICY_BLOCKED_USERS"),
        apply_requires_clean_plan: matches!(
            env_var("MANTIS_POLICY_APPLY_REQUIRES_CLEAN_PLAN").as_deref(),
            Some("true") | Some("1")
        ),
        max_deletions,
        drift_enabled_projects: csv("MANTIS_POLICY_DRIFT_PROJECTS"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_ttl, Duration::from_secs(3600));
        assert!(config.policy_rules.is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_backend_url() {
        let config = Config {
            backend_url: Some("not-a-url".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = Config {
            lock_ttl: Duration::from_secs(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
