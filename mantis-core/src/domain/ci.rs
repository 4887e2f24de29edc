//! CI platform detection
//!
//! The environment is read once at startup; the resulting value is immutable
//! and threaded down into the pipeline.

use serde::{Deserialize, Serialize};

/// CI platform the process is running under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CiKind {
    GitHub,
    GitLab,
    Bitbucket,
    Azure,
    None,
}

impl CiKind {
    /// Detects the CI platform from the process environment.
    pub fn detect() -> Self {
        Self::detect_with(|key| std::env::var(key).ok())
    }

    /// Detection against an arbitrary environment lookup. First non-empty
    /// marker wins.
    pub fn detect_with<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let not_empty = |key: &str| get(key).is_some_and(|v| !v.is_empty());

        if not_empty("GITHUB_ACTIONS") {
            CiKind::GitHub
        } else if not_empty("GITLAB_CI") {
            CiKind::GitLab
        } else if not_empty("BITBUCKET_BUILD_NUMBER") {
            CiKind::Bitbucket
        } else if not_empty("AZURE_CI") {
            CiKind::Azure
        } else {
            CiKind::None
        }
    }
}

impl std::fmt::Display for CiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CiKind::GitHub => "github",
            CiKind::GitLab => "gitlab",
            CiKind::Bitbucket => "bitbucket",
            CiKind::Azure => "azure",
            CiKind::None => "",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_non_empty_marker_wins() {
        let kind = CiKind::detect_with(|key| match key {
            "GITHUB_ACTIONS" => Some("true".to_string()),
            "GITLAB_CI" => Some("true".to_string()),
            _ => None,
        });
        assert_eq!(kind, CiKind::GitHub);
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let kind = CiKind::detect_with(|key| match key {
            "GITHUB_ACTIONS" => Some(String::new()),
            "BITBUCKET_BUILD_NUMBER" => Some("42".to_string()),
            _ => None,
        });
        assert_eq!(kind, CiKind::Bitbucket);
    }

    #[test]
    fn test_no_markers_means_none() {
        let kind = CiKind::detect_with(|_| None);
        assert_eq!(kind, CiKind::None);
    }
}
