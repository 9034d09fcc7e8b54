//! Deployment rule models

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::deployment::Environment;

/// Change-detection policy of a rule
///
/// The serialized values are consumed by external tooling and must not change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// Skip unless a watched path changed
    Strict,

    /// Skip only when the head SHA is already deployed
    #[default]
    Loose,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::Strict => "strict",
            CacheStrategy::Loose => "loose",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event kind a rule reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEvent {
    Push,
    PullRequest,
    Tag,
    Release,
    Any,
}

/// Declarative trigger criteria owned by a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRule {
    pub id: String,
    pub service_id: String,
    pub event: RuleEvent,

    /// Exact branch, glob, or empty/`*` for any
    #[serde(default)]
    pub branch_pattern: Option<String>,

    /// Tag pattern for tag and release rules
    #[serde(default)]
    pub tag_pattern: Option<String>,

    /// Watched paths; globs or directory prefixes
    #[serde(default)]
    pub path_filters: Vec<String>,

    pub environment: Environment,

    #[serde(default)]
    pub cache_strategy: CacheStrategy,

    #[serde(default)]
    pub trigger_count: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}
