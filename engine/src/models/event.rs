//! Provider-neutral repository events

use serde::{Deserialize, Serialize};

use crate::models::deployment::TriggerKind;

/// Webhook source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Github,
    Gitlab,
    Manual,
}

/// Event shape after normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Tag,
    Release,
}

impl EventKind {
    pub fn trigger(&self) -> TriggerKind {
        match self {
            EventKind::Push => TriggerKind::Push,
            EventKind::PullRequest => TriggerKind::PullRequest,
            EventKind::Tag => TriggerKind::Tag,
            EventKind::Release => TriggerKind::Release,
        }
    }
}

/// Pull request lifecycle action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Synchronize,
    Reopened,
    Closed,
    Other,
}

impl PullRequestAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "opened" | "open" | "ready_for_review" => PullRequestAction::Opened,
            "synchronize" | "update" => PullRequestAction::Synchronize,
            "reopened" | "reopen" => PullRequestAction::Reopened,
            "closed" | "close" | "merge" | "merged" => PullRequestAction::Closed,
            _ => PullRequestAction::Other,
        }
    }

    /// Actions that produce new code to deploy
    pub fn is_deployable(&self) -> bool {
        matches!(
            self,
            PullRequestAction::Opened | PullRequestAction::Synchronize | PullRequestAction::Reopened
        )
    }
}

/// Normalized `{repositoryId, ref, branch, prNumber?, tag?}` projection plus
/// what change detection needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEvent {
    pub provider: Provider,
    pub kind: EventKind,
    pub repository_id: String,
    pub repository_url: String,
    pub organization: Option<String>,

    /// Full ref as sent by the provider (`refs/heads/main`)
    pub git_ref: String,
    pub branch: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_action: Option<PullRequestAction>,
    pub tag: Option<String>,

    pub head_sha: String,
    pub base_sha: Option<String>,

    /// `None` when the provider did not report changed files
    pub changed_paths: Option<Vec<String>>,

    /// Ref deletion (branch or tag removed)
    pub deleted: bool,
}
