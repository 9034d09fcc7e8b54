//! GitLab webhook payloads

use serde::{Deserialize, Serialize};

/// Project block shared by every event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub path_with_namespace: String,
    pub git_http_url: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// A commit inside a push payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

/// `push` and `tag_push` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub object_kind: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub before: String,
    pub after: String,
    #[serde(default)]
    pub checkout_sha: Option<String>,
    #[serde(default)]
    pub commits: Vec<Commit>,
    pub project: Project,
}

/// Last commit of a merge request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastCommit {
    pub id: String,
}

/// Merge request attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequestAttributes {
    pub iid: u64,
    #[serde(default)]
    pub action: Option<String>,
    pub state: String,
    pub source_branch: String,
    pub target_branch: String,
    pub last_commit: LastCommit,
}

/// `merge_request` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequestEvent {
    pub object_kind: String,
    pub object_attributes: MergeRequestAttributes,
    pub project: Project,
}

/// `release` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseEvent {
    pub object_kind: String,
    pub action: String,
    pub tag: String,
    pub project: Project,
}
