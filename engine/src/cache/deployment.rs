//! Deployment cache: last successful SHA per (service, branch)

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// Cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentCacheEntry {
    pub commit_sha: String,
    pub deployment_id: String,
    pub cached_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Default)]
struct Entries {
    by_key: HashMap<(String, String), DeploymentCacheEntry>,
    next_seq: u64,
}

/// In-memory, capacity-bounded index consulted before the store
pub struct DeploymentCache {
    entries: RwLock<Entries>,
    capacity: usize,
}

impl DeploymentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, service_id: &str, branch: &str) -> Option<DeploymentCacheEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .by_key
            .get(&(service_id.to_string(), branch.to_string()))
            .cloned()
    }

    /// Whether `sha` is the last successful deployment of (service, branch)
    pub fn is_deployed(&self, service_id: &str, branch: &str, sha: &str) -> bool {
        self.get(service_id, branch)
            .map(|e| e.commit_sha == sha)
            .unwrap_or(false)
    }

    /// Record a success, evicting the oldest entry when full
    pub fn record_success(&self, service_id: &str, branch: &str, sha: &str, deployment_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = (service_id.to_string(), branch.to_string());

        if !entries.by_key.contains_key(&key) && entries.by_key.len() >= self.capacity {
            if let Some(oldest) = entries
                .by_key
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone())
            {
                entries.by_key.remove(&oldest);
            }
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.by_key.insert(
            key,
            DeploymentCacheEntry {
                commit_sha: sha.to_string(),
                deployment_id: deployment_id.to_string(),
                cached_at: Utc::now(),
                seq,
            },
        );
    }

    /// Drop the entry if it still points at `deployment_id`
    pub fn invalidate(&self, service_id: &str, branch: &str, deployment_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = (service_id.to_string(), branch.to_string());
        if entries
            .by_key
            .get(&key)
            .map(|e| e.deployment_id == deployment_id)
            .unwrap_or(false)
        {
            entries.by_key.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
