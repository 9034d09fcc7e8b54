//! Change detection: does a rule match need a new build?

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::deployment::DeploymentCache;
use crate::errors::EngineError;
use crate::models::rule::CacheStrategy;
use crate::store::DeploymentStore;
use crate::triggers::pattern::any_path_matches;

/// Inputs of one skip decision
#[derive(Debug, Clone)]
pub struct ChangeRequest<'a> {
    pub service_id: &'a str,
    pub repository_id: &'a str,
    pub branch: Option<&'a str>,
    pub head_sha: &'a str,

    /// `None` when the provider did not report a diff
    pub changed_paths: Option<&'a [String]>,
    pub watched_paths: &'a [String],
    pub strategy: CacheStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Strict rule and none of the changed files are watched
    NoWatchedPathChanged,

    /// Loose rule and the head SHA is already running
    AlreadyDeployed { deployment_id: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoWatchedPathChanged => f.write_str("no watched path changed"),
            SkipReason::AlreadyDeployed { deployment_id } => {
                write!(f, "commit already deployed by {}", deployment_id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipDecision {
    pub should_skip: bool,
    pub reason: Option<SkipReason>,
}

impl SkipDecision {
    fn build() -> Self {
        Self {
            should_skip: false,
            reason: None,
        }
    }

    fn skip(reason: SkipReason) -> Self {
        Self {
            should_skip: true,
            reason: Some(reason),
        }
    }
}

pub struct ChangeDetector {
    cache: Arc<DeploymentCache>,
    deployments: Arc<dyn DeploymentStore>,
}

impl ChangeDetector {
    pub fn new(cache: Arc<DeploymentCache>, deployments: Arc<dyn DeploymentStore>) -> Self {
        Self { cache, deployments }
    }

    pub async fn should_skip(&self, request: &ChangeRequest<'_>) -> Result<SkipDecision, EngineError> {
        match request.strategy {
            CacheStrategy::Strict => Ok(Self::strict(request)),
            CacheStrategy::Loose => self.loose(request).await,
        }
    }

    fn strict(request: &ChangeRequest<'_>) -> SkipDecision {
        if request.watched_paths.is_empty() {
            return SkipDecision::build();
        }

        let changed: &[String] = match request.changed_paths {
            Some(paths) => paths,
            None => {
                warn!(
                    "No diff for {}@{} (service {}), treating change set as empty",
                    request.repository_id, request.head_sha, request.service_id
                );
                &[]
            }
        };

        if any_path_matches(request.watched_paths, changed) {
            SkipDecision::build()
        } else {
            debug!(
                "Service {}: {} changed paths, none watched",
                request.service_id,
                changed.len()
            );
            SkipDecision::skip(SkipReason::NoWatchedPathChanged)
        }
    }

    async fn loose(&self, request: &ChangeRequest<'_>) -> Result<SkipDecision, EngineError> {
        let Some(branch) = request.branch else {
            return Ok(SkipDecision::build());
        };
        if request.head_sha.is_empty() {
            return Ok(SkipDecision::build());
        }

        if let Some(entry) = self.cache.get(request.service_id, branch) {
            if entry.commit_sha == request.head_sha {
                debug!("Cache hit for {}@{}", request.service_id, request.head_sha);
                return Ok(SkipDecision::skip(SkipReason::AlreadyDeployed {
                    deployment_id: entry.deployment_id,
                }));
            }
        }

        let deployed = self
            .deployments
            .find_successful_sha(request.service_id, branch, request.head_sha)
            .await?;

        Ok(match deployed {
            Some(deployment) => SkipDecision::skip(SkipReason::AlreadyDeployed {
                deployment_id: deployment.id,
            }),
            None => SkipDecision::build(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn detector() -> ChangeDetector {
        ChangeDetector::new(
            Arc::new(DeploymentCache::new(16)),
            Arc::new(MemoryStore::new()),
        )
    }

    fn request<'a>(
        strategy: CacheStrategy,
        sha: &'a str,
        changed: Option<&'a [String]>,
        watched: &'a [String],
    ) -> ChangeRequest<'a> {
        ChangeRequest {
            service_id: "svc-1",
            repository_id: "42",
            branch: Some("main"),
            head_sha: sha,
            changed_paths: changed,
            watched_paths: watched,
            strategy,
        }
    }

    #[tokio::test]
    async fn test_strict_skips_unwatched_changes() {
        let detector = detector();
        let watched = vec!["api/".to_string()];
        let docs = vec!["docs/readme.md".to_string()];
        let api = vec!["docs/readme.md".to_string(), "api/src/lib.rs".to_string()];

        let skipped = detector
            .should_skip(&request(CacheStrategy::Strict, "a", Some(&docs), &watched))
            .await
            .unwrap();
        assert!(skipped.should_skip);
        assert_eq!(skipped.reason, Some(SkipReason::NoWatchedPathChanged));

        let built = detector
            .should_skip(&request(CacheStrategy::Strict, "a", Some(&api), &watched))
            .await
            .unwrap();
        assert!(!built.should_skip);
    }

    #[tokio::test]
    async fn test_strict_without_watched_paths_never_skips() {
        let detector = detector();
        let decision = detector
            .should_skip(&request(CacheStrategy::Strict, "a", None, &[]))
            .await
            .unwrap();
        assert!(!decision.should_skip);
    }

    #[tokio::test]
    async fn test_strict_without_diff_treats_changes_as_empty() {
        let detector = detector();
        let watched = vec!["api/".to_string()];
        let decision = detector
            .should_skip(&request(CacheStrategy::Strict, "a", None, &watched))
            .await
            .unwrap();
        assert!(decision.should_skip);
    }

    #[tokio::test]
    async fn test_loose_skips_only_deployed_sha() {
        let detector = detector();
        detector.cache.record_success("svc-1", "main", "abc", "d-1");

        let same = detector
            .should_skip(&request(CacheStrategy::Loose, "abc", None, &[]))
            .await
            .unwrap();
        assert_eq!(
            same.reason,
            Some(SkipReason::AlreadyDeployed {
                deployment_id: "d-1".to_string()
            })
        );

        let different = detector
            .should_skip(&request(CacheStrategy::Loose, "def", None, &[]))
            .await
            .unwrap();
        assert!(!different.should_skip);
    }
}
