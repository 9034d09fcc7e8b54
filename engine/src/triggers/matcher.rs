//! Rule matching: which (service, rule) pairs does an event trigger?

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::models::deployment::{DeploymentMetadata, Environment, SourceConfig, SourceType};
use crate::models::event::{EventKind, Provider, RepositoryEvent};
use crate::models::rule::{DeploymentRule, RuleEvent};
use crate::models::service::Service;
use crate::store::CatalogStore;
use crate::triggers::pattern::Pattern;

/// Answers whether provider credentials exist for an organization
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn has_credentials(&self, provider: Provider, organization: Option<&str>) -> bool;
}

/// What a match would deploy
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentConfig {
    pub environment: Environment,
    pub source_type: SourceType,
    pub source_config: SourceConfig,
    pub metadata: DeploymentMetadata,
}

#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub service: Service,
    pub rule: DeploymentRule,
    pub config: DeploymentConfig,
}

/// Whether a rule's event kind accepts an event
fn event_accepted(rule: RuleEvent, kind: EventKind) -> bool {
    matches!(
        (rule, kind),
        (RuleEvent::Any, _)
            | (RuleEvent::Push, EventKind::Push)
            | (RuleEvent::PullRequest, EventKind::PullRequest)
            | (RuleEvent::Tag, EventKind::Tag)
            | (RuleEvent::Release, EventKind::Release)
    )
}

/// Check the rule's patterns against the event's ref
///
/// A push or any-event rule that only names a branch pattern never matches tags.
pub fn rule_matches(rule: &DeploymentRule, event: &RepositoryEvent) -> Result<bool, EngineError> {
    if !rule.enabled || !event_accepted(rule.event, event.kind) {
        return Ok(false);
    }

    let matched = match (&event.tag, &event.branch) {
        (Some(_), _) if branch_only(rule) => false,
        (Some(tag), _) => Pattern::compile(rule.tag_pattern.as_deref())?.matches(tag),
        (None, Some(branch)) => Pattern::compile(rule.branch_pattern.as_deref())?.matches(branch),
        (None, None) => false,
    };
    Ok(matched)
}

fn branch_only(rule: &DeploymentRule) -> bool {
    matches!(rule.event, RuleEvent::Any | RuleEvent::Push)
        && rule.branch_pattern.is_some()
        && rule.tag_pattern.is_none()
}

fn deployment_config(service: &Service, rule: &DeploymentRule, event: &RepositoryEvent) -> DeploymentConfig {
    let repository_url = service
        .repository_url
        .clone()
        .or_else(|| Some(event.repository_url.clone()).filter(|u| !u.is_empty()));

    DeploymentConfig {
        environment: rule.environment,
        source_type: service.source_type,
        source_config: SourceConfig {
            repository_url,
            branch: event.branch.clone(),
            commit_sha: Some(event.head_sha.clone()).filter(|s| !s.is_empty()),
            pr_number: event.pr_number,
            tag: event.tag.clone(),
            upload_path: None,
            image: None,
        },
        metadata: DeploymentMetadata {
            trigger: Some(event.kind.trigger()),
            branch: event.branch.clone(),
            pr_number: event.pr_number,
            rule_id: Some(rule.id.clone()),
            ..Default::default()
        },
    }
}

pub struct RuleMatcher {
    catalog: Arc<dyn CatalogStore>,
    credentials: Arc<dyn CredentialResolver>,
}

impl RuleMatcher {
    pub fn new(catalog: Arc<dyn CatalogStore>, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            catalog,
            credentials,
        }
    }

    /// Services of the event's repository that are enabled and have credentials
    pub async fn eligible_services(&self, event: &RepositoryEvent) -> Result<Vec<Service>, EngineError> {
        let mut eligible = Vec::new();
        for service in self
            .catalog
            .list_services_for_repository(&event.repository_id)
            .await?
        {
            if !service.enabled {
                debug!("Service {} is disabled, excluded", service.id);
                continue;
            }
            let organization = service.organization.as_deref().or(event.organization.as_deref());
            if !self
                .credentials
                .has_credentials(event.provider, organization)
                .await
            {
                debug!(
                    "No credentials for organization {:?}, service {} excluded",
                    organization, service.id
                );
                continue;
            }
            eligible.push(service);
        }
        Ok(eligible)
    }

    /// Every (service, rule) pair the event triggers
    pub async fn find_matches(&self, event: &RepositoryEvent) -> Result<Vec<RuleMatch>, EngineError> {
        if event.deleted {
            debug!("Ref {} deleted, nothing to build", event.git_ref);
            return Ok(Vec::new());
        }
        if let Some(action) = event.pr_action {
            if !action.is_deployable() {
                debug!("Pull request action {:?} does not build", action);
                return Ok(Vec::new());
            }
        }

        let mut matches = Vec::new();
        for service in self.eligible_services(event).await? {
            let rules = match self.catalog.list_rules(&service.id).await {
                Ok(rules) => rules,
                Err(e) => {
                    warn!("Failed to load rules of service {}: {}", service.id, e);
                    continue;
                }
            };

            for rule in rules {
                match rule_matches(&rule, event) {
                    Ok(true) => {
                        let config = deployment_config(&service, &rule, event);
                        matches.push(RuleMatch {
                            service: service.clone(),
                            rule,
                            config,
                        });
                    }
                    Ok(false) => {}
                    Err(e) => debug!("Rule {} excluded: {}", rule.id, e),
                }
            }
        }

        debug!(
            "Event {} on repository {} matched {} rule(s)",
            event.git_ref,
            event.repository_id,
            matches.len()
        );
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::PullRequestAction;
    use crate::models::rule::CacheStrategy;

    fn rule(event: RuleEvent, branch: Option<&str>, tag: Option<&str>) -> DeploymentRule {
        DeploymentRule {
            id: "rule-1".to_string(),
            service_id: "svc-1".to_string(),
            event,
            branch_pattern: branch.map(str::to_string),
            tag_pattern: tag.map(str::to_string),
            path_filters: Vec::new(),
            environment: Environment::Production,
            cache_strategy: CacheStrategy::Loose,
            trigger_count: 0,
            enabled: true,
        }
    }

    fn push(branch: &str) -> RepositoryEvent {
        RepositoryEvent {
            provider: Provider::Github,
            kind: EventKind::Push,
            repository_id: "42".to_string(),
            repository_url: "https://github.com/acme/shop.git".to_string(),
            organization: Some("acme".to_string()),
            git_ref: format!("refs/heads/{}", branch),
            branch: Some(branch.to_string()),
            pr_number: None,
            pr_action: None,
            tag: None,
            head_sha: "abc".to_string(),
            base_sha: None,
            changed_paths: None,
            deleted: false,
        }
    }

    #[test]
    fn test_branch_rules() {
        assert!(rule_matches(&rule(RuleEvent::Push, Some("main"), None), &push("main")).unwrap());
        assert!(!rule_matches(&rule(RuleEvent::Push, Some("main"), None), &push("dev")).unwrap());
        assert!(rule_matches(&rule(RuleEvent::Push, None, None), &push("dev")).unwrap());
        assert!(rule_matches(&rule(RuleEvent::Any, Some("feat/*"), None), &push("feat/x")).unwrap());
        assert!(!rule_matches(&rule(RuleEvent::Tag, None, None), &push("main")).unwrap());
    }

    #[test]
    fn test_tag_rules_use_tag_pattern() {
        let mut event = push("main");
        event.kind = EventKind::Tag;
        event.branch = None;
        event.tag = Some("v2.0.1".to_string());

        assert!(rule_matches(&rule(RuleEvent::Tag, Some("main"), Some("v*")), &event).unwrap());
        assert!(!rule_matches(&rule(RuleEvent::Tag, None, Some("release-*")), &event).unwrap());
        assert!(rule_matches(&rule(RuleEvent::Tag, None, None), &event).unwrap());
    }

    #[test]
    fn test_branch_only_rule_ignores_tags() {
        let mut event = push("main");
        event.kind = EventKind::Tag;
        event.branch = None;
        event.tag = Some("v2.0.1".to_string());

        assert!(!rule_matches(&rule(RuleEvent::Any, Some("main"), None), &event).unwrap());
        assert!(rule_matches(&rule(RuleEvent::Any, Some("main"), Some("v*")), &event).unwrap());
        assert!(rule_matches(&rule(RuleEvent::Any, None, None), &event).unwrap());
        assert!(rule_matches(&rule(RuleEvent::Any, Some("main"), None), &push("main")).unwrap());

        event.kind = EventKind::Release;
        assert!(rule_matches(&rule(RuleEvent::Release, Some("main"), None), &event).unwrap());
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let mut disabled = rule(RuleEvent::Push, None, None);
        disabled.enabled = false;
        assert!(!rule_matches(&disabled, &push("main")).unwrap());
    }

    #[test]
    fn test_deployment_config_carries_rule_and_ref() {
        let mut event = push("feature/x");
        event.kind = EventKind::PullRequest;
        event.pr_number = Some(5);
        event.pr_action = Some(PullRequestAction::Opened);

        let service = Service {
            id: "svc-1".to_string(),
            project_id: "proj-1".to_string(),
            name: "api".to_string(),
            repository_id: Some("42".to_string()),
            repository_url: None,
            source_type: SourceType::Github,
            organization: None,
            enabled: true,
            port: 3000,
            health_check_path: None,
            resources: None,
            env: Default::default(),
        };
        let config = deployment_config(&service, &rule(RuleEvent::PullRequest, None, None), &event);

        assert_eq!(config.source_config.pr_number, Some(5));
        assert_eq!(
            config.source_config.repository_url.as_deref(),
            Some("https://github.com/acme/shop.git")
        );
        assert_eq!(config.metadata.rule_id.as_deref(), Some("rule-1"));
        assert_eq!(
            config.metadata.trigger,
            Some(crate::models::deployment::TriggerKind::PullRequest)
        );
    }
}
