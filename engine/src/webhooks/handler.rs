//! Inbound webhooks: authenticate, decode, normalize, dispatch

use std::sync::Arc;

use scm_events::models::{github, gitlab};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::models::event::{Provider, RepositoryEvent};
use crate::service::deployments::{DeploymentService, EventOutcome};
use crate::triggers::normalize;
use crate::webhooks::registry::AppRegistry;
use crate::webhooks::signature::{verify_signature, verify_token};

pub const GITHUB_EVENT_HEADER: &str = "x-github-event";
pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";
pub const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

/// Result of one webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Authentic but not an event that deploys anything
    Ignored(String),
    Handled(EventOutcome),
}

fn decode<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, EngineError> {
    serde_json::from_slice(body)
        .map_err(|e| EngineError::ValidationError(format!("Invalid {} payload: {}", what, e)))
}

/// Organization named by a payload, read before the payload is trusted
fn claimed_organization(provider: Provider, body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match provider {
        Provider::Github => value
            .pointer("/repository/owner/login")
            .and_then(Value::as_str)
            .map(str::to_string),
        Provider::Gitlab => value
            .pointer("/project/path_with_namespace")
            .and_then(Value::as_str)
            .and_then(|path| path.split('/').next())
            .filter(|org| !org.is_empty())
            .map(str::to_string),
        Provider::Manual => None,
    }
}

pub struct WebhookHandler {
    registry: Arc<AppRegistry>,
    service: Arc<DeploymentService>,
}

impl WebhookHandler {
    pub fn new(registry: Arc<AppRegistry>, service: Arc<DeploymentService>) -> Self {
        Self { registry, service }
    }

    pub fn registry(&self) -> &Arc<AppRegistry> {
        &self.registry
    }

    /// Verify and normalize a GitHub delivery; `None` for events that never deploy
    pub fn parse_github(
        &self,
        event_type: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<RepositoryEvent>, EngineError> {
        let organization = claimed_organization(Provider::Github, body);
        let installation = self
            .registry
            .lookup(Provider::Github, organization.as_deref())
            .ok_or_else(|| {
                EngineError::AuthError(format!(
                    "No GitHub installation for organization {:?}",
                    organization
                ))
            })?;
        verify_signature(
            installation.webhook_secret.expose_secret().as_bytes(),
            body,
            signature,
        )?;

        let event = match event_type.unwrap_or_default() {
            "push" => normalize::github_push(&decode::<github::PushEvent>(body, "push")?),
            "pull_request" => normalize::github_pull_request(&decode::<github::PullRequestEvent>(
                body,
                "pull_request",
            )?),
            "release" => {
                let release: github::ReleaseEvent = decode(body, "release")?;
                if !matches!(release.action.as_str(), "published" | "released") {
                    debug!("Ignoring release action {}", release.action);
                    return Ok(None);
                }
                normalize::github_release(&release)
            }
            other => {
                debug!("Ignoring GitHub event {:?}", other);
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    /// Verify and normalize a GitLab delivery; `None` for events that never deploy
    pub fn parse_gitlab(
        &self,
        event_type: Option<&str>,
        token: Option<&str>,
        body: &[u8],
    ) -> Result<Option<RepositoryEvent>, EngineError> {
        let organization = claimed_organization(Provider::Gitlab, body);
        let installation = self
            .registry
            .lookup(Provider::Gitlab, organization.as_deref())
            .ok_or_else(|| {
                EngineError::AuthError(format!(
                    "No GitLab installation for group {:?}",
                    organization
                ))
            })?;
        verify_token(installation.webhook_secret.expose_secret().as_bytes(), token)?;

        let event = match event_type.unwrap_or_default() {
            "Push Hook" | "Tag Push Hook" => {
                normalize::gitlab_push(&decode::<gitlab::PushEvent>(body, "push")?)
            }
            "Merge Request Hook" => normalize::gitlab_merge_request(
                &decode::<gitlab::MergeRequestEvent>(body, "merge_request")?,
            ),
            "Release Hook" => {
                let release: gitlab::ReleaseEvent = decode(body, "release")?;
                if release.action != "create" {
                    debug!("Ignoring release action {}", release.action);
                    return Ok(None);
                }
                normalize::gitlab_release(&release)
            }
            other => {
                debug!("Ignoring GitLab event {:?}", other);
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    async fn dispatch(&self, event: Option<RepositoryEvent>) -> Result<WebhookOutcome, EngineError> {
        let Some(event) = event else {
            return Ok(WebhookOutcome::Ignored("event does not deploy".to_string()));
        };
        info!(
            "Webhook {:?} {:?} for repository {} ({})",
            event.provider, event.kind, event.repository_id, event.git_ref
        );
        let outcome = self.service.handle_event(&event).await?;
        if !outcome.failed.is_empty() {
            warn!("{} rule match(es) failed admission", outcome.failed.len());
        }
        Ok(WebhookOutcome::Handled(outcome))
    }

    pub async fn handle_github(
        &self,
        event_type: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, EngineError> {
        let event = self.parse_github(event_type, signature, body)?;
        self.dispatch(event).await
    }

    pub async fn handle_gitlab(
        &self,
        event_type: Option<&str>,
        token: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, EngineError> {
        let event = self.parse_gitlab(event_type, token, body)?;
        self.dispatch(event).await
    }
}
