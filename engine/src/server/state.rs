//! Server state

use std::sync::Arc;

use crate::service::deployments::DeploymentService;
use crate::webhooks::handler::WebhookHandler;

/// Server state shared across handlers
pub struct ServerState {
    pub service: Arc<DeploymentService>,
    pub webhooks: Arc<WebhookHandler>,
}

impl ServerState {
    pub fn new(service: Arc<DeploymentService>, webhooks: Arc<WebhookHandler>) -> Self {
        Self { service, webhooks }
    }
}
