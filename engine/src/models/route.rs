//! Route models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Routing record owned by a routed deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub id: String,
    pub deployment_id: String,
    pub service_id: String,
    pub subdomain: String,
    pub full_domain: String,
    pub container_id: String,
    pub target_port: u16,
    pub ssl_enabled: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
