//! Per-organization provider installations

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::deploy::git::AccessTokens;
use crate::models::event::Provider;
use crate::triggers::matcher::CredentialResolver;

/// Organization key that matches any organization of a provider
pub const ANY_ORGANIZATION: &str = "*";

/// Credentials of one provider installation
#[derive(Debug)]
pub struct Installation {
    pub provider: Provider,
    pub organization: String,

    /// HMAC secret (GitHub) or shared token (GitLab)
    pub webhook_secret: SecretString,

    /// Token used to clone private repositories
    pub access_token: Option<SecretString>,
}

/// Registry of installations keyed by (provider, organization)
#[derive(Debug, Default)]
pub struct AppRegistry {
    installations: RwLock<HashMap<(Provider, String), Arc<Installation>>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, installation: Installation) {
        let key = (installation.provider, installation.organization.to_lowercase());
        info!(
            "Registered {:?} installation for organization {}",
            installation.provider, installation.organization
        );
        self.installations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::new(installation));
    }

    /// Exact organization first, then the provider-wide installation
    pub fn lookup(&self, provider: Provider, organization: Option<&str>) -> Option<Arc<Installation>> {
        let installations = self.installations.read().unwrap_or_else(|e| e.into_inner());
        organization
            .and_then(|org| installations.get(&(provider, org.to_lowercase())))
            .or_else(|| installations.get(&(provider, ANY_ORGANIZATION.to_string())))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.installations.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialResolver for AppRegistry {
    async fn has_credentials(&self, provider: Provider, organization: Option<&str>) -> bool {
        match provider {
            Provider::Manual => true,
            _ => self.lookup(provider, organization).is_some(),
        }
    }
}

impl AccessTokens for AppRegistry {
    fn access_token(&self, provider: Provider, organization: Option<&str>) -> Option<SecretString> {
        self.lookup(provider, organization)?
            .access_token
            .as_ref()
            .map(|token| SecretString::from(token.expose_secret().to_string()))
    }
}
