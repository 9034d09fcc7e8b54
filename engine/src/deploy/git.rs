//! Source preparation: git checkouts and uploaded archives

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{Deployment, SourceConfig, SourceType};
use crate::models::event::Provider;

/// A source tree ready to build
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSource {
    pub path: PathBuf,

    /// Resolved HEAD for git sources
    pub commit_sha: Option<String>,
}

/// Produces a build context for a deployment
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn prepare(&self, deployment: &Deployment) -> Result<PreparedSource, EngineError>;

    /// Remove the build context once the image exists
    async fn cleanup(&self, source: &PreparedSource) -> Result<(), EngineError>;
}

/// Clone tokens for private repositories
pub trait AccessTokens: Send + Sync {
    fn access_token(&self, provider: Provider, organization: Option<&str>) -> Option<SecretString>;
}

/// Owner segment of a repository url (`acme` in `https://github.com/acme/shop.git`)
pub fn repository_owner(repository_url: &str) -> Option<String> {
    Url::parse(repository_url)
        .ok()?
        .path_segments()?
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Embed a token in an https clone url; other schemes are returned as-is
pub fn authenticated_url(
    repository_url: &str,
    provider: Provider,
    token: &SecretString,
) -> Result<String, EngineError> {
    let mut url = Url::parse(repository_url)
        .map_err(|e| EngineError::ValidationError(format!("Invalid repository url: {}", e)))?;
    if url.scheme() != "https" {
        return Ok(repository_url.to_string());
    }

    let username = match provider {
        Provider::Gitlab => "oauth2",
        _ => "x-access-token",
    };
    url.set_username(username)
        .and_then(|_| url.set_password(Some(token.expose_secret())))
        .map_err(|_| EngineError::ValidationError("Repository url cannot carry credentials".to_string()))?;
    Ok(url.to_string())
}

/// One working directory per deployment under `root`
#[derive(Clone)]
pub struct WorkspaceSources {
    root: Dir,
    git_binary: String,
    tokens: Option<Arc<dyn AccessTokens>>,
}

impl WorkspaceSources {
    pub fn new(root: Dir) -> Self {
        Self {
            root,
            git_binary: "git".to_string(),
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn AccessTokens>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Clone url with credentials when the owner has an access token
    fn clone_url(&self, deployment: &Deployment, url: &str) -> Result<(String, Option<SecretString>), EngineError> {
        let provider = match deployment.source_type {
            SourceType::Github => Provider::Github,
            SourceType::Gitlab => Provider::Gitlab,
            _ => return Ok((url.to_string(), None)),
        };
        let owner = repository_owner(url);
        let token = self
            .tokens
            .as_ref()
            .and_then(|tokens| tokens.access_token(provider, owner.as_deref()));

        match token {
            Some(token) => Ok((authenticated_url(url, provider, &token)?, Some(token))),
            None => Ok((url.to_string(), None)),
        }
    }

    async fn git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, EngineError> {
        // Clone urls may carry a token
        debug!("Running: git {}", args.first().copied().unwrap_or_default());

        let mut command = Command::new(&self.git_binary);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let output = command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| EngineError::SourceError(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            return Err(EngineError::SourceError(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn checkout(&self, deployment: &Deployment, target: &Dir) -> Result<PreparedSource, EngineError> {
        let source = &deployment.source_config;
        let url = source.repository_url.as_deref().ok_or_else(|| {
            EngineError::ValidationError(format!("Deployment {} has no repository url", deployment.id))
        })?;
        let target_str = target.path().display().to_string();

        info!("Cloning {} for deployment {}", url, deployment.id);
        let (clone_url, token) = self.clone_url(deployment, url)?;
        self.clone_into(source, &clone_url, &target_str, target)
            .await
            .map_err(|e| redact(e, token.as_ref()))?;

        let head = self.git(Some(target.path()), &["rev-parse", "HEAD"]).await?;
        Ok(PreparedSource {
            path: target.path().to_path_buf(),
            commit_sha: Some(head),
        })
    }

    async fn clone_into(
        &self,
        source: &SourceConfig,
        url: &str,
        target_str: &str,
        target: &Dir,
    ) -> Result<(), EngineError> {
        match (&source.commit_sha, source.tag.as_ref().or(source.branch.as_ref())) {
            (Some(sha), named) => {
                let mut args = vec!["clone", "--no-checkout"];
                if let Some(named) = named {
                    args.extend(["--branch", named.as_str()]);
                }
                args.extend([url, target_str]);
                self.git(None, &args).await?;
                self.git(Some(target.path()), &["checkout", "--detach", sha.as_str()]).await?;
            }
            (None, Some(named)) => {
                self.git(
                    None,
                    &["clone", "--depth", "1", "--branch", named.as_str(), url, target_str],
                )
                .await?;
            }
            (None, None) => {
                self.git(None, &["clone", "--depth", "1", url, target_str]).await?;
            }
        }
        Ok(())
    }

    async fn extract_upload(&self, deployment: &Deployment, target: &Dir) -> Result<PreparedSource, EngineError> {
        let archive = deployment.source_config.upload_path.clone().ok_or_else(|| {
            EngineError::ValidationError(format!("Deployment {} has no upload path", deployment.id))
        })?;
        let destination = target.path().to_path_buf();

        info!("Extracting upload {} for deployment {}", archive, deployment.id);
        target.create().await?;

        let unpack_to = destination.clone();
        tokio::task::spawn_blocking(move || unpack_tar_gz(Path::new(&archive), &unpack_to))
            .await
            .map_err(|e| EngineError::SourceError(format!("Extraction task failed: {}", e)))??;

        Ok(PreparedSource {
            path: destination,
            commit_sha: None,
        })
    }
}

/// Strip a token git may echo back in its error output
fn redact(error: EngineError, token: Option<&SecretString>) -> EngineError {
    match (error, token) {
        (EngineError::SourceError(message), Some(token)) => {
            EngineError::SourceError(message.replace(token.expose_secret(), "***"))
        }
        (error, _) => error,
    }
}

/// Unpack a gzip-compressed tarball into `destination`
pub fn unpack_tar_gz(archive: &Path, destination: &Path) -> Result<(), EngineError> {
    let file = std::fs::File::open(archive)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut tarball = tar::Archive::new(decoder);
    tarball
        .unpack(destination)
        .map_err(|e| EngineError::SourceError(format!("Failed to unpack {}: {}", archive.display(), e)))
}

#[async_trait]
impl SourceFetcher for WorkspaceSources {
    async fn prepare(&self, deployment: &Deployment) -> Result<PreparedSource, EngineError> {
        let target = self.root.subdir(&deployment.id);
        // A retry starts from a clean tree
        target.delete().await?;

        match deployment.source_type {
            t if t.is_git() => self.checkout(deployment, &target).await,
            SourceType::Upload => self.extract_upload(deployment, &target).await,
            other => Err(EngineError::ValidationError(format!(
                "Source type {:?} has nothing to fetch",
                other
            ))),
        }
    }

    async fn cleanup(&self, source: &PreparedSource) -> Result<(), EngineError> {
        Dir::new(source.path.clone()).delete().await
    }
}
