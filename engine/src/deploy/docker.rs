//! Docker CLI runtime and builder

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, ImageBuilder,
    DEPLOYMENT_LABEL,
};
use crate::errors::EngineError;

/// Talks to the local docker daemon through the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run docker with `args` and return trimmed stdout
    async fn docker(&self, args: &[String]) -> Result<String, EngineError> {
        debug!("Running: {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::RuntimeError(format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::RuntimeError(format!(
                "docker {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Arguments of `docker run` for a spec
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--restart".to_string(),
        "unless-stopped".to_string(),
        "--expose".to_string(),
        spec.port.to_string(),
    ];

    for (key, value) in spec.labels() {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push("-e".to_string());
    args.push(format!("PORT={}", spec.port));
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    if let Some(cpu) = spec.cpu_millicores {
        args.push("--cpus".to_string());
        args.push(format!("{:.3}", cpu as f64 / 1000.0));
    }
    if let Some(memory) = spec.memory_mb {
        args.push("--memory".to_string());
        args.push(format!("{}m", memory));
    }
    if let Some(network) = &spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }

    args.push(spec.image.clone());
    args
}

/// One line of `docker ps --format '{{json .}}'`
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "State")]
    state: String,
}

impl From<PsLine> for ContainerInfo {
    fn from(line: PsLine) -> Self {
        ContainerInfo {
            id: line.id,
            name: line.names,
            image: line.image,
            state: ContainerState::parse(&line.state),
        }
    }
}

fn parse_ps_output(stdout: &str) -> Result<Vec<ContainerInfo>, EngineError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let parsed: PsLine = serde_json::from_str(line)?;
            Ok(parsed.into())
        })
        .collect()
}

/// Interpret `{{.State.Status}} {{.State.Health.Status}}` output
fn parse_health(inspect: &str) -> bool {
    let mut parts = inspect.split_whitespace();
    let running = parts.next() == Some("running");
    match parts.next() {
        Some(health) => running && health == "healthy",
        None => running,
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        if self.get_info(&spec.name).await?.is_some() {
            info!("Replacing existing container: {}", spec.name);
            self.docker(&["rm".to_string(), "-f".to_string(), spec.name.clone()])
                .await?;
        }

        let container_id = self.docker(&run_args(spec)).await?;
        info!("Started container {} ({})", spec.name, container_id);
        Ok(container_id)
    }

    async fn start(&self, id_or_name: &str) -> Result<(), EngineError> {
        self.docker(&["start".to_string(), id_or_name.to_string()])
            .await
            .map(|_| ())
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        self.docker(&["stop".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.docker(&["rm".to_string(), "-f".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }

    async fn restart(&self, id: &str) -> Result<(), EngineError> {
        self.docker(&["restart".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }

    async fn check_health(&self, id: &str) -> Result<bool, EngineError> {
        let inspect = self
            .docker(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{.State.Status}} {{if .State.Health}}{{.State.Health.Status}}{{end}}".to_string(),
                id.to_string(),
            ])
            .await?;
        Ok(parse_health(&inspect))
    }

    async fn list_by_deployment(&self, deployment_id: &str) -> Result<Vec<ContainerInfo>, EngineError> {
        let stdout = self
            .docker(&[
                "ps".to_string(),
                "-a".to_string(),
                "--no-trunc".to_string(),
                "--filter".to_string(),
                format!("label={}={}", DEPLOYMENT_LABEL, deployment_id),
                "--format".to_string(),
                "{{json .}}".to_string(),
            ])
            .await?;
        parse_ps_output(&stdout)
    }

    async fn get_info(&self, id_or_name: &str) -> Result<Option<ContainerInfo>, EngineError> {
        let stdout = self
            .docker(&[
                "ps".to_string(),
                "-a".to_string(),
                "--no-trunc".to_string(),
                "--filter".to_string(),
                format!("name=^{}$", id_or_name),
                "--format".to_string(),
                "{{json .}}".to_string(),
            ])
            .await?;
        let mut found = parse_ps_output(&stdout)?;
        if !found.is_empty() {
            return Ok(Some(found.remove(0)));
        }

        let stdout = self
            .docker(&[
                "ps".to_string(),
                "-a".to_string(),
                "--no-trunc".to_string(),
                "--filter".to_string(),
                format!("id={}", id_or_name),
                "--format".to_string(),
                "{{json .}}".to_string(),
            ])
            .await?;
        Ok(parse_ps_output(&stdout)?.into_iter().next())
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build(&self, source_path: &Path, image_tag: &str) -> Result<String, EngineError> {
        info!("Building image {} from {}", image_tag, source_path.display());

        if !source_path.join("Dockerfile").exists() {
            warn!("No Dockerfile in {}", source_path.display());
            return Err(EngineError::BuildError(format!(
                "No Dockerfile found in {}",
                source_path.display()
            )));
        }

        self.docker(&[
            "build".to_string(),
            "-t".to_string(),
            image_tag.to_string(),
            source_path.display().to_string(),
        ])
        .await
        .map_err(|e| EngineError::BuildError(e.to_string()))?;

        Ok(image_tag.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec() -> ContainerSpec {
        let mut env = BTreeMap::new();
        env.insert("NODE_ENV".to_string(), "production".to_string());
        ContainerSpec {
            name: "api-shop-production".to_string(),
            image: "dockhand/api:abc".to_string(),
            deployment_id: "d-1".to_string(),
            service_id: "svc-1".to_string(),
            port: 8080,
            env,
            cpu_millicores: Some(500),
            memory_mb: Some(256),
            network: None,
        }
    }

    #[test]
    fn test_run_args() {
        let args = run_args(&spec());
        assert_eq!(args[0], "run");
        assert!(args.contains(&"dockhand.deployment=d-1".to_string()));
        assert!(args.contains(&"NODE_ENV=production".to_string()));
        assert!(args.contains(&"PORT=8080".to_string()));
        assert!(args.contains(&"0.500".to_string()));
        assert!(args.contains(&"256m".to_string()));
        assert_eq!(args.last().unwrap(), "dockhand/api:abc");
    }

    #[test]
    fn test_parse_ps_output() {
        let stdout = r#"{"ID":"abc123","Names":"api-shop","Image":"dockhand/api:1","State":"running"}
{"ID":"def456","Names":"api-shop-old","Image":"dockhand/api:0","State":"exited"}"#;
        let containers = parse_ps_output(stdout).unwrap();
        assert_eq!(containers.len(), 2);
        assert!(containers[0].is_running());
        assert_eq!(containers[1].state, ContainerState::Exited);
        assert!(parse_ps_output("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_health() {
        assert!(parse_health("running"));
        assert!(parse_health("running healthy"));
        assert!(!parse_health("running unhealthy"));
        assert!(!parse_health("running starting"));
        assert!(!parse_health("exited"));
    }
}
