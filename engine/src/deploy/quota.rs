//! Resource quota admission

use crate::errors::EngineError;
use crate::models::deployment::{Deployment, Environment};
use crate::models::service::{ResourceQuota, ResourceRequirements, ResourceUsage, Service};
use crate::store::{CatalogStore, DeploymentStore};

/// Compare projected usage against a quota
pub fn evaluate(
    quota: &ResourceQuota,
    usage: &ResourceUsage,
    requested: &ResourceRequirements,
) -> Result<(), EngineError> {
    let projected = usage.add(requested);
    let mut exceeded = Vec::new();

    if let Some(max) = quota.max_cpu_millicores {
        if projected.cpu_millicores > max {
            exceeded.push(format!("cpu {}m > {}m", projected.cpu_millicores, max));
        }
    }
    if let Some(max) = quota.max_memory_mb {
        if projected.memory_mb > max {
            exceeded.push(format!("memory {}MB > {}MB", projected.memory_mb, max));
        }
    }
    if let Some(max) = quota.max_replicas {
        if projected.replicas > max {
            exceeded.push(format!("replicas {} > {}", projected.replicas, max));
        }
    }

    if exceeded.is_empty() {
        Ok(())
    } else {
        Err(EngineError::QuotaExceeded(format!(
            "project {}: {}",
            quota.project_id,
            exceeded.join(", ")
        )))
    }
}

/// Refuse a deployment whose declared resources would exceed the project quota
///
/// Usage includes deployments still in flight. Whatever the coordinate already
/// holds is about to be cancelled or replaced, so it is not counted twice.
pub async fn check(
    catalog: &dyn CatalogStore,
    deployments: &dyn DeploymentStore,
    service: &Service,
    deployment: &Deployment,
) -> Result<(), EngineError> {
    let Some(requested) = service.resources else {
        return Ok(());
    };
    let environment: Environment = deployment.environment;
    let Some(quota) = catalog.get_quota(&service.project_id, environment).await? else {
        return Ok(());
    };

    let mut usage = catalog.get_usage(&service.project_id, environment).await?;
    let replaced = deployments
        .list_for_coordinate(&deployment.coordinate())
        .await?
        .iter()
        .filter(|d| d.holds_resources())
        .count() as u64;
    if replaced > 0 {
        let replicas = requested.replicas.max(1);
        let share = replicas as u64 * replaced;
        usage.cpu_millicores = usage
            .cpu_millicores
            .saturating_sub(requested.cpu_millicores * share);
        usage.memory_mb = usage.memory_mb.saturating_sub(requested.memory_mb * share);
        usage.replicas = usage.replicas.saturating_sub(replicas * replaced as u32);
    }

    evaluate(&quota, &usage, &requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota() -> ResourceQuota {
        ResourceQuota {
            project_id: "proj-1".to_string(),
            environment: None,
            max_cpu_millicores: Some(1000),
            max_memory_mb: Some(1024),
            max_replicas: Some(4),
        }
    }

    #[test]
    fn test_within_quota() {
        let usage = ResourceUsage {
            cpu_millicores: 500,
            memory_mb: 512,
            replicas: 1,
        };
        let requested = ResourceRequirements {
            cpu_millicores: 500,
            memory_mb: 512,
            replicas: 1,
        };
        assert!(evaluate(&quota(), &usage, &requested).is_ok());
    }

    #[test]
    fn test_exceeding_quota_names_every_resource() {
        let usage = ResourceUsage {
            cpu_millicores: 900,
            memory_mb: 1000,
            replicas: 1,
        };
        let requested = ResourceRequirements {
            cpu_millicores: 200,
            memory_mb: 100,
            replicas: 1,
        };
        let err = evaluate(&quota(), &usage, &requested).unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, EngineError::QuotaExceeded(_)));
        assert!(message.contains("cpu"));
        assert!(message.contains("memory"));
        assert!(!message.contains("replicas"));
    }
}
