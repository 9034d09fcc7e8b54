//! Subdomain derivation
//!
//! Grammar:
//! - production: `{service}-{project}`
//! - staging / development: `{service}-{project}-{env}`
//! - preview: `{service}-pr-{n}-{project}` or `{service}-{branch}-{project}`
//!
//! Every part is slugified. A label longer than 63 characters is cut and given
//! an 8-character hash suffix so distinct long inputs stay distinct.

use crate::models::deployment::Environment;
use crate::utils::{short_hash, slugify};

/// DNS label length limit
pub const MAX_LABEL_LEN: usize = 63;

/// Inputs of a subdomain
#[derive(Debug, Clone, Copy)]
pub struct SubdomainParts<'a> {
    pub project: &'a str,
    pub service: &'a str,
    pub environment: Environment,
    pub branch: Option<&'a str>,
    pub pr_number: Option<u64>,
}

/// Deterministic subdomain for a deployment
pub fn derive_subdomain(parts: &SubdomainParts<'_>) -> String {
    let service = slugify(parts.service);
    let project = slugify(parts.project);

    let label = match parts.environment {
        Environment::Production => format!("{}-{}", service, project),
        Environment::Staging | Environment::Development => {
            format!("{}-{}-{}", service, project, parts.environment.as_str())
        }
        Environment::Preview => match (parts.pr_number, parts.branch.map(slugify)) {
            (Some(pr), _) => format!("{}-pr-{}-{}", service, pr, project),
            (None, Some(branch)) if !branch.is_empty() => {
                format!("{}-{}-{}", service, branch, project)
            }
            _ => format!("{}-{}-preview", service, project),
        },
    };

    fit_label(&label)
}

/// Disambiguate a subdomain already owned by another service
pub fn with_collision_suffix(subdomain: &str, service_id: &str) -> String {
    fit_label(&format!("{}-{}", subdomain, short_hash(service_id)))
}

/// Truncate to a valid DNS label, keeping it unique with a hash suffix
pub fn fit_label(label: &str) -> String {
    if label.len() <= MAX_LABEL_LEN {
        return label.to_string();
    }

    let hash = short_hash(label);
    let keep = MAX_LABEL_LEN - hash.len() - 1;
    let head = label[..keep].trim_end_matches('-');
    format!("{}-{}", head, hash)
}
