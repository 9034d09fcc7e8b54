//! Subdomain and branch pattern unit tests

use dockhand::models::deployment::Environment;
use dockhand::routing::subdomain::{
    derive_subdomain, with_collision_suffix, SubdomainParts, MAX_LABEL_LEN,
};
use dockhand::triggers::pattern::{any_path_matches, Pattern};

fn parts(environment: Environment) -> SubdomainParts<'static> {
    SubdomainParts {
        project: "Shop",
        service: "API Server",
        environment,
        branch: None,
        pr_number: None,
    }
}

#[test]
fn test_subdomain_per_environment() {
    assert_eq!(derive_subdomain(&parts(Environment::Production)), "api-server-shop");
    assert_eq!(
        derive_subdomain(&parts(Environment::Staging)),
        "api-server-shop-staging"
    );
    assert_eq!(
        derive_subdomain(&SubdomainParts {
            pr_number: Some(42),
            ..parts(Environment::Preview)
        }),
        "api-server-pr-42-shop"
    );
    assert_eq!(
        derive_subdomain(&SubdomainParts {
            branch: Some("feature/Login"),
            ..parts(Environment::Preview)
        }),
        "api-server-feature-login-shop"
    );
}

#[test]
fn test_long_subdomains_stay_valid_and_distinct() {
    let a = derive_subdomain(&SubdomainParts {
        branch: Some("feature/an-extremely-long-branch-name-that-keeps-going-and-going-a"),
        ..parts(Environment::Preview)
    });
    let b = derive_subdomain(&SubdomainParts {
        branch: Some("feature/an-extremely-long-branch-name-that-keeps-going-and-going-b"),
        ..parts(Environment::Preview)
    });

    assert!(a.len() <= MAX_LABEL_LEN);
    assert!(b.len() <= MAX_LABEL_LEN);
    assert_ne!(a, b);
}

#[test]
fn test_collision_suffix_depends_on_service() {
    let a = with_collision_suffix("api-shop", "svc-1");
    let b = with_collision_suffix("api-shop", "svc-2");
    assert!(a.starts_with("api-shop-"));
    assert_ne!(a, b);
}

#[test]
fn test_branch_patterns() {
    let release = Pattern::compile(Some("release/*")).unwrap();
    assert!(release.matches("release/1.2"));
    assert!(!release.matches("release/1.2/hotfix"));
    assert!(!release.matches("main"));

    let main = Pattern::compile(Some("main")).unwrap();
    assert!(main.matches("main"));
    assert!(!main.matches("main-old"));

    assert!(Pattern::compile(None).unwrap().is_any());
}

#[test]
fn test_watched_paths() {
    let filters = vec!["services/api".to_string(), "**/*.proto".to_string()];
    assert!(any_path_matches(&filters, &["services/api/main.rs".to_string()]));
    assert!(any_path_matches(&filters, &["proto/user.proto".to_string()]));
    assert!(!any_path_matches(&filters, &["services/web/index.ts".to_string()]));
}
