//! Cache unit tests

use dockhand::cache::deployment::DeploymentCache;

#[test]
fn test_deployment_cache_record_and_get() {
    let cache = DeploymentCache::new(10);

    cache.record_success("svc-1", "main", "abc123", "d-1");

    let entry = cache.get("svc-1", "main");
    assert!(entry.is_some());
    assert_eq!(entry.unwrap().deployment_id, "d-1");
    assert!(cache.is_deployed("svc-1", "main", "abc123"));
    assert!(!cache.is_deployed("svc-1", "main", "def456"));
    assert!(!cache.is_deployed("svc-1", "develop", "abc123"));
}

#[test]
fn test_deployment_cache_eviction() {
    let cache = DeploymentCache::new(2);

    cache.record_success("svc-1", "main", "a", "d-1");
    cache.record_success("svc-2", "main", "b", "d-2");
    cache.record_success("svc-3", "main", "c", "d-3");

    // Oldest entry goes first
    assert_eq!(cache.len(), 2);
    assert!(cache.get("svc-1", "main").is_none());
    assert!(cache.get("svc-3", "main").is_some());
}

#[test]
fn test_deployment_cache_overwrite_does_not_evict() {
    let cache = DeploymentCache::new(2);

    cache.record_success("svc-1", "main", "a", "d-1");
    cache.record_success("svc-2", "main", "b", "d-2");
    cache.record_success("svc-1", "main", "c", "d-3");

    assert_eq!(cache.len(), 2);
    assert!(cache.is_deployed("svc-1", "main", "c"));
    assert!(cache.get("svc-2", "main").is_some());
}

#[test]
fn test_deployment_cache_invalidate_only_matching_deployment() {
    let cache = DeploymentCache::new(10);
    cache.record_success("svc-1", "main", "abc", "d-2");

    cache.invalidate("svc-1", "main", "d-1");
    assert!(cache.get("svc-1", "main").is_some());

    cache.invalidate("svc-1", "main", "d-2");
    assert!(cache.get("svc-1", "main").is_none());
}
