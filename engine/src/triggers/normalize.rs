//! Provider payloads to `RepositoryEvent`

use std::collections::BTreeSet;

use scm_events::models::{github, gitlab};

use crate::models::event::{EventKind, Provider, PullRequestAction, RepositoryEvent};

const HEADS_PREFIX: &str = "refs/heads/";
const TAGS_PREFIX: &str = "refs/tags/";

/// Split a full ref into (kind, branch, tag)
fn classify_ref(git_ref: &str) -> (EventKind, Option<String>, Option<String>) {
    if let Some(tag) = git_ref.strip_prefix(TAGS_PREFIX) {
        (EventKind::Tag, None, Some(tag.to_string()))
    } else {
        let branch = git_ref.strip_prefix(HEADS_PREFIX).unwrap_or(git_ref);
        (EventKind::Push, Some(branch.to_string()), None)
    }
}

/// Union of files touched by a push, sorted; `None` without commits
fn changed_paths<'a, I>(files: I) -> Option<Vec<String>>
where
    I: IntoIterator<Item = &'a String>,
{
    let paths: BTreeSet<&String> = files.into_iter().collect();
    if paths.is_empty() {
        None
    } else {
        Some(paths.into_iter().cloned().collect())
    }
}

/// All-zero SHA GitHub and GitLab send for a deleted ref
fn is_null_sha(sha: &str) -> bool {
    !sha.is_empty() && sha.chars().all(|c| c == '0')
}

pub fn github_push(event: &github::PushEvent) -> RepositoryEvent {
    let (kind, branch, tag) = classify_ref(&event.git_ref);
    let files = event
        .commits
        .iter()
        .flat_map(|c| c.added.iter().chain(&c.removed).chain(&c.modified));

    RepositoryEvent {
        provider: Provider::Github,
        kind,
        repository_id: event.repository.id.to_string(),
        repository_url: event.repository.clone_url.clone(),
        organization: Some(event.repository.owner.login.clone()),
        git_ref: event.git_ref.clone(),
        branch,
        pr_number: None,
        pr_action: None,
        tag,
        head_sha: event.after.clone(),
        base_sha: Some(event.before.clone()).filter(|s| !is_null_sha(s)),
        changed_paths: changed_paths(files),
        deleted: event.deleted || is_null_sha(&event.after),
    }
}

pub fn github_pull_request(event: &github::PullRequestEvent) -> RepositoryEvent {
    let pr = &event.pull_request;
    RepositoryEvent {
        provider: Provider::Github,
        kind: EventKind::PullRequest,
        repository_id: event.repository.id.to_string(),
        repository_url: event.repository.clone_url.clone(),
        organization: Some(event.repository.owner.login.clone()),
        git_ref: format!("refs/pull/{}/head", pr.number),
        branch: Some(pr.head.git_ref.clone()),
        pr_number: Some(pr.number),
        pr_action: Some(PullRequestAction::parse(&event.action)),
        tag: None,
        head_sha: pr.head.sha.clone(),
        base_sha: Some(pr.base.sha.clone()),
        changed_paths: None,
        deleted: false,
    }
}

pub fn github_release(event: &github::ReleaseEvent) -> RepositoryEvent {
    let tag = event.release.tag_name.clone();
    RepositoryEvent {
        provider: Provider::Github,
        kind: EventKind::Release,
        repository_id: event.repository.id.to_string(),
        repository_url: event.repository.clone_url.clone(),
        organization: Some(event.repository.owner.login.clone()),
        git_ref: format!("{}{}", TAGS_PREFIX, tag),
        branch: None,
        pr_number: None,
        pr_action: None,
        head_sha: event.release.target_commitish.clone().unwrap_or_default(),
        tag: Some(tag),
        base_sha: None,
        changed_paths: None,
        deleted: false,
    }
}

/// Namespace of a GitLab project path (`group/sub/project` -> `group`)
fn gitlab_organization(project: &gitlab::Project) -> Option<String> {
    project
        .path_with_namespace
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn gitlab_push(event: &gitlab::PushEvent) -> RepositoryEvent {
    let (kind, branch, tag) = classify_ref(&event.git_ref);
    let files = event
        .commits
        .iter()
        .flat_map(|c| c.added.iter().chain(&c.removed).chain(&c.modified));
    let head_sha = event
        .checkout_sha
        .clone()
        .unwrap_or_else(|| event.after.clone());

    RepositoryEvent {
        provider: Provider::Gitlab,
        kind,
        repository_id: event.project.id.to_string(),
        repository_url: event.project.git_http_url.clone(),
        organization: gitlab_organization(&event.project),
        git_ref: event.git_ref.clone(),
        branch,
        pr_number: None,
        pr_action: None,
        tag,
        deleted: is_null_sha(&event.after),
        head_sha,
        base_sha: Some(event.before.clone()).filter(|s| !is_null_sha(s)),
        changed_paths: changed_paths(files),
    }
}

pub fn gitlab_merge_request(event: &gitlab::MergeRequestEvent) -> RepositoryEvent {
    let attrs = &event.object_attributes;
    let action = match attrs.action.as_deref() {
        Some(action) => PullRequestAction::parse(action),
        None => PullRequestAction::parse(&attrs.state),
    };

    RepositoryEvent {
        provider: Provider::Gitlab,
        kind: EventKind::PullRequest,
        repository_id: event.project.id.to_string(),
        repository_url: event.project.git_http_url.clone(),
        organization: gitlab_organization(&event.project),
        git_ref: format!("refs/merge-requests/{}/head", attrs.iid),
        branch: Some(attrs.source_branch.clone()),
        pr_number: Some(attrs.iid),
        pr_action: Some(action),
        tag: None,
        head_sha: attrs.last_commit.id.clone(),
        base_sha: None,
        changed_paths: None,
        deleted: false,
    }
}

pub fn gitlab_release(event: &gitlab::ReleaseEvent) -> RepositoryEvent {
    RepositoryEvent {
        provider: Provider::Gitlab,
        kind: EventKind::Release,
        repository_id: event.project.id.to_string(),
        repository_url: event.project.git_http_url.clone(),
        organization: gitlab_organization(&event.project),
        git_ref: format!("{}{}", TAGS_PREFIX, event.tag),
        branch: None,
        pr_number: None,
        pr_action: None,
        tag: Some(event.tag.clone()),
        head_sha: String::new(),
        base_sha: None,
        changed_paths: None,
        deleted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github_repo() -> serde_json::Value {
        serde_json::json!({
            "id": 42,
            "full_name": "acme/shop",
            "clone_url": "https://github.com/acme/shop.git",
            "owner": {"login": "acme"}
        })
    }

    #[test]
    fn test_github_push_branch() {
        let payload = serde_json::json!({
            "ref": "refs/heads/main",
            "before": "0000000000000000000000000000000000000000",
            "after": "abc123",
            "commits": [
                {"id": "1", "added": ["api/a.rs"], "modified": ["README.md"]},
                {"id": "2", "modified": ["api/a.rs"]}
            ],
            "repository": github_repo()
        });
        let event: github::PushEvent = serde_json::from_value(payload).unwrap();
        let normalized = github_push(&event);

        assert_eq!(normalized.kind, EventKind::Push);
        assert_eq!(normalized.branch.as_deref(), Some("main"));
        assert_eq!(normalized.repository_id, "42");
        assert_eq!(normalized.organization.as_deref(), Some("acme"));
        assert_eq!(normalized.base_sha, None);
        assert_eq!(
            normalized.changed_paths,
            Some(vec!["README.md".to_string(), "api/a.rs".to_string()])
        );
        assert!(!normalized.deleted);
    }

    #[test]
    fn test_github_push_tag_without_commits() {
        let payload = serde_json::json!({
            "ref": "refs/tags/v1.2.0",
            "before": "0000000000000000000000000000000000000000",
            "after": "abc123",
            "repository": github_repo()
        });
        let event: github::PushEvent = serde_json::from_value(payload).unwrap();
        let normalized = github_push(&event);

        assert_eq!(normalized.kind, EventKind::Tag);
        assert_eq!(normalized.tag.as_deref(), Some("v1.2.0"));
        assert_eq!(normalized.branch, None);
        assert_eq!(normalized.changed_paths, None);
    }

    #[test]
    fn test_github_pull_request() {
        let payload = serde_json::json!({
            "action": "synchronize",
            "number": 7,
            "pull_request": {
                "number": 7,
                "head": {"ref": "feature/login", "sha": "fff"},
                "base": {"ref": "main", "sha": "aaa"}
            },
            "repository": github_repo()
        });
        let event: github::PullRequestEvent = serde_json::from_value(payload).unwrap();
        let normalized = github_pull_request(&event);

        assert_eq!(normalized.pr_number, Some(7));
        assert_eq!(normalized.pr_action, Some(PullRequestAction::Synchronize));
        assert_eq!(normalized.branch.as_deref(), Some("feature/login"));
        assert_eq!(normalized.head_sha, "fff");
    }

    #[test]
    fn test_gitlab_merge_request_falls_back_to_state() {
        let payload = serde_json::json!({
            "object_kind": "merge_request",
            "object_attributes": {
                "iid": 3,
                "state": "closed",
                "source_branch": "fix",
                "target_branch": "main",
                "last_commit": {"id": "bbb"}
            },
            "project": {
                "id": 9,
                "path_with_namespace": "group/app",
                "git_http_url": "https://gitlab.com/group/app.git"
            }
        });
        let event: gitlab::MergeRequestEvent = serde_json::from_value(payload).unwrap();
        let normalized = gitlab_merge_request(&event);

        assert_eq!(normalized.pr_action, Some(PullRequestAction::Closed));
        assert_eq!(normalized.organization.as_deref(), Some("group"));
    }
}
