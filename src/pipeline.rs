use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::debug;

use crate::domain::{Activity, ActivityAction, TaskType};
use crate::github::{self, RawEvent, SearchItem};

/// Maps one raw feed event onto a normalized activity, or discards it.
/// Pure transformation; events the report does not care about yield `None`.
pub fn classify(event: RawEvent) -> Option<Activity> {
    match event {
        RawEvent::Issues(event) => {
            let repo = event.repo.to_repo_ref()?;
            let action = if event.payload.action == "opened" {
                ActivityAction::CreatedIssue
            } else {
                ActivityAction::UpdatedIssue
            };
            let issue = event.payload.issue;
            Some(Activity {
                id: Some(issue.id),
                title: issue.title,
                api_url: issue.url,
                html_url: issue.html_url,
                task_type: TaskType::Issue,
                action,
                author: event.actor.login,
                created_at: event.created_at,
                repo,
            })
        }
        RawEvent::IssueComment(event) => {
            let repo = event.repo.to_repo_ref()?;
            let issue = event.payload.issue;
            // Comments on pull requests arrive as issue comments; the
            // pull_request marker tells the two apart.
            let (task_type, action) = if issue.pull_request.is_some() {
                (TaskType::Pr, ActivityAction::ReviewedPr)
            } else {
                (TaskType::Issue, ActivityAction::UpdatedIssue)
            };
            Some(Activity {
                id: Some(issue.id),
                title: issue.title,
                api_url: issue.url,
                html_url: issue.html_url,
                task_type,
                action,
                author: event.actor.login,
                created_at: event.created_at,
                repo,
            })
        }
        RawEvent::PullRequest(event) => {
            let repo = event.repo.to_repo_ref()?;
            let pr = event.payload.pull_request;
            Some(Activity {
                id: Some(pr.id),
                // The payload carries no subject line; backfill resolves it.
                title: String::new(),
                html_url: github::pr_html_url(&pr.url),
                api_url: pr.url,
                task_type: TaskType::Pr,
                action: ActivityAction::CreatedPr,
                author: event.actor.login,
                created_at: event.created_at,
                repo,
            })
        }
        RawEvent::PullRequestReview(event) => {
            let repo = event.repo.to_repo_ref()?;
            let pr = event.payload.pull_request;
            Some(Activity {
                id: Some(pr.id),
                title: String::new(),
                html_url: github::pr_html_url(&pr.url),
                api_url: pr.url,
                task_type: TaskType::Pr,
                action: ActivityAction::ReviewedPr,
                author: event.actor.login,
                created_at: event.created_at,
                repo,
            })
        }
        RawEvent::Uncared => None,
    }
}

/// Converts one authored-PR search hit into an activity. The search response
/// carries the title directly, so these never need backfill.
pub fn classify_search_item(item: SearchItem) -> Option<Activity> {
    let repo = github::repo_ref_from_api_url(&item.repository_url)?;
    Some(Activity {
        id: Some(item.id),
        title: item.title,
        api_url: item.url,
        html_url: item.html_url,
        task_type: TaskType::Pr,
        action: ActivityAction::CreatedPr,
        author: item.user.map(|user| user.login).unwrap_or_default(),
        created_at: item.created_at,
        repo,
    })
}

/// Inclusive-exclusive window check: `since <= created_at < until`. All
/// timestamps are UTC-normalized, so the comparison is timezone-safe.
pub fn within_window(activity: &Activity, since: DateTime<Utc>, until: DateTime<Utc>) -> bool {
    activity.created_at >= since && activity.created_at < until
}

/// Admits the candidate unless an existing member already refers to the same
/// issue/PR (same non-empty id within the same repository). Activities
/// without an id are never deduplicated.
pub fn admit(existing: &[Activity], candidate: &Activity) -> bool {
    let Some(id) = candidate.id else {
        return true;
    };
    !existing
        .iter()
        .any(|activity| activity.id == Some(id) && activity.repo == candidate.repo)
}

/// Runs one batch of raw events through classification, window filtering and
/// deduplication, appending survivors to `store` in feed order (the feed is
/// already reverse-chronological; no re-sort happens). Returns the number of
/// activities added.
pub fn reconcile_events(
    events: Vec<RawEvent>,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    allowlist: &HashSet<String>,
    store: &mut Vec<Activity>,
) -> usize {
    let mut added = 0;
    for event in events {
        let Some(activity) = classify(event) else {
            continue;
        };
        if !within_window(&activity, since, until) {
            debug!(
                "skipping activity outside window: {} at {}",
                activity.repo.long_name(),
                activity.created_at
            );
            continue;
        }
        if !allowlist.contains(&activity.repo.long_name()) {
            debug!(
                "skipping activity from unconfigured repo {}",
                activity.repo.long_name()
            );
            continue;
        }
        if admit(store, &activity) {
            store.push(activity);
            added += 1;
        } else {
            debug!("duplicate activity dropped: {}", activity.api_url);
        }
    }
    added
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Host, RepoRef};
    use chrono::TimeZone;
    use serde_json::json;

    fn event(value: serde_json::Value) -> RawEvent {
        serde_json::from_value(value).expect("test event decodes")
    }

    fn pr_event(repo: &str, id: u64, created_at: &str) -> RawEvent {
        event(json!({
            "type": "PullRequestEvent",
            "actor": {"login": "octocat"},
            "repo": {"name": repo},
            "created_at": created_at,
            "payload": {
                "action": "opened",
                "pull_request": {
                    "id": id,
                    "url": format!("https://api.github.com/repos/{repo}/pulls/7"),
                }
            }
        }))
    }

    fn issues_event(action: &str) -> RawEvent {
        event(json!({
            "type": "IssuesEvent",
            "actor": {"login": "octocat"},
            "repo": {"name": "acme/widgets"},
            "created_at": "2024-01-01T10:00:00Z",
            "payload": {
                "action": action,
                "issue": {
                    "id": 11,
                    "url": "https://api.github.com/repos/acme/widgets/issues/3",
                    "html_url": "https://github.com/acme/widgets/issues/3",
                    "title": "Broken widget",
                }
            }
        }))
    }

    fn issue_comment_event(on_pull_request: bool) -> RawEvent {
        let mut issue = json!({
            "id": 21,
            "url": "https://api.github.com/repos/acme/widgets/issues/5",
            "html_url": "https://github.com/acme/widgets/pull/5",
            "title": "Speed up rendering",
        });
        if on_pull_request {
            issue["pull_request"] = json!({"url": "https://api.github.com/repos/acme/widgets/pulls/5"});
        }
        event(json!({
            "type": "IssueCommentEvent",
            "actor": {"login": "octocat"},
            "repo": {"name": "acme/widgets"},
            "created_at": "2024-01-01T10:00:00Z",
            "payload": {"action": "created", "issue": issue}
        }))
    }

    fn sample_activity(repo: &str, id: Option<u64>) -> Activity {
        Activity {
            id,
            title: "Some title".to_owned(),
            api_url: String::new(),
            html_url: String::new(),
            task_type: TaskType::Issue,
            action: ActivityAction::CreatedIssue,
            author: "octocat".to_owned(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            repo: RepoRef::parse(repo, Host::Github).unwrap(),
        }
    }

    #[test]
    fn pull_request_event_yields_untitled_created_pr() {
        let activity = classify(pr_event("a/b", 42, "2024-01-01T10:00:00Z")).unwrap();
        assert_eq!(activity.task_type, TaskType::Pr);
        assert_eq!(activity.action, ActivityAction::CreatedPr);
        assert_eq!(activity.title, "");
        assert_eq!(activity.id, Some(42));
        assert_eq!(activity.html_url, "https://github.com/a/b/pull/7");
        assert_eq!(activity.api_url, "https://api.github.com/repos/a/b/pulls/7");
    }

    #[test]
    fn pull_request_review_event_yields_untitled_reviewed_pr() {
        let activity = classify(event(json!({
            "type": "PullRequestReviewEvent",
            "actor": {"login": "octocat"},
            "repo": {"name": "a/b"},
            "created_at": "2024-01-01T10:00:00Z",
            "payload": {
                "pull_request": {
                    "id": 43,
                    "url": "https://api.github.com/repos/a/b/pulls/8",
                }
            }
        })))
        .unwrap();
        assert_eq!(activity.task_type, TaskType::Pr);
        assert_eq!(activity.action, ActivityAction::ReviewedPr);
        assert_eq!(activity.title, "");
    }

    #[test]
    fn issues_event_action_depends_on_payload_action() {
        let opened = classify(issues_event("opened")).unwrap();
        assert_eq!(opened.action, ActivityAction::CreatedIssue);
        assert_eq!(opened.task_type, TaskType::Issue);
        assert_eq!(opened.title, "Broken widget");

        let closed = classify(issues_event("closed")).unwrap();
        assert_eq!(closed.action, ActivityAction::UpdatedIssue);
    }

    #[test]
    fn issue_comment_on_pull_request_counts_as_review() {
        let activity = classify(issue_comment_event(true)).unwrap();
        assert_eq!(activity.task_type, TaskType::Pr);
        assert_eq!(activity.action, ActivityAction::ReviewedPr);
        assert_eq!(activity.title, "Speed up rendering");
    }

    #[test]
    fn issue_comment_on_plain_issue_counts_as_update() {
        let activity = classify(issue_comment_event(false)).unwrap();
        assert_eq!(activity.task_type, TaskType::Issue);
        assert_eq!(activity.action, ActivityAction::UpdatedIssue);
    }

    #[test]
    fn uncared_events_are_discarded() {
        let watch = event(json!({
            "type": "WatchEvent",
            "actor": {"login": "octocat"},
            "repo": {"name": "a/b"},
            "created_at": "2024-01-01T10:00:00Z",
            "payload": {"action": "started"}
        }));
        assert!(classify(watch).is_none());
    }

    #[test]
    fn window_is_inclusive_exclusive() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let mut at_since = sample_activity("a/b", Some(1));
        at_since.created_at = since;
        assert!(within_window(&at_since, since, until));

        let mut at_until = sample_activity("a/b", Some(2));
        at_until.created_at = until;
        assert!(!within_window(&at_until, since, until));
    }

    #[test]
    fn duplicate_repo_and_id_is_rejected() {
        let mut store = vec![sample_activity("a/b", Some(7))];
        let duplicate = sample_activity("a/b", Some(7));
        assert!(!admit(&store, &duplicate));

        let same_id_other_repo = sample_activity("c/d", Some(7));
        assert!(admit(&store, &same_id_other_repo));
        store.push(same_id_other_repo);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn activities_without_id_bypass_deduplication() {
        let mut store = vec![sample_activity("a/b", None)];
        let candidate = sample_activity("a/b", None);
        assert!(admit(&store, &candidate));
        store.push(candidate);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn reconcile_applies_window_allowlist_and_dedup() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let allowlist: HashSet<String> = [String::from("a/b")].into();

        let events = vec![
            pr_event("a/b", 42, "2024-01-01T10:00:00Z"),
            // Same underlying PR seen again.
            pr_event("a/b", 42, "2024-01-01T11:00:00Z"),
            // Outside the allowlist.
            pr_event("c/d", 43, "2024-01-01T10:00:00Z"),
            // Outside the window.
            pr_event("a/b", 44, "2024-01-03T10:00:00Z"),
        ];

        let mut store = Vec::new();
        let added = reconcile_events(events, since, until, &allowlist, &mut store);
        assert_eq!(added, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store[0].id, Some(42));
        assert_eq!(store[0].action, ActivityAction::CreatedPr);
        assert_eq!(store[0].title, "");
    }

    #[test]
    fn search_item_becomes_created_pr_with_title() {
        let item: SearchItem = serde_json::from_value(json!({
            "id": 99,
            "title": "Add dark mode",
            "url": "https://api.github.com/repos/acme/widgets/issues/12",
            "html_url": "https://github.com/acme/widgets/pull/12",
            "repository_url": "https://api.github.com/repos/acme/widgets",
            "created_at": "2024-01-01T09:00:00Z",
            "user": {"login": "octocat"}
        }))
        .unwrap();

        let activity = classify_search_item(item).unwrap();
        assert_eq!(activity.task_type, TaskType::Pr);
        assert_eq!(activity.action, ActivityAction::CreatedPr);
        assert_eq!(activity.title, "Add dark mode");
        assert_eq!(activity.repo.long_name(), "acme/widgets");
        assert_eq!(activity.author, "octocat");
    }
}
