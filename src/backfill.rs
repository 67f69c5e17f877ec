use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Activity, RepoRef};

// The 1-minute back-off guards against clock-skew truncation when an item
// was created in the same instant the window starts.
const SINCE_BACKOFF_MINUTES: i64 = 1;

/// One batched title query per repository that still has untitled items.
/// Transient: built per fetch cycle, gone once its response is merged.
#[derive(Clone, Debug)]
pub struct BackfillGroup {
    pub repo: RepoRef,
    pub ids: Vec<u64>,
    pub since: DateTime<Utc>,
}

/// Partitions activities with an empty title and a known id by repository,
/// computing the minimal `since` bound each batched query needs.
pub fn plan_groups(activities: &[Activity]) -> Vec<BackfillGroup> {
    let mut groups: Vec<BackfillGroup> = Vec::new();
    for activity in activities {
        let Some(id) = activity.id else {
            continue;
        };
        if !activity.title.is_empty() {
            continue;
        }
        let since = activity.created_at - Duration::minutes(SINCE_BACKOFF_MINUTES);
        match groups.iter_mut().find(|group| group.repo == activity.repo) {
            Some(group) => {
                group.ids.push(id);
                if since < group.since {
                    group.since = since;
                }
            }
            None => groups.push(BackfillGroup {
                repo: activity.repo.clone(),
                ids: vec![id],
                since,
            }),
        }
    }
    groups
}

/// Merges one group's resolved titles into the store in place. Items absent
/// from the map keep their empty title for this cycle; applying the same
/// response twice is a no-op. Returns how many titles were set.
pub fn apply_titles(
    activities: &mut [Activity],
    repo: &RepoRef,
    titles: &HashMap<u64, String>,
) -> usize {
    let mut updated = 0;
    for activity in activities.iter_mut().filter(|a| &a.repo == repo) {
        let Some(id) = activity.id else {
            continue;
        };
        if let Some(title) = titles.get(&id) {
            activity.title = title.clone();
            updated += 1;
        }
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityAction, Host, TaskType};
    use chrono::TimeZone;

    fn untitled(repo: &str, id: u64, created_at: DateTime<Utc>) -> Activity {
        Activity {
            id: Some(id),
            title: String::new(),
            api_url: String::new(),
            html_url: String::new(),
            task_type: TaskType::Pr,
            action: ActivityAction::CreatedPr,
            author: "octocat".to_owned(),
            created_at,
            repo: RepoRef::parse(repo, Host::Github).unwrap(),
        }
    }

    #[test]
    fn since_is_group_minimum_minus_one_minute() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let activities = vec![
            untitled("a/b", 1, base + Duration::minutes(5)),
            untitled("a/b", 2, base),
            untitled("a/b", 3, base + Duration::minutes(10)),
        ];

        let groups = plan_groups(&activities);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ids, vec![1, 2, 3]);
        assert_eq!(groups[0].since, base - Duration::minutes(1));
    }

    #[test]
    fn titled_and_id_less_activities_are_skipped() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut titled = untitled("a/b", 1, base);
        titled.title = "Already known".to_owned();
        let mut id_less = untitled("a/b", 2, base);
        id_less.id = None;

        assert!(plan_groups(&[titled, id_less]).is_empty());
    }

    #[test]
    fn groups_are_partitioned_by_repository() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let activities = vec![
            untitled("a/b", 1, base),
            untitled("c/d", 2, base),
            untitled("a/b", 3, base),
        ];

        let groups = plan_groups(&activities);
        assert_eq!(groups.len(), 2);
        let ab = groups.iter().find(|g| g.repo.long_name() == "a/b").unwrap();
        assert_eq!(ab.ids, vec![1, 3]);
    }

    #[test]
    fn apply_titles_is_idempotent_and_repo_scoped() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut activities = vec![
            untitled("a/b", 42, base),
            untitled("a/b", 43, base),
            untitled("c/d", 42, base),
        ];
        let repo = RepoRef::parse("a/b", Host::Github).unwrap();
        let titles: HashMap<u64, String> = [(42, "Fix bug".to_owned())].into();

        assert_eq!(apply_titles(&mut activities, &repo, &titles), 1);
        assert_eq!(activities[0].title, "Fix bug");
        // Id 43 had no match and keeps its empty title.
        assert_eq!(activities[1].title, "");
        // Same id in another repo is untouched.
        assert_eq!(activities[2].title, "");

        // Merging the same response again changes nothing.
        assert_eq!(apply_titles(&mut activities, &repo, &titles), 1);
        assert_eq!(activities[0].title, "Fix bug");
        assert_eq!(activities[1].title, "");
    }
}
