use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Domain data structures shared across modules.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    Github,
    Gitlab,
}

impl Host {
    pub fn label(&self) -> &'static str {
        match self {
            Host::Github => "GitHub",
            Host::Gitlab => "GitLab",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    pub host: Host,
}

impl RepoRef {
    /// Parses an `owner/name` string. Returns `None` unless both segments are
    /// non-empty after trimming.
    pub fn parse(input: &str, host: Host) -> Option<Self> {
        let (owner, name) = input.trim().split_once('/')?;
        let owner = owner.trim();
        let name = name.trim();
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
            host,
        })
    }

    pub fn long_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskType {
    Issue,
    Pr,
}

impl TaskType {
    pub fn label(&self) -> &'static str {
        match self {
            TaskType::Issue => "Issue",
            TaskType::Pr => "PR",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityAction {
    CreatedIssue,
    CreatedPr,
    ReviewedPr,
    UpdatedIssue,
}

impl ActivityAction {
    pub fn label(&self) -> &'static str {
        match self {
            ActivityAction::CreatedIssue => "Created issue",
            ActivityAction::CreatedPr => "Created PR",
            ActivityAction::ReviewedPr => "Reviewed PR",
            ActivityAction::UpdatedIssue => "Updated issue",
        }
    }
}

/// Normalized record of one unit of user involvement with an issue or PR.
#[derive(Clone, Debug)]
pub struct Activity {
    /// Stable numeric id of the underlying issue/PR, when the upstream
    /// payload carries one. Used for deduplication and title backfill.
    pub id: Option<u64>,
    /// May be empty until title backfill resolves it.
    pub title: String,
    pub api_url: String,
    pub html_url: String,
    pub task_type: TaskType,
    pub action: ActivityAction,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub repo: RepoRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub host: Host,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
