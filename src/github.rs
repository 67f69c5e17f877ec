use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
    header::{ACCEPT, USER_AGENT},
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::domain::{Host, RepoRef};

const GH_API_BASE: &str = "https://api.github.com";
const GH_GRAPHQL: &str = "https://api.github.com/graphql";
const GH_SEARCH_ISSUES: &str = "https://api.github.com/search/issues";
const USER_AGENT_HEADER: &str = "standup-egui/0.1";

// GitHub caps search queries at 256 characters; stay conservative to leave
// headroom for URL encoding.
const SEARCH_QUERY_BUDGET: usize = 200;

// One request per repository group: recent issues and pull requests created
// at or after `since`, with the numeric database id the events feed uses.
const TITLE_QUERY: &str = r#"
query($owner: String!, $name: String!, $since: DateTime!) {
  repository(owner: $owner, name: $name) {
    issues(first: 50, filterBy: {since: $since}, orderBy: {field: CREATED_AT, direction: DESC}) {
      nodes { databaseId title }
    }
    pullRequests(first: 50, orderBy: {field: CREATED_AT, direction: DESC}) {
      nodes { databaseId title }
    }
  }
}
"#;

pub fn build_client() -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(USER_AGENT_HEADER)
        .build()
        .map_err(FetchError::Http)
}

/// Fetches one page of the user's public event feed. Events whose payload
/// does not match the expected shape are skipped with a diagnostic rather
/// than failing the whole fetch.
pub fn fetch_user_events(
    client: &Client,
    username: &str,
    token: Option<&str>,
) -> Result<Vec<RawEvent>, FetchError> {
    let response = authorize(
        client.get(format!("{GH_API_BASE}/users/{username}/events")),
        token,
    )
    .send()?;
    let response = check_status(response)?;

    let raw: Vec<serde_json::Value> = response.json()?;
    info!("fetched {} events for {username}", raw.len());

    let mut events = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<RawEvent>(value) {
            Ok(event) => events.push(event),
            Err(err) => debug!("skipping event with unexpected payload shape: {err}"),
        }
    }
    Ok(events)
}

/// Runs the batched title query for one repository and returns the resolved
/// `databaseId -> title` map. A response without data yields an empty map.
pub fn fetch_repo_titles(
    client: &Client,
    token: Option<&str>,
    repo: &RepoRef,
    since: DateTime<Utc>,
) -> Result<HashMap<u64, String>, FetchError> {
    let body = json!({
        "query": TITLE_QUERY,
        "variables": {
            "owner": repo.owner,
            "name": repo.name,
            "since": since.to_rfc3339(),
        },
    });

    let response = authorize(client.post(GH_GRAPHQL), token)
        .json(&body)
        .send()?;
    let response = check_status(response)?;

    let parsed: GraphQlResponse = response.json()?;
    let Some(data) = parsed.data else {
        warn!("GraphQL response carried no data for {}", repo.long_name());
        return Ok(HashMap::new());
    };
    Ok(title_map(data.repository))
}

/// Searches open pull requests authored by the user. Repositories that did
/// not fit the query budget must be filtered client-side by the caller.
pub fn search_authored_prs(
    client: &Client,
    token: Option<&str>,
    username: &str,
    repos: &[RepoRef],
) -> Result<Vec<SearchItem>, FetchError> {
    let query = build_search_query(username, repos);
    let response = authorize(client.get(GH_SEARCH_ISSUES), token)
        .query(&[("q", query.as_str())])
        .send()?;
    let response = check_status(response)?;

    let parsed: SearchResponse = response.json()?;
    info!(
        "search returned {} open authored PRs for {username}",
        parsed.items.len()
    );
    Ok(parsed.items)
}

fn build_search_query(username: &str, repos: &[RepoRef]) -> String {
    let mut query = format!("author:{username} type:pr state:open");
    for repo in repos {
        let filter = format!(" repo:{}", repo.long_name());
        if query.len() + filter.len() >= SEARCH_QUERY_BUDGET {
            debug!("search query budget reached; remaining repos are filtered client-side");
            break;
        }
        query.push_str(&filter);
    }
    query
}

fn authorize(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    let builder = builder
        .header(USER_AGENT, USER_AGENT_HEADER)
        .header(ACCEPT, "application/vnd.github+json");
    // Absence of a token is a valid degraded mode with a lower rate limit.
    match token {
        Some(token) if !token.is_empty() => builder.bearer_auth(token),
        _ => builder,
    }
}

fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if is_rate_limited(status, &response) {
        return Err(FetchError::RateLimited);
    }
    Err(FetchError::Status(status))
}

fn is_rate_limited(status: StatusCode, response: &Response) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|value| value.to_str().ok())
            == Some("0")
}

fn title_map(repository: TitleRepository) -> HashMap<u64, String> {
    // Issue ids land first, pull request ids second; the two numeric id
    // spaces are disjoint, so the overwrite on collision never fires.
    let mut map = collect_titles(repository.issues);
    map.extend(collect_titles(repository.pull_requests));
    map
}

fn collect_titles(connection: TitleConnection) -> HashMap<u64, String> {
    connection
        .nodes
        .into_iter()
        .filter_map(|node| Some((node.database_id?, node.title?)))
        .filter(|(_, title)| !title.is_empty())
        .collect()
}

/// The REST payload points at the pulls API; the human-facing page lives at
/// `/pull/`. Rewrite so report hyperlinks open the PR page itself.
pub fn pr_html_url(api_url: &str) -> String {
    api_url
        .replace("api.github.com/repos", "github.com")
        .replace("/pulls/", "/pull/")
}

pub fn repo_ref_from_api_url(repository_url: &str) -> Option<RepoRef> {
    let long_name = repository_url.trim_start_matches("https://api.github.com/repos/");
    RepoRef::parse(long_name, Host::Github)
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("GitHub API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("GitHub API returned status {0}")]
    Status(StatusCode),
    #[error("GitHub API rate limit exhausted; configure a token or wait for the limit to reset")]
    RateLimited,
    #[error("Background worker disconnected before returning a result")]
    BackgroundWorkerGone,
}

impl FetchError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FetchError::RateLimited)
    }
}

// Event feed payloads ------------------------------------------------------

/// One entry of the `GET /users/{username}/events` feed, discriminated by
/// its `type` tag. Event types the report does not care about collapse into
/// the catch-all variant.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum RawEvent {
    #[serde(rename = "IssuesEvent")]
    Issues(IssuesEvent),
    #[serde(rename = "IssueCommentEvent")]
    IssueComment(IssueCommentEvent),
    #[serde(rename = "PullRequestEvent")]
    PullRequest(PullRequestEvent),
    #[serde(rename = "PullRequestReviewEvent")]
    PullRequestReview(PullRequestReviewEvent),
    #[serde(other)]
    Uncared,
}

#[derive(Debug, Deserialize)]
pub struct IssuesEvent {
    pub actor: EventActor,
    pub repo: EventRepo,
    pub created_at: DateTime<Utc>,
    pub payload: IssuesPayload,
}

#[derive(Debug, Deserialize)]
pub struct IssueCommentEvent {
    pub actor: EventActor,
    pub repo: EventRepo,
    pub created_at: DateTime<Utc>,
    pub payload: IssueCommentPayload,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub actor: EventActor,
    pub repo: EventRepo,
    pub created_at: DateTime<Utc>,
    pub payload: PullRequestPayload,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestReviewEvent {
    pub actor: EventActor,
    pub repo: EventRepo,
    pub created_at: DateTime<Utc>,
    pub payload: PullRequestReviewPayload,
}

#[derive(Debug, Deserialize)]
pub struct EventActor {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct EventRepo {
    /// Long name, e.g. `fossasia/eventyay`.
    pub name: String,
}

impl EventRepo {
    pub fn to_repo_ref(&self) -> Option<RepoRef> {
        RepoRef::parse(&self.name, Host::Github)
    }
}

#[derive(Debug, Deserialize)]
pub struct IssuesPayload {
    pub action: String,
    pub issue: EventIssue,
}

#[derive(Debug, Deserialize)]
pub struct IssueCommentPayload {
    pub issue: EventIssue,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub pull_request: EventPullRequest,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestReviewPayload {
    pub pull_request: EventPullRequest,
}

#[derive(Debug, Deserialize)]
pub struct EventIssue {
    pub id: u64,
    pub url: String,
    pub html_url: String,
    pub title: String,
    /// Present iff the "issue" is actually a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct EventPullRequest {
    pub id: u64,
    pub url: String,
}

// GraphQL payloads ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<TitleData>,
}

#[derive(Debug, Deserialize)]
struct TitleData {
    repository: TitleRepository,
}

#[derive(Debug, Deserialize)]
struct TitleRepository {
    issues: TitleConnection,
    #[serde(rename = "pullRequests")]
    pull_requests: TitleConnection,
}

#[derive(Debug, Deserialize)]
struct TitleConnection {
    nodes: Vec<TitleNode>,
}

#[derive(Debug, Deserialize)]
struct TitleNode {
    #[serde(rename = "databaseId")]
    database_id: Option<u64>,
    title: Option<String>,
}

// Search payloads ----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
pub struct SearchItem {
    pub id: u64,
    pub title: String,
    pub url: String,
    pub html_url: String,
    pub repository_url: String,
    pub created_at: DateTime<Utc>,
    pub user: Option<SearchUser>,
}

#[derive(Debug, Deserialize)]
pub struct SearchUser {
    pub login: String,
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_html_url_rewrites_pulls_api_form() {
        let rewritten = pr_html_url("https://api.github.com/repos/fossasia/eventyay/pulls/1823");
        assert_eq!(rewritten, "https://github.com/fossasia/eventyay/pull/1823");
    }

    #[test]
    fn repo_ref_from_api_url_trims_prefix() {
        let repo = repo_ref_from_api_url("https://api.github.com/repos/acme/widgets")
            .expect("valid repo url");
        assert_eq!(repo.long_name(), "acme/widgets");
        assert_eq!(repo.host, Host::Github);
    }

    #[test]
    fn search_query_stays_under_budget() {
        let repos: Vec<RepoRef> = (0..40)
            .map(|n| RepoRef {
                owner: format!("organization-{n}"),
                name: format!("repository-{n}"),
                host: Host::Github,
            })
            .collect();
        let query = build_search_query("octocat", &repos);
        assert!(query.len() < SEARCH_QUERY_BUDGET);
        assert!(query.starts_with("author:octocat type:pr state:open"));
        assert!(query.contains("repo:organization-0/repository-0"));
    }

    #[test]
    fn search_query_without_repos_has_no_filters() {
        let query = build_search_query("octocat", &[]);
        assert_eq!(query, "author:octocat type:pr state:open");
    }

    #[test]
    fn title_map_merges_issues_then_pull_requests() {
        let repository: TitleRepository = serde_json::from_value(serde_json::json!({
            "issues": {
                "nodes": [
                    {"databaseId": 1, "title": "An issue"},
                    {"databaseId": 2, "title": null},
                    {"databaseId": null, "title": "orphan"},
                ]
            },
            "pullRequests": {
                "nodes": [
                    {"databaseId": 42, "title": "Fix bug"},
                ]
            }
        }))
        .expect("valid repository payload");

        let map = title_map(repository);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1).map(String::as_str), Some("An issue"));
        assert_eq!(map.get(&42).map(String::as_str), Some("Fix bug"));
    }

    #[test]
    fn unknown_event_types_collapse_into_uncared() {
        let event: RawEvent = serde_json::from_value(serde_json::json!({
            "type": "WatchEvent",
            "actor": {"login": "octocat"},
            "repo": {"name": "acme/widgets"},
            "payload": {"action": "started"},
            "created_at": "2024-01-01T10:00:00Z"
        }))
        .expect("catch-all should absorb unknown types");
        assert!(matches!(event, RawEvent::Uncared));
    }

    #[test]
    fn pull_request_event_decodes_with_minimal_payload() {
        let event: RawEvent = serde_json::from_value(serde_json::json!({
            "type": "PullRequestEvent",
            "actor": {"login": "octocat"},
            "repo": {"name": "a/b"},
            "created_at": "2024-01-01T10:00:00Z",
            "payload": {
                "action": "opened",
                "pull_request": {
                    "id": 42,
                    "url": "https://api.github.com/repos/a/b/pulls/7",
                    "extra_field_we_ignore": true
                }
            }
        }))
        .expect("pull request event decodes");
        let RawEvent::PullRequest(event) = event else {
            panic!("expected a PullRequestEvent");
        };
        assert_eq!(event.payload.pull_request.id, 42);
    }
}
