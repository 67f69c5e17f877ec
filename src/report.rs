use std::collections::BTreeMap;

use crate::domain::{Activity, ActivityAction, TaskType};

/// Per-repository report buckets, keyed by the repo long name.
pub type GroupedActivities = BTreeMap<String, ActivityGrouping>;

#[derive(Debug, Default)]
pub struct ActivityGrouping {
    pub created_prs: Vec<Activity>,
    pub reviewed_prs: Vec<Activity>,
    pub created_issues: Vec<Activity>,
}

/// Partitions activities strictly by `(task_type, action)`. Updated-issue
/// activities exist to detect backfill needs and never reach the report.
pub fn group_by_repo(activities: &[Activity]) -> GroupedActivities {
    let mut grouped = GroupedActivities::new();
    for activity in activities {
        let long_name = activity.repo.long_name();
        match (activity.task_type, activity.action) {
            (TaskType::Pr, ActivityAction::CreatedPr) => grouped
                .entry(long_name)
                .or_default()
                .created_prs
                .push(activity.clone()),
            (TaskType::Pr, ActivityAction::ReviewedPr) => grouped
                .entry(long_name)
                .or_default()
                .reviewed_prs
                .push(activity.clone()),
            (TaskType::Issue, ActivityAction::CreatedIssue) => grouped
                .entry(long_name)
                .or_default()
                .created_issues
                .push(activity.clone()),
            _ => {}
        }
    }
    grouped
}

/// Renders the stand-up report from the two groupings. Pure function; the
/// shell decides what to do with the markup.
pub fn render_report(past: &GroupedActivities, plans: &GroupedActivities) -> String {
    let mut html = String::new();
    html.push_str("<html>\n<body>\n");
    render_section(&mut html, "What I did", past);
    render_section(&mut html, "Plans", plans);
    html.push_str("</body>\n</html>\n");
    html
}

fn render_section(html: &mut String, heading: &str, grouped: &GroupedActivities) {
    if grouped.is_empty() {
        return;
    }
    html.push_str(&format!("<h3>{}</h3>\n", escape_html(heading)));
    for (long_name, grouping) in grouped {
        let short_name = long_name.rsplit('/').next().unwrap_or(long_name);
        html.push_str(&format!(
            "<p><b>{}</b></p>\n<ul>\n",
            escape_html(short_name)
        ));
        render_items(html, "Created PR", &grouping.created_prs);
        render_items(html, "Reviewed PR", &grouping.reviewed_prs);
        render_items(html, "Created issue", &grouping.created_issues);
        html.push_str("</ul>\n");
    }
}

fn render_items(html: &mut String, label: &str, items: &[Activity]) {
    for activity in items {
        // An item whose title never resolved falls back to its URL.
        let text = if activity.title.is_empty() {
            &activity.html_url
        } else {
            &activity.title
        };
        html.push_str(&format!(
            "<li>{label} <a href=\"{}\">{}</a></li>\n",
            escape_html(&activity.html_url),
            escape_html(text),
        ));
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Plain-text fallback for clipboards that refuse HTML.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}
