use crate::llm::Llm;
use crate::matcher::HybridMatcher;
use crate::models::{ExtractedContent, Issue, MatchResult, NewIssue};
use crate::tracker::{find_label_by_name, find_state_by_name, Tracker};
use anyhow::{Context, Result};
use regex::Regex;

/// Label derivation rules (spec.md §4.4.1), checked in order against `cwd`
/// and the concatenation of user messages.
const LABEL_RULES: &[(&str, &[&str])] = &[
    (r"(?i)frontend|web|react|vue|next", &["Frontend"]),
    (r"(?i)backend|api|server|node", &["Backend"]),
    (r"(?i)mobile|ios|android|react-native", &["Mobile"]),
    (r"(?i)infra|devops|terraform|k8s|kubernetes", &["Infrastructure"]),
    (r"(?i)test|spec|e2e", &["Testing"]),
    (r"(?i)doc|readme|wiki", &["Documentation"]),
    (r"(?i)design|figma|ui|ux", &["Design"]),
    (r"(?i)bug|fix|hotfix", &["Bug"]),
    (r"(?i)feature|feat", &["Feature"]),
    (r"(?i)refactor|cleanup", &["Refactor"]),
];

/// Derives label names for a session from its `cwd` and user-message text
/// (spec.md §4.4.1). Returns names only; mapping to ids against the cached
/// label set happens separately so this stays a pure, easily-tested
/// function.
pub fn derive_label_names(cwd: &str, message_text: &str) -> Vec<&'static str> {
    let mut names = Vec::new();
    for (pattern, labels) in LABEL_RULES {
        let re = Regex::new(pattern).expect("label pattern is a fixed, valid regex");
        if re.is_match(cwd) || re.is_match(message_text) {
            for l in *labels {
                if !names.contains(l) {
                    names.push(*l);
                }
            }
        }
    }
    names
}

fn derive_label_ids(cwd: &str, message_text: &str, cached_labels: &[crate::models::Label]) -> Vec<String> {
    derive_label_names(cwd, message_text)
        .into_iter()
        .filter_map(|name| find_label_by_name(cached_labels, name))
        .map(|l| l.id.clone())
        .collect()
}

/// Metadata cached by the processor at startup (spec.md §4.3), threaded
/// into each handler invocation.
pub struct TrackerCache {
    pub team_id: Option<String>,
    pub default_assignee_id: Option<String>,
    pub labels: Vec<crate::models::Label>,
    pub states: Vec<crate::models::WorkflowState>,
}

/// Truncates `s` to at most `max_chars` characters, appending `"..."` when
/// truncated (spec.md §4.4 step 3/step 6).
fn truncate(s: &str, max_chars: usize) -> String {
    let collapsed: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let char_count = collapsed.chars().count();
    if char_count <= max_chars {
        collapsed
    } else {
        let truncated: String = collapsed.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

fn issue_title(content: &ExtractedContent) -> String {
    let normalized = truncate(&content.primary_request, 60);
    if content.project_name.is_empty() {
        normalized
    } else {
        format!("[{}] {}", content.project_name, normalized)
    }
}

fn issue_description(content: &ExtractedContent) -> String {
    let mut out = String::from("This issue was auto-created from a coding-assistant session.\n\nUser Requests\n");
    for msg in content.user_messages().take(3) {
        out.push_str("- ");
        out.push_str(&truncate(msg, 300));
        out.push('\n');
    }
    out
}

fn in_progress_state_id(states: &[crate::models::WorkflowState]) -> Option<String> {
    find_state_by_name(states, "in progress")
        .or_else(|| find_state_by_name(states, "started"))
        .map(|s| s.id.clone())
}

fn build_new_issue(content: &ExtractedContent, cache: &TrackerCache) -> Result<NewIssue> {
    let team_id = cache
        .team_id
        .clone()
        .context("no cached team — cannot create issue")?;

    let message_text: String = content.user_messages().collect::<Vec<_>>().join(" ");

    Ok(NewIssue {
        title: issue_title(content),
        description: issue_description(content),
        team_id,
        assignee_id: cache.default_assignee_id.clone(),
        label_ids: derive_label_ids(&content.cwd, &message_text, &cache.labels),
        state_id: in_progress_state_id(&cache.states),
    })
}

/// Assigns, sets state, and unions in derived labels on the resolved issue
/// (spec.md §4.4 step 4). Never removes existing labels.
async fn enforce_setup(tracker: &impl Tracker, issue: &Issue, content: &ExtractedContent, cache: &TrackerCache) -> Result<()> {
    if let Some(assignee_id) = &cache.default_assignee_id {
        tracker.assign(&issue.id, assignee_id).await?;
    }
    if let Some(state_id) = in_progress_state_id(&cache.states) {
        tracker.update_state(&issue.id, &state_id).await?;
    }

    let message_text: String = content.user_messages().collect::<Vec<_>>().join(" ");
    let derived_ids = derive_label_ids(&content.cwd, &message_text, &cache.labels);
    let mut union_ids: Vec<String> = issue.labels.iter().map(|l| l.id.clone()).collect();
    for id in derived_ids {
        if !union_ids.contains(&id) {
            union_ids.push(id);
        }
    }
    if union_ids.len() != issue.labels.len() {
        tracker.set_labels(&issue.id, &union_ids).await?;
    }
    Ok(())
}

/// Summarizes the session via the LLM, falling back to a deterministic
/// join when the transport fails or there isn't enough content (spec.md
/// §4.4 step 5).
async fn summarize(llm: &impl Llm, content: &ExtractedContent) -> String {
    let messages: Vec<&str> = content.user_messages().take(10).collect();
    if messages.len() <= 2 {
        return fallback_summary(content);
    }

    let prompt = format!(
        "Summarize in 2-3 sentences what the developer accomplished in this coding session. User messages:\n{}",
        messages.join("\n- ")
    );
    match llm.complete(&prompt).await {
        Ok(summary) if !summary.trim().is_empty() => summary,
        _ => fallback_summary(content),
    }
}

fn fallback_summary(content: &ExtractedContent) -> String {
    content.user_messages().take(5).collect::<Vec<_>>().join("\n")
}

fn comment_body(summary: &str, content: &ExtractedContent) -> String {
    let mut out = format!("## Claude Code Session Summary\n\n{summary}\n\n---\n\n### User Requests\n");
    for msg in content.user_messages().take(5) {
        out.push_str("- ");
        out.push_str(&truncate(msg, 200));
        out.push('\n');
    }
    out
}

/// Handles one `session_stop` record end to end (spec.md §4.4). Returns
/// `Ok(())` on success; any error is caught at the processor's per-record
/// boundary and converted to a `failed` status there.
pub async fn handle<T: Tracker, L: Llm>(
    content: &ExtractedContent,
    git_branch: Option<&str>,
    matcher: &HybridMatcher<T, L>,
    tracker: &T,
    llm: &L,
    cache: &TrackerCache,
) -> Result<()> {
    let resolved = matcher.resolve(Some(content), git_branch).await?;

    let issue = match resolved {
        Some(MatchResult { issue_id, .. }) => tracker
            .get_issue(&issue_id)
            .await?
            .context("matcher resolved an issue id the tracker no longer has")?,
        None => {
            let new_issue = build_new_issue(content, cache)?;
            tracker.create_issue(new_issue).await?
        }
    };

    enforce_setup(tracker, &issue, content, cache).await?;

    let summary = summarize(llm, content).await;
    let body = comment_body(&summary, content);
    tracker.add_comment(&issue.id, &body).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherConfig;
    use crate::llm::FakeLlm;
    use crate::models::StateType;
    use crate::tracker::FakeTracker;
    use std::sync::Arc;

    fn state(id: &str, name: &str, ty: StateType) -> crate::models::WorkflowState {
        crate::models::WorkflowState {
            id: id.into(),
            name: name.into(),
            state_type: ty,
        }
    }

    fn issue(identifier: &str, title: &str, state: crate::models::WorkflowState) -> Issue {
        Issue {
            id: format!("internal-{identifier}"),
            identifier: identifier.into(),
            title: title.into(),
            description: String::new(),
            url: format!("https://tracker.example/{identifier}"),
            state,
            assignee: None,
            labels: Vec::new(),
        }
    }

    #[tokio::test]
    async fn handle_resolves_branch_hit_assigns_sets_state_and_comments() {
        let in_progress = state("state-prog", "In Progress", StateType::Started);
        let tracker = Arc::new(
            FakeTracker::default()
                .with_issue(issue(
                    "ENG-99",
                    "Existing issue",
                    state("state-backlog", "Backlog", StateType::Backlog),
                ))
                .with_states(vec![in_progress.clone()]),
        );
        let llm = Arc::new(FakeLlm::new("Fixed the login redirect bug."));

        let matcher = HybridMatcher::new(
            tracker.clone(),
            llm.clone(),
            MatcherConfig::default(),
            r"([A-Z]+-\d+)",
        )
        .unwrap();

        let cache = TrackerCache {
            team_id: Some("team-1".into()),
            default_assignee_id: Some(tracker.viewer.id.clone()),
            labels: Vec::new(),
            states: vec![in_progress.clone()],
        };

        let content = ExtractedContent {
            session_id: "s1".into(),
            primary_request: "fix the login page redirect bug".into(),
            additional_context: vec![
                "it happens only on mobile safari".into(),
                "also check the session cookie expiry".into(),
            ],
            project_name: "web".into(),
            cwd: "/home/u/web".into(),
            entry_count: 5,
            ..Default::default()
        };

        handle(
            &content,
            Some("feature/ENG-99-fix-login-redirect"),
            &matcher,
            tracker.as_ref(),
            llm.as_ref(),
            &cache,
        )
        .await
        .unwrap();

        let issues = tracker.issues.lock().unwrap();
        let updated = issues.iter().find(|i| i.identifier == "ENG-99").unwrap();
        assert_eq!(updated.state.name, "In Progress");
        assert_eq!(updated.assignee.as_ref().unwrap().id, tracker.viewer.id);
        drop(issues);

        let comments = tracker.comments.lock().unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, "internal-ENG-99");
        assert!(comments[0].1.contains("Fixed the login redirect bug."));
    }

    #[test]
    fn label_rules_match_multiple_patterns_without_duplicates() {
        let labels = derive_label_names("/home/u/proj/mobile-app", "fix login crash");
        assert_eq!(labels, vec!["Mobile", "Bug"]);
    }

    #[test]
    fn title_normalizes_whitespace_and_truncates_at_60_chars() {
        let content = ExtractedContent {
            primary_request: "fix   the\nlogin   page redirect bug that keeps happening on mobile devices after update".into(),
            project_name: "web".into(),
            ..Default::default()
        };
        let title = issue_title(&content);
        assert!(title.starts_with("[web] "));
        assert!(title.ends_with("..."));
        // "[web] " + 60 chars + "..."
        assert_eq!(title.chars().count(), "[web] ".len() + 60 + 3);
    }

    #[test]
    fn title_omits_bracket_prefix_when_project_name_empty() {
        let content = ExtractedContent {
            primary_request: "short request".into(),
            project_name: "".into(),
            ..Default::default()
        };
        assert_eq!(issue_title(&content), "short request");
    }

    #[test]
    fn description_lists_up_to_three_user_messages() {
        let content = ExtractedContent {
            primary_request: "first".into(),
            additional_context: vec!["second".into(), "third".into(), "fourth".into()],
            ..Default::default()
        };
        let desc = issue_description(&content);
        assert!(desc.contains("first"));
        assert!(desc.contains("third"));
        assert!(!desc.contains("fourth"));
    }

    #[test]
    fn truncate_appends_ellipsis_only_when_truncated() {
        assert_eq!(truncate("short", 300), "short");
        let long = "a".repeat(310);
        let truncated = truncate(&long, 300);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 303);
    }
}
