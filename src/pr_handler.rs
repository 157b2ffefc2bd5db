use crate::git;
use crate::llm::Llm;
use crate::matcher::HybridMatcher;
use crate::models::MatchResult;
use crate::session_processor::TrackerCache;
use crate::tracker::{find_state_by_name, Tracker};
use anyhow::{Context, Result};

/// Handles one `pr_created` record (spec.md §4.5): attach the PR URL to the
/// resolved (or newly created placeholder) issue, then advance it to "in
/// review".
pub async fn handle<T: Tracker, L: Llm>(
    cwd: &str,
    pr_url: &str,
    matcher: &HybridMatcher<T, L>,
    tracker: &T,
    cache: &TrackerCache,
) -> Result<()> {
    // Branch-extraction only: no transcript is available here, so the
    // branch comes from a live `git` query in the record's cwd.
    let branch = git::branch_in(cwd).await;

    let resolved = matcher.resolve(None, branch.as_deref()).await?;

    let issue = match resolved {
        Some(MatchResult { issue_id, .. }) => tracker.get_issue(&issue_id).await?,
        None => None,
    };

    let issue = match issue {
        Some(issue) => issue,
        None => {
            let team_id = cache
                .team_id
                .clone()
                .context("no cached team — cannot create placeholder issue")?;
            let title = format!("PR created: {}", last_url_segment(pr_url));
            tracker
                .create_issue(crate::models::NewIssue {
                    title,
                    description: pr_url.to_string(),
                    team_id,
                    assignee_id: None,
                    label_ids: Vec::new(),
                    state_id: None,
                })
                .await?
        }
    };

    tracker.attach_link(&issue.id, pr_url, "Pull Request").await?;

    if let Some(state) = find_state_by_name(&cache.states, "in review")
        .or_else(|| find_state_by_name(&cache.states, "review"))
    {
        // Missing "in review" state is non-fatal.
        let _ = tracker.update_state(&issue.id, &state.id).await;
    }

    Ok(())
}

fn last_url_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
