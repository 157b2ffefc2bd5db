mod fake;
mod http;

pub use fake::FakeTracker;
pub use http::HttpTracker;

use crate::models::{Issue, Label, NewIssue, StateType, Team, User, WorkflowState};
use anyhow::Result;
use async_trait::async_trait;

/// Capability set the matcher, session processor, and PR handler drive the
/// tracker through (spec.md §9). The concrete wire schema is out of scope;
/// this is the seam the rest of the crate depends on.
#[async_trait]
pub trait Tracker: Send + Sync {
    async fn get_viewer(&self) -> Result<User>;
    async fn list_teams(&self) -> Result<Vec<Team>>;
    async fn list_labels(&self, team_id: &str) -> Result<Vec<Label>>;
    async fn list_states(&self, team_id: &str) -> Result<Vec<WorkflowState>>;
    async fn find_user(&self, query: &str) -> Result<Option<User>>;

    async fn get_issue(&self, identifier: &str) -> Result<Option<Issue>>;
    async fn search(&self, query: &str) -> Result<Vec<Issue>>;
    /// Recent issues in the given workflow-state types, most-recently-updated
    /// first, capped at `limit`.
    async fn get_recent(&self, state_types: &[StateType], limit: usize) -> Result<Vec<Issue>>;

    async fn create_issue(&self, new_issue: NewIssue) -> Result<Issue>;
    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<()>;
    async fn attach_link(&self, issue_id: &str, url: &str, title: &str) -> Result<()>;
    async fn update_state(&self, issue_id: &str, state_id: &str) -> Result<()>;
    async fn assign(&self, issue_id: &str, user_id: &str) -> Result<()>;
    /// Overwrites the issue's label set (union semantics are the caller's
    /// responsibility — compute the union before calling this).
    async fn set_labels(&self, issue_id: &str, label_ids: &[String]) -> Result<()>;
}

/// Finds the id of the first workflow state whose name contains `needle`
/// (case-insensitive) — shared by the session processor ("in progress") and
/// the PR handler ("in review").
pub fn find_state_by_name<'a>(states: &'a [WorkflowState], needle: &str) -> Option<&'a WorkflowState> {
    let needle = needle.to_lowercase();
    states.iter().find(|s| s.name.to_lowercase().contains(&needle))
}

pub fn find_label_by_name<'a>(labels: &'a [Label], name: &str) -> Option<&'a Label> {
    labels.iter().find(|l| l.name.eq_ignore_ascii_case(name))
}
