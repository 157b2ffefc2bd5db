use super::Tracker;
use crate::models::{Issue, Label, NewIssue, StateType, Team, User, WorkflowState};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// In-memory tracker test double (spec.md §9: "test doubles implement the
/// same capability set in memory"). Used by matcher and session-processor
/// unit tests.
pub struct FakeTracker {
    pub viewer: User,
    pub teams: Vec<Team>,
    pub labels: Vec<Label>,
    pub states: Vec<WorkflowState>,
    pub issues: Mutex<Vec<Issue>>,
    pub comments: Mutex<Vec<(String, String)>>,
    pub links: Mutex<Vec<(String, String, String)>>,
    next_id: Mutex<u64>,
}

impl Default for FakeTracker {
    fn default() -> Self {
        FakeTracker {
            viewer: User {
                id: "user-1".into(),
                name: "default-assignee".into(),
            },
            teams: vec![Team {
                id: "team-1".into(),
                name: "Engineering".into(),
            }],
            labels: Vec::new(),
            states: Vec::new(),
            issues: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }
}

impl FakeTracker {
    pub fn with_issue(self, issue: Issue) -> Self {
        self.issues.lock().unwrap().push(issue);
        self
    }

    pub fn with_states(mut self, states: Vec<WorkflowState>) -> Self {
        self.states = states;
        self
    }

    pub fn with_labels(mut self, labels: Vec<Label>) -> Self {
        self.labels = labels;
        self
    }
}

#[async_trait]
impl Tracker for FakeTracker {
    async fn get_viewer(&self) -> Result<User> {
        Ok(self.viewer.clone())
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        Ok(self.teams.clone())
    }

    async fn list_labels(&self, _team_id: &str) -> Result<Vec<Label>> {
        Ok(self.labels.clone())
    }

    async fn list_states(&self, _team_id: &str) -> Result<Vec<WorkflowState>> {
        Ok(self.states.clone())
    }

    async fn find_user(&self, query: &str) -> Result<Option<User>> {
        if self.viewer.name.eq_ignore_ascii_case(query) {
            return Ok(Some(self.viewer.clone()));
        }
        Ok(None)
    }

    async fn get_issue(&self, identifier: &str) -> Result<Option<Issue>> {
        Ok(self
            .issues
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.identifier == identifier)
            .cloned())
    }

    async fn search(&self, query: &str) -> Result<Vec<Issue>> {
        let query = query.to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();
        Ok(self
            .issues
            .lock()
            .unwrap()
            .iter()
            .filter(|i| {
                let haystack = format!("{} {}", i.title, i.description).to_lowercase();
                terms.iter().any(|t| haystack.contains(t))
            })
            .cloned()
            .collect())
    }

    async fn get_recent(&self, state_types: &[StateType], limit: usize) -> Result<Vec<Issue>> {
        Ok(self
            .issues
            .lock()
            .unwrap()
            .iter()
            .filter(|i| state_types.contains(&i.state.state_type))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_issue(&self, new_issue: NewIssue) -> Result<Issue> {
        let mut next_id = self.next_id.lock().unwrap();
        let id = format!("issue-{}", *next_id);
        let identifier = format!("ENG-{}", *next_id);
        *next_id += 1;

        let state = new_issue
            .state_id
            .as_ref()
            .and_then(|sid| self.states.iter().find(|s| &s.id == sid).cloned())
            .unwrap_or(WorkflowState {
                id: "state-unstarted".into(),
                name: "Backlog".into(),
                state_type: StateType::Backlog,
            });

        let assignee = new_issue
            .assignee_id
            .as_ref()
            .filter(|aid| **aid == self.viewer.id)
            .map(|_| self.viewer.clone());

        let labels: Vec<Label> = self
            .labels
            .iter()
            .filter(|l| new_issue.label_ids.contains(&l.id))
            .cloned()
            .collect();

        let issue = Issue {
            id: id.clone(),
            identifier,
            title: new_issue.title,
            description: new_issue.description,
            url: format!("https://tracker.example/issue/{id}"),
            state,
            assignee,
            labels,
        };
        self.issues.lock().unwrap().push(issue.clone());
        Ok(issue)
    }

    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<()> {
        self.comments
            .lock()
            .unwrap()
            .push((issue_id.to_string(), body.to_string()));
        Ok(())
    }

    async fn attach_link(&self, issue_id: &str, url: &str, title: &str) -> Result<()> {
        self.links
            .lock()
            .unwrap()
            .push((issue_id.to_string(), url.to_string(), title.to_string()));
        Ok(())
    }

    async fn update_state(&self, issue_id: &str, state_id: &str) -> Result<()> {
        let Some(state) = self.states.iter().find(|s| s.id == state_id).cloned() else {
            anyhow::bail!("unknown state {state_id}");
        };
        let mut issues = self.issues.lock().unwrap();
        if let Some(issue) = issues.iter_mut().find(|i| i.id == issue_id) {
            issue.state = state;
        }
        Ok(())
    }

    async fn assign(&self, issue_id: &str, user_id: &str) -> Result<()> {
        let user = if user_id == self.viewer.id {
            self.viewer.clone()
        } else {
            User {
                id: user_id.to_string(),
                name: user_id.to_string(),
            }
        };
        let mut issues = self.issues.lock().unwrap();
        if let Some(issue) = issues.iter_mut().find(|i| i.id == issue_id) {
            issue.assignee = Some(user);
        }
        Ok(())
    }

    async fn set_labels(&self, issue_id: &str, label_ids: &[String]) -> Result<()> {
        let labels: Vec<Label> = self
            .labels
            .iter()
            .filter(|l| label_ids.contains(&l.id))
            .cloned()
            .collect();
        let mut issues = self.issues.lock().unwrap();
        if let Some(issue) = issues.iter_mut().find(|i| i.id == issue_id) {
            issue.labels = labels;
        }
        Ok(())
    }
}
