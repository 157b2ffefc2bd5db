use super::Tracker;
use crate::models::{Issue, Label, NewIssue, StateType, Team, User, WorkflowState};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// HTTP/GraphQL-backed tracker adapter. The concrete schema is out of scope
/// (spec.md §6) — this issues minimal queries/mutations against one
/// configurable GraphQL endpoint, following the request/response shape the
/// prior art's `cursor::api` module used for its own external HTTP calls
/// (shared client, bearer/cookie header, `.context(...)`-wrapped errors,
/// `resp.json().await` on success).
pub struct HttpTracker {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpTracker {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        HttpTracker {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    /// Reads the credential from the out-of-band environment variable
    /// (spec.md §6: "a single opaque credential string supplied out-of-band").
    pub fn from_env(endpoint: impl Into<String>) -> Result<Self> {
        let token = std::env::var("CONVOY_TRACKER_TOKEN")
            .context("CONVOY_TRACKER_TOKEN must be set to authenticate with the tracker")?;
        Ok(Self::new(endpoint, token))
    }

    async fn graphql(&self, query: &str, variables: serde_json::Value) -> Result<serde_json::Value> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header("User-Agent", concat!("convoy/", env!("CARGO_PKG_VERSION")))
            .json(&body)
            .send()
            .await
            .context("failed to reach issue tracker")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("tracker returned {status}: {text}");
        }
        let value: serde_json::Value = resp.json().await.context("invalid JSON from tracker")?;
        if let Some(errors) = value.get("errors") {
            anyhow::bail!("tracker returned errors: {errors}");
        }
        Ok(value["data"].clone())
    }
}

#[async_trait]
impl Tracker for HttpTracker {
    async fn get_viewer(&self) -> Result<User> {
        let data = self
            .graphql("query { viewer { id name } }", serde_json::json!({}))
            .await?;
        serde_json::from_value(data["viewer"].clone()).context("parsing viewer")
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        let data = self
            .graphql("query { teams { nodes { id name } } }", serde_json::json!({}))
            .await?;
        serde_json::from_value(data["teams"]["nodes"].clone()).context("parsing teams")
    }

    async fn list_labels(&self, team_id: &str) -> Result<Vec<Label>> {
        let data = self
            .graphql(
                "query($teamId: String!) { team(id: $teamId) { labels { nodes { id name } } } }",
                serde_json::json!({ "teamId": team_id }),
            )
            .await?;
        serde_json::from_value(data["team"]["labels"]["nodes"].clone()).context("parsing labels")
    }

    async fn list_states(&self, team_id: &str) -> Result<Vec<WorkflowState>> {
        let data = self
            .graphql(
                "query($teamId: String!) { team(id: $teamId) { states { nodes { id name type } } } }",
                serde_json::json!({ "teamId": team_id }),
            )
            .await?;
        serde_json::from_value(data["team"]["states"]["nodes"].clone()).context("parsing states")
    }

    async fn find_user(&self, query: &str) -> Result<Option<User>> {
        let data = self
            .graphql(
                "query($q: String!) { users(filter: { q: $q }) { nodes { id name } } }",
                serde_json::json!({ "q": query }),
            )
            .await?;
        let users: Vec<User> =
            serde_json::from_value(data["users"]["nodes"].clone()).context("parsing users")?;
        Ok(users.into_iter().next())
    }

    async fn get_issue(&self, identifier: &str) -> Result<Option<Issue>> {
        let data = self
            .graphql(
                "query($id: String!) { issue(id: $id) { id identifier title description url state { id name type } assignee { id name } labels { nodes { id name } } } }",
                serde_json::json!({ "id": identifier }),
            )
            .await?;
        if data["issue"].is_null() {
            return Ok(None);
        }
        Ok(Some(parse_issue(&data["issue"])?))
    }

    async fn search(&self, query: &str) -> Result<Vec<Issue>> {
        let data = self
            .graphql(
                "query($q: String!) { issueSearch(query: $q) { nodes { id identifier title description url state { id name type } assignee { id name } labels { nodes { id name } } } } }",
                serde_json::json!({ "q": query }),
            )
            .await?;
        parse_issues(&data["issueSearch"]["nodes"])
    }

    async fn get_recent(&self, state_types: &[StateType], limit: usize) -> Result<Vec<Issue>> {
        let types: Vec<String> = state_types
            .iter()
            .map(|t| serde_json::to_value(t).unwrap().as_str().unwrap().to_string())
            .collect();
        let data = self
            .graphql(
                "query($types: [String!]!, $limit: Int!) { issues(filter: { state: { type: { in: $types } } }, orderBy: updatedAt, first: $limit) { nodes { id identifier title description url state { id name type } assignee { id name } labels { nodes { id name } } } } }",
                serde_json::json!({ "types": types, "limit": limit }),
            )
            .await?;
        parse_issues(&data["issues"]["nodes"])
    }

    async fn create_issue(&self, new_issue: NewIssue) -> Result<Issue> {
        let data = self
            .graphql(
                "mutation($input: IssueCreateInput!) { issueCreate(input: $input) { issue { id identifier title description url state { id name type } assignee { id name } labels { nodes { id name } } } } }",
                serde_json::json!({
                    "input": {
                        "title": new_issue.title,
                        "description": new_issue.description,
                        "teamId": new_issue.team_id,
                        "assigneeId": new_issue.assignee_id,
                        "labelIds": new_issue.label_ids,
                        "stateId": new_issue.state_id,
                    }
                }),
            )
            .await?;
        parse_issue(&data["issueCreate"]["issue"])
    }

    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<()> {
        self.graphql(
            "mutation($issueId: String!, $body: String!) { commentCreate(input: { issueId: $issueId, body: $body }) { success } }",
            serde_json::json!({ "issueId": issue_id, "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn attach_link(&self, issue_id: &str, url: &str, title: &str) -> Result<()> {
        self.graphql(
            "mutation($issueId: String!, $url: String!, $title: String!) { attachmentCreate(input: { issueId: $issueId, url: $url, title: $title }) { success } }",
            serde_json::json!({ "issueId": issue_id, "url": url, "title": title }),
        )
        .await?;
        Ok(())
    }

    async fn update_state(&self, issue_id: &str, state_id: &str) -> Result<()> {
        self.graphql(
            "mutation($issueId: String!, $stateId: String!) { issueUpdate(id: $issueId, input: { stateId: $stateId }) { success } }",
            serde_json::json!({ "issueId": issue_id, "stateId": state_id }),
        )
        .await?;
        Ok(())
    }

    async fn assign(&self, issue_id: &str, user_id: &str) -> Result<()> {
        self.graphql(
            "mutation($issueId: String!, $userId: String!) { issueUpdate(id: $issueId, input: { assigneeId: $userId }) { success } }",
            serde_json::json!({ "issueId": issue_id, "userId": user_id }),
        )
        .await?;
        Ok(())
    }

    async fn set_labels(&self, issue_id: &str, label_ids: &[String]) -> Result<()> {
        self.graphql(
            "mutation($issueId: String!, $labelIds: [String!]!) { issueUpdate(id: $issueId, input: { labelIds: $labelIds }) { success } }",
            serde_json::json!({ "issueId": issue_id, "labelIds": label_ids }),
        )
        .await?;
        Ok(())
    }
}

fn parse_issue(value: &serde_json::Value) -> Result<Issue> {
    serde_json::from_value(value.clone()).context("parsing issue")
}

fn parse_issues(value: &serde_json::Value) -> Result<Vec<Issue>> {
    serde_json::from_value(value.clone()).context("parsing issues")
}
