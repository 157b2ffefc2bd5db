use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Returns the user's home directory as a `PathBuf`.
pub fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
}

/// Resolves the data directory convoy stores its queue and config under.
///
/// Precedence: `CONVOY_DATA_HOME` env var, then `dirs::data_dir()/convoy`,
/// then `~/.convoy`.
pub fn data_home() -> PathBuf {
    if let Ok(p) = std::env::var("CONVOY_DATA_HOME") {
        return PathBuf::from(p);
    }
    if let Some(d) = dirs::data_dir() {
        return d.join("convoy");
    }
    home_dir().join(".convoy")
}

pub fn data_path(subpath: &str) -> PathBuf {
    data_home().join(subpath)
}

// ── Queue record (spec.md §3 "Queue Record", §6) ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    SessionStop,
    PrCreated,
    /// A `kind` this build doesn't recognize. Parses instead of failing so
    /// the record still reaches the queue as `pending` and can be failed
    /// with a descriptive error by the processor, rather than vanishing.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    SessionStop {
        session_id: String,
        transcript_path: String,
        cwd: String,
    },
    PrCreated {
        session_id: String,
        pr_url: String,
        cwd: String,
    },
    /// Catch-all for any `kind` not listed above. Serde's internally-tagged
    /// `#[serde(other)]` can only match the tag, not carry the original
    /// string along with it, so the unrecognized value itself is lost by
    /// the time this variant is constructed — the processor fails the
    /// record with a generic "unknown kind" error rather than quoting it.
    #[serde(other)]
    Unknown,
}

impl RecordPayload {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordPayload::SessionStop { .. } => RecordKind::SessionStop,
            RecordPayload::PrCreated { .. } => RecordKind::PrCreated,
            RecordPayload::Unknown => RecordKind::Unknown,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            RecordPayload::SessionStop { session_id, .. } => session_id,
            RecordPayload::PrCreated { session_id, .. } => session_id,
            RecordPayload::Unknown => "",
        }
    }

    pub fn cwd(&self) -> &str {
        match self {
            RecordPayload::SessionStop { cwd, .. } => cwd,
            RecordPayload::PrCreated { cwd, .. } => cwd,
            RecordPayload::Unknown => "",
        }
    }
}

/// One line of the durable queue file. `id` is unique across the file;
/// `status` traverses states monotonically except the explicit `failed ->
/// pending` retry transition (spec.md §3 invariants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: String,
    pub timestamp: String,
    pub status: RecordStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: RecordPayload,
}

// ── Session transcript (spec.md §3 "Session Transcript", §6) ────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    #[serde(rename = "user")]
    User(UserEntry),
    #[serde(rename = "assistant")]
    Assistant(AssistantEntry),
    /// Any other `type` (e.g. `file-history-snapshot`) is ignored but still
    /// parsed far enough to skip it without erroring the whole line.
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub session_id: String,
    pub timestamp: String,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub message: UserMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserMessage {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantEntry {
    pub session_id: String,
    pub timestamp: String,
    pub message: AssistantMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        content: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

/// Content extracted from a filtered transcript (spec.md §3 "Extracted
/// Session Content").
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub session_id: String,
    pub primary_request: String,
    pub additional_context: Vec<String>,
    pub keywords: BTreeSet<String>,
    pub cwd: String,
    pub project_name: String,
    pub tool_patterns: BTreeSet<String>,
    pub file_paths: BTreeSet<String>,
    pub time_range: Option<TimeRange>,
    /// Total filtered transcript entries (user + assistant) seen for this
    /// session — used by the matcher's early-reject check (spec.md §4.6
    /// step 2).
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

impl ExtractedContent {
    /// All user-authored messages, primary request first.
    pub fn user_messages(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_request.as_str())
            .chain(self.additional_context.iter().map(|s| s.as_str()))
    }
}

// ── Tracker mirror types (spec.md §3 "Issue") ────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    Started,
    Unstarted,
    Completed,
    Canceled,
    Backlog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub state_type: StateType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    pub state: WorkflowState,
    #[serde(default)]
    pub assignee: Option<User>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Fields needed to create a new issue (spec.md §4.4 step 3).
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub team_id: String,
    pub assignee_id: Option<String>,
    pub label_ids: Vec<String>,
    pub state_id: Option<String>,
}

// ── Matcher types (spec.md §3 "Match Result") ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Keyword,
    Semantic,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub issue_id: String,
    pub confidence: f64,
    pub match_type: MatchType,
    pub keyword_score: f64,
    pub semantic_score: Option<f64>,
    pub matched_keywords: Vec<String>,
    pub reasoning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_kind_parses_as_unknown_instead_of_failing() {
        let line = r#"{"id":"r1","timestamp":"2024-01-01T00:00:00Z","status":"pending","kind":"some_future_kind","foo":"bar"}"#;
        let record: QueueRecord = serde_json::from_str(line).expect("should parse, not fail");
        assert_eq!(record.payload.kind(), RecordKind::Unknown);
        assert_eq!(record.payload.session_id(), "");
        assert_eq!(record.payload.cwd(), "");
    }

    #[test]
    fn known_kinds_still_round_trip() {
        let payload = RecordPayload::SessionStop {
            session_id: "s1".into(),
            transcript_path: "/tmp/t.jsonl".into(),
            cwd: "/tmp/proj".into(),
        };
        assert_eq!(payload.kind(), RecordKind::SessionStop);
        let json = serde_json::to_string(&payload).unwrap();
        let back: RecordPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), RecordKind::SessionStop);
    }
}
