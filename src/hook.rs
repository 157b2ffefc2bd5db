use crate::models::RecordPayload;
use crate::queue::Queue;
use regex::Regex;
use std::io::Read;

/// The only decision the core ever emits to a hook caller (spec.md §4.1) —
/// hooks never block or fail the caller, regardless of internal errors.
fn emit_continue() {
    println!("{}", serde_json::json!({ "decision": "continue" }));
}

fn read_stdin_json() -> Option<serde_json::Value> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).ok()?;
    serde_json::from_str(&input).ok()
}

/// `convoy hook session-stop`: appends one `session_stop` record per
/// invocation (spec.md §4.1).
pub fn run_session_stop(queue_path: &std::path::Path) {
    let Some(payload) = read_stdin_json() else {
        eprintln!("[convoy hook] session-stop: invalid or missing JSON on stdin");
        emit_continue();
        return;
    };

    let session_id = payload["session_id"].as_str().unwrap_or_default();
    let transcript_path = payload["transcript_path"].as_str().unwrap_or_default();
    let cwd = payload["cwd"].as_str().unwrap_or_default();

    if session_id.is_empty() || transcript_path.is_empty() {
        eprintln!("[convoy hook] session-stop: missing session_id or transcript_path");
        emit_continue();
        return;
    }

    let queue = Queue::new(queue_path);
    if let Err(e) = queue.append(RecordPayload::SessionStop {
        session_id: session_id.to_string(),
        transcript_path: transcript_path.to_string(),
        cwd: cwd.to_string(),
    }) {
        eprintln!("[convoy hook] session-stop: queue append failed: {e}");
    }

    emit_continue();
}

/// The tool name the shell runs under — overridable for assistants that
/// expose shell execution under a different tool name.
fn shell_tool_name() -> String {
    std::env::var("CONVOY_SHELL_TOOL").unwrap_or_else(|_| "Bash".to_string())
}

fn pr_url_pattern() -> Regex {
    Regex::new(r"https://github\.com/([\w.-]+)/([\w.-]+)/pull/(\d+)")
        .expect("PR URL pattern is a fixed, valid regex")
}

/// `convoy hook post-tool-use`: appends a `pr_created` record iff the shell
/// tool just ran `gh pr create` and its response carries a PR URL (spec.md
/// §4.1).
pub fn run_post_tool_use(queue_path: &std::path::Path) {
    let Some(payload) = read_stdin_json() else {
        eprintln!("[convoy hook] post-tool-use: invalid or missing JSON on stdin");
        emit_continue();
        return;
    };

    if let Err(e) = try_extract_pr(&payload, queue_path) {
        eprintln!("[convoy hook] post-tool-use: {e}");
    }

    emit_continue();
}

fn try_extract_pr(payload: &serde_json::Value, queue_path: &std::path::Path) -> anyhow::Result<()> {
    let tool_name = payload["tool_name"].as_str().unwrap_or_default();
    if tool_name != shell_tool_name() {
        return Ok(());
    }

    let command = payload["tool_input"]["command"]
        .as_str()
        .or_else(|| payload["tool_input"]["cmd"].as_str())
        .unwrap_or_default();
    if !command.contains("gh pr create") {
        return Ok(());
    }

    let response_text = response_as_text(&payload["tool_response"]);
    let Some(m) = pr_url_pattern().find(&response_text) else {
        return Ok(());
    };
    let pr_url = m.as_str().to_string();

    let session_id = payload["session_id"].as_str().unwrap_or_default().to_string();
    let cwd = payload["cwd"].as_str().unwrap_or_default().to_string();

    let queue = Queue::new(queue_path);
    queue.append(RecordPayload::PrCreated {
        session_id,
        pr_url,
        cwd,
    })?;
    Ok(())
}

fn response_as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_url_pattern_matches_first_occurrence() {
        let text = "output before https://github.com/acme/w/pull/7 and more text";
        let m = pr_url_pattern().find(text).unwrap();
        assert_eq!(m.as_str(), "https://github.com/acme/w/pull/7");
    }

    #[test]
    fn try_extract_pr_appends_record_on_gh_pr_create() {
        let dir = tempfile::tempdir().unwrap();
        let queue_path = dir.path().join("queue.jsonl");
        let payload = serde_json::json!({
            "session_id": "s1",
            "cwd": "/tmp/proj",
            "tool_name": "Bash",
            "tool_input": { "command": "gh pr create --title foo" },
            "tool_response": "opened: https://github.com/acme/w/pull/7 done",
        });

        try_extract_pr(&payload, &queue_path).unwrap();

        let queue = Queue::new(&queue_path);
        let records = queue.read_pending().unwrap();
        assert_eq!(records.len(), 1);
        match &records[0].payload {
            RecordPayload::PrCreated { pr_url, session_id, .. } => {
                assert_eq!(pr_url, "https://github.com/acme/w/pull/7");
                assert_eq!(session_id, "s1");
            }
            _ => panic!("expected pr_created record"),
        }
    }

    #[test]
    fn try_extract_pr_is_noop_without_gh_pr_create() {
        let dir = tempfile::tempdir().unwrap();
        let queue_path = dir.path().join("queue.jsonl");
        let payload = serde_json::json!({
            "session_id": "s1",
            "cwd": "/tmp/proj",
            "tool_name": "Bash",
            "tool_input": { "command": "ls -la" },
            "tool_response": "total 0",
        });

        try_extract_pr(&payload, &queue_path).unwrap();
        let queue = Queue::new(&queue_path);
        assert!(queue.read_pending().unwrap().is_empty());
    }

    #[test]
    fn try_extract_pr_respects_shell_tool_override() {
        let dir = tempfile::tempdir().unwrap();
        let queue_path = dir.path().join("queue.jsonl");
        let payload = serde_json::json!({
            "session_id": "s1",
            "cwd": "/tmp/proj",
            "tool_name": "Shell",
            "tool_input": { "cmd": "gh pr create" },
            "tool_response": "https://github.com/acme/w/pull/9",
        });

        // Without the env override this tool_name wouldn't match "Bash".
        try_extract_pr(&payload, &queue_path).unwrap();
        let queue = Queue::new(&queue_path);
        assert!(queue.read_pending().unwrap().is_empty());
    }
}
