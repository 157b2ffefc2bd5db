use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;

/// One candidate match returned by `match_issues` (spec.md §4.6 step 6).
#[derive(Debug, Clone, Deserialize)]
pub struct SemanticMatch {
    pub issue_id: String,
    pub relevance_score: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub matched_aspects: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchIssuesResponse {
    #[serde(default)]
    pub matches: Vec<SemanticMatch>,
}

/// LLM transport (spec.md §6): a single synchronous `complete` operation,
/// plus two derived JSON-aware helpers.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    async fn complete_json(&self, prompt: &str) -> Result<serde_json::Value> {
        let text = self.complete(prompt).await?;
        extract_json_object(&text)
    }

    async fn match_issues(&self, prompt: &str) -> Result<MatchIssuesResponse> {
        let value = self.complete_json(prompt).await?;
        serde_json::from_value(value).context("parsing match_issues response")
    }
}

/// Parses the first `{...}` substring as JSON (spec.md §6 `complete_json`).
fn extract_json_object(text: &str) -> Result<serde_json::Value> {
    let start = text.find('{').context("no JSON object in LLM output")?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut end = None;
    for (i, &b) in bytes[start..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + i + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end.context("unterminated JSON object in LLM output")?;
    serde_json::from_str(&text[start..end]).context("invalid JSON in LLM output")
}

/// Spawns an external command with the prompt as a single argument, reading
/// its stdout, under a wall-clock timeout — the same spawn/await shape the
/// prior art uses for its `git` subprocess helper, generalized with a
/// timeout since LLM calls are not bounded the way a local `git` invocation
/// is (spec.md §5 "Cancellation & timeouts").
pub struct SubprocessLlm {
    command: String,
    timeout: Duration,
}

impl SubprocessLlm {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        SubprocessLlm {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Llm for SubprocessLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new(&self.command);
        cmd.arg(prompt);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd.spawn().context("spawning LLM command")?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .context("LLM command timed out")?
            .context("LLM command failed to run")?;

        if !output.status.success() {
            anyhow::bail!(
                "LLM command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Scripted in-memory LLM test double.
pub struct FakeLlm {
    pub response: String,
}

impl FakeLlm {
    pub fn new(response: impl Into<String>) -> Self {
        FakeLlm {
            response: response.into(),
        }
    }
}

#[async_trait]
impl Llm for FakeLlm {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_object_finds_first_balanced_braces() {
        let text = "here is the result: {\"matches\":[{\"issue_id\":\"a\",\"relevance_score\":0.5}]} trailing text";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["matches"][0]["issue_id"], "a");
    }

    #[tokio::test]
    async fn match_issues_parses_fake_completion() {
        let llm = FakeLlm::new(
            r#"{"matches":[{"issue_id":"ENG-1","relevance_score":0.9,"reasoning":"same bug"}]}"#,
        );
        let result = llm.match_issues("prompt").await.unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].issue_id, "ENG-1");
        assert!((result.matches[0].relevance_score - 0.9).abs() < 1e-9);
    }
}
