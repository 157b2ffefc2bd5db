use crate::models::{
    AssistantEntry, ContentBlock, ExtractedContent, TimeRange, TranscriptEntry, UserEntry,
};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

/// Markers that identify noise entries to drop before extraction (spec.md
/// §4.4 step 1).
const NOISE_MARKERS: &[&str] = &[
    "<system-reminder>",
    "<local-command>",
    "<user-prompt-submit-hook>",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "to", "of", "and", "or",
    "but", "in", "on", "at", "for", "with", "this", "that", "it", "i", "you", "we", "can", "do",
    "does", "not", "my", "your", "our", "as", "by", "from", "into", "me", "us",
];

/// Keys under which a tool-use `input` may carry a file path (spec.md §3).
const FILE_PATH_KEYS: &[&str] = &["file_path", "path", "filePath", "file"];

#[derive(Debug, Clone)]
enum FilteredEntry {
    User(UserEntry),
    Assistant(AssistantEntry),
}

/// Reads and parses a transcript, keeping only `user`/`assistant` entries
/// and dropping noise per spec.md §4.4 step 1. Invalid JSON lines are
/// skipped, not fatal (spec.md §7).
fn load_filtered(transcript_path: &Path) -> Result<Vec<FilteredEntry>> {
    let content = std::fs::read_to_string(transcript_path)
        .with_context(|| format!("reading transcript {}", transcript_path.display()))?;

    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<TranscriptEntry>(line) else {
            continue;
        };
        match entry {
            TranscriptEntry::User(u) => {
                if is_noise_user(&u) {
                    continue;
                }
                entries.push(FilteredEntry::User(u));
            }
            TranscriptEntry::Assistant(a) => entries.push(FilteredEntry::Assistant(a)),
            TranscriptEntry::Ignored => {}
        }
    }
    Ok(entries)
}

fn is_noise_user(entry: &UserEntry) -> bool {
    let text = &entry.message.content;
    if NOISE_MARKERS.iter().any(|m| text.contains(m)) {
        return true;
    }
    entry
        .cwd
        .as_deref()
        .map(has_subagents_segment)
        .unwrap_or(false)
}

/// Whether `path` carries a `subagents/` path segment — sub-agent transcript
/// entries are noise for the purposes of extracting a session's own request
/// (spec.md §4.4 step 1).
fn has_subagents_segment(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| c.as_os_str() == "subagents")
}

/// Noise filtering is idempotent: applying it twice to an already-filtered
/// list is a no-op (spec.md §8 "noise filter idempotence").
pub fn filter_noise(entries: Vec<UserEntry>) -> Vec<UserEntry> {
    entries.into_iter().filter(|e| !is_noise_user(e)).collect()
}

/// Loads the transcript at `transcript_path`, filters noise, and extracts
/// structured content (spec.md §4.4 steps 1-2). Returns `Ok(None)` when the
/// filtered transcript has no surviving entries.
pub fn load_and_extract(
    transcript_path: &str,
    session_id: &str,
    fallback_cwd: &str,
) -> Result<Option<ExtractedContent>> {
    let entries = load_filtered(Path::new(transcript_path))?;
    if entries.is_empty() {
        return Ok(None);
    }

    let mut user_messages: Vec<String> = Vec::new();
    let mut cwd = fallback_cwd.to_string();
    let mut git_branch: Option<String> = None;
    let mut timestamps: Vec<String> = Vec::new();
    let mut tool_patterns: BTreeSet<String> = BTreeSet::new();
    let mut file_paths: BTreeSet<String> = BTreeSet::new();

    for entry in &entries {
        match entry {
            FilteredEntry::User(u) => {
                if let Some(c) = &u.cwd {
                    cwd = c.clone();
                }
                if git_branch.is_none() {
                    git_branch = u.git_branch.clone();
                }
                timestamps.push(u.timestamp.clone());
                user_messages.push(u.message.content.clone());
            }
            FilteredEntry::Assistant(a) => {
                timestamps.push(a.timestamp.clone());
                for block in &a.message.content {
                    if let ContentBlock::ToolUse { name, input } = block {
                        tool_patterns.insert(name.to_lowercase());
                        collect_file_paths(input, &mut file_paths);
                    }
                }
            }
        }
    }

    if user_messages.is_empty() {
        return Ok(None);
    }

    let project_name = last_path_segment(&cwd);
    let primary_request = user_messages[0].clone();
    let additional_context = user_messages[1..].to_vec();
    let keywords = build_keywords(&user_messages, &project_name, &file_paths);

    let time_range = match (timestamps.first(), timestamps.last()) {
        (Some(start), Some(end)) => Some(TimeRange {
            start: start.clone(),
            end: end.clone(),
        }),
        _ => None,
    };

    Ok(Some(ExtractedContent {
        session_id: session_id.to_string(),
        primary_request,
        additional_context,
        keywords,
        cwd,
        project_name,
        tool_patterns,
        file_paths,
        time_range,
        entry_count: entries.len(),
    }))
}

/// Pulls `git_branch` from the first user entry that carries one, without
/// requiring full extraction — used when only branch-based resolution is
/// possible (spec.md §4.5).
pub fn first_git_branch(transcript_path: &str) -> Result<Option<String>> {
    let entries = load_filtered(Path::new(transcript_path))?;
    for entry in entries {
        if let FilteredEntry::User(u) = entry {
            if u.git_branch.is_some() {
                return Ok(u.git_branch);
            }
        }
    }
    Ok(None)
}

fn collect_file_paths(input: &serde_json::Value, out: &mut BTreeSet<String>) {
    let Some(obj) = input.as_object() else {
        return;
    };
    for key in FILE_PATH_KEYS {
        if let Some(s) = obj.get(*key).and_then(|v| v.as_str()) {
            if !has_subagents_segment(s) {
                out.insert(s.to_string());
            }
        }
    }
}

fn last_path_segment(cwd: &str) -> String {
    Path::new(cwd)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn build_keywords(
    user_messages: &[String],
    project_name: &str,
    file_paths: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut keywords = BTreeSet::new();
    for msg in user_messages {
        for token in tokenize(msg) {
            if !STOP_WORDS.contains(&token.as_str()) && token.len() > 1 {
                keywords.insert(token);
            }
        }
    }
    if !project_name.is_empty() {
        keywords.insert(project_name.to_lowercase());
    }
    for path in file_paths {
        if let Some(stem) = Path::new(path).file_stem().and_then(|s| s.to_str()) {
            keywords.insert(stem.to_lowercase());
        }
    }
    keywords
}

/// Lowercase alphanumeric tokens, splitting on anything else.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}
