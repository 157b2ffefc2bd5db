use crate::models::{QueueRecord, RecordPayload, RecordStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The durable append-only NDJSON queue (spec.md §4.2).
///
/// Producers (hooks) only ever append. The single consumer (the processor)
/// is the sole caller of `update_status` / `cleanup_old`, which rewrite the
/// whole file.
#[derive(Debug, Clone)]
pub struct Queue {
    path: PathBuf,
}

impl Queue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Queue { path: path.into() }
    }

    /// Appends one new record, assigning a fresh id and `pending` status.
    /// A single small-buffer write under an exclusive file lock — acceptable
    /// on POSIX local filesystems without an fsync for this workload.
    pub fn append(&self, payload: RecordPayload) -> Result<QueueRecord> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).context("creating queue directory")?;
            }
        }

        let record = QueueRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            status: RecordStatus::Pending,
            retry_count: 0,
            error: None,
            payload,
        };

        let mut line = serde_json::to_string(&record).context("serializing queue record")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("opening queue file")?;
        file.lock_exclusive().context("locking queue file")?;
        let result = file.write_all(line.as_bytes());
        file.unlock().ok();
        result.context("writing queue record")?;

        Ok(record)
    }

    /// Loads the entire file, skipping blank or invalid lines (spec.md §7
    /// "malformed inputs... silently skipped at read time").
    pub fn read_all(&self) -> Result<Vec<QueueRecord>> {
        let Ok(file) = File::open(&self.path) else {
            return Ok(Vec::new());
        };
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else { continue };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<QueueRecord>(line) {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub fn read_pending(&self) -> Result<Vec<QueueRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.status == RecordStatus::Pending)
            .collect())
    }

    pub fn read_retryable(&self, max_retries: u32) -> Result<Vec<QueueRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.status == RecordStatus::Failed && r.retry_count < max_retries)
            .collect())
    }

    /// Rewrites the whole file with the target record's status updated.
    /// Incrementing `retry_count` happens only when transitioning to
    /// `failed`; an explicit `pending` retry leaves it untouched.
    pub fn update_status(&self, id: &str, new_status: RecordStatus, error: Option<String>) -> Result<()> {
        let mut records = self.read_all()?;
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            anyhow::bail!("queue record {id} not found");
        };
        if new_status == RecordStatus::Failed {
            record.retry_count += 1;
        }
        record.status = new_status;
        record.error = error;
        self.rewrite(&records)
    }

    /// Drops `processed` records older than `hours`.
    pub fn cleanup_old(&self, hours: i64) -> Result<usize> {
        let records = self.read_all()?;
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let before = records.len();
        let kept: Vec<QueueRecord> = records
            .into_iter()
            .filter(|r| {
                if r.status != RecordStatus::Processed {
                    return true;
                }
                chrono::DateTime::parse_from_rfc3339(&r.timestamp)
                    .map(|ts| ts.with_timezone(&Utc) >= cutoff)
                    .unwrap_or(true)
            })
            .collect();
        let removed = before - kept.len();
        self.rewrite(&kept)?;
        Ok(removed)
    }

    fn rewrite(&self, records: &[QueueRecord]) -> Result<()> {
        let mut buf = String::new();
        for r in records {
            buf.push_str(&serde_json::to_string(r).context("serializing queue record")?);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .context("opening queue file for rewrite")?;
        file.lock_exclusive().context("locking queue file")?;
        let result = file.write_all(buf.as_bytes());
        file.unlock().ok();
        result.context("rewriting queue file")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordPayload;

    fn session_stop_payload() -> RecordPayload {
        RecordPayload::SessionStop {
            session_id: "s1".into(),
            transcript_path: "/tmp/s1.jsonl".into(),
            cwd: "/tmp/proj".into(),
        }
    }

    #[test]
    fn append_then_read_pending_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Queue::new(dir.path().join("queue.jsonl"));

        let record = queue.append(session_stop_payload()).unwrap();
        let pending = queue.read_pending().unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, record.id);
        assert_eq!(pending[0].status, RecordStatus::Pending);
        assert_eq!(pending[0].retry_count, 0);
    }

    #[test]
    fn update_status_to_failed_increments_retry_count() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Queue::new(dir.path().join("queue.jsonl"));
        let record = queue.append(session_stop_payload()).unwrap();

        queue
            .update_status(&record.id, RecordStatus::Failed, Some("boom".into()))
            .unwrap();
        let retryable = queue.read_retryable(3).unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].retry_count, 1);
        assert_eq!(retryable[0].error.as_deref(), Some("boom"));

        queue
            .update_status(&record.id, RecordStatus::Failed, Some("boom again".into()))
            .unwrap();
        queue
            .update_status(&record.id, RecordStatus::Failed, Some("boom thrice".into()))
            .unwrap();
        let retryable = queue.read_retryable(3).unwrap();
        assert!(retryable.is_empty(), "exhausted record should drop out of retry pool");
    }

    #[test]
    fn explicit_retry_to_pending_preserves_retry_count() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Queue::new(dir.path().join("queue.jsonl"));
        let record = queue.append(session_stop_payload()).unwrap();
        queue
            .update_status(&record.id, RecordStatus::Failed, Some("boom".into()))
            .unwrap();
        queue.update_status(&record.id, RecordStatus::Pending, None).unwrap();

        let all = queue.read_all().unwrap();
        assert_eq!(all[0].status, RecordStatus::Pending);
        assert_eq!(all[0].retry_count, 1);
    }

    #[test]
    fn read_all_skips_blank_and_invalid_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        std::fs::write(&path, "\nnot json\n{\"id\":\"x\"}\n").unwrap();
        let queue = Queue::new(path);
        assert!(queue.read_all().unwrap().is_empty());
    }

    #[test]
    fn cleanup_old_drops_only_stale_processed_records() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Queue::new(dir.path().join("queue.jsonl"));
        let record = queue.append(session_stop_payload()).unwrap();
        queue.update_status(&record.id, RecordStatus::Processed, None).unwrap();

        // Force an old timestamp directly into the file.
        let mut records = queue.read_all().unwrap();
        records[0].timestamp = (Utc::now() - chrono::Duration::hours(100)).to_rfc3339();
        queue.rewrite(&records).unwrap();

        let removed = queue.cleanup_old(48).unwrap();
        assert_eq!(removed, 1);
        assert!(queue.read_all().unwrap().is_empty());
    }
}
