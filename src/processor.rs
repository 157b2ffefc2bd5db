use crate::config::Config;
use crate::llm::Llm;
use crate::matcher::HybridMatcher;
use crate::models::{RecordPayload, RecordStatus};
use crate::queue::Queue;
use crate::session_processor::TrackerCache;
use crate::tracker::Tracker;
use crate::{pr_handler, session_processor, transcript};
use anyhow::Result;
use notify::{RecursiveMode, Watcher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The single long-running consumer (spec.md §4.3). Owns the queue file for
/// the duration of the process, the cached tracker metadata, and the
/// matcher.
pub struct QueueProcessor<T: Tracker, L: Llm> {
    queue: Queue,
    config: Config,
    tracker: Arc<T>,
    matcher: HybridMatcher<T, L>,
    cache: TrackerCache,
    draining: AtomicBool,
}

impl<T: Tracker, L: Llm> QueueProcessor<T, L> {
    /// Prefetches tracker metadata in the deterministic order spec.md §9
    /// prescribes: viewer -> team -> labels -> states.
    pub async fn start(config: Config, tracker: Arc<T>, llm: Arc<L>) -> Result<Self> {
        let viewer = tracker.get_viewer().await.ok();
        let teams = tracker.list_teams().await.unwrap_or_default();
        let team = teams.into_iter().next();

        let labels = match &team {
            Some(team) => tracker.list_labels(&team.id).await.unwrap_or_default(),
            None => Vec::new(),
        };
        let states = match &team {
            Some(team) => tracker.list_states(&team.id).await.unwrap_or_default(),
            None => Vec::new(),
        };

        let cache = TrackerCache {
            team_id: team.map(|t| t.id),
            default_assignee_id: viewer.map(|v| v.id),
            labels,
            states,
        };

        let matcher = HybridMatcher::new(
            tracker.clone(),
            llm,
            config.matcher.clone(),
            &config.branch_pattern,
        )?;

        let queue = Queue::new(config.queue_path.clone());

        Ok(QueueProcessor {
            queue,
            config,
            tracker,
            matcher,
            cache,
            draining: AtomicBool::new(false),
        })
    }

    /// Runs the initial drain, then watches the queue file for changes,
    /// draining on each notification and on a periodic fallback tick, until
    /// a termination signal arrives.
    pub async fn run(&self) -> Result<()> {
        self.drain().await;

        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(32);
        let watch_path = self.queue.path().to_path_buf();
        let watch_dir = watch_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or(watch_path.clone());
        std::fs::create_dir_all(&watch_dir).ok();

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(evt) = res {
                if matches!(
                    evt.kind,
                    notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                ) {
                    let _ = tx.blocking_send(());
                }
            }
        })?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        loop {
            tokio::select! {
                _ = shutdown_signal() => {
                    eprintln!("[convoy processor] shutdown signal received, draining in-flight work");
                    break;
                }
                _ = tokio::time::timeout(Duration::from_secs(5), rx.recv()) => {
                    self.drain().await;
                }
            }
        }

        Ok(())
    }

    /// A single drain pass: pending records in file order, then
    /// retry-eligible records. Non-reentrant.
    pub async fn drain(&self) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let result = self.drain_inner().await;
        self.draining.store(false, Ordering::SeqCst);
        if let Err(e) = result {
            eprintln!("[convoy processor] drain error: {e}");
        }
    }

    async fn drain_inner(&self) -> Result<()> {
        let pending = self.queue.read_pending()?;
        for record in pending {
            self.process_record(&record.id, &record.payload).await;
        }

        let retryable = self.queue.read_retryable(self.config.max_retries)?;
        for record in retryable {
            self.process_record(&record.id, &record.payload).await;
        }

        Ok(())
    }

    async fn process_record(&self, id: &str, payload: &RecordPayload) {
        if let Err(e) = self.queue.update_status(id, RecordStatus::Processing, None) {
            eprintln!("[convoy processor] failed to mark {id} processing: {e}");
            return;
        }

        let result = self.dispatch(payload).await;

        let outcome = match result {
            Ok(()) => self.queue.update_status(id, RecordStatus::Processed, None),
            Err(e) => {
                eprintln!("[convoy processor] record {id} failed: {e}");
                self.queue
                    .update_status(id, RecordStatus::Failed, Some(e.to_string()))
            }
        };
        if let Err(e) = outcome {
            eprintln!("[convoy processor] failed to update status for {id}: {e}");
        }
    }

    async fn dispatch(&self, payload: &RecordPayload) -> Result<()> {
        match payload {
            RecordPayload::SessionStop {
                session_id,
                transcript_path,
                cwd,
            } => self.handle_session_stop(session_id, transcript_path, cwd).await,
            RecordPayload::PrCreated { cwd, pr_url, .. } => {
                pr_handler::handle(cwd, pr_url, &self.matcher, self.tracker.as_ref(), &self.cache).await
            }
            RecordPayload::Unknown => {
                anyhow::bail!("unrecognized queue record kind — cannot dispatch")
            }
        }
    }

    async fn handle_session_stop(&self, session_id: &str, transcript_path: &str, cwd: &str) -> Result<()> {
        let Some(content) = transcript::load_and_extract(transcript_path, session_id, cwd)? else {
            eprintln!("[convoy processor] session {session_id}: no actionable content after noise filtering");
            return Ok(());
        };

        let git_branch = transcript::first_git_branch(transcript_path)?;

        session_processor::handle(
            &content,
            git_branch.as_deref(),
            &self.matcher,
            self.tracker.as_ref(),
            self.matcher_llm(),
            &self.cache,
        )
        .await
    }

    fn matcher_llm(&self) -> &L {
        // `HybridMatcher` owns the only `Arc<L>` the processor holds; reuse
        // it for the session processor's summarization call too rather
        // than threading a second handle through `start()`.
        self.matcher.llm()
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
