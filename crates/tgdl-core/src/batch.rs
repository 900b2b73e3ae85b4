//! Batch job controller: walks a message-id range one post at a time, with
//! pause/resume by name and global cancellation.
//!
//! All job state lives in one [`Jobs`] table: a single running slot (so at most
//! one job runs) and a name-keyed registry of paused jobs. The runner task
//! only touches it between items, behind a short lock.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use chrono::Utc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    domain::{ChatCandidate, ChatId, MessageId, UserId},
    errors::Error,
    fetch::{until_cancelled, ItemPipeline, ItemRequest, Mode, Outcome},
    formatting, link,
    messaging::port::MessagingPort,
    tasks::{CancelSignal, TaskTracker},
    Result,
};

const ALREADY_RUNNING: &str = "A batch is already running. Pause or wait until it finishes.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct BatchSettings {
    /// Pause between items, to stay under the source's rate limits.
    pub item_delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            item_delay: Duration::from_secs(3),
        }
    }
}

impl BatchSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            item_delay: cfg.batch_item_delay,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BatchJob {
    pub name: String,
    pub start_id: i64,
    /// Inclusive.
    pub end_id: i64,
    /// Next id to process; the job is done once it passes `end_id`.
    pub next_id: i64,
    pub prefix: String,
    pub candidates: Vec<ChatCandidate>,
    pub chat: ChatId,
    pub trigger: MessageId,
    pub initiator: UserId,
    pub start_url: String,
    pub end_url: String,
    pub downloaded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub state: JobState,
    pub pause_requested: bool,
    pub created_at: Instant,
    pub updated_at: Instant,
}

impl BatchJob {
    pub fn is_done(&self) -> bool {
        self.next_id > self.end_id
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            name: self.name.clone(),
            state: self.state,
            pause_requested: self.pause_requested,
            start_id: self.start_id,
            end_id: self.end_id,
            next_id: self.next_id,
            downloaded: self.downloaded,
            skipped: self.skipped,
            failed: self.failed,
        }
    }

    fn record(&mut self, result: &std::result::Result<Result<Outcome>, JoinError>) {
        match result {
            Ok(Ok(Outcome::Downloaded)) => self.downloaded += 1,
            Ok(Ok(Outcome::Skipped(_))) | Ok(Err(_)) => self.skipped += 1,
            Ok(Ok(Outcome::Failed(_))) | Err(_) => self.failed += 1,
            Ok(Ok(Outcome::Cancelled)) => {}
        }
    }

    fn item_request(&self, cancel: &CancellationToken) -> ItemRequest {
        ItemRequest {
            url: format!("{}/{}", self.prefix, self.next_id),
            chat: self.chat,
            trigger: self.trigger,
            candidates: Some(self.candidates.clone()),
            mode: Mode::Batch,
            cancel: cancel.clone(),
        }
    }
}

/// Read-only view of a job for replies and `/stats`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSnapshot {
    pub name: String,
    pub state: JobState,
    pub pause_requested: bool,
    pub start_id: i64,
    pub end_id: i64,
    pub next_id: i64,
    pub downloaded: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl JobSnapshot {
    pub fn total(&self) -> i64 {
        self.end_id - self.start_id + 1
    }

    pub fn done(&self) -> i64 {
        self.next_id - self.start_id
    }

    pub fn remaining(&self) -> i64 {
        (self.end_id - self.next_id + 1).max(0)
    }

    pub fn progress(&self) -> String {
        format!("{}/{}", self.done(), self.total())
    }
}

#[derive(Clone, Debug, Default)]
pub struct BatchStatus {
    pub running: Option<JobSnapshot>,
    /// Sorted by name.
    pub paused: Vec<JobSnapshot>,
    pub last_finished: Option<JobSnapshot>,
}

/// What `/bdl` asks for.
#[derive(Clone, Debug)]
pub struct BatchStart {
    pub start_url: String,
    pub end_url: String,
    pub chat: ChatId,
    pub trigger: MessageId,
    pub initiator: UserId,
}

#[derive(Default)]
struct Jobs {
    running: Option<BatchJob>,
    paused: HashMap<String, BatchJob>,
    last_finished: Option<JobSnapshot>,
    pause_counter: u64,
}

impl Jobs {
    fn available_names(&self) -> String {
        let mut names: Vec<&str> = self.paused.keys().map(String::as_str).collect();
        if names.is_empty() {
            return "(none)".to_string();
        }
        names.sort_unstable();
        names.join(", ")
    }
}

struct Inner {
    pipeline: Arc<ItemPipeline>,
    messenger: Arc<dyn MessagingPort>,
    tasks: Arc<TaskTracker>,
    cancel: Arc<CancelSignal>,
    settings: BatchSettings,
    jobs: Mutex<Jobs>,
}

#[derive(Clone)]
pub struct BatchController {
    inner: Arc<Inner>,
}

impl BatchController {
    pub fn new(
        pipeline: Arc<ItemPipeline>,
        messenger: Arc<dyn MessagingPort>,
        tasks: Arc<TaskTracker>,
        cancel: Arc<CancelSignal>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline,
                messenger,
                tasks,
                cancel,
                settings,
                jobs: Mutex::new(Jobs::default()),
            }),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, Jobs> {
        self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate the range, register the job and launch its runner.
    pub async fn start(&self, req: BatchStart) -> Result<JobSnapshot> {
        if self.jobs().running.is_some() {
            return Err(Error::Conflict(ALREADY_RUNNING.to_string()));
        }

        let parse = |url: &str| {
            link::resolve(url).map_err(|e| Error::Input(format!("Error parsing links: {e}")))
        };
        let start = parse(&req.start_url)?;
        let end = parse(&req.end_url)?;

        let candidates = link::overlap_candidates(&start.candidates, &end.candidates);
        let Some(primary) = candidates.first() else {
            return Err(Error::Input(
                "Both links must be from the same channel (no overlap after normalization)."
                    .to_string(),
            ));
        };
        let (start_id, end_id) = (i64::from(start.message_id), i64::from(end.message_id));
        if start_id > end_id {
            return Err(Error::Input(
                "Invalid range: start ID cannot exceed end ID.".to_string(),
            ));
        }

        if let Err(e) = self.inner.pipeline.source().warm_up(primary).await {
            tracing::debug!(chat = %primary, error = %e, "chat warm-up failed");
        }

        let now = Instant::now();
        let job = BatchJob {
            name: format!("batch_{}", Utc::now().timestamp()),
            start_id,
            end_id,
            next_id: start_id,
            prefix: link::link_prefix(&req.start_url),
            candidates,
            chat: req.chat,
            trigger: req.trigger,
            initiator: req.initiator,
            start_url: req.start_url,
            end_url: req.end_url,
            downloaded: 0,
            skipped: 0,
            failed: 0,
            state: JobState::Running,
            pause_requested: false,
            created_at: now,
            updated_at: now,
        };
        let snapshot = job.snapshot();

        {
            let mut jobs = self.jobs();
            // Re-checked: another start may have won while we warmed up.
            if jobs.running.is_some() {
                return Err(Error::Conflict(ALREADY_RUNNING.to_string()));
            }
            jobs.running = Some(job);
        }

        tracing::info!(job = %snapshot.name, start_id, end_id, "batch started");
        self.launch(false);
        Ok(snapshot)
    }

    /// Ask the running job to stop at the next item boundary. Returns the
    /// name it will be stored under.
    pub fn pause(&self, user: UserId, name: Option<&str>) -> Result<String> {
        let mut guard = self.jobs();
        let jobs = &mut *guard;
        let Some(job) = jobs.running.as_mut() else {
            return Err(Error::Conflict("No active batch to pause.".to_string()));
        };
        if job.initiator != user {
            return Err(Error::Ownership(
                "Only the user who started the batch can pause it.".to_string(),
            ));
        }

        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => {
                jobs.pause_counter += 1;
                format!("pause{}", jobs.pause_counter)
            }
        };
        if jobs.paused.contains_key(&name) {
            return Err(Error::Conflict(
                "Name already used for a paused batch. Choose another.".to_string(),
            ));
        }

        job.pause_requested = true;
        job.name = name.clone();
        tracing::info!(job = %name, next_id = job.next_id, "pause requested");
        Ok(name)
    }

    /// Move a paused job back into the running slot and relaunch it.
    ///
    /// Without a name the most recently updated paused job is picked.
    pub fn resume(&self, name: Option<&str>) -> Result<JobSnapshot> {
        let snapshot = {
            let mut jobs = self.jobs();
            if jobs.running.is_some() {
                return Err(Error::Conflict(ALREADY_RUNNING.to_string()));
            }

            let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
                Some(n) => n.to_string(),
                None => jobs
                    .paused
                    .values()
                    .max_by_key(|j| j.updated_at)
                    .map(|j| j.name.clone())
                    .ok_or_else(|| Error::NotFound {
                        what: "paused batch".to_string(),
                        available: "(none)".to_string(),
                    })?,
            };
            let Some(mut job) = jobs.paused.remove(&name) else {
                return Err(Error::NotFound {
                    what: "paused name".to_string(),
                    available: jobs.available_names(),
                });
            };
            if job.is_done() {
                jobs.paused.insert(name, job);
                return Err(Error::Conflict(
                    "This batch already finished. Start a new one.".to_string(),
                ));
            }

            job.pause_requested = false;
            job.state = JobState::Running;
            let snapshot = job.snapshot();
            jobs.running = Some(job);
            snapshot
        };

        tracing::info!(job = %snapshot.name, next_id = snapshot.next_id, "batch resumed");
        self.launch(true);
        Ok(snapshot)
    }

    pub fn status(&self) -> BatchStatus {
        let jobs = self.jobs();
        let mut paused: Vec<JobSnapshot> = jobs.paused.values().map(BatchJob::snapshot).collect();
        paused.sort_by(|a, b| a.name.cmp(&b.name));
        BatchStatus {
            running: jobs.running.as_ref().map(BatchJob::snapshot),
            paused,
            last_finished: jobs.last_finished.clone(),
        }
    }

    fn launch(&self, resumed: bool) {
        // Runners see the signal current at launch; a later re-arm does not revive them.
        let cancel = self.inner.cancel.token();
        let this = self.clone();
        self.inner.tasks.spawn(async move { this.run(cancel, resumed).await });
    }

    async fn run(self, cancel: CancellationToken, resumed: bool) {
        let Some((chat, first)) = self
            .jobs()
            .running
            .as_ref()
            .map(|j| (j.chat, j.snapshot()))
        else {
            return;
        };
        let banner = if resumed {
            formatting::batch_resumed(&first)
        } else {
            formatting::batch_started(&first)
        };
        let banner = match self.inner.messenger.send_html(chat, &banner).await {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(error = %e, "could not send batch banner");
                None
            }
        };

        loop {
            let step = {
                let jobs = self.jobs();
                let Some(job) = jobs.running.as_ref() else {
                    break;
                };
                if job.is_done() || job.pause_requested || cancel.is_cancelled() {
                    None
                } else {
                    Some(job.item_request(&cancel))
                }
            };
            let Some(req) = step else {
                break;
            };

            let url = req.url.clone();
            let pipeline = Arc::clone(&self.inner.pipeline);
            // Own task, so a panic in one item is counted instead of killing the runner.
            let result = self
                .inner
                .tasks
                .spawn(async move { pipeline.process(req).await })
                .await;
            match &result {
                Ok(Ok(outcome)) => tracing::debug!(url = %url, ?outcome, "batch item done"),
                Ok(Err(e)) => tracing::info!(url = %url, error = %e, "batch item skipped"),
                Err(e) => tracing::error!(url = %url, error = %e, "unhandled error in batch item"),
            }

            let more = {
                let mut jobs = self.jobs();
                let Some(job) = jobs.running.as_mut() else {
                    break;
                };
                job.record(&result);
                job.next_id += 1;
                job.updated_at = Instant::now();
                !job.is_done() && !job.pause_requested
            };

            if more
                && until_cancelled(&cancel, tokio::time::sleep(self.inner.settings.item_delay))
                    .await
                    .is_none()
            {
                break;
            }
        }

        if let Some(banner) = banner {
            let _ = self.inner.messenger.delete_message(banner).await;
        }

        let Some(finished) = self.finish(cancel.is_cancelled()) else {
            return;
        };
        let report = match finished.state {
            JobState::Paused => formatting::batch_paused(&finished),
            JobState::Cancelled => formatting::batch_cancelled(&finished),
            JobState::Completed | JobState::Running => formatting::batch_completed(&finished),
        };
        if let Err(e) = self.inner.messenger.send_html(chat, &report).await {
            tracing::warn!(error = %e, "could not send batch report");
        }
    }

    /// Take the job out of the running slot and settle its final state.
    fn finish(&self, cancelled: bool) -> Option<JobSnapshot> {
        let mut jobs = self.jobs();
        let mut job = jobs.running.take()?;

        // A pause that landed during the last item still keeps the job under
        // its name; resuming it then reports that it already finished.
        job.state = if job.pause_requested && !cancelled {
            JobState::Paused
        } else if job.is_done() {
            JobState::Completed
        } else {
            JobState::Cancelled
        };
        let snapshot = job.snapshot();
        tracing::info!(
            job = %job.name,
            state = ?job.state,
            next_id = job.next_id,
            downloaded = job.downloaded,
            skipped = job.skipped,
            failed = job.failed,
            "batch finished"
        );

        if job.state == JobState::Paused {
            jobs.paused.insert(job.name.clone(), job);
        } else {
            jobs.last_finished = Some(snapshot.clone());
        }
        Some(snapshot)
    }
}
