//! Bounded-concurrency download scheduler.
//!
//! Accepts jobs, runs up to `capacity` of them at once on Tokio tasks, keeps
//! the rest in a FIFO queue, reports progress per job, counts completion per
//! batch, and cancels everything on request. Subscribers receive
//! [`SchedulerEvent`](crate::event::SchedulerEvent)s over the receiver
//! returned by [`Scheduler::new`].

mod execute;
mod shared;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::config::{TubedlConfig, DEFAULT_CAPACITY};
use crate::event::{EventReceiver, EventSender};
use crate::fetch::{MediaFetchClient, MediaSettings};
use crate::job::{BatchId, DownloadJob, JobId, MediaFormat};

use self::execute::WorkerSettings;
use self::shared::Shared;
use self::state::SchedulerState;

pub use self::shared::CancelSummary;
pub use self::state::QueueSnapshot;

/// Construction-time options.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of jobs running at once (clamped to at least 1).
    pub capacity: usize,
    /// Directory new jobs are saved to.
    pub download_dir: PathBuf,
    pub media: MediaSettings,
    /// Minimum spacing of progress events within one phase of a job.
    pub progress_interval: Duration,
    /// Optional wall-clock limit per job.
    pub job_timeout: Option<Duration>,
}

impl SchedulerOptions {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            download_dir: download_dir.into(),
            media: MediaSettings::default(),
            progress_interval: Duration::from_millis(100),
            job_timeout: None,
        }
    }

    pub fn from_config(cfg: &TubedlConfig) -> Self {
        Self {
            capacity: cfg.max_concurrent_downloads,
            download_dir: cfg.resolved_download_dir(),
            media: cfg.media.clone(),
            progress_interval: cfg.progress_interval(),
            job_timeout: cfg.job_timeout(),
        }
    }
}

/// Jobs created by one `submit_batch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTicket {
    pub batch: BatchId,
    pub jobs: Vec<JobId>,
}

/// Handle to the scheduler. Dropping it cancels all outstanding work.
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler whose workers run on `runtime`, plus its event stream.
    pub fn new(
        runtime: Handle,
        client: Arc<dyn MediaFetchClient>,
        options: SchedulerOptions,
    ) -> (Self, EventReceiver) {
        let (events, rx) = EventSender::channel();
        let state = SchedulerState::new(options.capacity, options.download_dir);
        let settings = WorkerSettings {
            media: options.media,
            progress_interval: options.progress_interval,
            timeout: options.job_timeout,
        };
        let shared = Arc::new(Shared::new(state, events, client, settings, runtime));
        (Self { shared }, rx)
    }

    /// Submits one download. It joins the current ad-hoc batch (opened by the
    /// first `submit` after the previous ad-hoc batch completed).
    /// The URL is not validated here; bad URLs fail asynchronously.
    pub fn submit(&self, url: impl Into<String>, format: MediaFormat) -> JobId {
        let mut st = self.shared.state();
        let batch = st.adhoc_batch();
        self.shared.enqueue(&mut st, url.into(), format, batch)
    }

    /// Submits every URL as an independent job of a fresh batch.
    /// Returns `None` (and emits nothing) for an empty list.
    pub fn submit_batch<I, S>(&self, urls: I, format: MediaFormat) -> Option<BatchTicket>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        if urls.is_empty() {
            return None;
        }
        // The whole batch is enqueued under one lock so no job can complete
        // before the batch total is final.
        let mut st = self.shared.state();
        let batch = st.open_batch();
        let jobs = urls
            .into_iter()
            .map(|url| self.shared.enqueue(&mut st, url, format, batch))
            .collect();
        Some(BatchTicket { batch, jobs })
    }

    /// Discards queued jobs, asks running jobs to stop, and resets batch counters.
    pub fn cancel_all(&self) -> CancelSummary {
        self.shared.cancel_all()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.shared.state().snapshot()
    }

    /// Clone of a live job (queued or running). Terminal jobs are released.
    pub fn job(&self, id: JobId) -> Option<DownloadJob> {
        self.shared.state().jobs.get(&id).cloned()
    }

    pub fn capacity(&self) -> usize {
        self.shared.state().capacity
    }

    /// Changes the concurrency limit. Raising it starts queued jobs right
    /// away; lowering it never stops running jobs.
    pub fn set_capacity(&self, capacity: usize) {
        let mut st = self.shared.state();
        st.capacity = capacity.max(1);
        tracing::debug!(capacity = st.capacity, "capacity changed");
        self.shared.fill_slots(&mut st);
    }

    pub fn download_dir(&self) -> PathBuf {
        self.shared.state().download_dir.clone()
    }

    /// Changes where subsequently submitted jobs are saved.
    pub fn set_download_dir(&self, dir: impl Into<PathBuf>) {
        self.shared.state().download_dir = dir.into();
    }

    /// Resolves once no job is running or queued.
    pub async fn wait_idle(&self) {
        self.shared.wait_idle().await
    }

    /// Cancels everything and waits for running jobs to unwind.
    pub async fn shutdown(&self) {
        self.cancel_all();
        self.shared.wait_idle().await
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.cancel_all();
    }
}
