//! State shared between the scheduler handle and its worker tasks.
//!
//! Every mutation of scheduler state (admission, completion, refill,
//! cancellation) happens under `state`'s lock, and lifecycle events are sent
//! while the lock is held, so subscribers see them in the order the
//! transitions happened. The lock is never held across an `.await`.
//! Lock order: state → control.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::control::JobControl;
use crate::event::{EventSender, SchedulerEvent};
use crate::fetch::MediaFetchClient;
use crate::job::{BatchId, DownloadJob, JobId, JobState, MediaFormat};
use crate::progress::ProgressReport;

use super::execute::{self, JobOutcome, WorkerJob, WorkerSettings};
use super::state::{ActiveSlot, SchedulerState};

/// Jobs affected by `cancel_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelSummary {
    /// Queued jobs dropped without ever running.
    pub discarded: Vec<JobId>,
    /// Running jobs asked to stop; each ends with a `JobCancelled` event.
    pub cancelling: Vec<JobId>,
}

pub(super) struct Shared {
    state: Mutex<SchedulerState>,
    control: JobControl,
    events: EventSender,
    client: Arc<dyn MediaFetchClient>,
    settings: WorkerSettings,
    runtime: Handle,
    idle: Notify,
}

impl Shared {
    pub(super) fn new(
        state: SchedulerState,
        events: EventSender,
        client: Arc<dyn MediaFetchClient>,
        settings: WorkerSettings,
        runtime: Handle,
    ) -> Self {
        Self {
            state: Mutex::new(state),
            control: JobControl::new(),
            events,
            client,
            settings,
            runtime,
            idle: Notify::new(),
        }
    }

    pub(super) fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a job in `batch`, then starts it or queues it.
    pub(super) fn enqueue(
        self: &Arc<Self>,
        st: &mut SchedulerState,
        url: String,
        format: MediaFormat,
        batch: BatchId,
    ) -> JobId {
        let id = st.next_job_id();
        let job = DownloadJob::new(id, batch, url, format, st.download_dir.clone());
        tracing::debug!(job_id = %id, batch = %batch, url = %job.url, format = format.as_str(), "job submitted");
        st.jobs.insert(id, job);
        if let Some(counter) = st.batches.get_mut(&batch) {
            counter.total += 1;
        }
        self.events.emit(SchedulerEvent::JobQueued { job_id: id, batch });

        if st.has_free_slot() && st.pending.is_empty() {
            self.start(st, id);
        } else {
            st.pending.push_back(id);
            tracing::debug!(job_id = %id, waiting = st.pending.len(), "no free slot, job queued");
        }
        id
    }

    /// Starts queued jobs while slots are free.
    pub(super) fn fill_slots(self: &Arc<Self>, st: &mut SchedulerState) {
        while let Some(next) = st.next_admission() {
            self.start(st, next);
        }
    }

    /// Moves a queued job to Running and spawns its worker.
    fn start(self: &Arc<Self>, st: &mut SchedulerState, id: JobId) {
        let Some(job) = st.jobs.get_mut(&id) else {
            tracing::warn!(job_id = %id, "admitted job is missing from the registry");
            return;
        };
        if !job.transition(JobState::Running) {
            return;
        }
        let worker_job = WorkerJob {
            id,
            url: job.url.clone(),
            format: job.format,
            target_dir: job.target_dir.clone(),
        };
        st.active.insert(id, ActiveSlot::default());
        let cancel = self.control.register(id);
        self.events.emit(SchedulerEvent::JobStarted { job_id: id });
        tracing::info!(job_id = %id, url = %worker_job.url, running = st.active.len(), "job started");

        let shared = Arc::clone(self);
        let client = Arc::clone(&self.client);
        let settings = self.settings.clone();
        let reporter = Arc::clone(self);
        let work = async move {
            execute::run_job(client.as_ref(), &settings, &worker_job, &cancel, move |r| {
                reporter.on_progress(id, r)
            })
            .await
        };
        let runtime = self.runtime.clone();
        self.runtime.spawn(async move {
            // The inner task isolates panics so the slot is always released.
            let outcome = match runtime.spawn(work).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => JobOutcome::Cancelled,
                Err(e) => JobOutcome::Failed {
                    message: format!("download failed: worker task {}", e),
                },
            };
            shared.on_job_terminal(id, outcome);
        });
    }

    fn on_progress(&self, id: JobId, report: ProgressReport) {
        let mut st = self.state();
        let cancelling = st.active.get(&id).map(|s| s.cancel_requested);
        if cancelling != Some(false) {
            return;
        }
        if let Some(job) = st.jobs.get_mut(&id) {
            job.record_progress(report.percent);
            self.events.emit(SchedulerEvent::JobProgress {
                job_id: id,
                phase: report.phase,
                percent: job.progress_percent,
                message: report.message,
            });
        }
    }

    /// Completion hook: release the slot, settle the state, refill, count the batch.
    pub(super) fn on_job_terminal(self: &Arc<Self>, id: JobId, outcome: JobOutcome) {
        let mut st = self.state();
        self.control.unregister(id);

        let Some(slot) = st.active.remove(&id) else {
            tracing::warn!(job_id = %id, "terminal outcome for a job that is not running");
            return;
        };
        let Some(mut job) = st.jobs.remove(&id) else {
            tracing::warn!(job_id = %id, "running job is missing from the registry");
            self.fill_slots(&mut st);
            return;
        };

        // First writer wins: a cancellation requested before this point overrides the outcome.
        let outcome = if slot.cancel_requested {
            JobOutcome::Cancelled
        } else {
            outcome
        };
        let event = match outcome {
            JobOutcome::Succeeded { output } => {
                job.transition(JobState::Succeeded);
                let message = job.format.completion_message().to_string();
                job.message = Some(message.clone());
                tracing::info!(job_id = %id, output = ?output, "job succeeded");
                SchedulerEvent::JobSucceeded {
                    job_id: id,
                    message,
                    output,
                }
            }
            JobOutcome::Failed { message } => {
                job.transition(JobState::Failed);
                job.message = Some(message.clone());
                SchedulerEvent::JobFailed { job_id: id, message }
            }
            JobOutcome::Cancelled if slot.cancel_requested => {
                job.transition(JobState::Cancelled);
                job.message = Some("download cancelled".to_string());
                tracing::info!(job_id = %id, "job cancelled");
                SchedulerEvent::JobCancelled { job_id: id }
            }
            JobOutcome::Cancelled => {
                // Stopped without cancel_all (runtime shutting down): count it as a failure.
                let message = "download failed: worker stopped".to_string();
                job.transition(JobState::Failed);
                job.message = Some(message.clone());
                SchedulerEvent::JobFailed { job_id: id, message }
            }
        };
        self.events.emit(event);

        let mut batch_done = None;
        if job.state != JobState::Cancelled {
            if let Some(counter) = st.batches.get_mut(&job.batch) {
                counter.record(job.state);
                if counter.is_complete() {
                    batch_done = st.close_batch(job.batch).map(|c| (job.batch, c));
                }
            }
        }

        self.fill_slots(&mut st);

        if let Some((batch, counter)) = batch_done {
            tracing::info!(
                batch = %batch,
                succeeded = counter.succeeded,
                failed = counter.failed,
                "batch complete"
            );
            self.events.emit(SchedulerEvent::BatchComplete {
                batch,
                completed: counter.completed(),
                succeeded: counter.succeeded,
                failed: counter.failed,
            });
        }

        if st.is_idle() {
            self.idle.notify_waiters();
        }
    }

    pub(super) fn cancel_all(&self) -> CancelSummary {
        let mut st = self.state();
        let discarded: Vec<JobId> = st.pending.drain(..).collect();
        for id in &discarded {
            st.jobs.remove(id);
        }
        let mut cancelling = Vec::with_capacity(st.active.len());
        for (id, slot) in st.active.iter_mut() {
            slot.cancel_requested = true;
            cancelling.push(*id);
        }
        cancelling.sort();
        let signalled = self.control.cancel_all();
        st.reset_batches();

        if !discarded.is_empty() || !cancelling.is_empty() {
            tracing::info!(
                discarded = discarded.len(),
                cancelling = cancelling.len(),
                signalled,
                "cancel all requested"
            );
        }
        if st.is_idle() {
            self.idle.notify_waiters();
        }
        CancelSummary {
            discarded,
            cancelling,
        }
    }

    /// Resolves once no job is running or waiting.
    pub(super) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            let idle = self.state().is_idle();
            if idle {
                return;
            }
            notified.await;
        }
    }
}
