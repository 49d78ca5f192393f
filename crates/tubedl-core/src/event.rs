//! Events emitted by the scheduler to its subscriber (the presentation layer).

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::job::{BatchId, JobId};
use crate::progress::Phase;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A job was accepted (it may start right away or wait for a slot).
    JobQueued { job_id: JobId, batch: BatchId },
    /// A job took a slot and its worker was started.
    JobStarted { job_id: JobId },
    JobProgress {
        job_id: JobId,
        phase: Phase,
        percent: u8,
        message: String,
    },
    JobSucceeded {
        job_id: JobId,
        message: String,
        output: Option<PathBuf>,
    },
    JobFailed { job_id: JobId, message: String },
    /// A running job stopped after `cancel_all`.
    JobCancelled { job_id: JobId },
    /// Every job of `batch` reached Succeeded or Failed.
    BatchComplete {
        batch: BatchId,
        completed: usize,
        succeeded: usize,
        failed: usize,
    },
}

impl SchedulerEvent {
    /// Job the event refers to, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            SchedulerEvent::JobQueued { job_id, .. }
            | SchedulerEvent::JobStarted { job_id }
            | SchedulerEvent::JobProgress { job_id, .. }
            | SchedulerEvent::JobSucceeded { job_id, .. }
            | SchedulerEvent::JobFailed { job_id, .. }
            | SchedulerEvent::JobCancelled { job_id } => Some(*job_id),
            SchedulerEvent::BatchComplete { .. } => None,
        }
    }

    /// Whether the event ends a job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SchedulerEvent::JobSucceeded { .. }
                | SchedulerEvent::JobFailed { .. }
                | SchedulerEvent::JobCancelled { .. }
        )
    }
}

/// Receiving side of the scheduler's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<SchedulerEvent>;

/// Sending side. Sends never block; a dropped receiver silently discards events.
#[derive(Debug, Clone)]
pub(crate) struct EventSender(mpsc::UnboundedSender<SchedulerEvent>);

impl EventSender {
    pub(crate) fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    pub(crate) fn emit(&self, event: SchedulerEvent) {
        if self.0.send(event).is_err() {
            tracing::trace!("scheduler event dropped: no subscriber");
        }
    }
}
