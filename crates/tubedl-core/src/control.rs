//! Job control for cancellation: one cancellation token per running job.
//!
//! The scheduler registers each job when it is admitted and passes the token
//! into the worker; `cancel_all` trips every registered token. The fetcher
//! observes the token and unwinds (killing its child process).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::job::JobId;

/// Shared registry of job id -> cancellation token.
#[derive(Debug, Default)]
pub(crate) struct JobControl {
    jobs: Mutex<HashMap<JobId, CancellationToken>>,
}

impl JobControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a running job; returns the token to hand to its worker.
    pub(crate) fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.jobs().insert(job_id, token.clone());
        token
    }

    /// Unregister a job (call when the job finishes, whatever the outcome).
    pub(crate) fn unregister(&self, job_id: JobId) {
        self.jobs().remove(&job_id);
    }

    /// Request cancellation of every registered job; returns how many were signalled.
    pub(crate) fn cancel_all(&self) -> usize {
        let jobs = self.jobs();
        for token in jobs.values() {
            token.cancel();
        }
        jobs.len()
    }
}
