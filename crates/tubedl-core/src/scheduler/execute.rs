//! Execute one job: resolve metadata, pick a file name, fetch with progress.
//!
//! Every error is caught here and turned into a [`JobOutcome`]; nothing a
//! single download does can fail the scheduler.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::fetch::{
    output_template, FetchError, FetchOutput, FetchProgress, FetchRequest, FormatSpec,
    MediaFetchClient, MediaSettings,
};
use crate::job::{JobId, MediaFormat};
use crate::progress::{ProgressMapper, ProgressReport, ProgressThrottle};
use crate::sanitize;

/// Worker-side settings, fixed for the scheduler's lifetime.
#[derive(Debug, Clone)]
pub(super) struct WorkerSettings {
    pub(super) media: MediaSettings,
    pub(super) progress_interval: Duration,
    pub(super) timeout: Option<Duration>,
}

/// Immutable view of the job handed to the worker.
#[derive(Debug, Clone)]
pub(super) struct WorkerJob {
    pub(super) id: JobId,
    pub(super) url: String,
    pub(super) format: MediaFormat,
    pub(super) target_dir: PathBuf,
}

/// What the worker reports back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum JobOutcome {
    Succeeded { output: Option<PathBuf> },
    Failed { message: String },
    Cancelled,
}

/// User-facing failure message. Metadata and fetch failures both keep their detail.
pub(super) fn failure_message(err: &FetchError) -> String {
    format!("download failed: {}", err)
}

async fn fetch_job<R>(
    client: &dyn MediaFetchClient,
    settings: &WorkerSettings,
    job: &WorkerJob,
    cancel: &CancellationToken,
    report: &R,
) -> Result<FetchOutput, FetchError>
where
    R: Fn(ProgressReport) + Send + Sync,
{
    report(ProgressReport::resolving());
    let meta = client.resolve_metadata(&job.url, cancel).await?;
    let stem = sanitize::file_stem(&meta.title, meta.id.as_deref());
    tracing::debug!(job_id = %job.id, title = %meta.title, stem = %stem, "resolved metadata");

    let request = FetchRequest {
        url: job.url.clone(),
        format: FormatSpec::for_format(job.format, &settings.media),
        output_template: output_template(&job.target_dir, &stem),
    };

    let tracker = Mutex::new((
        ProgressMapper::new(job.format),
        ProgressThrottle::new(settings.progress_interval),
    ));
    let on_progress = |progress: FetchProgress| {
        let mut guard = tracker.lock().unwrap_or_else(PoisonError::into_inner);
        let (mapper, throttle) = &mut *guard;
        if let Some(r) = mapper.map(progress) {
            if throttle.should_emit(&r) {
                report(r);
            }
        }
    };

    client.fetch(&request, &on_progress, cancel).await
}

/// Runs a job to its outcome. `report` receives normalized progress and must not block.
pub(super) async fn run_job<R>(
    client: &dyn MediaFetchClient,
    settings: &WorkerSettings,
    job: &WorkerJob,
    cancel: &CancellationToken,
    report: R,
) -> JobOutcome
where
    R: Fn(ProgressReport) + Send + Sync,
{
    if cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }

    let work = fetch_job(client, settings, job, cancel, &report);
    let result = match settings.timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or(Err(FetchError::TimedOut(limit))),
        None => work.await,
    };

    match result {
        Ok(output) => JobOutcome::Succeeded {
            output: output.path,
        },
        Err(_) if cancel.is_cancelled() => JobOutcome::Cancelled,
        Err(FetchError::Cancelled) => JobOutcome::Cancelled,
        Err(e) => {
            tracing::warn!(job_id = %job.id, url = %job.url, "job failed: {}", e);
            JobOutcome::Failed {
                message: failure_message(&e),
            }
        }
    }
}
