//! `tubedl get <url>...` – download a batch of URLs through the scheduler.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;
use tubedl_core::config::TubedlConfig;
use tubedl_core::event::{EventReceiver, SchedulerEvent};
use tubedl_core::fetch::YtDlpClient;
use tubedl_core::job::{BatchId, JobId, MediaFormat};
use tubedl_core::scheduler::{Scheduler, SchedulerOptions};

#[derive(Debug, Clone, Default)]
pub struct GetArgs {
    pub urls: Vec<String>,
    pub audio: bool,
    pub input: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub json: bool,
}

/// URLs from a list file: one per line, blank lines and `#` comments skipped.
fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

async fn read_url_list(input: &Path) -> Result<Vec<String>> {
    let text = if input.as_os_str() == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("read URLs from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("read URL list {}", input.display()))?
    };
    Ok(parse_url_list(&text))
}

fn scheduler_options(cfg: &TubedlConfig, args: &GetArgs) -> SchedulerOptions {
    let mut options = SchedulerOptions::from_config(cfg);
    if let Some(dir) = &args.dir {
        options.download_dir = dir.clone();
    }
    if let Some(jobs) = args.jobs {
        options.capacity = jobs;
    }
    options
}

/// Turns scheduler events into terminal output.
struct Printer {
    json: bool,
    urls: HashMap<JobId, String>,
}

impl Printer {
    fn print(&self, ev: &SchedulerEvent) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(ev)?);
            return Ok(());
        }
        let url = |id: &JobId| self.urls.get(id).map(String::as_str).unwrap_or("?");
        match ev {
            SchedulerEvent::JobQueued { .. } => {}
            SchedulerEvent::JobStarted { job_id } => {
                println!("[{}] started {}", job_id, url(job_id));
            }
            SchedulerEvent::JobProgress {
                job_id, message, ..
            } => println!("[{}] {}", job_id, message),
            SchedulerEvent::JobSucceeded {
                job_id,
                message,
                output,
            } => match output {
                Some(path) => println!("[{}] {} {}", job_id, message, path.display()),
                None => println!("[{}] {}", job_id, message),
            },
            SchedulerEvent::JobFailed { job_id, message } => {
                eprintln!("[{}] {} ({})", job_id, message, url(job_id));
            }
            SchedulerEvent::JobCancelled { job_id } => println!("[{}] cancelled", job_id),
            SchedulerEvent::BatchComplete {
                completed,
                succeeded,
                failed,
                ..
            } => println!(
                "Batch finished: {} of {} downloaded, {} failed",
                succeeded, completed, failed
            ),
        }
        Ok(())
    }
}

/// Renders events until `batch` completes and returns its failure count.
/// When `interrupt` resolves first, everything is cancelled and unwound.
async fn follow_batch<I>(
    scheduler: &Scheduler,
    events: &mut EventReceiver,
    printer: &Printer,
    batch: BatchId,
    interrupt: I,
) -> Result<usize>
where
    I: Future<Output = io::Result<()>>,
{
    // One listener for the whole loop so an interrupt is never missed between events.
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            ev = events.recv() => {
                let Some(ev) = ev else {
                    bail!("scheduler stopped before the batch completed");
                };
                printer.print(&ev)?;
                if let SchedulerEvent::BatchComplete { batch: done, failed, .. } = ev {
                    if done == batch {
                        return Ok(failed);
                    }
                }
            }
            res = &mut interrupt => {
                res.context("listen for Ctrl-C")?;
                let summary = scheduler.cancel_all();
                eprintln!(
                    "Interrupted: cancelling {} running, dropped {} queued",
                    summary.cancelling.len(),
                    summary.discarded.len()
                );
                scheduler.wait_idle().await;
                while let Ok(ev) = events.try_recv() {
                    printer.print(&ev)?;
                }
                bail!("interrupted");
            }
        }
    }
}

pub async fn run_get(cfg: &TubedlConfig, args: GetArgs) -> Result<()> {
    let mut urls = args.urls.clone();
    if let Some(input) = &args.input {
        urls.extend(read_url_list(input).await?);
    }
    if urls.is_empty() {
        bail!("no URLs given");
    }

    let format = if args.audio {
        MediaFormat::Audio
    } else {
        MediaFormat::Video
    };
    let options = scheduler_options(cfg, &args);
    tokio::fs::create_dir_all(&options.download_dir)
        .await
        .with_context(|| format!("create download dir {}", options.download_dir.display()))?;
    tracing::info!(
        count = urls.len(),
        dir = %options.download_dir.display(),
        capacity = options.capacity,
        "starting batch"
    );

    let client = Arc::new(YtDlpClient::new(cfg.yt_dlp_path.clone()));
    let (scheduler, mut events) = Scheduler::new(Handle::current(), client, options);
    let Some(ticket) = scheduler.submit_batch(urls.clone(), format) else {
        bail!("no URLs given");
    };
    let printer = Printer {
        json: args.json,
        urls: ticket.jobs.iter().copied().zip(urls).collect(),
    };

    let failed = follow_batch(
        &scheduler,
        &mut events,
        &printer,
        ticket.batch,
        tokio::signal::ctrl_c(),
    )
    .await?;

    if failed > 0 {
        bail!("{} of {} downloads failed", failed, ticket.jobs.len());
    }
    Ok(())
}
