//! Integration tests: the scheduler driving a scripted fetcher.
//!
//! Covers admission against capacity, FIFO refill, batch completion,
//! cancellation, progress scaling and failure isolation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::fake_client::{url, FakeClient};
use common::{collect_until, drain};
use tempfile::tempdir;
use tokio::runtime::Handle;
use tubedl_core::event::{EventReceiver, SchedulerEvent};
use tubedl_core::job::{JobId, MediaFormat};
use tubedl_core::progress::Phase;
use tubedl_core::scheduler::{Scheduler, SchedulerOptions};

fn start(
    client: &Arc<FakeClient>,
    capacity: usize,
    dir: &std::path::Path,
) -> (Scheduler, EventReceiver) {
    let options = SchedulerOptions {
        capacity,
        progress_interval: Duration::ZERO,
        ..SchedulerOptions::new(dir)
    };
    Scheduler::new(Handle::current(), client.clone(), options)
}

fn is_batch_complete(ev: &SchedulerEvent) -> bool {
    matches!(ev, SchedulerEvent::BatchComplete { .. })
}

#[tokio::test]
async fn fifth_job_waits_for_a_free_slot() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 4, dir.path());

    let urls: Vec<String> = (0..5).map(|i| url("block", &format!("v{}", i))).collect();
    let ticket = scheduler
        .submit_batch(urls.clone(), MediaFormat::Video)
        .expect("non-empty batch");
    assert_eq!(ticket.jobs.len(), 5);

    let snap = scheduler.snapshot();
    assert_eq!(snap.active, ticket.jobs[..4].to_vec());
    assert_eq!(snap.pending, vec![ticket.jobs[4]]);

    client.release(&urls[0]);
    let fifth = ticket.jobs[4];
    collect_until(&mut rx, |ev| {
        matches!(ev, SchedulerEvent::JobStarted { job_id } if *job_id == fifth)
    })
    .await;
    assert!(scheduler.snapshot().pending.is_empty());

    for u in &urls[1..] {
        client.release(u);
    }
    let events = collect_until(&mut rx, is_batch_complete).await;
    assert_eq!(
        events.last(),
        Some(&SchedulerEvent::BatchComplete {
            batch: ticket.batch,
            completed: 5,
            succeeded: 5,
            failed: 0,
        })
    );
    assert!(client.max_in_flight() <= 4);

    scheduler.wait_idle().await;
    assert!(drain(&mut rx).iter().all(|ev| !is_batch_complete(ev)));
}

#[tokio::test]
async fn lifecycle_events_are_ordered_per_job() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 2, dir.path());

    let ticket = scheduler
        .submit_batch(
            (0..6).map(|i| url("ok", &format!("o{}", i))),
            MediaFormat::Video,
        )
        .unwrap();
    let events = collect_until(&mut rx, is_batch_complete).await;

    for id in ticket.jobs {
        let kinds: Vec<&SchedulerEvent> = events
            .iter()
            .filter(|ev| ev.job_id() == Some(id))
            .collect();
        assert!(matches!(kinds.first(), Some(SchedulerEvent::JobQueued { .. })));
        assert!(matches!(kinds.get(1), Some(SchedulerEvent::JobStarted { .. })));
        assert!(matches!(kinds.last(), Some(SchedulerEvent::JobSucceeded { .. })));
        assert_eq!(kinds.iter().filter(|ev| ev.is_terminal()).count(), 1);
    }
    assert!(client.max_in_flight() <= 2);
}

#[tokio::test]
async fn failed_job_still_completes_the_batch() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 4, dir.path());

    let ticket = scheduler
        .submit_batch(
            [url("ok", "a"), url("fail", "b"), url("ok", "c")],
            MediaFormat::Video,
        )
        .unwrap();
    let events = collect_until(&mut rx, is_batch_complete).await;

    let failed: Vec<&String> = events
        .iter()
        .filter_map(|ev| match ev {
            SchedulerEvent::JobFailed { job_id, message } if *job_id == ticket.jobs[1] => {
                Some(message)
            }
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].starts_with("download failed:"));
    assert!(failed[0].contains("HTTP Error 403"));

    assert_eq!(
        events.last(),
        Some(&SchedulerEvent::BatchComplete {
            batch: ticket.batch,
            completed: 3,
            succeeded: 2,
            failed: 1,
        })
    );
    scheduler.wait_idle().await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn metadata_failure_is_reported_with_detail() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 1, dir.path());

    let id = scheduler.submit(url("badmeta", "gone"), MediaFormat::Video);
    let events = collect_until(&mut rx, is_batch_complete).await;
    assert!(events.contains(&SchedulerEvent::JobFailed {
        job_id: id,
        message: "download failed: could not resolve media info: Video unavailable".into(),
    }));
    assert!(client.fetched().is_empty());
}

#[tokio::test]
async fn cancel_all_discards_queued_and_stops_running() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 2, dir.path());

    let ticket = scheduler
        .submit_batch(
            (0..4).map(|i| url("hang", &format!("h{}", i))),
            MediaFormat::Audio,
        )
        .unwrap();
    let summary = scheduler.cancel_all();
    assert_eq!(summary.cancelling, ticket.jobs[..2].to_vec());
    assert_eq!(summary.discarded, ticket.jobs[2..].to_vec());
    assert!(scheduler.snapshot().pending.is_empty());

    let mut cancelled: Vec<JobId> = Vec::new();
    let events = collect_until(&mut rx, |ev| {
        if let SchedulerEvent::JobCancelled { job_id } = ev {
            cancelled.push(*job_id);
        }
        cancelled.len() == 2
    })
    .await;
    cancelled.sort();
    assert_eq!(cancelled, ticket.jobs[..2].to_vec());
    for discarded in &ticket.jobs[2..] {
        assert!(!events
            .iter()
            .any(|ev| matches!(ev, SchedulerEvent::JobStarted { job_id } if job_id == discarded)));
    }

    scheduler.wait_idle().await;
    assert!(drain(&mut rx).iter().all(|ev| !is_batch_complete(ev)));
    assert!(scheduler.job(ticket.jobs[0]).is_none());

    // The scheduler keeps working after a cancel.
    let id = scheduler.submit(url("ok", "after"), MediaFormat::Video);
    let events = collect_until(&mut rx, is_batch_complete).await;
    assert!(events
        .iter()
        .any(|ev| matches!(ev, SchedulerEvent::JobSucceeded { job_id, .. } if *job_id == id)));
    assert!(matches!(
        events.last(),
        Some(SchedulerEvent::BatchComplete { completed: 1, .. })
    ));
}

#[tokio::test]
async fn job_finishing_after_cancel_all_still_ends_cancelled() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 1, dir.path());

    let slow = url("stubborn", "s");
    let ticket = scheduler
        .submit_batch([slow.clone(), url("ok", "t")], MediaFormat::Video)
        .unwrap();
    client.wait_until_fetching(&slow).await;

    let summary = scheduler.cancel_all();
    assert_eq!(summary.cancelling, vec![ticket.jobs[0]]);
    assert_eq!(summary.discarded, vec![ticket.jobs[1]]);

    // The fetch ignores the token and completes normally.
    client.release(&slow);
    let events = collect_until(&mut rx, |ev| ev.is_terminal()).await;
    assert_eq!(
        events.last(),
        Some(&SchedulerEvent::JobCancelled {
            job_id: ticket.jobs[0]
        })
    );

    scheduler.wait_idle().await;
    let rest = drain(&mut rx);
    for ev in events.iter().chain(rest.iter()) {
        assert!(!matches!(ev, SchedulerEvent::JobSucceeded { .. }), "{:?}", ev);
        assert!(!is_batch_complete(ev), "{:?}", ev);
    }
    assert_eq!(client.fetched(), vec![slow]);
}

#[tokio::test]
async fn audio_progress_covers_download_and_transcode() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 1, dir.path());

    let id = scheduler.submit(url("audio", "song"), MediaFormat::Audio);
    let events = collect_until(&mut rx, |ev| ev.is_terminal()).await;

    let progress: Vec<(Phase, u8)> = events
        .iter()
        .filter_map(|ev| match ev {
            SchedulerEvent::JobProgress {
                phase, percent, ..
            } => Some((*phase, *percent)),
            _ => None,
        })
        .collect();
    assert_eq!(progress.first(), Some(&(Phase::Preparing, 0)));
    assert!(progress.contains(&(Phase::Downloading, 40)));
    assert!(progress.contains(&(Phase::PostProcessing, 80)));
    assert!(progress.windows(2).all(|w| w[0].1 <= w[1].1));

    match events.last() {
        Some(SchedulerEvent::JobSucceeded {
            job_id,
            message,
            output,
        }) => {
            assert_eq!(*job_id, id);
            assert_eq!(message, "Audio download complete!");
            assert_eq!(
                output.as_deref(),
                Some(dir.path().join("Title song.%(ext)s").as_path())
            );
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn raising_capacity_admits_waiting_jobs() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 1, dir.path());

    let urls: Vec<String> = (0..3).map(|i| url("block", &format!("c{}", i))).collect();
    let ticket = scheduler
        .submit_batch(urls.clone(), MediaFormat::Video)
        .unwrap();
    assert_eq!(scheduler.snapshot().pending.len(), 2);

    scheduler.set_capacity(3);
    let snap = scheduler.snapshot();
    assert_eq!(snap.capacity, 3);
    assert_eq!(snap.active, ticket.jobs);
    assert!(snap.pending.is_empty());

    scheduler.set_capacity(0);
    assert_eq!(scheduler.capacity(), 1);
    assert_eq!(scheduler.snapshot().active.len(), 3);

    for u in &urls {
        client.release(u);
    }
    let events = collect_until(&mut rx, is_batch_complete).await;
    assert!(matches!(
        events.last(),
        Some(SchedulerEvent::BatchComplete { completed: 3, succeeded: 3, .. })
    ));
}

#[tokio::test]
async fn download_dir_is_fixed_at_submission() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 1, first.path());

    let a = scheduler.submit(url("block", "a"), MediaFormat::Video);
    scheduler.set_download_dir(second.path());
    let b = scheduler.submit(url("ok", "b"), MediaFormat::Video);

    assert_eq!(scheduler.job(a).unwrap().target_dir, first.path());
    assert_eq!(scheduler.job(b).unwrap().target_dir, second.path());
    assert_eq!(scheduler.download_dir(), second.path());

    client.release(&url("block", "a"));
    let events = collect_until(&mut rx, is_batch_complete).await;
    let outputs: Vec<_> = events
        .iter()
        .filter_map(|ev| match ev {
            SchedulerEvent::JobSucceeded { job_id, output, .. } => Some((*job_id, output.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(outputs.len(), 2);
    for (id, output) in outputs {
        let output = output.unwrap();
        let expected = if id == a { first.path() } else { second.path() };
        assert!(output.starts_with(expected), "{:?}", output);
    }
}

#[tokio::test]
async fn adhoc_submissions_share_a_batch() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 4, dir.path());

    scheduler.submit(url("block", "x"), MediaFormat::Video);
    scheduler.submit(url("block", "y"), MediaFormat::Audio);
    let batches: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|ev| match ev {
            SchedulerEvent::JobQueued { batch, .. } => Some(batch),
            _ => None,
        })
        .collect();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], batches[1]);

    client.release(&url("block", "x"));
    client.release(&url("block", "y"));
    let events = collect_until(&mut rx, is_batch_complete).await;
    assert_eq!(
        events.last(),
        Some(&SchedulerEvent::BatchComplete {
            batch: batches[0],
            completed: 2,
            succeeded: 2,
            failed: 0,
        })
    );
}

#[tokio::test]
async fn panicking_worker_fails_without_leaking_its_slot() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 1, dir.path());

    let bad = scheduler.submit(url("panic", "p"), MediaFormat::Video);
    let good = scheduler.submit(url("ok", "q"), MediaFormat::Video);
    let events = collect_until(&mut rx, is_batch_complete).await;

    assert!(events.iter().any(|ev| matches!(
        ev,
        SchedulerEvent::JobFailed { job_id, message }
            if *job_id == bad && message.starts_with("download failed:")
    )));
    assert!(events
        .iter()
        .any(|ev| matches!(ev, SchedulerEvent::JobSucceeded { job_id, .. } if *job_id == good)));
    assert!(matches!(
        events.last(),
        Some(SchedulerEvent::BatchComplete { completed: 2, succeeded: 1, failed: 1, .. })
    ));
}

#[tokio::test]
async fn job_timeout_fails_the_job() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let options = SchedulerOptions {
        capacity: 1,
        progress_interval: Duration::ZERO,
        job_timeout: Some(Duration::from_millis(50)),
        ..SchedulerOptions::new(dir.path())
    };
    let (scheduler, mut rx) = Scheduler::new(Handle::current(), client.clone(), options);

    let id = scheduler.submit(url("hang", "slow"), MediaFormat::Video);
    let events = collect_until(&mut rx, |ev| ev.is_terminal()).await;
    match events.last() {
        Some(SchedulerEvent::JobFailed { job_id, message }) => {
            assert_eq!(*job_id, id);
            assert!(message.contains("timed out"), "{}", message);
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn empty_batch_is_ignored() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 2, dir.path());

    assert!(scheduler
        .submit_batch(Vec::<String>::new(), MediaFormat::Video)
        .is_none());
    assert!(drain(&mut rx).is_empty());
    assert!(scheduler.snapshot().active.is_empty());
}

#[tokio::test]
async fn shutdown_waits_for_running_jobs() {
    let dir = tempdir().unwrap();
    let client = FakeClient::new();
    let (scheduler, mut rx) = start(&client, 2, dir.path());

    scheduler.submit_batch(
        [url("hang", "1"), url("hang", "2"), url("hang", "3")],
        MediaFormat::Video,
    );
    tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
        .await
        .expect("shutdown should finish");

    let snap = scheduler.snapshot();
    assert!(snap.active.is_empty() && snap.pending.is_empty());
    let cancelled = drain(&mut rx)
        .into_iter()
        .filter(|ev| matches!(ev, SchedulerEvent::JobCancelled { .. }))
        .count();
    assert_eq!(cancelled, 2);
}
