//! Scripted media fetcher for integration tests.
//!
//! Behavior is chosen from the URL path's first segment:
//! `ok/..` succeeds, `block/..` waits until [`FakeClient::release`] is called,
//! `stubborn/..` also waits for `release` but ignores cancellation,
//! `hang/..` waits until cancelled, `fail/..` fails the fetch, `badmeta/..`
//! fails metadata resolution, `audio/..` reports a download and a transcode,
//! `panic/..` panics inside the fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use tubedl_core::fetch::{
    FetchError, FetchOutput, FetchProgress, FetchRequest, MediaFetchClient, MediaMetadata,
    ProgressFn,
};

pub fn url(kind: &str, name: &str) -> String {
    format!("https://media.test/{}/{}", kind, name)
}

fn kind_of(url: &str) -> &str {
    url.trim_start_matches("https://media.test/")
        .split('/')
        .next()
        .unwrap_or("ok")
}

fn name_of(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or("media")
}

#[derive(Default)]
pub struct FakeClient {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn gate(&self, url: &str) -> Arc<Notify> {
        let mut gates = self.gates.lock().unwrap();
        Arc::clone(gates.entry(url.to_string()).or_default())
    }

    /// Lets a `block/..` or `stubborn/..` download finish. May be called before the fetch starts.
    pub fn release(&self, url: &str) {
        self.gate(url).notify_one();
    }

    /// Waits until the fetch step of `url` has been entered.
    pub async fn wait_until_fetching(&self, url: &str) {
        let started = async {
            while !self.fetched().iter().any(|u| u == url) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), started)
            .await
            .expect("fetch never started");
    }

    /// Highest number of fetches that were in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// URLs whose fetch step was entered, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

#[async_trait]
impl MediaFetchClient for FakeClient {
    async fn resolve_metadata(
        &self,
        url: &str,
        _cancel: &CancellationToken,
    ) -> Result<MediaMetadata, FetchError> {
        if kind_of(url) == "badmeta" {
            return Err(FetchError::Metadata("Video unavailable".into()));
        }
        Ok(MediaMetadata {
            id: Some(name_of(url).to_string()),
            title: format!("Title: {}?", name_of(url)),
            streams: Vec::new(),
        })
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutput, FetchError> {
        let _guard = self.enter();
        self.fetched.lock().unwrap().push(request.url.clone());
        let done = FetchOutput {
            path: Some(request.output_template.clone()),
        };

        match kind_of(&request.url) {
            "block" => {
                let gate = self.gate(&request.url);
                tokio::select! {
                    _ = cancel.cancelled() => Err(FetchError::Cancelled),
                    _ = gate.notified() => Ok(done),
                }
            }
            "stubborn" => {
                let gate = self.gate(&request.url);
                gate.notified().await;
                Ok(done)
            }
            "hang" => {
                cancel.cancelled().await;
                Err(FetchError::Cancelled)
            }
            "fail" => Err(FetchError::Exited {
                program: "yt-dlp".into(),
                status: "exit status: 1".into(),
                detail: "ERROR: HTTP Error 403: Forbidden".into(),
            }),
            "audio" => {
                on_progress(FetchProgress::Downloading {
                    bytes_done: 80,
                    bytes_total: Some(100),
                });
                on_progress(FetchProgress::DownloadFinished);
                on_progress(FetchProgress::PostProcessing { fraction: 0.6 });
                Ok(done)
            }
            "panic" => panic!("fetcher blew up"),
            _ => {
                on_progress(FetchProgress::Downloading {
                    bytes_done: 50,
                    bytes_total: Some(100),
                });
                Ok(done)
            }
        }
    }
}
