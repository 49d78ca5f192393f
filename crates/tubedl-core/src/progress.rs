//! Progress normalization for running jobs.
//!
//! Fetchers report raw byte counts and post-processing fractions; the UI
//! wants one 0–100 bar per job. Audio jobs spend the first half of the bar on
//! the raw download and the second half on transcoding; video jobs use the
//! whole bar for the download and sit at 99% while streams are merged.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::fetch::FetchProgress;
use crate::job::MediaFormat;

/// Percent shown for video jobs while the merged file is finalized.
pub const VIDEO_POSTPROCESS_PERCENT: u8 = 99;
/// Percent at which audio jobs switch from downloading to transcoding.
pub const AUDIO_TRANSCODE_START_PERCENT: u8 = 50;
/// Highest percent an audio job reports before it succeeds.
pub const AUDIO_POSTPROCESS_MAX_PERCENT: u8 = 99;

/// Sub-stage of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Resolving metadata or waiting for the size of the stream.
    Preparing,
    Downloading,
    PostProcessing,
}

/// Normalized progress for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    pub phase: Phase,
    pub percent: u8,
    pub message: String,
}

impl ProgressReport {
    /// The report emitted while metadata is being resolved.
    pub fn resolving() -> Self {
        Self {
            phase: Phase::Preparing,
            percent: 0,
            message: "Fetching video info...".to_string(),
        }
    }
}

/// Raw percent of a byte count, floored, in `0..=100`.
fn raw_percent(bytes_done: u64, bytes_total: u64) -> u8 {
    if bytes_total == 0 {
        return 0;
    }
    let pct = (bytes_done.min(bytes_total) as u128 * 100) / bytes_total as u128;
    pct as u8
}

/// Maps a raw download percent onto the job's bar.
pub fn scale_download(format: MediaFormat, raw: u8) -> u8 {
    let raw = raw.min(100);
    match format {
        MediaFormat::Video => raw,
        MediaFormat::Audio => raw / 2,
    }
}

/// Maps a post-processing fraction onto the job's bar.
pub fn scale_postprocess(format: MediaFormat, fraction: f64) -> u8 {
    match format {
        MediaFormat::Video => VIDEO_POSTPROCESS_PERCENT,
        MediaFormat::Audio => {
            let fraction = if fraction.is_finite() {
                fraction.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let span = f64::from(100 - AUDIO_TRANSCODE_START_PERCENT);
            // Truncated, and held below 100 until the job succeeds.
            let percent = AUDIO_TRANSCODE_START_PERCENT + (fraction * span) as u8;
            percent.min(AUDIO_POSTPROCESS_MAX_PERCENT)
        }
    }
}

fn postprocess_message(format: MediaFormat, percent: u8) -> String {
    match format {
        MediaFormat::Video => "Merging video...".to_string(),
        MediaFormat::Audio => format!("Converting to MP3... {}%", percent),
    }
}

/// Turns fetcher progress into monotonic per-job reports.
///
/// `map` returns `None` when nothing visible changed (same phase, same
/// integer percent), which keeps per-chunk callbacks from flooding subscribers.
#[derive(Debug, Clone)]
pub struct ProgressMapper {
    format: MediaFormat,
    last: Option<(Phase, u8)>,
    high_water: u8,
}

impl ProgressMapper {
    pub fn new(format: MediaFormat) -> Self {
        Self {
            format,
            last: None,
            high_water: 0,
        }
    }

    pub fn map(&mut self, progress: FetchProgress) -> Option<ProgressReport> {
        let (phase, candidate) = match progress {
            FetchProgress::Downloading {
                bytes_done,
                bytes_total: Some(total),
            } if total > 0 => (
                Phase::Downloading,
                scale_download(self.format, raw_percent(bytes_done, total)),
            ),
            FetchProgress::Downloading { .. } => (Phase::Preparing, 0),
            FetchProgress::DownloadFinished => {
                (Phase::PostProcessing, scale_postprocess(self.format, 0.0))
            }
            FetchProgress::PostProcessing { fraction } => {
                (Phase::PostProcessing, scale_postprocess(self.format, fraction))
            }
        };

        let percent = candidate.max(self.high_water);
        // Once post-processing started, a later stream's download keeps the post-processing label.
        let phase = match self.last {
            Some((Phase::PostProcessing, _)) => Phase::PostProcessing,
            _ => phase,
        };
        if self.last == Some((phase, percent)) {
            return None;
        }
        self.last = Some((phase, percent));
        self.high_water = percent;

        let message = match phase {
            Phase::Preparing => "Preparing download...".to_string(),
            Phase::Downloading => format!("Downloading... {}%", percent),
            Phase::PostProcessing => postprocess_message(self.format, percent),
        };
        Some(ProgressReport {
            phase,
            percent,
            message,
        })
    }
}

/// Rate-limiter for progress updates of one job.
///
/// Phase changes always pass; updates within a phase pass at most once per interval.
#[derive(Debug)]
pub struct ProgressThrottle {
    last_emit: Option<(Instant, Phase)>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            min_interval,
        }
    }

    pub fn should_emit(&mut self, report: &ProgressReport) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some((last, phase))
                if phase == report.phase && now.duration_since(last) < self.min_interval =>
            {
                false
            }
            _ => {
                self.last_emit = Some((now, report.phase));
                true
            }
        }
    }
}
