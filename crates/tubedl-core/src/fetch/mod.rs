//! Media fetch port: resolving a URL to metadata and downloading it.
//!
//! The scheduler only talks to [`MediaFetchClient`]. Extraction, stream
//! selection, remuxing and transcoding are the fetcher's business; the
//! production implementation drives the `yt-dlp` executable.

mod parse;
mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::job::MediaFormat;

pub use ytdlp::YtDlpClient;

/// Errors from metadata resolution or the fetch/transcode step.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL invalid, unreachable, or content unavailable.
    #[error("could not resolve media info: {0}")]
    Metadata(String),
    /// The fetcher program could not be started.
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    /// The fetcher ran and reported failure (network, disk, transcoder).
    #[error("{program} exited with {status}: {detail}")]
    Exited {
        program: String,
        status: String,
        detail: String,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    /// Cancellation was requested; not reported as a failure.
    #[error("cancelled")]
    Cancelled,
}

/// Kind of stream offered by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Combined,
    VideoOnly,
    AudioOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub format_id: String,
    pub ext: String,
    pub kind: StreamKind,
    pub height: Option<u32>,
    /// Audio bitrate in kbit/s, if known.
    pub abr: Option<f64>,
}

/// Resolved information about one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub id: Option<String>,
    pub title: String,
    pub streams: Vec<StreamInfo>,
}

/// Low-level progress reported by the fetcher while a download runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchProgress {
    /// Raw bytes are arriving. `bytes_total` is `None` when the size is unknown.
    Downloading {
        bytes_done: u64,
        bytes_total: Option<u64>,
    },
    /// A raw stream finished downloading; post-processing may follow.
    DownloadFinished,
    /// Post-processing (merge/transcode) progress in `[0.0, 1.0]`.
    PostProcessing { fraction: f64 },
}

/// Container and codec choices (the `[media]` config section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// Container video downloads are merged/remuxed into.
    pub video_container: String,
    /// Codec audio downloads are transcoded to.
    pub audio_codec: String,
    /// Quality target for the audio transcoder (bitrate like `320K` or VBR level).
    pub audio_quality: String,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            video_container: "mp4".to_string(),
            audio_codec: "mp3".to_string(),
            audio_quality: "320K".to_string(),
        }
    }
}

/// Stream selection and post-processing for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSpec {
    /// Best video+audio, merged and remuxed into `container`.
    Video { selector: String, container: String },
    /// Best audio, transcoded to `codec` at `quality`.
    Audio {
        selector: String,
        codec: String,
        quality: String,
    },
}

const VIDEO_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";
const AUDIO_SELECTOR: &str = "bestaudio/best";

impl FormatSpec {
    pub fn for_format(format: MediaFormat, settings: &MediaSettings) -> Self {
        match format {
            MediaFormat::Video => FormatSpec::Video {
                selector: VIDEO_SELECTOR.to_string(),
                container: settings.video_container.clone(),
            },
            MediaFormat::Audio => FormatSpec::Audio {
                selector: AUDIO_SELECTOR.to_string(),
                codec: settings.audio_codec.clone(),
                quality: settings.audio_quality.clone(),
            },
        }
    }
}

/// Everything the fetcher needs for one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub format: FormatSpec,
    /// Destination path template; `%(ext)s` is replaced by the final extension.
    pub output_template: PathBuf,
}

/// Builds `<dir>/<stem>.%(ext)s`, escaping `%` in the stem.
pub fn output_template(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.%(ext)s", stem.replace('%', "%%")))
}

/// Result of a successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutput {
    /// Final file path, when the fetcher reports it.
    pub path: Option<PathBuf>,
}

/// Progress callback handed to [`MediaFetchClient::fetch`]. Must not block.
pub type ProgressFn<'a> = &'a (dyn Fn(FetchProgress) + Send + Sync);

/// Port to the external media fetcher.
#[async_trait]
pub trait MediaFetchClient: Send + Sync {
    /// Resolve title and available streams for `url`.
    async fn resolve_metadata(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<MediaMetadata, FetchError>;

    /// Download (and post-process) `request`, reporting progress through `on_progress`.
    /// Returns [`FetchError::Cancelled`] once `cancel` has been observed.
    async fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutput, FetchError>;
}
