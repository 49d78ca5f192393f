//! Parsing of yt-dlp output: `-J` metadata JSON and the machine-readable
//! progress lines requested through `--progress-template` / `--print`.

use serde::Deserialize;
use std::path::PathBuf;

use super::{FetchError, MediaMetadata, StreamInfo, StreamKind};

/// Prefix of every line produced by our progress and print templates.
pub(super) const LINE_PREFIX: &str = "[tubedl]";

/// Template for download-stage progress lines.
pub(super) const DOWNLOAD_TEMPLATE: &str = "download:[tubedl] download %(progress.status)s \
     %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s";

/// Template for post-processing progress lines.
pub(super) const POSTPROCESS_TEMPLATE: &str =
    "postprocess:[tubedl] postprocess %(progress.status)s %(progress.postprocessor)s";

/// Template printing the final path after all post-processing.
pub(super) const FILEPATH_TEMPLATE: &str = "after_move:[tubedl] file %(filepath)s";

#[derive(Debug, Clone, PartialEq)]
pub(super) enum PostStatus {
    Started,
    Processing,
    Finished,
}

/// One recognised stdout line.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum OutputLine {
    Downloading {
        bytes_done: u64,
        bytes_total: Option<u64>,
    },
    DownloadFinished,
    PostProcess {
        status: PostStatus,
        processor: String,
    },
    File(PathBuf),
}

/// yt-dlp prints `NA` for missing fields and floats for estimates.
fn parse_bytes(field: Option<&str>) -> Option<u64> {
    let raw = field?;
    if raw == "NA" || raw == "None" {
        return None;
    }
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

/// Parses one stdout line. Returns `None` for lines we did not ask for.
pub(super) fn parse_line(line: &str) -> Option<OutputLine> {
    let rest = line.trim_end().strip_prefix(LINE_PREFIX)?.trim_start();
    let (kind, rest) = rest.split_once(' ').unwrap_or((rest, ""));

    match kind {
        "download" => {
            let mut fields = rest.split_whitespace();
            let status = fields.next()?;
            match status {
                "downloading" => {
                    let bytes_done = parse_bytes(fields.next()).unwrap_or(0);
                    let total = parse_bytes(fields.next());
                    let estimate = parse_bytes(fields.next());
                    Some(OutputLine::Downloading {
                        bytes_done,
                        bytes_total: total.or(estimate).filter(|t| *t > 0),
                    })
                }
                "finished" => Some(OutputLine::DownloadFinished),
                _ => None,
            }
        }
        "postprocess" => {
            let (status, processor) = rest.split_once(' ').unwrap_or((rest, ""));
            let status = match status {
                "started" => PostStatus::Started,
                "processing" => PostStatus::Processing,
                "finished" => PostStatus::Finished,
                _ => return None,
            };
            Some(OutputLine::PostProcess {
                status,
                processor: processor.trim().to_string(),
            })
        }
        "file" => {
            let path = rest.trim();
            (!path.is_empty() && path != "NA").then(|| OutputLine::File(PathBuf::from(path)))
        }
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    abr: Option<f64>,
}

fn has_codec(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| c != "none")
}

/// Parses `yt-dlp -J` output.
pub(super) fn parse_metadata(json: &[u8]) -> Result<MediaMetadata, FetchError> {
    let raw: RawInfo = serde_json::from_slice(json)
        .map_err(|e| FetchError::Metadata(format!("invalid metadata JSON: {}", e)))?;

    let streams = raw
        .formats
        .into_iter()
        .filter_map(|f| {
            let format_id = f.format_id?;
            let ext = f.ext.unwrap_or_default();
            if ext == "mhtml" {
                return None;
            }
            let kind = match (has_codec(&f.vcodec), has_codec(&f.acodec)) {
                (true, true) => StreamKind::Combined,
                (true, false) => StreamKind::VideoOnly,
                (false, true) => StreamKind::AudioOnly,
                (false, false) => return None,
            };
            Some(StreamInfo {
                format_id,
                ext,
                kind,
                height: f.height,
                abr: f.abr,
            })
        })
        .collect();

    Ok(MediaMetadata {
        id: raw.id,
        title: raw.title.unwrap_or_default(),
        streams,
    })
}
