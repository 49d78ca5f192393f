//! [`MediaFetchClient`] backed by the `yt-dlp` executable.
//!
//! Metadata comes from `yt-dlp -J`; downloads run yt-dlp as a child process
//! whose stdout carries one machine-readable progress line per update.
//! Cancellation kills the child.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::sync::CancellationToken;

use super::parse::{self, OutputLine, PostStatus};
use super::{
    FetchError, FetchOutput, FetchProgress, FetchRequest, FormatSpec, MediaFetchClient,
    MediaMetadata, ProgressFn,
};

/// Post-processor whose progress is reported for audio jobs.
const AUDIO_POSTPROCESSOR: &str = "ExtractAudio";

#[derive(Debug, Clone)]
pub struct YtDlpClient {
    program: PathBuf,
}

impl Default for YtDlpClient {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, args: &[String]) -> Result<Child, FetchError> {
        self.command(args).spawn().map_err(|source| FetchError::Spawn {
            program: self.program_name(),
            source,
        })
    }
}

/// Arguments for `resolve_metadata`.
pub(super) fn metadata_args(url: &str) -> Vec<String> {
    vec![
        "-J".into(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        "--".into(),
        url.into(),
    ]
}

/// Arguments for `fetch`.
pub(super) fn download_args(request: &FetchRequest) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--newline".into(),
        "--progress".into(),
        "--no-simulate".into(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        "--progress-template".into(),
        parse::DOWNLOAD_TEMPLATE.into(),
        "--progress-template".into(),
        parse::POSTPROCESS_TEMPLATE.into(),
        "--print".into(),
        parse::FILEPATH_TEMPLATE.into(),
    ];

    match &request.format {
        FormatSpec::Video {
            selector,
            container,
        } => {
            args.extend([
                "--format".into(),
                selector.clone(),
                "--merge-output-format".into(),
                container.clone(),
                "--remux-video".into(),
                container.clone(),
            ]);
        }
        FormatSpec::Audio {
            selector,
            codec,
            quality,
        } => {
            args.extend([
                "--format".into(),
                selector.clone(),
                "--extract-audio".into(),
                "--audio-format".into(),
                codec.clone(),
                "--audio-quality".into(),
                quality.clone(),
            ]);
        }
    }

    args.extend([
        "--output".into(),
        request.output_template.to_string_lossy().into_owned(),
        "--".into(),
        request.url.clone(),
    ]);
    args
}

/// Last meaningful stderr line, preferring yt-dlp's `ERROR:` lines.
async fn collect_error_detail(stderr: Option<ChildStderr>) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };
    let mut lines = BufReader::new(stderr).lines();
    let mut last = String::new();
    let mut last_error = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("ERROR:") {
            last_error = Some(line.to_string());
        }
        last = line.to_string();
    }
    last_error.unwrap_or(last)
}

fn exit_error(program: String, status: ExitStatus, detail: String) -> FetchError {
    let detail = if detail.is_empty() {
        "no error output".to_string()
    } else {
        detail
    };
    FetchError::Exited {
        program,
        status: status.to_string(),
        detail,
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!("kill yt-dlp child: {}", e);
    }
}

/// Converts a parsed line into the progress the scheduler sees, if any.
fn to_progress(line: OutputLine, spec: &FormatSpec) -> Option<FetchProgress> {
    match line {
        OutputLine::Downloading {
            bytes_done,
            bytes_total,
        } => Some(FetchProgress::Downloading {
            bytes_done,
            bytes_total,
        }),
        OutputLine::DownloadFinished => Some(FetchProgress::DownloadFinished),
        OutputLine::PostProcess { status, processor } => {
            if matches!(spec, FormatSpec::Audio { .. }) && processor != AUDIO_POSTPROCESSOR {
                return None;
            }
            let fraction = match status {
                PostStatus::Started => 0.0,
                PostStatus::Processing => return None,
                PostStatus::Finished => 1.0,
            };
            Some(FetchProgress::PostProcessing { fraction })
        }
        OutputLine::File(_) => None,
    }
}

#[async_trait]
impl MediaFetchClient for YtDlpClient {
    async fn resolve_metadata(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<MediaMetadata, FetchError> {
        tracing::debug!(url, "resolving metadata with {}", self.program.display());
        let mut cmd = self.command(&metadata_args(url));
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            out = cmd.output() => out.map_err(|source| FetchError::Spawn {
                program: self.program_name(),
                source,
            })?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no error output")
                .trim()
                .to_string();
            return Err(FetchError::Metadata(detail));
        }

        parse::parse_metadata(&output.stdout)
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutput, FetchError> {
        let args = download_args(request);
        tracing::debug!(url = %request.url, "starting {} {}", self.program.display(), args.join(" "));

        let mut child = self.spawn(&args)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Io(std::io::Error::other("child stdout not captured")))?;
        let stderr_task = tokio::spawn(collect_error_detail(child.stderr.take()));
        let mut lines = BufReader::new(stdout).lines();
        let mut output = FetchOutput::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    kill(&mut child).await;
                    stderr_task.abort();
                    return Err(FetchError::Cancelled);
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match parse::parse_line(&line) {
                        Some(OutputLine::File(path)) => output.path = Some(path),
                        Some(parsed) => {
                            if let Some(progress) = to_progress(parsed, &request.format) {
                                on_progress(progress);
                            }
                        }
                        None => tracing::trace!(url = %request.url, "yt-dlp: {}", line),
                    }
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                kill(&mut child).await;
                stderr_task.abort();
                return Err(FetchError::Cancelled);
            }
            status = child.wait() => status?,
        };
        let detail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(exit_error(self.program_name(), status, detail));
        }
        Ok(output)
    }
}
