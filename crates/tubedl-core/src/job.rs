//! Job model: identifiers, requested format, lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Job identifier. Assigned once per submission and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical batch identifier; completion is counted per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the user asked for: the video with audio, or the audio track only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    #[default]
    Video,
    Audio,
}

impl MediaFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaFormat::Video => "video",
            MediaFormat::Audio => "audio",
        }
    }

    /// Message shown when a job of this format succeeds.
    pub fn completion_message(self) -> &'static str {
        match self {
            MediaFormat::Video => "Video download complete!",
            MediaFormat::Audio => "Audio download complete!",
        }
    }
}

/// Lifecycle state. `Queued -> Running -> {Succeeded | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Queued, JobState::Running) => true,
            (JobState::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

/// One requested download tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub id: JobId,
    pub batch: BatchId,
    pub url: String,
    pub format: MediaFormat,
    /// Snapshot of the download directory at submission time.
    pub target_dir: PathBuf,
    pub state: JobState,
    pub progress_percent: u8,
    /// Result or error message; set once, on the terminal transition.
    pub message: Option<String>,
}

impl DownloadJob {
    pub(crate) fn new(
        id: JobId,
        batch: BatchId,
        url: String,
        format: MediaFormat,
        target_dir: PathBuf,
    ) -> Self {
        Self {
            id,
            batch,
            url,
            format,
            target_dir,
            state: JobState::Queued,
            progress_percent: 0,
            message: None,
        }
    }

    /// Apply a state transition. Returns false (and leaves the job untouched)
    /// if the state machine forbids it.
    pub(crate) fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                job_id = %self.id,
                from = self.state.as_str(),
                to = next.as_str(),
                "rejected job state transition"
            );
            return false;
        }
        self.state = next;
        if next == JobState::Succeeded {
            self.progress_percent = 100;
        }
        true
    }

    /// Record a new progress value; never lowers the stored percent.
    pub(crate) fn record_progress(&mut self, percent: u8) {
        if self.state == JobState::Running {
            self.progress_percent = self.progress_percent.max(percent.min(100));
        }
    }
}
