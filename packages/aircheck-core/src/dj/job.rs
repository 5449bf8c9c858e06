//! DJ job records and their state machine.

use serde::Serialize;

use crate::store::TtsMode;
use crate::utils::fingerprint;

/// States of a DJ job.
///
/// ```text
/// armed -> generating -> synthesizing -> registered -> enqueued   [terminal]
/// any   -> failed      (provider exhaustion / validation failure) [terminal]
/// any   -> cancelled   (track changed, duplicate, spacing gate)   [terminal]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for the trigger timer.
    Armed,
    /// Producing the spoken text.
    Generating,
    /// Producing the audio.
    Synthesizing,
    /// Artifact registered and validated.
    Registered,
    /// Audio handed to the engine; the job succeeded.
    Enqueued,
    /// The job gave up.
    Failed,
    /// The job became pointless before finishing.
    Cancelled,
}

impl JobState {
    /// Terminal states never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Enqueued | Self::Failed | Self::Cancelled)
    }

    /// Stable lowercase name for logs and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Armed => "armed",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Registered => "registered",
            Self::Enqueued => "enqueued",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One tracked DJ job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DjJob {
    /// Stable job identifier.
    pub job_id: String,
    /// Dedup fingerprint; at most one non-terminal job exists per key.
    pub dedup_key: String,
    /// Intro or outro.
    pub mode: TtsMode,
    /// Title of the track the line is for.
    pub track_title: String,
    /// Artist of the track the line is for.
    pub track_artist: String,
    /// Start time of the target track, or `None` for "before next track".
    pub target_epoch_ms: Option<u64>,
    /// Current state.
    pub state: JobState,
    /// Creation time (Unix milliseconds).
    pub created_ms: u64,
    /// Last state change (Unix milliseconds).
    pub updated_ms: u64,
    /// Registered artifact, once one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_id: Option<i64>,
    /// Failure or cancellation reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Computes the dedup key for a target track.
#[must_use]
pub fn dedup_key(title: &str, artist: &str, target_epoch_ms: Option<u64>) -> String {
    let target = target_epoch_ms
        .map(|t| t.to_string())
        .unwrap_or_else(|| "next".to_string());
    fingerprint(&[
        "dj-job",
        &title.trim().to_lowercase(),
        &artist.trim().to_lowercase(),
        &target,
    ])
}
