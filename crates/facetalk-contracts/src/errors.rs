use thiserror::Error;

pub const TIMEOUT_MESSAGE: &str = "Timeout waiting for video generation";
pub const SUCCESS_MESSAGE: &str = "Video generated successfully";
pub const RESOLUTION_MISS_MESSAGE: &str = "Video generated but no playable URL was found";

/// Everything that can keep a reply from getting its media.
///
/// None of these abort a chat turn: the session converts each one into a
/// text-only reply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MediaError {
    /// The job could not be created.
    #[error("talk submission failed: {0}")]
    Submission(String),

    /// No terminal state before the deadline.
    #[error("no terminal talk state after {timeout_s:.1}s")]
    PollTimeout { timeout_s: f64 },

    /// The provider reported an error state; carries the raw status payload.
    #[error("talk failed: {0}")]
    JobFailed(String),

    /// Terminal success, but nothing in the payload looks like a playable URL.
    #[error("talk finished without a playable URL")]
    ResolutionMiss,

    /// Network or cross-origin failure while inspecting a candidate URL.
    #[error("could not fetch {url}: {reason}")]
    PlaybackFetch { url: String, reason: String },
}

impl MediaError {
    pub fn kind(&self) -> &'static str {
        match self {
            MediaError::Submission(_) => "submission_error",
            MediaError::PollTimeout { .. } => "poll_timeout",
            MediaError::JobFailed(_) => "job_failed",
            MediaError::ResolutionMiss => "resolution_miss",
            MediaError::PlaybackFetch { .. } => "playback_fetch_error",
        }
    }

    /// Status line reported next to a missing media URL.
    pub fn status_message(&self) -> String {
        match self {
            MediaError::Submission(detail) => format!("Failed to create talk: {detail}"),
            MediaError::PollTimeout { .. } => TIMEOUT_MESSAGE.to_string(),
            MediaError::JobFailed(detail) => format!("Error: {detail}"),
            MediaError::ResolutionMiss => RESOLUTION_MISS_MESSAGE.to_string(),
            MediaError::PlaybackFetch { .. } => self.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::PollTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{MediaError, TIMEOUT_MESSAGE};

    #[test]
    fn job_failure_message_carries_provider_detail() {
        let err = MediaError::JobFailed(r#"{"description":"bad image"}"#.to_string());
        let message = err.status_message();
        assert!(message.starts_with("Error: "));
        assert!(message.contains("bad image"));
        assert_eq!(err.kind(), "job_failed");
    }

    #[test]
    fn timeout_reports_fixed_message() {
        let err = MediaError::PollTimeout { timeout_s: 6.0 };
        assert!(err.is_timeout());
        assert_eq!(err.status_message(), TIMEOUT_MESSAGE);
        assert_eq!(err.to_string(), "no terminal talk state after 6.0s");
    }
}
