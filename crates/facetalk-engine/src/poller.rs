use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use facetalk_contracts::errors::{MediaError, SUCCESS_MESSAGE};
use facetalk_contracts::events::EventWriter;
use facetalk_contracts::media::{resolve_result_url, JobHandle, JobStatus};
use serde_json::json;

use crate::client::TalkApi;
use crate::{error_chain_text, record_event};

/// Monotonic time source for the poll loop.
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollSettings {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn from_secs_f64(timeout_s: f64, interval_s: f64) -> Self {
        Self::new(
            Duration::from_secs_f64(timeout_s.max(0.0)),
            Duration::from_secs_f64(interval_s.max(0.0)),
        )
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(120), Duration::from_secs(3))
    }
}

/// Result of waiting on one talk: a URL on success, and a status line either way.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub media_url: Option<String>,
    pub message: String,
    pub attempts: u32,
    pub error: Option<MediaError>,
}

#[derive(Clone)]
pub struct CompletionPoller {
    api: Arc<dyn TalkApi>,
    clock: Arc<dyn Clock>,
    events: EventWriter,
}

impl CompletionPoller {
    pub fn new(api: Arc<dyn TalkApi>, clock: Arc<dyn Clock>, events: EventWriter) -> Self {
        Self { api, clock, events }
    }

    pub fn await_completion(&self, handle: &JobHandle, settings: PollSettings) -> CompletionReport {
        let (result, attempts) = self.poll(handle, settings);
        match result {
            Ok(url) => CompletionReport {
                media_url: Some(url),
                message: SUCCESS_MESSAGE.to_string(),
                attempts,
                error: None,
            },
            Err(err) => CompletionReport {
                media_url: None,
                message: err.status_message(),
                attempts,
                error: Some(err),
            },
        }
    }

    pub fn wait_for_media(
        &self,
        handle: &JobHandle,
        settings: PollSettings,
    ) -> Result<String, MediaError> {
        self.poll(handle, settings).0
    }

    /// Polls until a terminal state or the deadline. The deadline is fixed when
    /// the loop starts; a slow status request only eats into the remaining budget.
    fn poll(&self, handle: &JobHandle, settings: PollSettings) -> (Result<String, MediaError>, u32) {
        let deadline = self.clock.now() + settings.timeout;
        let mut attempts = 0u32;

        loop {
            let now = self.clock.now();
            if now >= deadline {
                tracing::warn!(talk_id = handle.id(), attempts, "talk polling timed out");
                record_event(
                    &self.events,
                    "talk_failed",
                    json!({"talk_id": handle.id(), "reason": "poll_timeout", "attempts": attempts}),
                );
                let err = MediaError::PollTimeout {
                    timeout_s: settings.timeout.as_secs_f64(),
                };
                return (Err(err), attempts);
            }

            attempts += 1;
            match self.api.talk_status(handle.id(), deadline - now) {
                Ok(payload) => {
                    let status = JobStatus::from_payload(payload);
                    tracing::debug!(talk_id = handle.id(), attempt = attempts, status = status.label(), "talk poll");
                    record_event(
                        &self.events,
                        "talk_poll",
                        json!({"talk_id": handle.id(), "attempt": attempts, "status": status.label()}),
                    );
                    match status {
                        JobStatus::Done(payload) => {
                            let result = resolve_result_url(&payload).ok_or(MediaError::ResolutionMiss);
                            self.record_terminal(handle, &result, attempts);
                            return (result, attempts);
                        }
                        JobStatus::Error(payload) => {
                            let result = Err(MediaError::JobFailed(payload.to_string()));
                            self.record_terminal(handle, &result, attempts);
                            return (result, attempts);
                        }
                        JobStatus::Pending(_) => {}
                    }
                }
                Err(err) => tracing::warn!(
                    talk_id = handle.id(),
                    attempt = attempts,
                    error = %error_chain_text(&err, 256),
                    "talk poll failed; retrying"
                ),
            }

            let now = self.clock.now();
            if now < deadline {
                self.clock.sleep(settings.interval.min(deadline - now));
            }
        }
    }

    fn record_terminal(&self, handle: &JobHandle, result: &Result<String, MediaError>, attempts: u32) {
        match result {
            Ok(url) => record_event(
                &self.events,
                "talk_completed",
                json!({"talk_id": handle.id(), "url": url, "attempts": attempts}),
            ),
            Err(err) => record_event(
                &self.events,
                "talk_failed",
                json!({"talk_id": handle.id(), "reason": err.kind(), "detail": err.to_string(), "attempts": attempts}),
            ),
        }
    }
}
