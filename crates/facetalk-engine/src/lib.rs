use std::env;

use anyhow::{bail, Context, Result};
use facetalk_contracts::events::EventWriter;
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

mod backend;
mod client;
mod playback;
mod poller;
mod session;
mod settings;
#[cfg(test)]
mod testing;

pub use backend::{
    parse_transcript, AskRequest, ChatAnswer, ChatBackend, SeedQuestions, ASK_FAILED_TEXT,
    TRANSCRIBE_FAILED_TEXT,
};
pub use client::{
    authorization_header, extract_job_id, has_inline_result, HttpTalkApi, JobClient, Submission,
    SubmitResponse, TalkApi,
};
pub use playback::{
    proxy_rewrite, BlobStore, DirBlobStore, DirectFetch, FetchMethod, FetchResponse,
    HttpMediaFetcher, MaterializedBlob, MediaFetcher, MediaPlayer, Passthrough, PlaybackArbiter,
    PlaybackController, PlaybackRejected, ProxyRewrite, ProxyRule, ResolveStrategy,
    StrategyOutcome,
};
pub use poller::{Clock, CompletionPoller, CompletionReport, PollSettings, SystemClock};
pub use session::{
    GenerationCounter, MediaSlot, Persona, PipelineOutcome, PipelineTicket, ReplyPipeline,
    Session, GREETING,
};
pub use settings::{Settings, DEFAULT_DID_API_BASE};

fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    if body.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Event log failures are reported on the console and otherwise ignored.
fn record_event(events: &EventWriter, event_type: &str, payload: Value) {
    if let Err(err) = events.emit_value(event_type, payload) {
        tracing::warn!(
            event_type,
            error = %error_chain_text(&err, 256),
            "failed to append session event"
        );
    }
}

#[cfg(test)]
mod tests {
    use facetalk_contracts::events::EventWriter;
    use serde_json::json;

    use super::{error_chain_text, record_event, truncate_text};

    #[test]
    fn error_chain_text_preserves_nested_contexts() {
        let err = anyhow::anyhow!("connection reset")
            .context("talk status request failed (https://api.test/talks/1)")
            .context("poll attempt 2");
        let rendered = error_chain_text(&err, 400);
        assert!(rendered.contains("poll attempt 2"));
        assert!(rendered.contains("talk status request failed"));
        assert!(rendered.contains("connection reset"));
    }

    #[test]
    fn truncate_text_marks_cut_strings() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn record_event_writes_to_session_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let events = EventWriter::new(&path, "s-1");
        record_event(&events, "talk_poll", json!({"attempt": 1}));
        let content = std::fs::read_to_string(&path)?;
        assert!(content.contains("\"attempt\":1"));
        Ok(())
    }
}
