use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use facetalk_contracts::chat::{ChatLog, ReplyTrigger, VoiceSelector};
use facetalk_contracts::errors::{MediaError, SUCCESS_MESSAGE};
use facetalk_contracts::events::EventWriter;
use facetalk_contracts::media::{
    resolve_result_url, GenerationRequest, MediaLifecycle, PlaybackMode, PlaybackPolicy,
    ResolvedMedia, SourceImage,
};
use facetalk_contracts::prefs::{
    PreferenceStore, PERSONA_KEYS, SELECTED_GENDER, SELECTED_IMAGE, SELECTED_ROLE,
    SELECTED_SPECIALTY,
};
use serde_json::{json, Value};

use crate::client::{JobClient, Submission};
use crate::playback::{BlobStore, MediaPlayer, PlaybackArbiter, PlaybackController};
use crate::poller::{CompletionPoller, PollSettings};
use crate::{error_chain_text, record_event};

pub const GREETING: &str = "您好！我可以為您提供什麼協助？";
pub const DEFAULT_ROLE: &str = "pharmacist";
pub const DEFAULT_GENDER: &str = "male";
pub const DEFAULT_SPECIALTY: &str = "gdm";
const STATIC_IMAGE_PREFIX: &str = "/static/images/";

/// Identifies one pipeline run. Only the run holding the latest ticket may
/// touch the media slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTicket {
    generation: u64,
}

impl PipelineTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Shared between the session and its worker threads.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter(Arc<AtomicU64>);

impl GenerationCounter {
    /// Invalidates every earlier ticket.
    pub fn advance(&self) -> PipelineTicket {
        PipelineTicket {
            generation: self.0.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, ticket: PipelineTicket) -> bool {
        self.current() == ticket.generation
    }
}

/// The media currently displayed for the latest reply. Replacing or clearing
/// releases the previous blob before anything else happens.
pub struct MediaSlot {
    blobs: Arc<dyn BlobStore>,
    current: Option<ResolvedMedia>,
    events: EventWriter,
}

impl MediaSlot {
    pub fn new(blobs: Arc<dyn BlobStore>, events: EventWriter) -> Self {
        Self {
            blobs,
            current: None,
            events,
        }
    }

    pub fn current(&self) -> Option<&ResolvedMedia> {
        self.current.as_ref()
    }

    pub fn replace(&mut self, media: ResolvedMedia) -> &ResolvedMedia {
        self.clear();
        self.current.insert(media)
    }

    /// Returns whether anything was held.
    pub fn clear(&mut self) -> bool {
        match self.current.take() {
            Some(mut media) => {
                release_media(self.blobs.as_ref(), &mut media, &self.events);
                true
            }
            None => false,
        }
    }

    pub(crate) fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }
}

impl Drop for MediaSlot {
    fn drop(&mut self) {
        self.clear();
    }
}

pub(crate) fn release_media(blobs: &dyn BlobStore, media: &mut ResolvedMedia, events: &EventWriter) {
    let Some(id) = media.take_blob() else {
        return;
    };
    if let Err(err) = blobs.release(&id) {
        tracing::warn!(blob = %id, error = %error_chain_text(&err, 256), "failed to release media blob");
        return;
    }
    tracing::debug!(blob = %id, "released media blob");
    record_event(events, "media_released", json!({"blob": id.as_str()}));
}

/// Who the user is talking to, as chosen in the persona picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub image: Option<String>,
    pub role: String,
    pub gender: String,
    pub specialty: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            image: None,
            role: DEFAULT_ROLE.to_string(),
            gender: DEFAULT_GENDER.to_string(),
            specialty: DEFAULT_SPECIALTY.to_string(),
        }
    }
}

impl Persona {
    pub fn load(prefs: &mut PreferenceStore) -> Self {
        let defaults = Self::default();
        Self {
            image: prefs.get_str(SELECTED_IMAGE),
            role: prefs.get_str(SELECTED_ROLE).unwrap_or(defaults.role),
            gender: prefs.get_str(SELECTED_GENDER).unwrap_or(defaults.gender),
            specialty: prefs
                .get_str(SELECTED_SPECIALTY)
                .unwrap_or(defaults.specialty),
        }
    }

    pub fn save(&self, prefs: &mut PreferenceStore) -> Result<()> {
        match &self.image {
            Some(image) => prefs.set(SELECTED_IMAGE, Value::String(image.clone()))?,
            None => prefs.remove(SELECTED_IMAGE)?,
        }
        prefs.set(SELECTED_ROLE, Value::String(self.role.clone()))?;
        prefs.set(SELECTED_GENDER, Value::String(self.gender.clone()))?;
        prefs.set(SELECTED_SPECIALTY, Value::String(self.specialty.clone()))
    }

    /// Absolute URL of the persona image when it can front a talk: either an
    /// absolute `http(s)` URL, or a bundled `/static/images/` asset joined to
    /// `origin`.
    pub fn source_url(&self, origin: Option<&str>) -> Option<String> {
        let image = self.image.as_deref()?.trim();
        if image.starts_with("http://") || image.starts_with("https://") {
            return Some(image.to_string());
        }
        if image.starts_with(STATIC_IMAGE_PREFIX) {
            return origin.map(|origin| format!("{}{image}", origin.trim_end_matches('/')));
        }
        None
    }
}

/// What a pipeline run produced. Carries its ticket back so the session can
/// tell whether it still matters.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub ticket: PipelineTicket,
    pub media: Option<ResolvedMedia>,
    pub lifecycle: MediaLifecycle,
    pub message: String,
    pub error: Option<MediaError>,
}

impl PipelineOutcome {
    fn superseded(ticket: PipelineTicket) -> Self {
        Self {
            ticket,
            media: None,
            lifecycle: MediaLifecycle::Superseded,
            message: "superseded by a newer reply".to_string(),
            error: None,
        }
    }

    fn failed(ticket: PipelineTicket, lifecycle: MediaLifecycle, error: MediaError) -> Self {
        Self {
            ticket,
            media: None,
            lifecycle,
            message: error.status_message(),
            error: Some(error),
        }
    }

    fn resolved(ticket: PipelineTicket, media: ResolvedMedia) -> Self {
        Self {
            ticket,
            media: Some(media),
            lifecycle: MediaLifecycle::Resolved,
            message: SUCCESS_MESSAGE.to_string(),
            error: None,
        }
    }
}

/// Carries one reply from talk submission to resolved media. Runs off the
/// session thread and never touches the media slot.
#[derive(Clone)]
pub struct ReplyPipeline {
    client: JobClient,
    poller: CompletionPoller,
    arbiter: Arc<PlaybackArbiter>,
    poll: PollSettings,
    events: EventWriter,
}

impl ReplyPipeline {
    pub fn new(
        client: JobClient,
        poller: CompletionPoller,
        arbiter: Arc<PlaybackArbiter>,
        poll: PollSettings,
        events: EventWriter,
    ) -> Self {
        Self {
            client,
            poller,
            arbiter,
            poll,
            events,
        }
    }

    pub fn run(
        &self,
        ticket: PipelineTicket,
        counter: &GenerationCounter,
        request: &GenerationRequest,
    ) -> PipelineOutcome {
        let submission = match self.client.submit(request) {
            Ok(submission) => submission,
            Err(err) => {
                tracing::warn!(error = %err, "talk submission failed; replying with text only");
                return PipelineOutcome::failed(ticket, MediaLifecycle::Failed, err);
            }
        };

        let url = match submission {
            Submission::Completed(payload) => {
                match resolve_result_url(&payload) {
                    Some(url) => url,
                    None => {
                        return PipelineOutcome::failed(
                            ticket,
                            MediaLifecycle::Failed,
                            MediaError::ResolutionMiss,
                        )
                    }
                }
            }
            Submission::Pending(handle) => {
                if !counter.is_current(ticket) {
                    return self.discard_early(ticket, "before polling");
                }
                match self.poller.wait_for_media(&handle, self.poll) {
                    Ok(url) => url,
                    Err(err) => {
                        let lifecycle = if err.is_timeout() {
                            MediaLifecycle::TimedOut
                        } else {
                            MediaLifecycle::Failed
                        };
                        tracing::warn!(talk_id = handle.id(), error = %err, "no media for reply");
                        return PipelineOutcome::failed(ticket, lifecycle, err);
                    }
                }
            }
        };
        self.resolve_stage(ticket, counter, &url)
    }

    /// Skips submission: the chat backend already handed over a media URL.
    pub fn run_candidate(
        &self,
        ticket: PipelineTicket,
        counter: &GenerationCounter,
        candidate: &str,
    ) -> PipelineOutcome {
        self.resolve_stage(ticket, counter, candidate)
    }

    fn resolve_stage(
        &self,
        ticket: PipelineTicket,
        counter: &GenerationCounter,
        url: &str,
    ) -> PipelineOutcome {
        if !counter.is_current(ticket) {
            return self.discard_early(ticket, "before resolving");
        }
        PipelineOutcome::resolved(ticket, self.arbiter.resolve_for_playback(url))
    }

    fn discard_early(&self, ticket: PipelineTicket, stage: &str) -> PipelineOutcome {
        tracing::info!(generation = ticket.generation(), stage, "reply superseded; stopping pipeline");
        record_event(
            &self.events,
            "pipeline_discarded",
            json!({"generation": ticket.generation(), "stage": stage}),
        );
        PipelineOutcome::superseded(ticket)
    }
}

/// Owns everything that outlives one reply: the media slot, the playback
/// policy, the persona and the transcript.
pub struct Session {
    counter: GenerationCounter,
    slot: MediaSlot,
    controller: PlaybackController,
    lifecycle: MediaLifecycle,
    prefs: PreferenceStore,
    persona: Persona,
    selector: VoiceSelector,
    log: ChatLog,
    video_replies: bool,
    image_origin: Option<String>,
    events: EventWriter,
}

impl Session {
    pub fn new(blobs: Arc<dyn BlobStore>, mut prefs: PreferenceStore, events: EventWriter) -> Self {
        let policy = PlaybackPolicy::load(&mut prefs);
        let persona = Persona::load(&mut prefs);
        Self {
            counter: GenerationCounter::default(),
            slot: MediaSlot::new(blobs, events.clone()),
            controller: PlaybackController::new(policy),
            lifecycle: MediaLifecycle::NoMedia,
            prefs,
            persona,
            selector: VoiceSelector::default(),
            log: ChatLog::with_greeting(GREETING),
            video_replies: true,
            image_origin: None,
            events,
        }
    }

    pub fn with_voice_selector(mut self, selector: VoiceSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Origin that bundled `/static/images/` persona assets are served from.
    pub fn with_image_origin(mut self, origin: Option<String>) -> Self {
        self.image_origin = origin;
        self
    }

    pub fn counter(&self) -> GenerationCounter {
        self.counter.clone()
    }

    pub fn log(&self) -> &ChatLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut ChatLog {
        &mut self.log
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn set_persona(&mut self, persona: Persona) -> Result<()> {
        persona.save(&mut self.prefs)?;
        self.persona = persona;
        Ok(())
    }

    pub fn video_replies(&self) -> bool {
        self.video_replies
    }

    pub fn set_video_replies(&mut self, enabled: bool) {
        self.video_replies = enabled;
    }

    pub fn lifecycle(&self) -> MediaLifecycle {
        self.lifecycle
    }

    pub fn policy(&self) -> PlaybackPolicy {
        self.controller.policy()
    }

    pub fn playback_mode(&self) -> Option<PlaybackMode> {
        self.controller.current_mode()
    }

    pub fn current_media(&self) -> Option<&ResolvedMedia> {
        self.slot.current()
    }

    /// Starts a new reply. Earlier pipelines go stale, and whatever is playing
    /// is stopped and released.
    pub fn begin_reply(&mut self, player: &mut dyn MediaPlayer) -> PipelineTicket {
        let ticket = self.counter.advance();
        self.teardown_media(player);
        ticket
    }

    /// The talk for `ticket` was handed to a pipeline run, which submits and
    /// then polls. Returns `false` for a stale ticket.
    pub fn mark_submitted(&mut self, ticket: PipelineTicket) -> bool {
        if !self.counter.is_current(ticket) {
            return false;
        }
        self.lifecycle.advance(MediaLifecycle::Submitted)
            && self.lifecycle.advance(MediaLifecycle::Polling)
    }

    /// Talk request voicing `text`, or `None` when video replies are off or the
    /// persona has no usable image.
    pub fn plan_talk(&self, text: &str, trigger: ReplyTrigger) -> Option<GenerationRequest> {
        if !self.video_replies || text.trim().is_empty() {
            return None;
        }
        let source_url = self.persona.source_url(self.image_origin.as_deref())?;
        let voice = self
            .selector
            .voice_for(Some(self.persona.gender.as_str()), trigger);
        Some(GenerationRequest::text(
            text,
            SourceImage::Url(source_url),
            voice,
        ))
    }

    /// Applies a finished pipeline. Stale outcomes are dropped and their blob
    /// released. Returns whether the outcome was applied.
    pub fn apply(&mut self, mut outcome: PipelineOutcome, player: &mut dyn MediaPlayer) -> bool {
        if !self.counter.is_current(outcome.ticket) {
            if let Some(media) = outcome.media.as_mut() {
                release_media(self.slot.blobs(), media, &self.events);
            }
            tracing::info!(generation = outcome.ticket.generation(), "discarding superseded reply media");
            record_event(
                &self.events,
                "pipeline_discarded",
                json!({"generation": outcome.ticket.generation(), "stage": "apply"}),
            );
            return false;
        }
        match outcome.media.take() {
            Some(media) => {
                self.settle(MediaLifecycle::Resolved);
                self.play(media, player);
            }
            None => {
                tracing::info!(lifecycle = outcome.lifecycle.label(), message = %outcome.message, "reply stays text-only");
                self.settle(outcome.lifecycle);
            }
        }
        true
    }

    /// Moves to a pipeline's final stage. Outcomes applied without
    /// `mark_submitted` walk the earlier stages first.
    fn settle(&mut self, stage: MediaLifecycle) {
        if self.lifecycle == MediaLifecycle::NoMedia && stage != MediaLifecycle::Resolved {
            self.lifecycle.advance(MediaLifecycle::Submitted);
        }
        if self.lifecycle == MediaLifecycle::Submitted && stage == MediaLifecycle::TimedOut {
            self.lifecycle.advance(MediaLifecycle::Polling);
        }
        if !self.lifecycle.advance(stage) {
            tracing::warn!(from = self.lifecycle.label(), to = stage.label(), "unexpected media stage");
        }
    }

    /// Plays an inline audio answer from the chat backend.
    pub fn play_audio_reply(&mut self, bytes: &[u8], player: &mut dyn MediaPlayer) -> Result<()> {
        self.teardown_media(player);
        let blob = self.slot.blobs().create(bytes, "audio/mpeg")?;
        self.lifecycle.advance(MediaLifecycle::Resolved);
        self.play(ResolvedMedia::local_blob(blob.url, blob.id), player);
        Ok(())
    }

    fn play(&mut self, media: ResolvedMedia, player: &mut dyn MediaPlayer) {
        let media = self.slot.replace(media);
        player.load(media);
        let url = media.url().to_string();
        self.lifecycle.advance(MediaLifecycle::PlaybackAttempting);
        let next = match self.controller.start(player) {
            Some(PlaybackMode::Unmuted) => MediaLifecycle::PlayingUnmuted,
            Some(PlaybackMode::Muted) => MediaLifecycle::PlayingMuted,
            None => MediaLifecycle::Failed,
        };
        self.lifecycle.advance(next);
        record_event(
            &self.events,
            "playback_started",
            json!({"url": url, "lifecycle": self.lifecycle.label()}),
        );
    }

    pub fn user_gesture(&mut self, player: &mut dyn MediaPlayer) -> bool {
        let granted = self.controller.user_gesture(player);
        if granted {
            self.persist_policy();
            if self.controller.current_mode() == Some(PlaybackMode::Unmuted) {
                self.lifecycle.advance(MediaLifecycle::PlayingUnmuted);
            }
        }
        granted
    }

    pub fn toggle_mute(&mut self, player: &mut dyn MediaPlayer) -> Option<PlaybackMode> {
        let (mode, granted) = self.controller.toggle_mute(player)?;
        if granted {
            self.persist_policy();
        }
        self.lifecycle.advance(match mode {
            PlaybackMode::Unmuted => MediaLifecycle::PlayingUnmuted,
            PlaybackMode::Muted => MediaLifecycle::PlayingMuted,
        });
        Some(mode)
    }

    pub fn media_ended(&mut self, player: &mut dyn MediaPlayer) {
        if self.lifecycle.advance(MediaLifecycle::Ended) {
            player.stop();
            self.controller.stopped();
            self.slot.clear();
            self.lifecycle.advance(MediaLifecycle::Released);
            self.lifecycle.advance(MediaLifecycle::NoMedia);
        }
    }

    /// Forgets the persona and transcript and drops any in-flight reply.
    pub fn reset(&mut self, player: &mut dyn MediaPlayer) -> Result<()> {
        self.counter.advance();
        self.teardown_media(player);
        self.log = ChatLog::with_greeting(GREETING);
        for key in PERSONA_KEYS {
            self.prefs.remove(key)?;
        }
        self.persona = Persona::default();
        Ok(())
    }

    pub fn shutdown(&mut self, player: &mut dyn MediaPlayer) {
        self.counter.advance();
        self.teardown_media(player);
        if let Err(err) = self.prefs.flush() {
            tracing::warn!(error = %error_chain_text(&err, 256), "failed to flush preferences");
        }
    }

    fn teardown_media(&mut self, player: &mut dyn MediaPlayer) {
        player.stop();
        self.controller.stopped();
        self.slot.clear();
        if self.lifecycle != MediaLifecycle::NoMedia {
            self.lifecycle.advance(MediaLifecycle::Superseded);
            self.lifecycle.advance(MediaLifecycle::Released);
            self.lifecycle.advance(MediaLifecycle::NoMedia);
        }
    }

    fn persist_policy(&mut self) {
        if let Err(err) = self.controller.policy().persist(&mut self.prefs) {
            tracing::warn!(error = %error_chain_text(&err, 256), "failed to persist autoplay permission");
        }
    }
}
