//! Fakes for the engine's seam traits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use facetalk_contracts::media::{BlobId, PlaybackMode, ResolvedMedia};
use serde_json::Value;

use crate::client::{SubmitResponse, TalkApi};
use crate::playback::{
    BlobStore, FetchMethod, FetchResponse, MaterializedBlob, MediaFetcher, MediaPlayer,
    PlaybackRejected,
};
use crate::poller::Clock;

type StatusHook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct TalkScript {
    submits: VecDeque<Result<SubmitResponse, String>>,
    statuses: VecDeque<Result<Value, String>>,
    repeat_status: Option<Value>,
    upload: Option<Result<Option<String>, String>>,
    payloads: Vec<Value>,
    status_timeouts: Vec<Duration>,
    upload_calls: usize,
}

#[derive(Default)]
pub(crate) struct FakeTalkApi {
    script: Mutex<TalkScript>,
    hook: Mutex<Option<StatusHook>>,
}

impl FakeTalkApi {
    pub(crate) fn push_submit(&self, body: Value, location: Option<String>) {
        self.script
            .lock()
            .unwrap()
            .submits
            .push_back(Ok(SubmitResponse { body, location }));
    }

    pub(crate) fn fail_submit(&self, reason: &str) {
        self.script
            .lock()
            .unwrap()
            .submits
            .push_back(Err(reason.to_string()));
    }

    pub(crate) fn push_status(&self, status: Result<Value, String>) {
        self.script.lock().unwrap().statuses.push_back(status);
    }

    /// Returned once the scripted statuses run out.
    pub(crate) fn repeat_status(&self, status: Value) {
        self.script.lock().unwrap().repeat_status = Some(status);
    }

    /// Called with the 1-based attempt number during every status request.
    pub(crate) fn on_status(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn set_upload(&self, result: Result<Option<String>, String>) {
        self.script.lock().unwrap().upload = Some(result);
    }

    pub(crate) fn submitted_payloads(&self) -> Vec<Value> {
        self.script.lock().unwrap().payloads.clone()
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.script.lock().unwrap().status_timeouts.len()
    }

    pub(crate) fn status_timeouts(&self) -> Vec<Duration> {
        self.script.lock().unwrap().status_timeouts.clone()
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.script.lock().unwrap().upload_calls
    }
}

impl TalkApi for FakeTalkApi {
    fn create_talk(&self, payload: &Value) -> Result<SubmitResponse> {
        let mut script = self.script.lock().unwrap();
        script.payloads.push(payload.clone());
        match script.submits.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => bail!("no scripted submission"),
        }
    }

    fn talk_status(&self, _talk_id: &str, timeout: Duration) -> Result<Value> {
        let (attempt, result) = {
            let mut script = self.script.lock().unwrap();
            script.status_timeouts.push(timeout);
            let result = match script.statuses.pop_front() {
                Some(result) => result,
                None => script
                    .repeat_status
                    .clone()
                    .ok_or_else(|| "no scripted status".to_string()),
            };
            (script.status_timeouts.len(), result)
        };
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(attempt);
        }
        result.map_err(|reason| anyhow!(reason))
    }

    fn upload_image(&self, _bytes: &[u8], _file_name: &str, _mime_type: &str) -> Result<Option<String>> {
        let mut script = self.script.lock().unwrap();
        script.upload_calls += 1;
        match script.upload.clone() {
            Some(Ok(url)) => Ok(url),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Ok(None),
        }
    }
}

/// Time only moves when someone sleeps or calls `advance`.
#[derive(Default)]
pub(crate) struct FakeClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub(crate) fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

/// Unscripted URLs fail like an unreachable host.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    responses: Mutex<HashMap<(String, FetchMethod), Result<FetchResponse, String>>>,
    calls: Mutex<Vec<(String, FetchMethod)>>,
}

impl FakeFetcher {
    pub(crate) fn respond(
        &self,
        url: &str,
        method: FetchMethod,
        status: u16,
        content_type: &str,
        body: Option<&[u8]>,
    ) {
        let response = FetchResponse {
            status,
            content_type: Some(content_type.to_string()).filter(|value| !value.is_empty()),
            body: body.map(<[u8]>::to_vec),
        };
        self.responses
            .lock()
            .unwrap()
            .insert((url.to_string(), method), Ok(response));
    }

    pub(crate) fn fail(&self, url: &str, method: FetchMethod, reason: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert((url.to_string(), method), Err(reason.to_string()));
    }

    pub(crate) fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == url)
            .count()
    }
}

impl MediaFetcher for FakeFetcher {
    fn fetch(&self, url: &str, method: FetchMethod) -> Result<FetchResponse> {
        self.calls.lock().unwrap().push((url.to_string(), method));
        match self.responses.lock().unwrap().get(&(url.to_string(), method)) {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err(reason)) => Err(anyhow!("{reason}")),
            None => bail!("{} {url}: connection refused", method.label()),
        }
    }
}

#[derive(Default)]
struct BlobLedger {
    next: usize,
    live: HashSet<BlobId>,
    released: Vec<BlobId>,
    mime_types: Vec<String>,
    fail_creates: bool,
}

#[derive(Default)]
pub(crate) struct MemoryBlobStore {
    ledger: Mutex<BlobLedger>,
}

impl MemoryBlobStore {
    pub(crate) fn fail_creates(&self, fail: bool) {
        self.ledger.lock().unwrap().fail_creates = fail;
    }

    pub(crate) fn created(&self) -> usize {
        self.ledger.lock().unwrap().next
    }

    pub(crate) fn released(&self) -> Vec<BlobId> {
        self.ledger.lock().unwrap().released.clone()
    }

    pub(crate) fn mime_types(&self) -> Vec<String> {
        self.ledger.lock().unwrap().mime_types.clone()
    }
}

impl BlobStore for MemoryBlobStore {
    fn create(&self, _bytes: &[u8], mime_type: &str) -> Result<MaterializedBlob> {
        let mut ledger = self.ledger.lock().unwrap();
        if ledger.fail_creates {
            bail!("blob storage full");
        }
        ledger.next += 1;
        let id = BlobId::new(format!("mem-{}", ledger.next));
        ledger.live.insert(id.clone());
        ledger.mime_types.push(mime_type.to_string());
        Ok(MaterializedBlob {
            url: format!("memory://{id}"),
            id,
        })
    }

    fn release(&self, id: &BlobId) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        if !ledger.live.remove(id) {
            bail!("blob {id} released twice or never created");
        }
        ledger.released.push(id.clone());
        Ok(())
    }

    fn live_count(&self) -> usize {
        self.ledger.lock().unwrap().live.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Autoplay {
    Allow,
    /// Sound needs a user activation first.
    Strict,
    Refuse,
}

pub(crate) struct RecordingPlayer {
    autoplay: Autoplay,
    activated: bool,
    muted: bool,
    loaded: Vec<String>,
    plays: Vec<PlaybackMode>,
    stops: usize,
}

impl Default for RecordingPlayer {
    fn default() -> Self {
        Self::with_autoplay(Autoplay::Allow)
    }
}

impl RecordingPlayer {
    fn with_autoplay(autoplay: Autoplay) -> Self {
        Self {
            autoplay,
            activated: false,
            muted: false,
            loaded: Vec::new(),
            plays: Vec::new(),
            stops: 0,
        }
    }

    pub(crate) fn strict() -> Self {
        Self::with_autoplay(Autoplay::Strict)
    }

    pub(crate) fn refusing() -> Self {
        Self::with_autoplay(Autoplay::Refuse)
    }

    pub(crate) fn loaded(&self) -> Vec<String> {
        self.loaded.clone()
    }

    /// Every attempted play, refused or not.
    pub(crate) fn plays(&self) -> Vec<PlaybackMode> {
        self.plays.clone()
    }

    pub(crate) fn is_muted(&self) -> bool {
        self.muted
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops
    }
}

impl MediaPlayer for RecordingPlayer {
    fn load(&mut self, media: &ResolvedMedia) {
        self.loaded.push(media.url().to_string());
    }

    fn play(&mut self, mode: PlaybackMode) -> Result<(), PlaybackRejected> {
        self.plays.push(mode);
        match (self.autoplay, mode) {
            (Autoplay::Refuse, _) => Err(PlaybackRejected("not allowed".to_string())),
            (Autoplay::Strict, PlaybackMode::Unmuted) if !self.activated => {
                Err(PlaybackRejected("sound needs a user gesture".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn stop(&mut self) {
        self.stops += 1;
    }

    fn user_activated(&mut self) {
        self.activated = true;
    }
}
