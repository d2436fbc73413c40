use std::sync::Arc;

use anyhow::{bail, Result};
use facetalk_contracts::errors::MediaError;
use facetalk_contracts::events::EventWriter;
use facetalk_contracts::media::{resolve_result_url, ResolvedMedia};
use serde_json::{json, Value};
use url::Url;

use super::blob::BlobStore;
use super::fetch::{FetchMethod, FetchResponse, MediaFetcher};
use crate::session::MediaSlot;
use crate::{error_chain_text, record_event};

const DEFAULT_VIDEO_MIME: &str = "video/mp4";

/// What one strategy made of a candidate URL.
#[derive(Debug)]
pub enum StrategyOutcome {
    Resolved(ResolvedMedia),
    /// The candidate was a JSON document pointing somewhere else.
    Follow(String),
    /// Not applicable, or failed; the next strategy gets a turn.
    Next,
}

pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn attempt(
        &self,
        url: &str,
        fetcher: &dyn MediaFetcher,
        blobs: &dyn BlobStore,
    ) -> StrategyOutcome;
}

/// Fetches the URL itself: video bodies become local blobs, JSON documents are
/// followed, anything else plays from the URL as-is.
pub struct DirectFetch;

impl ResolveStrategy for DirectFetch {
    fn name(&self) -> &'static str {
        "direct_fetch"
    }

    fn attempt(
        &self,
        url: &str,
        fetcher: &dyn MediaFetcher,
        blobs: &dyn BlobStore,
    ) -> StrategyOutcome {
        let response = match fetch_media(url, fetcher) {
            Ok(response) => response,
            Err(err) => {
                let err = MediaError::PlaybackFetch {
                    url: url.to_string(),
                    reason: error_chain_text(&err, 256),
                };
                tracing::warn!(error = %err, "direct media fetch failed");
                return StrategyOutcome::Next;
            }
        };

        let media_type = response.media_type();
        if media_type.starts_with("video/") {
            let body = match response.body {
                Some(body) => Ok(body),
                None => fetch_body(url, fetcher),
            };
            return match body.and_then(|body| materialize(&body, &media_type, blobs)) {
                Ok(media) => StrategyOutcome::Resolved(media),
                Err(err) => {
                    tracing::warn!(url, error = %error_chain_text(&err, 256), "could not copy video locally; using remote URL");
                    StrategyOutcome::Resolved(ResolvedMedia::direct(url))
                }
            };
        }

        if response.is_json() || url_path_ends_with(url, ".json") {
            let body = match response.body {
                Some(body) => Ok(body),
                None => fetch_body(url, fetcher),
            };
            let nested = body
                .ok()
                .and_then(|body| serde_json::from_slice::<Value>(&body).ok())
                .and_then(|document| resolve_result_url(&document));
            if let Some(nested) = nested.filter(|nested| nested != url) {
                return StrategyOutcome::Follow(nested);
            }
        }

        StrategyOutcome::Resolved(ResolvedMedia::direct(url))
    }
}

/// Maps hosts to a path prefix on the same-origin proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRule {
    pub host_contains: String,
    pub prefix: String,
}

impl ProxyRule {
    pub fn new(host_contains: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            host_contains: host_contains.into(),
            prefix: prefix.into(),
        }
    }

    /// Object-storage hosts used for finished talks.
    pub fn talk_storage_defaults() -> Vec<ProxyRule> {
        vec![
            ProxyRule::new(".s3.", "/s3-did"),
            ProxyRule::new("d-id-talks-prod.s3", "/s3-did"),
        ]
    }
}

/// Same URL through the proxy: `{base}{prefix}{path}{query}`. `None` when no
/// rule matches the host.
pub fn proxy_rewrite(url: &str, proxy_base: &str, rules: &[ProxyRule]) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let rule = rules
        .iter()
        .find(|rule| host.contains(rule.host_contains.as_str()))?;
    let query = parsed
        .query()
        .map(|query| format!("?{query}"))
        .unwrap_or_default();
    Some(format!(
        "{}{}{}{}",
        proxy_base.trim_end_matches('/'),
        rule.prefix,
        parsed.path(),
        query
    ))
}

/// Re-fetches storage-hosted media through the proxy when the direct fetch
/// could not reach it.
pub struct ProxyRewrite {
    proxy_base: String,
    rules: Vec<ProxyRule>,
}

impl ProxyRewrite {
    pub fn new(proxy_base: impl Into<String>) -> Self {
        Self::with_rules(proxy_base, ProxyRule::talk_storage_defaults())
    }

    pub fn with_rules(proxy_base: impl Into<String>, rules: Vec<ProxyRule>) -> Self {
        Self {
            proxy_base: proxy_base.into(),
            rules,
        }
    }
}

impl ResolveStrategy for ProxyRewrite {
    fn name(&self) -> &'static str {
        "proxy_rewrite"
    }

    fn attempt(
        &self,
        url: &str,
        fetcher: &dyn MediaFetcher,
        blobs: &dyn BlobStore,
    ) -> StrategyOutcome {
        let Some(proxied) = proxy_rewrite(url, &self.proxy_base, &self.rules) else {
            return StrategyOutcome::Next;
        };
        tracing::info!(url, proxied = %proxied, "retrying media through proxy");
        let response = match fetcher.fetch(&proxied, FetchMethod::Get) {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::warn!(proxied = %proxied, status = response.status, "proxy refused media; using proxied URL");
                return StrategyOutcome::Resolved(ResolvedMedia::direct(proxied));
            }
            Err(err) => {
                tracing::warn!(proxied = %proxied, error = %error_chain_text(&err, 256), "proxy fetch failed");
                return StrategyOutcome::Next;
            }
        };
        let media_type = Some(response.media_type())
            .filter(|media_type| !media_type.is_empty())
            .unwrap_or_else(|| DEFAULT_VIDEO_MIME.to_string());
        let materialized = match response.body {
            Some(body) => materialize(&body, &media_type, blobs),
            None => fetch_body(&proxied, fetcher).and_then(|body| materialize(&body, &media_type, blobs)),
        };
        match materialized {
            Ok(media) => StrategyOutcome::Resolved(media),
            Err(err) => {
                tracing::warn!(proxied = %proxied, error = %error_chain_text(&err, 256), "could not copy proxied media; using proxied URL");
                StrategyOutcome::Resolved(ResolvedMedia::direct(proxied))
            }
        }
    }
}

/// Hands the URL to the player untouched.
pub struct Passthrough;

impl ResolveStrategy for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn attempt(&self, url: &str, _: &dyn MediaFetcher, _: &dyn BlobStore) -> StrategyOutcome {
        StrategyOutcome::Resolved(ResolvedMedia::direct(url))
    }
}

/// Turns a candidate URL into something a player can load.
///
/// Strategies run in order until one resolves. A `Follow` restarts the chain
/// on the nested URL; only one such hop is taken, after which the nested URL
/// plays as-is if it points at JSON again.
pub struct PlaybackArbiter {
    fetcher: Arc<dyn MediaFetcher>,
    blobs: Arc<dyn BlobStore>,
    strategies: Vec<Box<dyn ResolveStrategy>>,
    events: EventWriter,
}

impl PlaybackArbiter {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        blobs: Arc<dyn BlobStore>,
        proxy_base: Option<String>,
        events: EventWriter,
    ) -> Self {
        let mut strategies: Vec<Box<dyn ResolveStrategy>> = vec![Box::new(DirectFetch)];
        if let Some(base) = proxy_base {
            strategies.push(Box::new(ProxyRewrite::new(base)));
        }
        strategies.push(Box::new(Passthrough));
        Self::with_strategies(fetcher, blobs, strategies, events)
    }

    pub fn with_strategies(
        fetcher: Arc<dyn MediaFetcher>,
        blobs: Arc<dyn BlobStore>,
        strategies: Vec<Box<dyn ResolveStrategy>>,
        events: EventWriter,
    ) -> Self {
        Self {
            fetcher,
            blobs,
            strategies,
            events,
        }
    }

    pub fn blobs(&self) -> Arc<dyn BlobStore> {
        self.blobs.clone()
    }

    /// Never fails: when nothing better works the candidate is returned as a
    /// direct URL.
    pub fn resolve_for_playback(&self, candidate: &str) -> ResolvedMedia {
        let mut url = candidate.to_string();
        let mut hop_taken = false;

        'chain: loop {
            for strategy in &self.strategies {
                match strategy.attempt(&url, self.fetcher.as_ref(), self.blobs.as_ref()) {
                    StrategyOutcome::Resolved(media) => {
                        self.record_resolved(candidate, strategy.name(), &media);
                        return media;
                    }
                    StrategyOutcome::Follow(nested) if !hop_taken => {
                        tracing::debug!(from = %url, to = %nested, "following nested media URL");
                        hop_taken = true;
                        url = nested;
                        continue 'chain;
                    }
                    StrategyOutcome::Follow(_) => {
                        let media = ResolvedMedia::direct(url.clone());
                        self.record_resolved(candidate, strategy.name(), &media);
                        return media;
                    }
                    StrategyOutcome::Next => {}
                }
            }
            let media = ResolvedMedia::direct(url);
            self.record_resolved(candidate, "fallthrough", &media);
            return media;
        }
    }

    /// Resolves into the slot, releasing whatever the slot held first.
    pub fn resolve_into<'a>(&self, slot: &'a mut MediaSlot, candidate: &str) -> &'a ResolvedMedia {
        slot.clear();
        let media = self.resolve_for_playback(candidate);
        slot.replace(media)
    }

    fn record_resolved(&self, candidate: &str, strategy: &str, media: &ResolvedMedia) {
        tracing::info!(
            strategy,
            local_blob = media.is_local_blob(),
            url = media.url(),
            "media resolved"
        );
        record_event(
            &self.events,
            "media_resolved",
            json!({
                "candidate": candidate,
                "strategy": strategy,
                "url": media.url(),
                "local_blob": media.is_local_blob(),
            }),
        );
    }
}

/// HEAD first; anything other than a successful HEAD falls back to GET.
fn fetch_media(url: &str, fetcher: &dyn MediaFetcher) -> Result<FetchResponse> {
    match fetcher.fetch(url, FetchMethod::Head) {
        Ok(response) if response.is_success() => return Ok(response),
        Ok(response) => tracing::debug!(url, status = response.status, "HEAD rejected; trying GET"),
        Err(err) => tracing::debug!(url, error = %error_chain_text(&err, 256), "HEAD failed; trying GET"),
    }
    let response = fetcher.fetch(url, FetchMethod::Get)?;
    if !response.is_success() {
        bail!("GET {url} returned {}", response.status);
    }
    Ok(response)
}

fn fetch_body(url: &str, fetcher: &dyn MediaFetcher) -> Result<Vec<u8>> {
    let response = fetcher.fetch(url, FetchMethod::Get)?;
    if !response.is_success() {
        bail!("GET {url} returned {}", response.status);
    }
    match response.body {
        Some(body) => Ok(body),
        None => bail!("GET {url} returned no body"),
    }
}

fn materialize(body: &[u8], mime_type: &str, blobs: &dyn BlobStore) -> Result<ResolvedMedia> {
    let blob = blobs.create(body, mime_type)?;
    Ok(ResolvedMedia::local_blob(blob.url, blob.id))
}

fn url_path_ends_with(url: &str, suffix: &str) -> bool {
    Url::parse(url)
        .map(|parsed| parsed.path().to_ascii_lowercase().ends_with(suffix))
        .unwrap_or_else(|_| url.to_ascii_lowercase().ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use facetalk_contracts::events::EventWriter;
    use serde_json::json;

    use super::{proxy_rewrite, PlaybackArbiter, ProxyRule};
    use crate::playback::blob::BlobStore;
    use crate::playback::fetch::FetchMethod;
    use crate::session::MediaSlot;
    use crate::testing::{FakeFetcher, MemoryBlobStore};

    const S3_URL: &str = "https://d-id-talks-prod.s3.us-west-2.amazonaws.com/a/b.mp4?sig=1";

    fn arbiter(
        fetcher: &Arc<FakeFetcher>,
        blobs: &Arc<MemoryBlobStore>,
        proxy_base: Option<&str>,
    ) -> PlaybackArbiter {
        PlaybackArbiter::new(
            fetcher.clone(),
            blobs.clone(),
            proxy_base.map(str::to_string),
            EventWriter::discard("test"),
        )
    }

    #[test]
    fn proxy_rewrite_keeps_path_and_query() {
        let rules = ProxyRule::talk_storage_defaults();
        assert_eq!(
            proxy_rewrite(S3_URL, "http://localhost:3000/", &rules).as_deref(),
            Some("http://localhost:3000/s3-did/a/b.mp4?sig=1")
        );
        assert_eq!(proxy_rewrite("https://cdn.test/a.mp4", "http://p", &rules), None);
        assert_eq!(proxy_rewrite("not a url", "http://p", &rules), None);
    }

    #[test]
    fn video_is_copied_into_a_blob() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.respond(S3_URL, FetchMethod::Head, 200, "video/mp4", None);
        fetcher.respond(S3_URL, FetchMethod::Get, 200, "video/mp4", Some(b"mp4"));
        let blobs = Arc::new(MemoryBlobStore::default());

        let media = arbiter(&fetcher, &blobs, None).resolve_for_playback(S3_URL);

        assert!(media.is_local_blob());
        assert!(media.url().starts_with("memory://"));
        assert_eq!(blobs.live_count(), 1);
    }

    #[test]
    fn json_document_is_followed_once() {
        let fetcher = Arc::new(FakeFetcher::default());
        let doc = json!({"result_url": "https://cdn.test/final.mp4"}).to_string();
        fetcher.respond("https://api.test/r.json", FetchMethod::Head, 405, "", None);
        fetcher.respond(
            "https://api.test/r.json",
            FetchMethod::Get,
            200,
            "application/json",
            Some(doc.as_bytes()),
        );
        fetcher.respond("https://cdn.test/final.mp4", FetchMethod::Head, 200, "video/mp4", None);
        fetcher.respond("https://cdn.test/final.mp4", FetchMethod::Get, 200, "video/mp4", Some(b"v"));
        let blobs = Arc::new(MemoryBlobStore::default());

        let media = arbiter(&fetcher, &blobs, None).resolve_for_playback("https://api.test/r.json");

        assert!(media.is_local_blob());
        assert_eq!(fetcher.calls_for("https://cdn.test/final.mp4"), 2);
    }

    #[test]
    fn json_chains_stop_after_one_hop() {
        let fetcher = Arc::new(FakeFetcher::default());
        let first = json!({"url": "https://api.test/second.json"}).to_string();
        let second = json!({"url": "https://api.test/third.json"}).to_string();
        fetcher.respond("https://api.test/first.json", FetchMethod::Head, 200, "application/json", None);
        fetcher.respond("https://api.test/first.json", FetchMethod::Get, 200, "application/json", Some(first.as_bytes()));
        fetcher.respond("https://api.test/second.json", FetchMethod::Head, 200, "application/json", None);
        fetcher.respond("https://api.test/second.json", FetchMethod::Get, 200, "application/json", Some(second.as_bytes()));
        let blobs = Arc::new(MemoryBlobStore::default());

        let media = arbiter(&fetcher, &blobs, None).resolve_for_playback("https://api.test/first.json");

        assert_eq!(media.url(), "https://api.test/second.json");
        assert!(!media.is_local_blob());
        assert_eq!(fetcher.calls_for("https://api.test/third.json"), 0);
    }

    #[test]
    fn unreachable_storage_goes_through_proxy() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.fail(S3_URL, FetchMethod::Head, "cors");
        fetcher.fail(S3_URL, FetchMethod::Get, "cors");
        let proxied = "http://localhost:3000/s3-did/a/b.mp4?sig=1";
        fetcher.respond(proxied, FetchMethod::Get, 200, "video/mp4", Some(b"mp4"));
        let blobs = Arc::new(MemoryBlobStore::default());

        let media = arbiter(&fetcher, &blobs, Some("http://localhost:3000")).resolve_for_playback(S3_URL);

        assert!(media.is_local_blob());
        assert_eq!(blobs.created(), 1);
    }

    #[test]
    fn storage_error_status_goes_through_proxy() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.respond(S3_URL, FetchMethod::Head, 403, "application/xml", None);
        fetcher.respond(S3_URL, FetchMethod::Get, 403, "application/xml", Some(b"<Error/>"));
        let proxied = "http://localhost:3000/s3-did/a/b.mp4?sig=1";
        fetcher.respond(proxied, FetchMethod::Get, 200, "video/mp4", Some(b"mp4"));
        let blobs = Arc::new(MemoryBlobStore::default());

        let media = arbiter(&fetcher, &blobs, Some("http://localhost:3000")).resolve_for_playback(S3_URL);

        assert!(media.is_local_blob());
        assert_eq!(blobs.mime_types(), vec!["video/mp4".to_string()]);
        assert_eq!(fetcher.calls_for(proxied), 1);
    }

    #[test]
    fn reachable_non_video_plays_candidate_as_is() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.respond("https://cdn.test/stream", FetchMethod::Head, 200, "text/plain", None);
        fetcher.respond("https://cdn.test/bare", FetchMethod::Head, 200, "", None);
        let blobs = Arc::new(MemoryBlobStore::default());
        let arbiter = arbiter(&fetcher, &blobs, Some("http://p"));

        for url in ["https://cdn.test/stream", "https://cdn.test/bare"] {
            let media = arbiter.resolve_for_playback(url);
            assert_eq!(media.url(), url);
            assert!(!media.is_local_blob());
            assert_eq!(fetcher.calls_for(url), 1);
        }
        assert_eq!(blobs.created(), 0);
    }

    #[test]
    fn refusing_proxy_still_plays_proxied_url() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.fail(S3_URL, FetchMethod::Head, "cors");
        fetcher.fail(S3_URL, FetchMethod::Get, "cors");
        fetcher.respond("http://p/s3-did/a/b.mp4?sig=1", FetchMethod::Get, 502, "text/html", Some(b"bad"));
        let blobs = Arc::new(MemoryBlobStore::default());

        let media = arbiter(&fetcher, &blobs, Some("http://p")).resolve_for_playback(S3_URL);

        assert_eq!(media.url(), "http://p/s3-did/a/b.mp4?sig=1");
        assert_eq!(blobs.created(), 0);
    }

    #[test]
    fn unreachable_non_storage_url_passes_through() {
        let fetcher = Arc::new(FakeFetcher::default());
        let blobs = Arc::new(MemoryBlobStore::default());

        let media = arbiter(&fetcher, &blobs, Some("http://p")).resolve_for_playback("https://cdn.test/x.mp4");

        assert_eq!(media.url(), "https://cdn.test/x.mp4");
        assert!(!media.is_local_blob());
    }

    #[test]
    fn failed_blob_creation_uses_remote_url() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.respond("https://cdn.test/v.mp4", FetchMethod::Head, 200, "video/mp4", None);
        fetcher.respond("https://cdn.test/v.mp4", FetchMethod::Get, 200, "video/mp4", Some(b"v"));
        let blobs = Arc::new(MemoryBlobStore::default());
        blobs.fail_creates(true);

        let media = arbiter(&fetcher, &blobs, None).resolve_for_playback("https://cdn.test/v.mp4");

        assert_eq!(media.url(), "https://cdn.test/v.mp4");
        assert!(!media.is_local_blob());
    }

    #[test]
    fn resolving_into_a_slot_releases_the_previous_blob() {
        let fetcher = Arc::new(FakeFetcher::default());
        for url in ["https://cdn.test/1.mp4", "https://cdn.test/2.mp4"] {
            fetcher.respond(url, FetchMethod::Head, 200, "video/mp4", None);
            fetcher.respond(url, FetchMethod::Get, 200, "video/mp4", Some(b"v"));
        }
        let blobs = Arc::new(MemoryBlobStore::default());
        let arbiter = arbiter(&fetcher, &blobs, None);
        let mut slot = MediaSlot::new(blobs.clone(), EventWriter::discard("test"));

        let first = arbiter.resolve_into(&mut slot, "https://cdn.test/1.mp4").blob().cloned();
        arbiter.resolve_into(&mut slot, "https://cdn.test/2.mp4");

        assert_eq!(blobs.live_count(), 1);
        assert_eq!(blobs.released(), vec![first.unwrap()]);
    }
}
