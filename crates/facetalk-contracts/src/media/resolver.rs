//! Picks the one playable video URL out of a provider payload.
//!
//! Providers disagree on where the finished video lives (`result_url`,
//! `result.url`, `output[0].url`, `urls`, ...), so the resolver collects every
//! absolute http(s) URL it can reach and then ranks them:
//!
//! 1. a URL whose path ends in a known video extension
//! 2. a URL stored under a `result_url`-like field (or whose text says so)
//! 3. the first URL found
//!
//! Collection order is stable: well-known fields first, then known containers,
//! then a depth-bounded walk of the whole payload.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use url::Url;

pub const VIDEO_EXTENSIONS: [&str; 4] = [".mp4", ".webm", ".ogg", ".mov"];
pub const MAX_SCAN_DEPTH: usize = 6;

const DIRECT_FIELDS: [&str; 6] = [
    "result_url",
    "resultUrl",
    "videoUrl",
    "video_url",
    "url",
    "output_url",
];
const CONTAINER_FIELDS: [&str; 5] = ["result", "output", "data", "urls", "files"];
const CONTAINER_URL_FIELDS: [&str; 5] = ["result_url", "resultUrl", "url", "videoUrl", "location"];
const ITEM_URL_FIELDS: [&str; 3] = ["url", "result_url", "videoUrl"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCandidate {
    pub url: String,
    /// True when any occurrence sat under a `result_url`-like field.
    pub result_field: bool,
}

#[derive(Debug, Default)]
struct CandidateSet {
    urls: IndexMap<String, bool>,
}

impl CandidateSet {
    fn add(&mut self, raw: &str, field: Option<&str>) {
        let Some(url) = absolute_http_url(raw) else {
            return;
        };
        let result_field = field.map(is_result_url_name).unwrap_or(false);
        let entry = self.urls.entry(url).or_insert(false);
        *entry |= result_field;
    }

    fn add_value(&mut self, value: Option<&Value>, field: Option<&str>) {
        if let Some(Value::String(raw)) = value {
            self.add(raw, field);
        }
    }

    fn into_candidates(self) -> Vec<UrlCandidate> {
        self.urls
            .into_iter()
            .map(|(url, result_field)| UrlCandidate { url, result_field })
            .collect()
    }
}

/// Best playable URL in `payload`, or `None` when it holds no absolute http(s) URL.
pub fn resolve_result_url(payload: &Value) -> Option<String> {
    pick_best(&collect_url_candidates(payload))
}

pub fn collect_url_candidates(payload: &Value) -> Vec<UrlCandidate> {
    let mut set = CandidateSet::default();

    match payload {
        Value::String(raw) => set.add(raw, None),
        Value::Object(body) => {
            for field in DIRECT_FIELDS {
                set.add_value(body.get(field), Some(field));
            }
            for field in CONTAINER_FIELDS {
                if let Some(container) = body.get(field) {
                    scan_container(&mut set, field, container);
                }
            }
        }
        _ => {}
    }

    let mut visited = HashSet::new();
    scan_tree(&mut set, payload, None, 0, &mut visited);
    set.into_candidates()
}

pub fn pick_best(candidates: &[UrlCandidate]) -> Option<String> {
    candidates
        .iter()
        .find(|candidate| has_video_extension(&candidate.url))
        .or_else(|| {
            candidates
                .iter()
                .find(|candidate| candidate.result_field || is_result_url_name(&candidate.url))
        })
        .or_else(|| candidates.first())
        .map(|candidate| candidate.url.clone())
}

pub fn has_video_extension(raw: &str) -> bool {
    let path = Url::parse(raw)
        .map(|url| url.path().to_ascii_lowercase())
        .unwrap_or_else(|_| raw.to_ascii_lowercase());
    VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Trimmed `raw` when it parses as an absolute http or https URL.
pub fn absolute_http_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(trimmed.to_string())
}

fn is_result_url_name(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered.match_indices("result").any(|(idx, _)| {
        let rest = &lowered[idx + "result".len()..];
        let rest = rest
            .strip_prefix('_')
            .or_else(|| rest.strip_prefix('-'))
            .unwrap_or(rest);
        rest.starts_with("url")
    })
}

fn scan_container(set: &mut CandidateSet, field: &str, container: &Value) {
    match container {
        Value::String(raw) => set.add(raw, Some(field)),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(raw) => set.add(raw, Some(field)),
                    Value::Object(obj) => {
                        if let Some((name, value)) = first_string_field(obj, &ITEM_URL_FIELDS) {
                            set.add(value, Some(name));
                        }
                    }
                    _ => {}
                }
            }
        }
        Value::Object(obj) => {
            if let Some((name, value)) = first_string_field(obj, &CONTAINER_URL_FIELDS) {
                set.add(value, Some(name));
            }
            for (key, value) in obj {
                match value {
                    Value::String(raw) => set.add(raw, Some(key)),
                    Value::Array(items) => {
                        for item in items {
                            set.add_value(Some(item), Some(key));
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn first_string_field<'a>(
    obj: &'a Map<String, Value>,
    fields: &[&'static str],
) -> Option<(&'static str, &'a str)> {
    fields.iter().find_map(|field| {
        obj.get(*field)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .map(|value| (*field, value))
    })
}

fn scan_tree<'a>(
    set: &mut CandidateSet,
    value: &'a Value,
    field: Option<&str>,
    depth: usize,
    visited: &mut HashSet<*const Value>,
) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    match value {
        Value::String(raw) => set.add(raw, field),
        Value::Array(items) => {
            if !visited.insert(value as *const Value) {
                return;
            }
            for item in items {
                scan_tree(set, item, field, depth + 1, visited);
            }
        }
        Value::Object(obj) => {
            if !visited.insert(value as *const Value) {
                return;
            }
            for (key, child) in obj {
                match child {
                    Value::String(raw) => set.add(raw, Some(key)),
                    _ => scan_tree(set, child, Some(key), depth + 1, visited),
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{collect_url_candidates, has_video_extension, resolve_result_url};

    #[test]
    fn nested_result_url_from_done_payload() {
        let payload = json!({"status": "done", "result": {"url": "https://host/a.mp4"}});
        assert_eq!(
            resolve_result_url(&payload).as_deref(),
            Some("https://host/a.mp4")
        );
    }

    #[test]
    fn each_alias_yields_its_url() {
        let url = "https://cdn.test/talks/abc";
        let shapes: Vec<Value> = vec![
            json!({"result_url": url}),
            json!({"resultUrl": url}),
            json!({"videoUrl": url}),
            json!({"video_url": url}),
            json!({"url": url}),
            json!({"output_url": url}),
            json!({"result": {"url": url}}),
            json!({"result": {"location": url}}),
            json!({"output": [{"url": url}]}),
            json!({"urls": [url]}),
            json!({"files": {"video": url}}),
            json!({"data": url}),
            json!({"deep": {"er": {"still": [{"link": url}]}}}),
        ];
        for shape in shapes {
            assert_eq!(
                resolve_result_url(&shape).as_deref(),
                Some(url),
                "shape {shape}"
            );
        }
    }

    #[test]
    fn video_extension_beats_plain_field() {
        let payload = json!({
            "url": "https://api.test/talks/abc",
            "result": {"files": ["https://cdn.test/out/clip.MP4?sig=1"]},
        });
        assert_eq!(
            resolve_result_url(&payload).as_deref(),
            Some("https://cdn.test/out/clip.MP4?sig=1")
        );
    }

    #[test]
    fn result_url_field_beats_first_candidate() {
        let payload = json!({
            "source_url": "https://cdn.test/face.png",
            "meta": {"result_url": "https://cdn.test/out/abc"},
        });
        assert_eq!(
            resolve_result_url(&payload).as_deref(),
            Some("https://cdn.test/out/abc")
        );
    }

    #[test]
    fn first_candidate_wins_without_other_signals() {
        let payload = json!({
            "source_url": "https://cdn.test/face.png",
            "audio_url": "https://cdn.test/voice.wav",
        });
        assert_eq!(
            resolve_result_url(&payload).as_deref(),
            Some("https://cdn.test/face.png")
        );
    }

    #[test]
    fn non_http_and_relative_strings_are_ignored() {
        let payload = json!({
            "url": "/static/video.mp4",
            "result_url": "ftp://files.test/a.mp4",
            "note": "see https://",
        });
        assert_eq!(resolve_result_url(&payload), None);
        assert_eq!(resolve_result_url(&json!({})), None);
        assert_eq!(resolve_result_url(&Value::Null), None);
    }

    #[test]
    fn scan_stops_past_depth_limit() {
        let mut payload = json!("https://cdn.test/buried.mp4");
        for _ in 0..10 {
            payload = json!([payload]);
        }
        assert_eq!(resolve_result_url(&json!({"x": payload})), None);

        let shallow = json!({"a": {"b": {"c": "https://cdn.test/shallow.mp4"}}});
        assert_eq!(
            resolve_result_url(&shallow).as_deref(),
            Some("https://cdn.test/shallow.mp4")
        );
    }

    #[test]
    fn candidates_are_deduplicated_in_insertion_order() {
        let payload = json!({
            "url": "https://a.test/1",
            "result": {"url": "https://a.test/1", "backup": "https://b.test/2"},
        });
        let urls: Vec<String> = collect_url_candidates(&payload)
            .into_iter()
            .map(|candidate| candidate.url)
            .collect();
        assert_eq!(urls, vec!["https://a.test/1", "https://b.test/2"]);
    }

    #[test]
    fn extension_check_ignores_query_string() {
        assert!(has_video_extension("https://x.test/a.webm?token=1"));
        assert!(!has_video_extension("https://x.test/a.mp4.json"));
    }
}
