use std::time::Duration;

use facetalk_contracts::chat::VoiceSelector;

use crate::non_empty_env;
use crate::poller::PollSettings;

pub const DEFAULT_DID_API_BASE: &str = "https://api.d-id.com";

const DEFAULT_POLL_TIMEOUT_S: f64 = 120.0;
const DEFAULT_POLL_INTERVAL_S: f64 = 3.0;
const DEFAULT_REQUEST_TIMEOUT_S: f64 = 30.0;

/// Process configuration read from the environment.
///
/// | variable | meaning |
/// |---|---|
/// | `DID_API_BASE` | talks API base, default `https://api.d-id.com` |
/// | `DID_API_KEY` / `API_AUTHORIZATION` | talks API key |
/// | `CHAT_API_BASE` | chat backend base URL |
/// | `CHAT_API_TOKEN` / `API_AUTHORIZATION` | chat backend bearer token |
/// | `FACETALK_PROXY_BASE` | same-origin proxy used when direct media access fails |
/// | `FACETALK_POLL_TIMEOUT` | seconds, clamped to 1..=600 |
/// | `FACETALK_POLL_INTERVAL` | seconds, clamped to 0.2..=30 |
/// | `FACETALK_REQUEST_TIMEOUT` | per-request seconds, clamped to 1..=300 |
/// | `FACETALK_FALLBACK_VOICE_MESSAGE` | voice for unknown genders when a sent message is voiced |
/// | `FACETALK_FALLBACK_VOICE_BOT` | voice for unknown genders when an appended bot line is voiced |
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub did_api_base: String,
    pub did_api_key: Option<String>,
    pub chat_api_base: Option<String>,
    pub chat_api_token: Option<String>,
    pub proxy_base: Option<String>,
    pub poll_timeout_s: f64,
    pub poll_interval_s: f64,
    pub request_timeout_s: f64,
    pub message_fallback_voice: Option<String>,
    pub bot_fallback_voice: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            did_api_base: get("DID_API_BASE")
                .map(|value| trim_base(&value))
                .unwrap_or_else(|| DEFAULT_DID_API_BASE.to_string()),
            did_api_key: get("DID_API_KEY").or_else(|| get("API_AUTHORIZATION")),
            chat_api_base: get("CHAT_API_BASE").map(|value| trim_base(&value)),
            chat_api_token: get("CHAT_API_TOKEN").or_else(|| get("API_AUTHORIZATION")),
            proxy_base: get("FACETALK_PROXY_BASE").map(|value| trim_base(&value)),
            poll_timeout_s: seconds(
                get("FACETALK_POLL_TIMEOUT"),
                DEFAULT_POLL_TIMEOUT_S,
                1.0,
                600.0,
            ),
            poll_interval_s: seconds(
                get("FACETALK_POLL_INTERVAL"),
                DEFAULT_POLL_INTERVAL_S,
                0.2,
                30.0,
            ),
            request_timeout_s: seconds(
                get("FACETALK_REQUEST_TIMEOUT"),
                DEFAULT_REQUEST_TIMEOUT_S,
                1.0,
                300.0,
            ),
            message_fallback_voice: get("FACETALK_FALLBACK_VOICE_MESSAGE"),
            bot_fallback_voice: get("FACETALK_FALLBACK_VOICE_BOT"),
        }
    }

    /// Applies per-command flags with the same bounds as the environment.
    pub fn with_poll_overrides(mut self, timeout_s: Option<f64>, interval_s: Option<f64>) -> Self {
        if let Some(value) = timeout_s.filter(|value| value.is_finite()) {
            self.poll_timeout_s = value.clamp(1.0, 600.0);
        }
        if let Some(value) = interval_s.filter(|value| value.is_finite()) {
            self.poll_interval_s = value.clamp(0.2, 30.0);
        }
        self
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_secs_f64(self.poll_timeout_s),
            Duration::from_secs_f64(self.poll_interval_s),
        )
    }

    /// Default voices with any configured fallback overrides applied.
    pub fn voice_selector(&self) -> VoiceSelector {
        let mut selector = VoiceSelector::default();
        if let Some(voice) = &self.message_fallback_voice {
            selector.message_sent_fallback = voice.clone();
        }
        if let Some(voice) = &self.bot_fallback_voice {
            selector.bot_appended_fallback = voice.clone();
        }
        selector
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_s)
    }
}

fn trim_base(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

fn seconds(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use facetalk_contracts::chat::{ReplyTrigger, VoiceSelector};

    use super::{Settings, DEFAULT_DID_API_BASE};

    fn settings_from(pairs: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let settings = Settings::default();
        assert_eq!(settings.did_api_base, DEFAULT_DID_API_BASE);
        assert_eq!(settings.did_api_key, None);
        assert_eq!(settings.chat_api_base, None);
        assert_eq!(settings.poll_timeout_s, 120.0);
        assert_eq!(settings.poll_interval_s, 3.0);
        assert_eq!(settings.poll_settings().timeout, Duration::from_secs(120));
    }

    #[test]
    fn bases_lose_trailing_slash_and_keys_fall_back() {
        let settings = settings_from(&[
            ("DID_API_BASE", " https://proxy.test/d-id/ "),
            ("API_AUTHORIZATION", "shared-token"),
            ("CHAT_API_BASE", "https://chat.test/"),
            ("FACETALK_PROXY_BASE", "http://localhost:3000/"),
        ]);
        assert_eq!(settings.did_api_base, "https://proxy.test/d-id");
        assert_eq!(settings.did_api_key.as_deref(), Some("shared-token"));
        assert_eq!(settings.chat_api_token.as_deref(), Some("shared-token"));
        assert_eq!(settings.chat_api_base.as_deref(), Some("https://chat.test"));
        assert_eq!(settings.proxy_base.as_deref(), Some("http://localhost:3000"));
    }

    #[test]
    fn poll_values_are_clamped_and_garbage_ignored() {
        let settings = settings_from(&[
            ("FACETALK_POLL_TIMEOUT", "9000"),
            ("FACETALK_POLL_INTERVAL", "0.01"),
            ("FACETALK_REQUEST_TIMEOUT", "soon"),
        ]);
        assert_eq!(settings.poll_timeout_s, 600.0);
        assert_eq!(settings.poll_interval_s, 0.2);
        assert_eq!(settings.request_timeout_s, 30.0);
    }

    #[test]
    fn fallback_voices_override_only_what_is_set() {
        assert_eq!(Settings::default().voice_selector(), VoiceSelector::default());

        let selector = settings_from(&[("FACETALK_FALLBACK_VOICE_BOT", " zh-TW-HsiaoChenNeural ")])
            .voice_selector();
        let voice = |trigger| selector.voice_for(Some("other"), trigger).voice_id;
        assert_eq!(voice(ReplyTrigger::BotMessageAppended).as_deref(), Some("zh-TW-HsiaoChenNeural"));
        assert_eq!(
            voice(ReplyTrigger::MessageSent),
            Some(VoiceSelector::default().message_sent_fallback)
        );
    }

    #[test]
    fn flag_overrides_use_the_same_bounds() {
        let settings = Settings::default().with_poll_overrides(Some(6.0), Some(0.0));
        assert_eq!(settings.poll_timeout_s, 6.0);
        assert_eq!(settings.poll_interval_s, 0.2);
        let untouched = Settings::default().with_poll_overrides(None, Some(f64::NAN));
        assert_eq!(untouched.poll_interval_s, 3.0);
    }
}
