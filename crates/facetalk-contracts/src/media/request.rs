use std::fmt;

use serde_json::{json, Map, Value};

/// What the talking head says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Text the provider synthesizes with the configured voice.
    Text { input: String },
    /// Pre-recorded audio the provider lip-syncs to.
    Audio { audio_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceProvider {
    pub kind: String,
    pub voice_id: Option<String>,
}

impl VoiceProvider {
    pub fn new(kind: impl Into<String>, voice_id: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            voice_id,
        }
    }
}

/// The face to animate: an already hosted image, or raw bytes that must be
/// uploaded first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceImage {
    Url(String),
    Binary {
        bytes: Vec<u8>,
        file_name: String,
        mime_type: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TalkConfig {
    pub fluent: bool,
    pub pad_audio: f64,
    pub stitch: bool,
}

impl Default for TalkConfig {
    fn default() -> Self {
        Self {
            fluent: true,
            pad_audio: 0.0,
            stitch: true,
        }
    }
}

/// One talk submission. Fields are read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    script: ScriptSource,
    source_image: SourceImage,
    voice: Option<VoiceProvider>,
    config: TalkConfig,
}

impl GenerationRequest {
    pub fn text(input: impl Into<String>, source_image: SourceImage, voice: VoiceProvider) -> Self {
        Self {
            script: ScriptSource::Text {
                input: input.into(),
            },
            source_image,
            voice: Some(voice),
            config: TalkConfig::default(),
        }
    }

    pub fn audio(audio_url: impl Into<String>, source_image: SourceImage) -> Self {
        Self {
            script: ScriptSource::Audio {
                audio_url: audio_url.into(),
            },
            source_image,
            voice: None,
            config: TalkConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TalkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn script(&self) -> &ScriptSource {
        &self.script
    }

    pub fn source_image(&self) -> &SourceImage {
        &self.source_image
    }

    pub fn voice(&self) -> Option<&VoiceProvider> {
        self.voice.as_ref()
    }

    /// Submission body for the talks endpoint, with `source_url` already
    /// resolved (uploaded or passed through).
    pub fn to_payload(&self, source_url: &str) -> Value {
        let script = match &self.script {
            ScriptSource::Text { input } => {
                let mut script = Map::new();
                script.insert("type".to_string(), json!("text"));
                script.insert("input".to_string(), json!(input));
                if let Some(voice) = &self.voice {
                    script.insert(
                        "provider".to_string(),
                        json!({"type": voice.kind, "voice_id": voice.voice_id}),
                    );
                }
                Value::Object(script)
            }
            ScriptSource::Audio { audio_url } => json!({
                "type": "audio",
                "audio_url": audio_url,
            }),
        };
        json!({
            "script": script,
            "source_url": source_url,
            "config": {
                "fluent": self.config.fluent,
                "pad_audio": self.config.pad_audio,
                "stitch": self.config.stitch,
            }
        })
    }
}

/// Correlation key for one submitted talk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    id: String,
}

impl JobHandle {
    pub fn new(id: impl AsRef<str>) -> Option<Self> {
        let trimmed = id.as_ref().trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            id: trimmed.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
