use crate::media::VoiceProvider;

/// What caused a talk to be generated.
///
/// The two triggers historically used different fallback voices for unknown
/// genders. Both are kept configurable instead of being merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTrigger {
    /// The user sent a message and the answer is being voiced directly.
    MessageSent,
    /// A bot message landed in the transcript and is voiced afterwards.
    BotMessageAppended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSelector {
    pub provider_kind: String,
    pub male_voice: String,
    pub female_voice: String,
    pub message_sent_fallback: String,
    pub bot_appended_fallback: String,
}

impl Default for VoiceSelector {
    fn default() -> Self {
        Self {
            provider_kind: "microsoft".to_string(),
            male_voice: "zh-TW-YunJheNeural".to_string(),
            female_voice: "zh-CN-Xiaoxiao:DragonHDFlashLatestNeural".to_string(),
            message_sent_fallback: "zh-TW-HsiaoChenNeural".to_string(),
            bot_appended_fallback: "zh-TW-HsiaoChenNZeural".to_string(),
        }
    }
}

impl VoiceSelector {
    /// Voice for a persona gender. A missing gender counts as male.
    pub fn voice_for(&self, gender: Option<&str>, trigger: ReplyTrigger) -> VoiceProvider {
        let gender = gender
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("male")
            .to_ascii_lowercase();
        let voice_id = match gender.as_str() {
            "male" => &self.male_voice,
            "female" => &self.female_voice,
            _ => match trigger {
                ReplyTrigger::MessageSent => &self.message_sent_fallback,
                ReplyTrigger::BotMessageAppended => &self.bot_appended_fallback,
            },
        };
        VoiceProvider::new(self.provider_kind.clone(), Some(voice_id.clone()))
    }
}
