use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::AUTHORIZATION;
use serde_json::Value;

use crate::settings::Settings;
use crate::{response_json_or_error, truncate_text};

/// Bot line shown when the backend could not answer.
pub const ASK_FAILED_TEXT: &str = "❌ 錯誤：無法獲取回應";
/// Bot line shown when a recording could not be transcribed.
pub const TRANSCRIBE_FAILED_TEXT: &str = "❌ 錯誤：無法辨識音訊";

const FALLBACK_QUESTIONS: [&str; 3] = [
    "這個疾病的症狀有哪些？",
    "需要注意什麼飲食禁忌？",
    "藥物的副作用是什麼？",
];
const TRANSCRIPT_FIELDS: [&str; 3] = ["transcription", "text", "transcript"];

/// Suggested questions for a specialty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedQuestions {
    pub questions: Vec<String>,
    pub random_question: String,
}

impl SeedQuestions {
    pub fn fallback() -> Self {
        let questions: Vec<String> = FALLBACK_QUESTIONS.iter().map(|q| q.to_string()).collect();
        Self {
            random_question: questions[0].clone(),
            questions,
        }
    }

    /// Usable seed data from `GET /api/chat`, or `None` when the backend did
    /// not report success with at least one question.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if payload.get("success").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        let questions: Vec<String> = payload
            .get("questions")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();
        let first = questions.first()?.clone();
        let random_question = payload
            .get("random_question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .unwrap_or(first);
        Some(Self {
            questions,
            random_question,
        })
    }

    /// Another suggestion, different from `current` when there is one.
    pub fn next_after(&self, current: &str, pick: usize) -> Option<&str> {
        let others: Vec<&str> = self
            .questions
            .iter()
            .map(String::as_str)
            .filter(|q| q.trim() != current.trim())
            .collect();
        if others.is_empty() {
            return None;
        }
        Some(others[pick % others.len()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskRequest {
    pub question: String,
    pub role: String,
    pub gender: String,
    pub model_type: String,
    pub response_with_audio: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAnswer {
    pub answer: String,
    pub audio_base64: Option<String>,
    pub video_url: Option<String>,
}

impl ChatAnswer {
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let answer = payload
            .get("answer")
            .and_then(Value::as_str)
            .with_context(|| {
                format!(
                    "chat answer missing `answer`: {}",
                    truncate_text(&payload.to_string(), 256)
                )
            })?;
        Ok(Self {
            answer: answer.to_string(),
            audio_base64: non_empty_str(payload.get("audio_base64")),
            video_url: non_empty_str(payload.get("video_url")),
        })
    }

    pub fn audio_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.audio_base64
            .as_deref()
            .map(|encoded| {
                BASE64
                    .decode(encoded.trim())
                    .context("chat answer audio is not valid base64")
            })
            .transpose()
    }
}

/// Client for the chat service that supplies answers and transcripts.
pub struct ChatBackend {
    api_base: String,
    token: Option<String>,
    http: HttpClient,
}

impl ChatBackend {
    /// `None` when no chat backend is configured.
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        let Some(api_base) = settings.chat_api_base.clone() else {
            return Ok(None);
        };
        let http = HttpClient::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build chat HTTP client")?;
        Ok(Some(Self {
            api_base,
            token: settings.chat_api_token.clone(),
            http,
        }))
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    pub fn initial_data(&self, model_type: &str) -> Result<Option<SeedQuestions>> {
        let endpoint = format!("{}/api/chat", self.api_base);
        let response = self
            .with_auth(self.http.get(&endpoint))
            .query(&[("model_type", model_type)])
            .send()
            .with_context(|| format!("chat seed request failed ({endpoint})"))?;
        let payload = response_json_or_error("Chat seed", response)?;
        Ok(SeedQuestions::from_payload(&payload))
    }

    pub fn ask(&self, request: &AskRequest) -> Result<ChatAnswer> {
        let endpoint = format!("{}/ask", self.api_base);
        let form = MultipartForm::new()
            .text("question", request.question.clone())
            .text("role", request.role.clone())
            .text("gender", request.gender.clone())
            .text("model_type", request.model_type.clone())
            .text("responseWithAudio", request.response_with_audio.to_string());
        let response = self
            .with_auth(self.http.post(&endpoint))
            .multipart(form)
            .send()
            .with_context(|| format!("chat ask request failed ({endpoint})"))?;
        let payload = response_json_or_error("Chat ask", response)?;
        ChatAnswer::from_payload(&payload)
    }

    pub fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        let endpoint = format!("{}/upload", self.api_base);
        let part = MultipartPart::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .context("invalid recording mime type")?;
        let response = self
            .with_auth(self.http.post(&endpoint))
            .multipart(MultipartForm::new().part("audio", part))
            .send()
            .with_context(|| format!("audio upload failed ({endpoint})"))?;
        let status = response.status();
        let body = response
            .text()
            .context("audio upload response body read failed")?;
        if !status.is_success() {
            anyhow::bail!(
                "Audio upload request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        Ok(parse_transcript(&body))
    }
}

/// The upload endpoint answers with a bare string, a JSON string, or an object
/// carrying the text.
pub fn parse_transcript(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::String(text)) => text.trim().to_string(),
        Ok(Value::Object(obj)) => TRANSCRIPT_FIELDS
            .iter()
            .find_map(|field| obj.get(*field).and_then(Value::as_str))
            .map(|text| text.trim().to_string())
            .unwrap_or_default(),
        _ => body.trim().to_string(),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_transcript, ChatAnswer, SeedQuestions};

    #[test]
    fn seed_questions_need_success_and_content() {
        assert_eq!(SeedQuestions::from_payload(&json!({"questions": ["a"]})), None);
        assert_eq!(
            SeedQuestions::from_payload(&json!({"success": true, "questions": []})),
            None
        );
        let seeds = SeedQuestions::from_payload(&json!({
            "success": true,
            "questions": ["a", " ", "b"],
        }))
        .unwrap();
        assert_eq!(seeds.questions, vec!["a", "b"]);
        assert_eq!(seeds.random_question, "a");
    }

    #[test]
    fn next_question_skips_the_current_one() {
        let seeds = SeedQuestions::fallback();
        let current = seeds.random_question.clone();
        for pick in 0..5 {
            assert_ne!(seeds.next_after(&current, pick), Some(current.as_str()));
        }
        let single = SeedQuestions {
            questions: vec!["only".to_string()],
            random_question: "only".to_string(),
        };
        assert_eq!(single.next_after("only", 0), None);
    }

    #[test]
    fn answers_carry_optional_media() -> anyhow::Result<()> {
        let answer = ChatAnswer::from_payload(&json!({
            "answer": "多喝水",
            "audio_base64": "SUQz",
            "video_url": "",
        }))?;
        assert_eq!(answer.answer, "多喝水");
        assert_eq!(answer.video_url, None);
        assert_eq!(answer.audio_bytes()?, Some(b"ID3".to_vec()));
        assert!(ChatAnswer::from_payload(&json!({"error": "boom"})).is_err());
        Ok(())
    }

    #[test]
    fn transcripts_accept_every_body_shape() {
        assert_eq!(parse_transcript("\"你好\""), "你好");
        assert_eq!(parse_transcript("{\"transcription\": \" hi \"}"), "hi");
        assert_eq!(parse_transcript("plain words\n"), "plain words");
        assert_eq!(parse_transcript("{}"), "");
    }
}
