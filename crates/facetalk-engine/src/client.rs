use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use facetalk_contracts::errors::MediaError;
use facetalk_contracts::events::EventWriter;
use facetalk_contracts::media::{state_label, GenerationRequest, JobHandle, SourceImage, SUCCESS_STATES};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::{AUTHORIZATION, LOCATION};
use serde_json::{json, Value};

use crate::settings::Settings;
use crate::{error_chain_text, record_event, response_json_or_error, truncate_text};

const ID_FIELDS: [&str; 3] = ["id", "job_id", "uuid"];
const INLINE_RESULT_FIELDS: [&str; 4] = ["result", "output", "videoUrl", "urls"];
const UPLOAD_URL_FIELDS: [&str; 3] = ["url", "result_url", "resultUrl"];

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitResponse {
    pub body: Value,
    pub location: Option<String>,
}

/// Transport to a talks provider.
pub trait TalkApi: Send + Sync {
    fn create_talk(&self, payload: &Value) -> Result<SubmitResponse>;

    /// Reads one status payload. `timeout` bounds this request only.
    fn talk_status(&self, talk_id: &str, timeout: Duration) -> Result<Value>;

    /// Hosts an image and returns its URL, when the provider hands one back.
    fn upload_image(&self, bytes: &[u8], file_name: &str, mime_type: &str)
        -> Result<Option<String>>;
}

pub struct HttpTalkApi {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl HttpTalkApi {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build talks HTTP client")?;
        Ok(Self {
            api_base: settings.did_api_base.clone(),
            api_key: settings.did_api_key.clone(),
            http,
        })
    }

    fn talks_endpoint(&self) -> String {
        format!("{}/talks", self.api_base)
    }

    fn images_endpoint(&self) -> String {
        format!("{}/images", self.api_base)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(AUTHORIZATION, authorization_header(key)),
            None => builder,
        }
    }
}

impl TalkApi for HttpTalkApi {
    fn create_talk(&self, payload: &Value) -> Result<SubmitResponse> {
        let endpoint = self.talks_endpoint();
        let response = self
            .with_auth(self.http.post(&endpoint))
            .json(payload)
            .send()
            .with_context(|| format!("talk creation request failed ({endpoint})"))?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response_json_or_error("Talk creation", response)?;
        Ok(SubmitResponse { body, location })
    }

    fn talk_status(&self, talk_id: &str, timeout: Duration) -> Result<Value> {
        let endpoint = format!("{}/{}", self.talks_endpoint(), talk_id);
        let response = self
            .with_auth(self.http.get(&endpoint))
            .timeout(timeout)
            .send()
            .with_context(|| format!("talk status request failed ({endpoint})"))?;
        response_json_or_error("Talk status", response)
    }

    fn upload_image(
        &self,
        bytes: &[u8],
        file_name: &str,
        mime_type: &str,
    ) -> Result<Option<String>> {
        let endpoint = self.images_endpoint();
        let part = MultipartPart::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .with_context(|| format!("invalid image mime type {mime_type}"))?;
        let form = MultipartForm::new().part("image", part);
        let response = self
            .with_auth(self.http.post(&endpoint))
            .multipart(form)
            .send()
            .with_context(|| format!("image upload failed ({endpoint})"))?;
        let body = response_json_or_error("Image upload", response)?;
        Ok(UPLOAD_URL_FIELDS.iter().find_map(|field| {
            body.get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        }))
    }
}

/// `Basic` for `user:secret` style keys, `Bearer` otherwise.
pub fn authorization_header(key: &str) -> String {
    let key = key.trim();
    if key.contains(':') {
        return format!("Basic {}", BASE64.encode(key));
    }
    format!("Bearer {key}")
}

/// What the provider answered to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// A job to poll.
    Pending(JobHandle),
    /// The submission response already holds the final result.
    Completed(Value),
}

/// Job id from the response body, else from the `Location` header.
pub fn extract_job_id(body: &Value, location: Option<&str>) -> Option<JobHandle> {
    let from_body = ID_FIELDS
        .iter()
        .find_map(|field| id_value(body.get(field)))
        .or_else(|| id_value(body.get("result").and_then(|result| result.get("id"))));
    if let Some(id) = from_body {
        return JobHandle::new(id);
    }
    let location = location?;
    let (_, rest) = location.split_once("/talks/")?;
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    JobHandle::new(rest.trim_end_matches('/'))
}

fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(raw) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// The body already carries a finished result, so there is nothing to poll.
pub fn has_inline_result(body: &Value) -> bool {
    let has_field = INLINE_RESULT_FIELDS
        .iter()
        .any(|field| body.get(field).map(|value| !value.is_null()).unwrap_or(false));
    let finished = state_label(body)
        .map(|state| SUCCESS_STATES.contains(&state.as_str()))
        .unwrap_or(false);
    has_field || finished
}

/// Submits talks, uploading binary source images first.
#[derive(Clone)]
pub struct JobClient {
    api: Arc<dyn TalkApi>,
    events: EventWriter,
}

impl JobClient {
    pub fn new(api: Arc<dyn TalkApi>, events: EventWriter) -> Self {
        Self { api, events }
    }

    pub fn submit(&self, request: &GenerationRequest) -> Result<Submission, MediaError> {
        let source_url = self.source_url_for(request.source_image());
        let payload = request.to_payload(&source_url);
        let response = self.api.create_talk(&payload).map_err(|err| {
            MediaError::Submission(error_chain_text(&err, 512))
        })?;

        if let Some(handle) = extract_job_id(&response.body, response.location.as_deref()) {
            tracing::info!(talk_id = handle.id(), "talk submitted");
            record_event(
                &self.events,
                "talk_submitted",
                json!({"talk_id": handle.id(), "inline": false}),
            );
            return Ok(Submission::Pending(handle));
        }
        if has_inline_result(&response.body) {
            tracing::info!("talk submission returned an inline result");
            record_event(&self.events, "talk_submitted", json!({"inline": true}));
            return Ok(Submission::Completed(response.body));
        }
        Err(MediaError::Submission(format!(
            "provider response carried no talk id: {}",
            truncate_text(&response.body.to_string(), 256)
        )))
    }

    fn source_url_for(&self, image: &SourceImage) -> String {
        let (bytes, file_name, mime_type) = match image {
            SourceImage::Url(url) => return url.clone(),
            SourceImage::Binary {
                bytes,
                file_name,
                mime_type,
            } => (bytes, file_name, mime_type),
        };
        match self.api.upload_image(bytes, file_name, mime_type) {
            Ok(Some(url)) => return url,
            Ok(None) => {
                tracing::warn!(file_name = %file_name, "image upload returned no URL; submitting inline image")
            }
            Err(err) => tracing::warn!(
                file_name = %file_name,
                error = %error_chain_text(&err, 256),
                "image upload failed; submitting inline image"
            ),
        }
        format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
    }
}
