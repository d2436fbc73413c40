use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;

use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMethod {
    Head,
    Get,
}

impl FetchMethod {
    pub fn label(self) -> &'static str {
        match self {
            FetchMethod::Head => "HEAD",
            FetchMethod::Get => "GET",
        }
    }
}

/// What came back from a fetch. `body` is only filled for `GET`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Lower-cased media type without parameters, or empty when absent.
    pub fn media_type(&self) -> String {
        self.content_type
            .as_deref()
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn is_json(&self) -> bool {
        let media_type = self.media_type();
        media_type == "application/json" || media_type.ends_with("+json")
    }
}

/// Network access used to inspect candidate media URLs.
pub trait MediaFetcher: Send + Sync {
    fn fetch(&self, url: &str, method: FetchMethod) -> Result<FetchResponse>;
}

pub struct HttpMediaFetcher {
    http: HttpClient,
}

impl HttpMediaFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build media HTTP client")?;
        Ok(Self { http })
    }
}

impl MediaFetcher for HttpMediaFetcher {
    fn fetch(&self, url: &str, method: FetchMethod) -> Result<FetchResponse> {
        let builder = match method {
            FetchMethod::Head => self.http.head(url),
            FetchMethod::Get => self.http.get(url),
        };
        let response = builder
            .send()
            .with_context(|| format!("media {} failed ({url})", method.label()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = match method {
            FetchMethod::Head => None,
            FetchMethod::Get => Some(
                response
                    .bytes()
                    .with_context(|| format!("media body read failed ({url})"))?
                    .to_vec(),
            ),
        };
        Ok(FetchResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::FetchResponse;

    #[test]
    fn media_type_drops_parameters() {
        let response = FetchResponse {
            status: 200,
            content_type: Some("Application/JSON; charset=utf-8".to_string()),
            body: None,
        };
        assert_eq!(response.media_type(), "application/json");
        assert!(response.is_json());
        assert!(response.is_success());
    }

    #[test]
    fn vendor_json_counts_as_json() {
        let response = FetchResponse {
            status: 404,
            content_type: Some("application/vnd.talk+json".to_string()),
            body: None,
        };
        assert!(response.is_json());
        assert!(!response.is_success());
        assert_eq!(FetchResponse::default().media_type(), "");
    }
}
