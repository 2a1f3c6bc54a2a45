//! HTTP submission transport.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::util::{compact_error_body, is_http_url, normalize_text_option};

use super::{SubmissionRequest, SubmissionTransport};

/// POSTs submissions as JSON to a progress endpoint.
#[derive(Clone)]
pub struct HttpSubmissionTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSubmissionTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSubmissionTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpSubmissionTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SubmissionTransport for HttpSubmissionTransport {
    async fn send(&mut self, request: &SubmissionRequest) -> Result<Option<String>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|error| Error::delivery_failure(format!("request failed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| Error::delivery_failure(format!("failed to read response: {error}")))?;

        if !status.is_success() {
            return Err(Error::delivery_failure(parse_api_error(status, &body)));
        }

        Ok(parse_acknowledgement(&body))
    }
}

#[derive(Debug, Deserialize)]
struct SubmissionAck {
    confirmation_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Confirmation token carried by a 2xx body, if any.
fn parse_acknowledgement(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str::<SubmissionAck>(body)
        .ok()
        .and_then(|ack| normalize_text_option(ack.confirmation_code))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SubmissionErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_error_body(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("submission endpoint must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "submission endpoint must include http:// or https://".to_string(),
        ))
    }
}
