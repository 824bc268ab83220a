use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Credentials for the WhatsApp Business Cloud API.
#[derive(Debug, Clone)]
pub struct CloudApiCredentials {
    pub phone_number_id: String,
    pub access_token: String,
}

/// Client for sending text messages through the WhatsApp Business Cloud API.
///
/// Credentials are optional at construction so a partially configured
/// deployment starts up and reports `Misconfigured` per send instead of
/// refusing to serve webhooks at all.
#[derive(Clone)]
pub struct CloudApiClient {
    http: Client,
    base_url: Url,
    credentials: Option<CloudApiCredentials>,
}

impl CloudApiClient {
    pub fn new(base_url: Url, credentials: Option<CloudApiCredentials>, http: Client) -> Self {
        Self {
            http,
            base_url,
            credentials,
        }
    }

    /// Returns `true` when both the phone number id and access token are set.
    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// Sends a text message and returns the provider's message id.
    ///
    /// `to` must already be E.164; the provider expects the digits without
    /// the leading `+`. Missing credentials fail before any network call.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<String, DispatchError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(DispatchError::Misconfigured)?;

        let url = self
            .base_url
            .join(&format!("{}/messages", credentials.phone_number_id))?;
        let request = SendMessageRequest {
            messaging_product: "whatsapp",
            to: to.trim_start_matches('+'),
            message_type: "text",
            text: TextBody { body },
        };

        let response = self
            .http
            .post(url)
            .bearer_auth(&credentials.access_token)
            .json(&request)
            .send()
            .await
            .map_err(DispatchError::Transient)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unavailable>"));
            return Err(DispatchError::ProviderRejected {
                status,
                detail: extract_error_message(&body),
            });
        }

        let parsed: SendMessageResponse =
            response.json().await.map_err(DispatchError::Transient)?;
        let message_id = parsed
            .messages
            .into_iter()
            .next()
            .map(|message| message.id)
            .ok_or(DispatchError::MissingMessageId)?;
        debug!(%message_id, "message accepted by provider");
        Ok(message_id)
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'static str,
    text: TextBody<'a>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

/// Errors produced by the Cloud API client, split by retry semantics.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Credentials missing; permanent until configuration changes.
    #[error("whatsapp credentials are not configured")]
    Misconfigured,
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    /// Network level failure (connect, timeout, malformed body).
    #[error("transient http error: {0}")]
    Transient(reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("provider rejected message: status {status}: {detail}")]
    ProviderRejected { status: StatusCode, detail: String },
    #[error("provider response missing message id")]
    MissingMessageId,
}

/// Pulls `error.message` out of a Graph API error body, falling back to the
/// raw text when the body is not the expected JSON shape.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
