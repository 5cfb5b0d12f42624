//! Firebase Cloud Messaging client.
//!
//! Speaks the multicast send endpoint: one HTTP request carries the whole
//! token batch and the response reports success or an error string per token.

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{PushMessage, PushProvider, SendReport, TokenOutcome};

const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

/// Errors that can occur when talking to the FCM API.
///
/// These never escape `send_multicast`; a request-level failure is folded
/// into a `Failed` outcome for every token in the batch.
#[derive(Error, Debug)]
pub enum FcmError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("FCM API error: {0}")]
    Api(String),
}

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub server_key: String,
    /// Overridable for tests pointing at a local stub.
    pub endpoint: String,
}

impl FcmConfig {
    pub fn new(server_key: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MulticastRequest<'a> {
    registration_ids: &'a [String],
    notification: WireNotification<'a>,
}

#[derive(Debug, Serialize)]
struct WireNotification<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    click_action: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MulticastResponse {
    #[allow(dead_code)]
    success: u32,
    #[allow(dead_code)]
    failure: u32,
    results: Vec<SendResult>,
}

#[derive(Debug, Deserialize)]
struct SendResult {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct FcmClient {
    client: Client,
    config: FcmConfig,
}

impl FcmClient {
    pub fn new(config: FcmConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn post_batch(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<MulticastResponse, FcmError> {
        let request = MulticastRequest {
            registration_ids: tokens,
            notification: WireNotification {
                title: &message.title,
                body: &message.body,
                icon: message.icon.as_deref(),
                click_action: message.click_action.as_deref(),
            },
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(
                header::AUTHORIZATION,
                format!("key={}", self.config.server_key),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(FcmError::Api(error_text));
        }

        Ok(response.json().await?)
    }
}

/// Map one FCM result entry to a per-token outcome. Token-is-dead error
/// strings become `Invalid` so callers can prune the subscription.
fn classify(result: &SendResult) -> TokenOutcome {
    if result.message_id.is_some() && result.error.is_none() {
        return TokenOutcome::Delivered;
    }
    match result.error.as_deref() {
        Some("NotRegistered") | Some("InvalidRegistration") | Some("MissingRegistration") => {
            TokenOutcome::Invalid
        }
        Some(other) => TokenOutcome::Failed(other.to_string()),
        None => TokenOutcome::Failed("no result for token".to_string()),
    }
}

#[async_trait]
impl PushProvider for FcmClient {
    async fn send_multicast(&self, tokens: &[String], message: &PushMessage) -> Vec<SendReport> {
        if tokens.is_empty() {
            return Vec::new();
        }

        match self.post_batch(tokens, message).await {
            Ok(response) => tokens
                .iter()
                .enumerate()
                .map(|(i, token)| SendReport {
                    token: token.clone(),
                    outcome: response
                        .results
                        .get(i)
                        .map(classify)
                        .unwrap_or_else(|| TokenOutcome::Failed("no result for token".into())),
                })
                .collect(),
            Err(e) => {
                // Batch-level failure: every token is a (retained) failure.
                warn!("FCM multicast send failed: {}", e);
                tokens
                    .iter()
                    .map(|token| SendReport {
                        token: token.clone(),
                        outcome: TokenOutcome::Failed(e.to_string()),
                    })
                    .collect()
            }
        }
    }
}
