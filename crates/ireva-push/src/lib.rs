//! Push provider abstraction.
//!
//! The emitter in ireva-gateway only relies on one contract: a multicast send
//! returns an outcome per token and never fails the batch because one token is
//! invalid or expired. The concrete FCM client lives in [`fcm`]; tests use an
//! in-memory implementation of [`PushProvider`].

pub mod fcm;

use async_trait::async_trait;

/// The notification content handed to the provider.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub click_action: Option<String>,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: None,
            click_action: None,
        }
    }

    pub fn with_click_action(mut self, action: impl Into<String>) -> Self {
        self.click_action = Some(action.into());
        self
    }
}

/// Per-token result of a multicast send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    Delivered,
    /// The provider says this token is dead (unregistered / malformed).
    /// Callers should prune the corresponding subscription row.
    Invalid,
    /// Transient or unclassified failure; the subscription is kept.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SendReport {
    pub token: String,
    pub outcome: TokenOutcome,
}

/// Token-based multicast send API.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Fan `message` out to every token. Always returns exactly one report
    /// per input token; individual failures are values, not errors.
    async fn send_multicast(&self, tokens: &[String], message: &PushMessage) -> Vec<SendReport>;
}
