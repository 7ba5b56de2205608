//! Slack messaging
//!
//! Message posting is a capability the rest of the bot calls through the
//! [`Messenger`] trait; [`SlackGateway`] is the production implementation
//! backed by Slack's Web API. Event ingestion lives elsewhere — this
//! module only sends.

use crate::config::SlackConfig;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while posting to Slack
#[derive(Debug, Error)]
pub enum SlackError {
    /// Invalid or revoked token
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Channel missing, archived, or the bot is not a member
    #[error("Channel error: {0}")]
    Channel(String),

    /// Any other error reported by the Slack API
    #[error("Slack API error: {0}")]
    Api(String),

    /// Network/HTTP error
    #[error("Network error: {0}")]
    Network(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for SlackError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SlackError::Timeout(err.to_string())
        } else if err.is_connect() {
            SlackError::Network(format!("Connection failed: {}", err))
        } else {
            SlackError::Network(err.to_string())
        }
    }
}

/// Capability for posting messages to a chat workspace.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Post a plain text message to a channel.
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), SlackError>;
}

/// Slack Web API gateway
#[derive(Debug)]
pub struct SlackGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
    username: String,
}

impl SlackGateway {
    /// Build a gateway from the Slack section of the configuration.
    pub fn new(config: &SlackConfig) -> Result<Self, SlackError> {
        let token = config.token.clone().ok_or_else(|| {
            SlackError::Auth(
                "no Slack token configured; set slack.token or SLACK_TOKEN".to_string(),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SlackError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: "https://slack.com/api".to_string(),
            token,
            username: config.username.clone(),
        })
    }

    /// Point the gateway at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Messenger for SlackGateway {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), SlackError> {
        let payload = json!({
            "channel": channel,
            "text": text,
            "username": self.username,
        });

        let url = format!("{}/chat.postMessage", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&payload)
            .send()
            .await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| SlackError::Api(format!("undecodable response: {}", e)))?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let code = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(classify_api_error(code));
        }

        debug!("Posted message to {}", channel);
        Ok(())
    }
}

/// Map a Slack error code to the taxonomy, preserving the code.
fn classify_api_error(code: &str) -> SlackError {
    match code {
        "invalid_auth" | "account_inactive" | "token_revoked" | "not_authed" => {
            SlackError::Auth(code.to_string())
        }
        "channel_not_found" | "not_in_channel" | "is_archived" => {
            SlackError::Channel(code.to_string())
        }
        _ => SlackError::Api(code.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classification() {
        assert!(matches!(classify_api_error("invalid_auth"), SlackError::Auth(_)));
        assert!(matches!(
            classify_api_error("channel_not_found"),
            SlackError::Channel(_)
        ));
        assert!(matches!(classify_api_error("msg_too_long"), SlackError::Api(_)));
    }

    #[test]
    fn test_gateway_requires_a_token() {
        let config = SlackConfig {
            token: None,
            ..SlackConfig::default()
        };
        let err = SlackGateway::new(&config).unwrap_err();
        assert!(matches!(err, SlackError::Auth(_)));
    }
}
