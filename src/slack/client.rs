//! Slack Web API client for outbound warning delivery.
//!
//! The pipeline only ever needs one capability: posting an ephemeral
//! message visible solely to the user who triggered the detection. That
//! capability sits behind the [`Notifier`] trait so tests (and any future
//! non-Slack sink) can substitute their own delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::SecretString;

/// Production Slack Web API endpoint base.
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Upper bound on one notification call; a slow Slack API must not pin
/// webhook invocations.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures while delivering a warning.
///
/// All of these are logged and swallowed by the pipeline — detection
/// already happened, and surfacing a delivery failure would only make the
/// platform redeliver the whole event.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP transport failure (connect, timeout, decode).
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The endpoint answered with a non-success HTTP status.
    #[error("Slack API returned status {status}")]
    HttpStatus {
        /// The status code received.
        status: u16,
    },
    /// Slack accepted the call but reported an application error.
    #[error("Slack API rejected the notification: {error}")]
    Api {
        /// Slack's error code (e.g. `channel_not_found`).
        error: String,
    },
}

/// Capability to warn a user privately.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post an ephemeral message in `channel`, visible only to `user`.
    /// Returns the posted message's timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] on transport or API failure.
    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
    ) -> Result<String, NotifyError>;
}

/// `chat.postEphemeral` request body.
#[derive(Debug, Serialize)]
struct PostEphemeralRequest<'a> {
    channel: &'a str,
    user: &'a str,
    text: &'a str,
}

/// `chat.postEphemeral` response body. Slack reports application errors
/// with HTTP 200 and `ok: false`.
#[derive(Debug, Deserialize)]
struct PostEphemeralResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message_ts: Option<String>,
}

/// Slack Web API client bound to one bot token.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    token: SecretString,
    api_base: String,
}

impl SlackClient {
    /// Create a client against the production Slack API.
    pub fn new(token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            api_base: DEFAULT_API_BASE.to_owned(),
        }
    }

    /// Override the API base URL (for testing against a local stub).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl Notifier for SlackClient {
    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
    ) -> Result<String, NotifyError> {
        let request = PostEphemeralRequest {
            channel,
            user,
            text,
        };
        let response = self
            .http
            .post(format!("{}/chat.postEphemeral", self.api_base))
            .timeout(NOTIFY_TIMEOUT)
            .bearer_auth(self.token.expose())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body: PostEphemeralResponse = response.json().await?;
        if !body.ok {
            return Err(NotifyError::Api {
                error: body.error.unwrap_or_else(|| "unknown_error".to_owned()),
            });
        }
        Ok(body.message_ts.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_slack_shape() {
        let request = PostEphemeralRequest {
            channel: "C024BE91L",
            user: "U2147483697",
            text: "careful now",
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "channel": "C024BE91L",
                "user": "U2147483697",
                "text": "careful now",
            })
        );
    }

    #[test]
    fn response_parses_ok_and_error_shapes() {
        let ok: PostEphemeralResponse =
            serde_json::from_str(r#"{"ok":true,"message_ts":"1502210682.580145"}"#)
                .expect("parse");
        assert!(ok.ok);
        assert_eq!(ok.message_ts.as_deref(), Some("1502210682.580145"));

        let failed: PostEphemeralResponse =
            serde_json::from_str(r#"{"ok":false,"error":"user_not_in_channel"}"#).expect("parse");
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("user_not_in_channel"));
    }

    #[test]
    fn client_debug_does_not_leak_token() {
        let client = SlackClient::new(SecretString::new("xoxb-hunter2"));
        assert!(!format!("{client:?}").contains("hunter2"));
    }
}
