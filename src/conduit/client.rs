//! Conduit transport client
//!
//! Performs authenticated calls to named Conduit methods. Each logical call
//! runs a bounded retry loop (see [`retry`](super::retry)) and refreshes its
//! cached API token at most once when the remote rejects authentication, so
//! a rotated token on disk or in the environment is picked up without a
//! restart.

use super::retry::{RetryPolicy, RetryState};
use super::{classify_remote_error, ConduitError};
use crate::config::ConduitConfig;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Source of the Conduit API token.
///
/// The client caches the token it was constructed with and consults the
/// source again only when the remote reports an authentication failure.
pub trait CredentialSource: Send + Sync {
    /// Current Conduit API token, if one is available.
    fn api_token(&self) -> Option<String>;
}

/// Token source backed by the loaded configuration, with the
/// `PHABRICATOR_API_TOKEN` environment variable taking priority so rotated
/// deployments need no file edit.
pub struct ConfigCredentials {
    configured: Option<String>,
}

impl ConfigCredentials {
    pub fn new(configured: Option<String>) -> Self {
        Self { configured }
    }
}

impl CredentialSource for ConfigCredentials {
    fn api_token(&self) -> Option<String> {
        std::env::var("PHABRICATOR_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.configured.clone())
    }
}

/// Authenticated Conduit transport
///
/// Stateless across calls apart from the cached API token; retry state is
/// local to each call, so concurrent calls never share backoff progress.
pub struct ConduitClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<String>,
    credentials: Arc<dyn CredentialSource>,
    policy: RetryPolicy,
}

impl ConduitClient {
    /// Build a client from the Conduit section of the configuration.
    pub fn new(config: &ConduitConfig) -> Result<Self, ConduitError> {
        let credentials = Arc::new(ConfigCredentials::new(config.api_token.clone()));
        Self::with_credentials(config, credentials)
    }

    /// Build a client with an explicit credential source.
    pub fn with_credentials(
        config: &ConduitConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ConduitError> {
        let token = credentials.api_token().ok_or_else(|| {
            ConduitError::AuthenticationFailed(
                "no Conduit API token configured; set conduit.api_token or PHABRICATOR_API_TOKEN"
                    .to_string(),
            )
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ConduitError::RemoteUnavailable(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(token),
            credentials,
            policy: RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
        })
    }

    /// Call a Conduit method and decode its result into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Map<String, Value>,
    ) -> Result<T, ConduitError> {
        let result = self.call_raw(method, params).await?;
        serde_json::from_value(result).map_err(|e| {
            ConduitError::MalformedResponse(format!("{}: undecodable result: {}", method, e))
        })
    }

    /// Call a Conduit method and return the raw result payload.
    ///
    /// Drives the retry state machine: transient failures back off and
    /// retry up to the configured attempt budget, terminal failures surface
    /// immediately, and an authentication failure triggers one token
    /// refresh for the whole logical call.
    pub async fn call_raw(
        &self,
        method: &str,
        params: Map<String, Value>,
    ) -> Result<Value, ConduitError> {
        if method.is_empty() {
            return Err(ConduitError::InvalidParameters(
                "method name must not be empty".to_string(),
            ));
        }

        let mut attempt = 1u32;
        let mut refreshed = false;

        loop {
            let outcome = self.attempt(method, &params).await;

            if let Err(ConduitError::AuthenticationFailed(_)) = &outcome {
                if !refreshed {
                    refreshed = true;
                    if self.refresh_token() {
                        debug!("Conduit token refreshed, re-issuing {}", method);
                        continue;
                    }
                }
            }

            match self
                .policy
                .evaluate(attempt, outcome.as_ref().map(|_| ()))
            {
                RetryState::Succeeded => {
                    debug!("Conduit call {} succeeded on attempt {}", method, attempt);
                    return outcome;
                }
                RetryState::Attempting(next) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        "Conduit call {} failed on attempt {}/{}, retrying in {:?}: {}",
                        method,
                        attempt,
                        self.policy.max_attempts(),
                        delay,
                        outcome.as_ref().err().map(|e| e.to_string()).unwrap_or_default()
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryState::FailedTerminal | RetryState::FailedRetryable => {
                    return outcome;
                }
            }
        }
    }

    /// Issue one HTTP request for the call.
    async fn attempt(
        &self,
        method: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, ConduitError> {
        let token = {
            let guard = self.token.read().expect("token lock poisoned");
            guard.clone()
        };

        let mut payload = params.clone();
        payload.insert("__conduit__".to_string(), json!({ "token": token }));

        let body = serde_json::to_string(&Value::Object(payload)).map_err(|e| {
            ConduitError::InvalidParameters(format!("{}: unserializable params: {}", method, e))
        })?;

        let url = format!("{}/api/{}", self.base_url, method);
        let response = self
            .http
            .post(&url)
            .form(&[("params", body.as_str()), ("output", "json")])
            .send()
            .await
            .map_err(|e| classify_transport(method, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(method, status, &body));
        }

        let envelope: Value = response.json().await.map_err(|e| {
            ConduitError::MalformedResponse(format!("{}: undecodable body: {}", method, e))
        })?;

        decode_envelope(method, envelope)
    }

    /// Re-read the credential source. Returns true if the cached token
    /// actually changed.
    fn refresh_token(&self) -> bool {
        let Some(fresh) = self.credentials.api_token() else {
            return false;
        };
        let mut guard = self.token.write().expect("token lock poisoned");
        if *guard == fresh {
            return false;
        }
        *guard = fresh;
        true
    }
}

/// Map an HTTP-level transport failure to the taxonomy.
fn classify_transport(method: &str, err: reqwest::Error) -> ConduitError {
    if err.is_timeout() {
        ConduitError::Timeout(format!("{}: {}", method, err))
    } else {
        ConduitError::RemoteUnavailable(format!("{}: {}", method, err))
    }
}

/// Map a non-success HTTP status to the taxonomy.
fn classify_status(method: &str, status: reqwest::StatusCode, body: &str) -> ConduitError {
    let snippet: String = body.chars().take(200).collect();
    let detail = format!("{}: HTTP {}: {}", method, status, snippet);
    match status.as_u16() {
        401 | 403 => ConduitError::AuthenticationFailed(detail),
        404 => ConduitError::MethodNotFound(detail),
        408 => ConduitError::Timeout(detail),
        429 => ConduitError::RemoteUnavailable(detail),
        s if s >= 500 => ConduitError::RemoteUnavailable(detail),
        _ => ConduitError::MalformedResponse(detail),
    }
}

/// Unwrap a Conduit response envelope.
///
/// An envelope is exactly success-with-result or failure-with-error; one
/// carrying an error code is a failure regardless of any result half, and
/// one carrying neither half is malformed.
fn decode_envelope(method: &str, envelope: Value) -> Result<Value, ConduitError> {
    let Value::Object(mut fields) = envelope else {
        return Err(ConduitError::MalformedResponse(format!(
            "{}: response is not a JSON object",
            method
        )));
    };

    let error_code = fields
        .get("error_code")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if let Some(code) = error_code {
        let info = fields
            .get("error_info")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        return Err(classify_remote_error(method, &code, &info));
    }

    match fields.remove("result") {
        Some(result) => Ok(result),
        None => Err(ConduitError::MalformedResponse(format!(
            "{}: envelope has neither result nor error",
            method
        ))),
    }
}
