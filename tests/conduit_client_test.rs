//! Integration tests for the Conduit client
//!
//! Validates envelope handling, the retry state machine, and credential
//! refresh against mock servers.

use serde_json::{json, Map};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use phabulous::conduit::client::{ConduitClient, CredentialSource};
use phabulous::conduit::ConduitError;
use phabulous::config::ConduitConfig;

fn conduit_config(base_url: &str) -> ConduitConfig {
    ConduitConfig {
        base_url: base_url.to_string(),
        api_token: Some("api-test-token".to_string()),
        timeout_secs: 5,
        max_retries: 3,
        retry_base_delay_ms: 1,
    }
}

fn client_for(server: &MockServer) -> ConduitClient {
    ConduitClient::new(&conduit_config(&server.uri())).expect("build client")
}

/// Credential source handing out a fixed sequence of tokens.
struct RotatingCredentials {
    tokens: Mutex<VecDeque<String>>,
}

impl RotatingCredentials {
    fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
        }
    }
}

impl CredentialSource for RotatingCredentials {
    fn api_token(&self) -> Option<String> {
        let mut tokens = self.tokens.lock().expect("token lock poisoned");
        let next = tokens.front().cloned();
        if tokens.len() > 1 {
            tokens.pop_front();
        }
        next
    }
}

#[tokio::test]
async fn test_success_envelope_unwraps_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/conduit.ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "phab.example.com",
            "error_code": null,
            "error_info": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .call_raw("conduit.ping", Map::new())
        .await
        .expect("successful call");

    assert_eq!(result, json!("phab.example.com"));
}

#[tokio::test]
async fn test_identical_calls_yield_identical_results() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/conduit.ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"host": "phab.example.com"},
            "error_code": null,
            "error_info": null
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let first = client.call_raw("conduit.ping", Map::new()).await.expect("first call");
    let second = client.call_raw("conduit.ping", Map::new()).await.expect("second call");

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_remote_error_envelope_preserves_remote_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/maniphest.query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": null,
            "error_code": "ERR-CONDUIT-CALL",
            "error_info": "parameter 'ids' must be a list of integers"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .call_raw("maniphest.query", Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ConduitError::InvalidParameters(_)));
    let rendered = err.to_string();
    assert!(rendered.contains("ERR-CONDUIT-CALL"));
    assert!(rendered.contains("must be a list of integers"));
    assert!(rendered.contains("maniphest.query"));
}

#[tokio::test]
async fn test_server_errors_retry_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/conduit.ping"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/conduit.ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok",
            "error_code": null,
            "error_info": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .call_raw("conduit.ping", Map::new())
        .await
        .expect("second attempt succeeds");

    assert_eq!(result, json!("ok"));
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/conduit.ping"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.call_raw("conduit.ping", Map::new()).await.unwrap_err();

    assert!(matches!(err, ConduitError::RemoteUnavailable(_)));
}

#[tokio::test]
async fn test_invalid_parameters_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/maniphest.query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": null,
            "error_code": "ERR-CONDUIT-CALL",
            "error_info": "bad params"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .call_raw("maniphest.query", Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ConduitError::InvalidParameters(_)));
}

#[tokio::test]
async fn test_auth_failure_with_stable_token_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/user.whoami"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": null,
            "error_code": "ERR-INVALID-AUTH",
            "error_info": "token expired"
        })))
        .expect(1)
        .mount(&server)
        .await;

    // The credential source keeps returning the same token, so the refresh
    // path finds nothing new and the call fails after one request.
    let client = client_for(&server);
    let err = client.call_raw("user.whoami", Map::new()).await.unwrap_err();

    assert!(matches!(err, ConduitError::AuthenticationFailed(_)));
    assert!(err.to_string().contains("token expired"));
}

#[tokio::test]
async fn test_rotated_token_is_refreshed_exactly_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/user.whoami"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": null,
            "error_code": "ERR-INVALID-AUTH",
            "error_info": "token expired"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/user.whoami"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"userName": "bot"},
            "error_code": null,
            "error_info": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Arc::new(RotatingCredentials::new(&["stale-token", "fresh-token"]));
    let client = ConduitClient::with_credentials(&conduit_config(&server.uri()), credentials)
        .expect("build client");

    let result = client
        .call_raw("user.whoami", Map::new())
        .await
        .expect("call succeeds after refresh");

    assert_eq!(result, json!({"userName": "bot"}));
}

#[tokio::test]
async fn test_slow_remote_surfaces_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/conduit.ping"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "result": "ok",
                    "error_code": null,
                    "error_info": null
                }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = ConduitConfig {
        timeout_secs: 1,
        max_retries: 1,
        ..conduit_config(&server.uri())
    };
    let client = ConduitClient::new(&config).expect("build client");

    let err = client.call_raw("conduit.ping", Map::new()).await.unwrap_err();
    assert!(matches!(err, ConduitError::Timeout(_)));
}

#[tokio::test]
async fn test_undecodable_body_is_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/conduit.ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.call_raw("conduit.ping", Map::new()).await.unwrap_err();

    assert!(matches!(err, ConduitError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_envelope_without_result_or_error_is_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/conduit.ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.call_raw("conduit.ping", Map::new()).await.unwrap_err();

    assert!(matches!(err, ConduitError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_empty_method_name_is_rejected_locally() {
    let server = MockServer::start().await;
    let client = client_for(&server);

    let err = client.call_raw("", Map::new()).await.unwrap_err();
    assert!(matches!(err, ConduitError::InvalidParameters(_)));
    assert!(server.received_requests().await.expect("requests").is_empty());
}
