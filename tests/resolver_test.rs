//! End-to-end resolver tests
//!
//! Drives the resolver through a real Conduit client against a mock
//! server, validating cache coalescing and the full fallback chain.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use phabulous::conduit::client::ConduitClient;
use phabulous::conduit::repository::{RepositoryLookup, RepositoryQuery};
use phabulous::conduit::ConduitError;
use phabulous::config::{ChannelRule, ConduitConfig, RoutingConfig};
use phabulous::resolver::{ChannelResolver, Resolution};

fn resolver_for(server: &MockServer, routing: &RoutingConfig) -> Arc<ChannelResolver> {
    let config = ConduitConfig {
        base_url: server.uri(),
        api_token: Some("api-test-token".to_string()),
        timeout_secs: 5,
        max_retries: 1,
        retry_base_delay_ms: 1,
    };
    let client = Arc::new(ConduitClient::new(&config).expect("build client"));
    let lookup: Arc<dyn RepositoryLookup> = Arc::new(RepositoryQuery::new(client));
    Arc::new(ChannelResolver::new(lookup, routing).expect("compile routing rules"))
}

fn rule(pattern: &str, channel: &str) -> ChannelRule {
    ChannelRule {
        pattern: pattern.to_string(),
        channel: channel.to_string(),
    }
}

fn eng_repository_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "result": [{
            "phid": "PHID-REPO-eng",
            "callsign": "ENG",
            "name": "Engineering Monorepo"
        }],
        "error_code": null,
        "error_info": null
    }))
}

#[tokio::test]
async fn test_rule_beats_repository_default_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repository.query"))
        .respond_with(eng_repository_response())
        .expect(1)
        .mount(&server)
        .await;

    let routing = RoutingConfig {
        rules: vec![rule("ENG*", "#eng-commits")],
        channels: BTreeMap::from([("ENG".to_string(), "#general".to_string())]),
    };
    let resolver = resolver_for(&server, &routing);

    let resolution = resolver.resolve("ENG").await.expect("resolve");
    assert_eq!(resolution, Resolution::Channel("#eng-commits".to_string()));
}

#[tokio::test]
async fn test_default_channel_applies_when_no_rule_matches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repository.query"))
        .respond_with(eng_repository_response())
        .expect(1)
        .mount(&server)
        .await;

    let routing = RoutingConfig {
        rules: vec![rule("OPS*", "#ops")],
        channels: BTreeMap::from([("ENG".to_string(), "#general".to_string())]),
    };
    let resolver = resolver_for(&server, &routing);

    let resolution = resolver.resolve("ENG").await.expect("resolve");
    assert_eq!(resolution, Resolution::Channel("#general".to_string()));
}

#[tokio::test]
async fn test_no_rule_and_no_default_is_unresolved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repository.query"))
        .respond_with(eng_repository_response())
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, &RoutingConfig::default());

    let resolution = resolver.resolve("ENG").await.expect("resolve");
    assert_eq!(resolution, Resolution::Unresolved);
}

#[tokio::test]
async fn test_concurrent_resolutions_issue_one_remote_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repository.query"))
        .respond_with(eng_repository_response().set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(
        &server,
        &RoutingConfig {
            rules: vec![rule("*", "#general")],
            channels: BTreeMap::new(),
        },
    );

    let first = {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move { resolver.resolve("ENG").await })
    };
    let second = {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move { resolver.resolve("ENG").await })
    };

    let first = first.await.expect("join").expect("resolve");
    let second = second.await.expect("join").expect("resolve");

    assert_eq!(first, Resolution::Channel("#general".to_string()));
    assert_eq!(first, second);
    // The mock's .expect(1) verifies the lookups coalesced.
}

#[tokio::test]
async fn test_lookup_failure_propagates_rather_than_misrouting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repository.query"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let resolver = resolver_for(
        &server,
        &RoutingConfig {
            rules: vec![rule("*", "#general")],
            channels: BTreeMap::new(),
        },
    );

    let err = resolver.resolve("ENG").await.unwrap_err();
    assert!(matches!(err, ConduitError::RemoteUnavailable(_)));
}
