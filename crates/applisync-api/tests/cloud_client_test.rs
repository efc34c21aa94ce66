#![allow(clippy::unwrap_used)]
// Integration tests for `CloudClient` and `TokenEndpoint` using wiremock.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use applisync_api::push::SseDecoder;
use applisync_api::{
    ApplianceApi, CloudClient, CredentialManager, CredentialSet, Error, PushSource, RenewalPolicy,
    TokenEndpoint, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn credentials(access: &str, expires_in_secs: i64) -> CredentialSet {
    CredentialSet::new(
        SecretString::from(access.to_string()),
        SecretString::from("refresh-1".to_string()),
        SecretString::from("api-key".to_string()),
        Some(Utc::now() + TimeDelta::seconds(expires_in_secs)),
    )
}

async fn setup_with(creds: CredentialSet) -> (MockServer, CloudClient) {
    let server = MockServer::start().await;
    let base = format!("{}/api/v1", server.uri());
    let transport = TransportConfig::default();

    let renewer = Arc::new(TokenEndpoint::new(&base, &transport).unwrap());
    let manager = Arc::new(CredentialManager::new(
        creds,
        renewer,
        None,
        RenewalPolicy::default(),
    ));
    let client = CloudClient::new(&base, &transport, manager).unwrap();
    (server, client)
}

async fn setup() -> (MockServer, CloudClient) {
    setup_with(credentials("access-1", 3600)).await
}

fn token_response(access: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "accessToken": access,
        "refreshToken": "refresh-2",
        "expiresIn": 43200,
        "tokenType": "Bearer"
    }))
}

// ── Listing & state ─────────────────────────────────────────────────

#[tokio::test]
async fn test_list_appliances_sends_both_credentials() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/appliances"))
        .and(header("authorization", "Bearer access-1"))
        .and(header("x-api-key", "api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "applianceId": "944188772_00:31862190-443E07363DAB",
                "applianceName": "Dryer",
                "applianceType": "TD",
                "connectionState": "connected"
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let appliances = client.list_appliances().await.unwrap();
    assert_eq!(appliances.len(), 1);
    assert_eq!(appliances[0].appliance_type.as_deref(), Some("TD"));
}

#[tokio::test]
async fn test_appliance_state() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/appliances/A1/state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "applianceId": "A1",
            "connectionState": "connected",
            "properties": { "reported": { "program": "COTTON", "timeToEnd": 3600 } }
        })))
        .mount(&server)
        .await;

    let state = client.appliance_state("A1").await.unwrap();
    assert_eq!(state.properties.reported["timeToEnd"], 3600);
}

#[tokio::test]
async fn test_appliance_details_with_capabilities() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/appliances/A1/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "applianceInfo": { "brand": "Electrolux", "model": "Unknown", "deviceType": "OVEN" },
            "capabilities": { "targetTemperatureC": { "access": "readwrite", "type": "temperature", "min": 30, "max": 230 } }
        })))
        .mount(&server)
        .await;

    let details = client.appliance_details("A1").await.unwrap();
    assert!(details.capabilities.contains_key("targetTemperatureC"));
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/appliances"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let result = client.list_appliances().await;
    assert!(
        matches!(result, Err(Error::Deserialization { .. })),
        "expected Deserialization error, got: {result:?}"
    );
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_command_accepts_empty_body() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/appliances/A1/command"))
        .and(body_json(json!({ "cavityLight": true })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .send_command("A1", &json!({ "cavityLight": true }))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_command_rejection_carries_code_and_detail() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/appliances/A1/command"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({
            "error": "COMMAND_VALIDATION_ERROR",
            "message": "Command validation failed",
            "detail": "Food probe not inserted"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client
        .send_command("A1", &json!({ "targetFoodProbeTemperatureC": 60 }))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(406));
    assert_eq!(err.api_error_code(), Some("COMMAND_VALIDATION_ERROR"));
    assert_eq!(err.api_error_detail(), Some("Food probe not inserted"));
}

#[tokio::test]
async fn test_plain_text_error_body() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/appliances/A1/command"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Appliance offline"))
        .mount(&server)
        .await;

    let result = client.send_command("A1", &json!({ "x": 1 })).await;
    assert!(
        matches!(result, Err(Error::Api { status: 503, ref message, .. }) if message == "Appliance offline"),
        "got: {result:?}"
    );
}

// ── Renewal ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_401_renews_once_and_retries() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/appliances"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/appliances"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/token/refresh"))
        .and(header("x-api-key", "api-key"))
        .and(body_json(json!({ "refreshToken": "refresh-1" })))
        .respond_with(token_response("access-2"))
        .expect(1)
        .mount(&server)
        .await;

    let appliances = client.list_appliances().await.unwrap();
    assert!(appliances.is_empty());

    let creds = client.credentials().current();
    assert_eq!(creds.access_token.expose_secret(), "access-2");
    assert_eq!(creds.refresh_token.expose_secret(), "refresh-2");
}

#[tokio::test]
async fn test_parallel_401s_share_one_renewal() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "properties": { "reported": {} }
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/token/refresh"))
        .respond_with(token_response("access-2"))
        .expect(1)
        .mount(&server)
        .await;

    let (a, b, c) = tokio::join!(
        client.appliance_state("A1"),
        client.appliance_state("A2"),
        client.appliance_state("A3"),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
}

#[tokio::test]
async fn test_token_near_expiry_renews_before_request() {
    let (server, client) = setup_with(credentials("access-1", 60)).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/token/refresh"))
        .respond_with(token_response("access-2"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/appliances"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    client.list_appliances().await.unwrap();
}

#[tokio::test]
async fn test_rejected_refresh_token_requires_reauth() {
    let (server, client) = setup_with(credentials("access-1", -5)).await;
    let reauth = client.credentials().reauth_required();

    Mock::given(method("POST"))
        .and(path("/api/v1/token/refresh"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "message": "Refresh token expired"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.list_appliances().await;
    assert!(
        matches!(result, Err(Error::RenewalRejected { .. })),
        "expected RenewalRejected, got: {result:?}"
    );
    assert!(*reauth.borrow());
}

#[tokio::test]
async fn test_second_401_is_authentication_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/appliances"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/token/refresh"))
        .respond_with(token_response("access-2"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.list_appliances().await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}

// ── Push stream ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_livestream_yields_sse_frames() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/appliances/livestream"))
        .and(query_param("applianceIds", "A1,A2"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(
                    "data: {\"applianceId\":\"A1\",\"property\":\"doorState\",\"value\":\"OPEN\"}\n\n",
                ),
        )
        .mount(&server)
        .await;

    let mut stream = client
        .open(&["A1".to_string(), "A2".to_string()])
        .await
        .unwrap();

    let mut decoder = SseDecoder::default();
    let mut payloads = Vec::new();
    while let Some(chunk) = stream.next().await {
        payloads.extend(decoder.feed(&chunk.unwrap()));
    }
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].contains("doorState"));
}
