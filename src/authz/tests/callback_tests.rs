//! Callback delivery against wiremock targets
//!
//! Covers payload shape, retry counts, backoff spacing and the outcome
//! counters.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use voltgate_authz::{
    AuthorizationDecision, AuthorizationStatus, CallbackConfig, CallbackDispatcher,
    ChargingRequest, MetricsRegistry,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher(max_retries: u32, base_delay: Duration) -> (CallbackDispatcher, Arc<MetricsRegistry>) {
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let config = CallbackConfig {
        timeout: Duration::from_secs(2),
        max_retries,
        base_delay,
        user_agent: "voltgate-tests".to_string(),
    };
    (CallbackDispatcher::new(config, metrics.clone()).unwrap(), metrics)
}

fn decision(status: AuthorizationStatus, callback_url: &str) -> (ChargingRequest, AuthorizationDecision) {
    let request = ChargingRequest::new(STATION_ID, VALID_TOKEN, callback_url);
    let decision = AuthorizationDecision::new(&request, status, None, 4);
    (request, decision)
}

#[tokio::test]
async fn test_payload_shape() {
    let mock_server = MockServer::start().await;
    let capture = CaptureResponder::new();

    Mock::given(method("POST"))
        .and(path("/callback"))
        .and(header("content-type", "application/json"))
        .respond_with(capture.clone())
        .mount(&mock_server)
        .await;

    let (dispatcher, metrics) = dispatcher(3, Duration::from_millis(10));
    let url = format!("{}/callback", mock_server.uri());
    let (request, decision) = decision(AuthorizationStatus::NotAllowed, &url);

    assert!(dispatcher.dispatch(&decision, &url, &request.driver_token).await);

    let bodies = capture.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0],
        serde_json::json!({
            "station_id": STATION_ID,
            "driver_token": VALID_TOKEN,
            "status": "not_allowed",
        })
    );
    assert_eq!(metrics.counter("callback", "success"), 1);
}

#[tokio::test]
async fn test_any_2xx_is_delivered() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (dispatcher, _) = dispatcher(3, Duration::from_millis(10));
    let url = format!("{}/callback", mock_server.uri());
    let (request, decision) = decision(AuthorizationStatus::Allowed, &url);

    let attempts = dispatcher
        .deliver(&decision, &url, &request.driver_token)
        .await
        .unwrap();
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let mock_server = MockServer::start().await;
    let failing = FailingResponder::always();

    Mock::given(method("POST"))
        .and(path("/callback"))
        .respond_with(failing.clone())
        .expect(3)
        .mount(&mock_server)
        .await;

    let base_delay = Duration::from_millis(40);
    let (dispatcher, metrics) = dispatcher(3, base_delay);
    let url = format!("{}/callback", mock_server.uri());
    let (request, decision) = decision(AuthorizationStatus::Allowed, &url);

    let delivered = dispatcher.dispatch(&decision, &url, &request.driver_token).await;

    assert!(!delivered);
    assert_eq!(failing.attempt_count(), 3);
    assert_eq!(metrics.counter("callback", "http_error"), 3);
    assert_eq!(metrics.counter("callback", "success"), 0);
    assert_eq!(metrics.counter("callback", "max_retries_exceeded"), 1);

    // Backoff: 40ms after the first failure, 80ms after the second
    let intervals = failing.intervals();
    assert_eq!(intervals.len(), 2);
    assert!(intervals[0] >= Duration::from_millis(40));
    assert!(intervals[1] >= Duration::from_millis(80));
    assert!(intervals[1] > intervals[0]);
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let mock_server = MockServer::start().await;
    let failing = FailingResponder::fail_times(2);

    Mock::given(method("POST"))
        .respond_with(failing.clone())
        .mount(&mock_server)
        .await;

    let (dispatcher, metrics) = dispatcher(3, Duration::from_millis(5));
    let url = format!("{}/callback", mock_server.uri());
    let (request, decision) = decision(AuthorizationStatus::Unknown, &url);

    let attempts = dispatcher
        .deliver(&decision, &url, &request.driver_token)
        .await
        .unwrap();

    assert_eq!(attempts, 3);
    assert_eq!(metrics.counter("callback", "http_error"), 2);
    assert_eq!(metrics.counter("callback", "success"), 1);
    assert_eq!(metrics.counter("callback", "max_retries_exceeded"), 0);
}

#[tokio::test]
async fn test_slow_target_counts_as_network_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let dispatcher = CallbackDispatcher::new(
        CallbackConfig {
            timeout: Duration::from_millis(50),
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            user_agent: "voltgate-tests".to_string(),
        },
        metrics.clone(),
    )
    .unwrap();
    let url = format!("{}/callback", mock_server.uri());
    let (request, decision) = decision(AuthorizationStatus::Allowed, &url);

    assert!(!dispatcher.dispatch(&decision, &url, &request.driver_token).await);
    assert_eq!(metrics.counter("callback", "network_error"), 2);
    assert_eq!(metrics.counter("callback", "max_retries_exceeded"), 1);
}
