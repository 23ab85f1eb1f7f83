//! End-to-end driver behavior against a mocked execution service.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use flowbuild::client::FlowClient;
use flowbuild::config::BuildConfig;
use flowbuild::delivery::DeliveryMode;
use flowbuild::driver::{BuildRequest, DriverError, FlowDriver};
use flowbuild::events::{MemoryObserver, ObserverRecord};
use flowbuild::status::BuildStatus;

mod common;
use common::*;

fn test_config(server: &MockServer) -> BuildConfig {
    BuildConfig::new(server.base_url())
        .with_min_vertex_duration(Duration::ZERO)
        .with_poll_interval(Duration::from_millis(20))
}

fn driver_with_observer(server: &MockServer, config: BuildConfig) -> (FlowDriver, Arc<MemoryObserver>) {
    let observer = Arc::new(MemoryObserver::new());
    let driver = FlowDriver::new(FlowClient::new(server.base_url()), config)
        .with_observer(observer.clone());
    (driver, observer)
}

fn stopped_count(observer: &MemoryObserver) -> usize {
    observer
        .snapshot()
        .into_iter()
        .filter(|record| matches!(record, ObserverRecord::Stopped))
        .count()
}

async fn mock_order(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/build/flow-1/order");
            then.status(200).json_body(linear_order_response());
        })
        .await
}

#[tokio::test]
async fn direct_delivery_happy_path() {
    let server = MockServer::start_async().await;
    mock_order(&server).await;
    let build = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/build/flow-1/flow")
                .query_param("event_delivery", "direct");
            then.status(200).body(linear_happy_script());
        })
        .await;

    let (driver, _observer) = driver_with_observer(&server, test_config(&server));
    let report = driver.build(BuildRequest::new("flow-1")).await.unwrap();

    build.assert_async().await;
    assert!(report.is_valid());
    assert!(!report.stopped());
    assert!(!report.fell_back);
    assert_eq!(report.delivery, Some(DeliveryMode::Direct));
    assert_eq!(report.summary.executed, 3);
    for id in ["a", "b", "c"] {
        assert_eq!(driver.board().status(id), Some(BuildStatus::Built));
    }
    assert!(!driver.is_building());
}

#[tokio::test]
async fn streaming_404_transparently_falls_back_to_polling() {
    let server = MockServer::start_async().await;
    mock_order(&server).await;
    let streaming = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/build/flow-1/flow")
                .query_param("event_delivery", "streaming");
            then.status(404);
        })
        .await;
    let polling = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/build/flow-1/flow")
                .query_param("event_delivery", "polling");
            then.status(200).json_body(json!({"job_id": "job-1"}));
        })
        .await;
    let events = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/build/job-1/events")
                .query_param("stream", "false");
            then.status(200).body(linear_happy_script());
        })
        .await;

    let config = test_config(&server).with_delivery(DeliveryMode::Streaming);
    let (driver, _observer) = driver_with_observer(&server, config);
    let report = driver.build(BuildRequest::new("flow-1")).await.unwrap();

    assert_eq!(streaming.hits_async().await, 1);
    assert_eq!(polling.hits_async().await, 1);
    assert_eq!(events.hits_async().await, 1);
    assert!(report.is_valid(), "fallback must be invisible to the caller");
    assert!(report.fell_back);
    assert_eq!(report.delivery, Some(DeliveryMode::Polling));
}

#[tokio::test]
async fn exhausted_fallback_is_fatal() {
    let server = MockServer::start_async().await;
    mock_order(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/build/flow-1/flow");
            then.status(404);
        })
        .await;

    let config = test_config(&server).with_delivery(DeliveryMode::Streaming);
    let (driver, _observer) = driver_with_observer(&server, config);
    let error = driver.build(BuildRequest::new("flow-1")).await.unwrap_err();
    assert!(matches!(error, DriverError::Transport { .. }));
    assert!(!driver.is_building());
}

#[tokio::test]
async fn graph_errors_are_fatal_before_start_without_fallback() {
    let server = MockServer::start_async().await;
    let order = server
        .mock_async(|when, then| {
            when.method(POST).path("/build/flow-1/order");
            then.status(500).body("cycle detected");
        })
        .await;
    let build = server
        .mock_async(|when, then| {
            when.method(POST).path("/build/flow-1/flow");
            then.status(200).body(linear_happy_script());
        })
        .await;

    let (driver, _observer) = driver_with_observer(&server, test_config(&server));
    let error = driver.build(BuildRequest::new("flow-1")).await.unwrap_err();

    assert!(matches!(error, DriverError::Order(_)));
    // No retry and no build attempt for a broken graph.
    assert_eq!(order.hits_async().await, 1);
    assert_eq!(build.hits_async().await, 0);
}

#[tokio::test]
async fn second_start_is_rejected_while_building() {
    let server = MockServer::start_async().await;
    mock_order(&server).await;

    let executor = ScriptedExecutor::new().with_delay(Duration::from_millis(300));
    let (driver, _observer) = driver_with_observer(&server, test_config(&server));
    let driver = driver.with_executor(Arc::new(executor));

    let first = driver.start_layered_build(BuildRequest::new("flow-1")).unwrap();
    assert!(driver.is_building());

    let second = driver.start_build(BuildRequest::new("flow-1"));
    assert!(matches!(second.unwrap_err(), DriverError::BuildInProgress));

    let report = first.join().await.unwrap();
    assert!(report.is_valid());
    assert!(!driver.is_building());
}

#[tokio::test]
async fn pruned_branch_is_inactive_without_a_network_call() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/build/flow-1/order");
            then.status(200).json_body(json!({
                "ids": ["a", "b", "c"],
                "run_id": "run-1",
                "vertices_to_run": ["a", "c"],
            }));
        })
        .await;

    let executor = ScriptedExecutor::new();
    let (driver, _observer) = driver_with_observer(&server, test_config(&server));
    let driver = driver.with_executor(Arc::new(executor.clone()));

    let report = driver.build_layered(BuildRequest::new("flow-1")).await.unwrap();

    assert_eq!(executor.calls(), vec!["a".to_string(), "c".to_string()]);
    assert_eq!(driver.board().status("b"), Some(BuildStatus::Inactive));
    assert_eq!(driver.board().status("a"), Some(BuildStatus::Built));
    assert_eq!(driver.board().status("c"), Some(BuildStatus::Built));
    // Intentional pruning does not poison aggregate validity.
    assert!(report.is_valid());
    assert_eq!(report.summary.executed, 2);
}

#[tokio::test]
async fn failing_vertex_halts_later_layers() {
    let server = MockServer::start_async().await;
    mock_order(&server).await;

    let executor = ScriptedExecutor::new().respond("b", false);
    let (driver, observer) = driver_with_observer(&server, test_config(&server));
    let driver = driver.with_executor(Arc::new(executor.clone()));

    let report = driver.build_layered(BuildRequest::new("flow-1")).await.unwrap();

    assert_eq!(executor.calls(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(driver.board().status("b"), Some(BuildStatus::Error));
    assert_eq!(driver.board().status("c"), Some(BuildStatus::ToBuild));
    assert!(!report.is_valid());
    assert_eq!(report.summary.failed, 1);

    let failure = observer
        .snapshot()
        .into_iter()
        .find_map(|record| match record {
            ObserverRecord::Error(failure) => Some(failure),
            _ => None,
        })
        .expect("failure reported");
    assert_eq!(failure.vertex_id.as_deref(), Some("b"));
    assert!(failure.message.contains("b exploded"));
}

#[tokio::test]
async fn cancel_mid_build_stops_exactly_once_and_notifies_the_service() {
    let server = MockServer::start_async().await;
    mock_order(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/build/flow-1/flow")
                .query_param("event_delivery", "polling");
            then.status(200).json_body(json!({"job_id": "job-1"}));
        })
        .await;
    // The job never reports anything; every poll comes back empty.
    server
        .mock_async(|when, then| {
            when.method(GET).path("/build/job-1/events");
            then.status(200).body("");
        })
        .await;
    let cancel_endpoint = server
        .mock_async(|when, then| {
            when.method(POST).path("/build/job-1/cancel");
            then.status(200);
        })
        .await;

    let config = test_config(&server)
        .with_delivery(DeliveryMode::Polling)
        .with_poll_interval(Duration::from_secs(30));
    let (driver, observer) = driver_with_observer(&server, config);

    let handle = driver.start_build(BuildRequest::new("flow-1")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();
    let report = handle.join().await.unwrap();

    assert!(report.stopped(), "cancellation is not a failure");
    assert_eq!(stopped_count(&observer), 1);
    // Statuses stay wherever they last were; nothing is forcibly reset.
    for id in ["a", "b", "c"] {
        assert_eq!(driver.board().status(id), Some(BuildStatus::ToBuild));
    }

    // The fire-and-forget remote cancel lands shortly after.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while cancel_endpoint.hits_async().await == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "remote cancel was never sent"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn layered_cancel_leaves_in_flight_state_as_reached() {
    let server = MockServer::start_async().await;
    mock_order(&server).await;

    let executor = ScriptedExecutor::new().with_delay(Duration::from_millis(500));
    let (driver, observer) = driver_with_observer(&server, test_config(&server));
    let driver = driver.with_executor(Arc::new(executor.clone()));

    let handle = driver.start_layered_build(BuildRequest::new("flow-1")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();
    let report = handle.join().await.unwrap();

    assert!(report.stopped());
    assert_eq!(stopped_count(&observer), 1);
    // Only the first layer's vertex ever started.
    assert_eq!(executor.calls(), vec!["a".to_string()]);
    assert_eq!(driver.board().status("a"), Some(BuildStatus::Building));
    assert_eq!(driver.board().status("b"), Some(BuildStatus::ToBuild));
}

#[tokio::test]
async fn sorted_validator_rejection_aborts_the_attempt() {
    let server = MockServer::start_async().await;
    mock_order(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/build/flow-1/flow");
            then.status(200).body(linear_happy_script());
        })
        .await;

    let (driver, observer) = driver_with_observer(&server, test_config(&server));
    let driver = driver.with_sorted_validator(Arc::new(|_: &[String]| {
        Err("missing required inputs".to_string())
    }));

    let error = driver.build(BuildRequest::new("flow-1")).await.unwrap_err();
    assert!(matches!(error, DriverError::Rejected(_)));
    let any_vertex_done = observer
        .snapshot()
        .into_iter()
        .any(|record| matches!(record, ObserverRecord::VertexDone(_)));
    assert!(!any_vertex_done, "no vertex may run after rejection");
}
