//! Event feed behavior over mocked transports.

use std::time::Duration;

use httpmock::prelude::*;

use flowbuild::cancel::CancelHandle;
use flowbuild::client::FlowClient;
use flowbuild::delivery::EventFeed;
use flowbuild::events::BuildEvent;

mod common;
use common::*;

async fn drain(feed: &mut EventFeed) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    while let Some(item) = feed.next().await {
        events.push(item.expect("feed item"));
    }
    events
}

#[tokio::test]
async fn streamed_body_yields_all_events() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/stream");
            then.status(200).body(linear_happy_script());
        })
        .await;

    let response = reqwest::get(format!("{}/stream", server.base_url()))
        .await
        .unwrap();
    let (_handle, token) = CancelHandle::new();
    let mut feed = EventFeed::from_response(response, token);

    let events = drain(&mut feed).await;
    assert_eq!(events.len(), 5);
    assert!(events.last().unwrap().is_end());
}

#[tokio::test]
async fn body_without_trailing_newline_still_parses() {
    let server = MockServer::start_async().await;
    let mut body = linear_happy_script();
    body.pop();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/stream");
            then.status(200).body(body);
        })
        .await;

    let response = reqwest::get(format!("{}/stream", server.base_url()))
        .await
        .unwrap();
    let (_handle, token) = CancelHandle::new();
    let mut feed = EventFeed::from_response(response, token);
    let events = drain(&mut feed).await;
    assert_eq!(events.len(), 5);
}

#[tokio::test]
async fn polling_feed_forwards_events_and_stops_at_end() {
    let server = MockServer::start_async().await;
    let events_mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/build/job-1/events")
                .query_param("stream", "false");
            then.status(200).body(linear_happy_script());
        })
        .await;

    let client = FlowClient::new(server.base_url());
    let (_handle, token) = CancelHandle::new();
    let mut feed = EventFeed::polling(client, "job-1".into(), Duration::from_millis(10), token);

    let events = drain(&mut feed).await;
    assert_eq!(events.len(), 5);
    assert!(events.last().unwrap().is_end());
    // The pump stopped at `end`: exactly one poll happened.
    assert_eq!(events_mock.hits_async().await, 1);
}

#[tokio::test]
async fn empty_polls_back_off_and_keep_polling() {
    let server = MockServer::start_async().await;
    let events_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/build/job-1/events");
            then.status(200).body("");
        })
        .await;

    let client = FlowClient::new(server.base_url());
    let (_handle, token) = CancelHandle::new();
    let mut feed = EventFeed::polling(client, "job-1".into(), Duration::from_millis(20), token);

    // No events, no error, just repeated polling.
    let waited = tokio::time::timeout(Duration::from_millis(150), feed.next()).await;
    assert!(waited.is_err(), "an empty poll must not end the feed");
    assert!(events_mock.hits_async().await >= 2);
}

#[tokio::test]
async fn cancellation_ends_the_feed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/build/job-1/events");
            then.status(200).body("");
        })
        .await;

    let client = FlowClient::new(server.base_url());
    let (handle, token) = CancelHandle::new();
    let mut feed = EventFeed::polling(client, "job-1".into(), Duration::from_secs(30), token);

    handle.cancel();
    let next = tokio::time::timeout(Duration::from_secs(1), feed.next())
        .await
        .expect("cancelled feed must end promptly");
    assert!(next.is_none());
}

#[tokio::test]
async fn transport_failure_surfaces_once_then_ends() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/build/job-1/events");
            then.status(404);
        })
        .await;

    let client = FlowClient::new(server.base_url());
    let (_handle, token) = CancelHandle::new();
    let mut feed = EventFeed::polling(client, "job-1".into(), Duration::from_millis(10), token);

    let first = feed.next().await.expect("one item");
    assert!(first.is_err());
    assert!(feed.next().await.is_none());
}
