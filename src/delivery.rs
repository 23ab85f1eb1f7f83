//! Event delivery strategies.
//!
//! Build progress arrives as NDJSON events over one of three wire
//! strategies: the build response body itself (DIRECT), a live stream opened
//! with a job id (STREAMING), or repeated polls of the events endpoint
//! (POLLING). [`EventFeed`] hides the difference behind one receiver: a pump
//! task reads the transport, reassembles NDJSON records, and forwards decoded
//! events over a channel until the terminal `end` event, a transport failure,
//! or cancellation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures_util::StreamExt;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::client::{ClientError, FlowClient};
use crate::events::event::{BuildEvent, EventParseError, NdjsonAssembler, parse_ndjson};

/// Wire strategy for obtaining build events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// The build response body is the event stream.
    Direct,
    /// Job-id handshake, then a live event stream.
    Streaming,
    /// Job-id handshake, then fixed-interval polls.
    Polling,
}

impl DeliveryMode {
    /// Value used in the build endpoint's `event_delivery` query parameter.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Streaming => "streaming",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "streaming" => Ok(Self::Streaming),
            "polling" => Ok(Self::Polling),
            other => Err(format!("unknown delivery mode: {other}")),
        }
    }
}

/// Failures while obtaining events.
#[derive(Debug, Error, Diagnostic)]
pub enum DeliveryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] ClientError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] EventParseError),
}

/// A unified source of build events.
///
/// Dropping the feed aborts its pump task, which closes the transport.
pub struct EventFeed {
    receiver: flume::Receiver<Result<BuildEvent, DeliveryError>>,
    pump: tokio::task::JoinHandle<()>,
}

impl EventFeed {
    /// Feed over a streamed response body (DIRECT and STREAMING).
    #[must_use]
    pub fn from_response(response: reqwest::Response, cancel: CancelToken) -> Self {
        let (tx, receiver) = flume::unbounded();
        let pump = tokio::spawn(async move {
            let mut assembler = NdjsonAssembler::new();
            let mut body = response.bytes_stream();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    chunk = body.next() => match chunk {
                        Some(Ok(bytes)) => match assembler.push(&bytes) {
                            Ok(events) => {
                                if forward(&tx, events) {
                                    return;
                                }
                            }
                            Err(error) => {
                                let _ = tx.send(Err(DeliveryError::Parse(error)));
                                return;
                            }
                        },
                        Some(Err(error)) => {
                            let _ = tx.send(Err(DeliveryError::Transport(error.into())));
                            return;
                        }
                        None => {
                            match assembler.finish() {
                                Ok(Some(event)) => {
                                    let _ = tx.send(Ok(event));
                                }
                                Ok(None) => {}
                                Err(error) => {
                                    let _ = tx.send(Err(DeliveryError::Parse(error)));
                                }
                            }
                            return;
                        }
                    },
                }
            }
        });
        Self { receiver, pump }
    }

    /// Feed over fixed-interval polls of the events endpoint (POLLING).
    ///
    /// An empty poll is not an error; the pump simply backs off for one
    /// interval and retries. The pump stops at the terminal `end` event.
    #[must_use]
    pub fn polling(
        client: FlowClient,
        job_id: String,
        interval: Duration,
        cancel: CancelToken,
    ) -> Self {
        let (tx, receiver) = flume::unbounded();
        let pump = tokio::spawn(async move {
            loop {
                let body = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    polled = client.poll_events(&job_id) => match polled {
                        Ok(body) => body,
                        Err(error) => {
                            let _ = tx.send(Err(DeliveryError::Transport(error)));
                            return;
                        }
                    },
                };
                match parse_ndjson(&body) {
                    Ok(events) => {
                        if events.is_empty() {
                            tracing::debug!(job_id = %job_id, "empty poll; backing off");
                        } else if forward(&tx, events) {
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(Err(DeliveryError::Parse(error)));
                        return;
                    }
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
        Self { receiver, pump }
    }

    /// Next event, or `None` once the feed is exhausted.
    pub async fn next(&mut self) -> Option<Result<BuildEvent, DeliveryError>> {
        self.receiver.recv_async().await.ok()
    }
}

impl Drop for EventFeed {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Forward decoded events, reporting whether the pump should stop (receiver
/// gone or terminal event sent).
fn forward(
    tx: &flume::Sender<Result<BuildEvent, DeliveryError>>,
    events: Vec<BuildEvent>,
) -> bool {
    for event in events {
        let is_end = event.is_end();
        if tx.send(Ok(event)).is_err() {
            return true;
        }
        if is_end {
            return true;
        }
    }
    false
}
