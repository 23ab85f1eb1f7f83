//! HTTP client for the flow execution service.
//!
//! [`FlowClient`] wraps a shared `reqwest::Client` and speaks the five
//! endpoints the orchestrator needs: order resolution, build start, event
//! retrieval (streamed or polled), job cancellation, and the legacy
//! per-vertex build. It classifies responses but carries no build state;
//! strategy and recovery live in [`crate::delivery`] and [`crate::driver`].

use miette::Diagnostic;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delivery::DeliveryMode;
use crate::order::{GraphSpec, OrderRequest, OrderResponse};
use crate::vertex::VertexBuildResult;

/// Transport failures, classified for the fallback logic.
#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    #[error("request to the execution service failed: {source}")]
    #[diagnostic(
        code(flowbuild::client::http),
        help("check that the execution service is running and reachable")
    )]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// The route does not exist on this service (HTTP 404). Drives the
    /// one-shot fallback to polling delivery.
    #[error("{endpoint} endpoint not available on this service")]
    #[diagnostic(
        code(flowbuild::client::not_available),
        help("the service does not support this delivery strategy; polling is used instead")
    )]
    NotAvailable { endpoint: String },

    #[error("{endpoint} endpoint returned status {status}: {detail}")]
    #[diagnostic(code(flowbuild::client::status))]
    Status {
        status: u16,
        endpoint: String,
        detail: String,
    },
}

/// Inputs forwarded to the build endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl BuildInputs {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_value.is_none() && self.session.is_none()
    }
}

/// Body of the build POST.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BuildPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<BuildInputs>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<GraphSpec>,
}

/// Query parameters of the build POST.
#[derive(Clone, Debug)]
pub struct BuildQuery {
    pub start_vertex: Option<String>,
    pub stop_vertex: Option<String>,
    pub log_builds: bool,
    pub delivery: DeliveryMode,
}

/// Result of starting a build: either the live event body itself (DIRECT) or
/// a job id to fetch events with (STREAMING/POLLING).
#[derive(Debug)]
pub enum BuildStarted {
    Stream(reqwest::Response),
    Job(String),
}

/// Body of the legacy per-vertex build POST.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VertexPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<BuildInputs>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JobRef {
    job_id: String,
}

/// Client for the execution service's build API.
///
/// Cloning shares the underlying connection pool.
#[derive(Clone, Debug)]
pub struct FlowClient {
    http: reqwest::Client,
    base_url: String,
}

impl FlowClient {
    /// Client against a base URL such as `http://localhost:7860/api/v1`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url)
    }

    /// Client reusing an existing `reqwest::Client`.
    #[must_use]
    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { http, base_url }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn ensure_success(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotAvailable {
                endpoint: endpoint.to_string(),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                detail,
            });
        }
        Ok(response)
    }

    /// Ask the planner for a dependency-respecting order.
    pub async fn resolve_order(
        &self,
        request: &OrderRequest,
    ) -> Result<OrderResponse, ClientError> {
        let url = format!("{}/build/{}/order", self.base_url, request.flow_id);
        let mut builder = self.http.post(&url);
        if let Some(start) = &request.start_vertex {
            builder = builder.query(&[("start_vertex_id", start.as_str())]);
        }
        if let Some(stop) = &request.stop_vertex {
            builder = builder.query(&[("stop_vertex_id", stop.as_str())]);
        }
        if let Some(graph) = &request.graph {
            builder = builder.json(&serde_json::json!({ "data": graph }));
        } else {
            builder = builder.json(&serde_json::json!({}));
        }
        let response = Self::ensure_success(builder.send().await?, "order").await?;
        Ok(response.json().await?)
    }

    /// Start a build attempt with the given delivery strategy.
    pub async fn start_build(
        &self,
        flow_id: &str,
        payload: &BuildPayload,
        query: &BuildQuery,
    ) -> Result<BuildStarted, ClientError> {
        let url = format!("{}/build/{}/flow", self.base_url, flow_id);
        let mut builder = self
            .http
            .post(&url)
            .json(payload)
            .query(&[("event_delivery", query.delivery.as_str())])
            .query(&[("log_builds", query.log_builds)]);
        if let Some(start) = &query.start_vertex {
            builder = builder.query(&[("start_vertex_id", start.as_str())]);
        }
        if let Some(stop) = &query.stop_vertex {
            builder = builder.query(&[("stop_vertex_id", stop.as_str())]);
        }
        let response = Self::ensure_success(builder.send().await?, "build").await?;

        if query.delivery == DeliveryMode::Direct {
            return Ok(BuildStarted::Stream(response));
        }
        let job: JobRef = response.json().await?;
        Ok(BuildStarted::Job(job.job_id))
    }

    /// Open the live event stream for a job.
    pub async fn open_event_stream(&self, job_id: &str) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}/build/{}/events", self.base_url, job_id);
        let response = self
            .http
            .get(&url)
            .query(&[("stream", "true")])
            .send()
            .await?;
        Self::ensure_success(response, "events").await
    }

    /// Fetch one poll's worth of NDJSON event records. An empty body means
    /// nothing happened since the last poll.
    pub async fn poll_events(&self, job_id: &str) -> Result<String, ClientError> {
        let url = format!("{}/build/{}/events", self.base_url, job_id);
        let response = self
            .http
            .get(&url)
            .query(&[("stream", "false")])
            .send()
            .await?;
        let response = Self::ensure_success(response, "events").await?;
        Ok(response.text().await?)
    }

    /// Best-effort remote cancellation of a job.
    pub async fn cancel_build(&self, job_id: &str) -> Result<(), ClientError> {
        let url = format!("{}/build/{}/cancel", self.base_url, job_id);
        let response = self.http.post(&url).send().await?;
        Self::ensure_success(response, "cancel").await?;
        Ok(())
    }

    /// Legacy per-vertex build call.
    pub async fn build_vertex(
        &self,
        flow_id: &str,
        vertex_id: &str,
        payload: &VertexPayload,
    ) -> Result<VertexBuildResult, ClientError> {
        let url = format!(
            "{}/build/{}/vertices/{}",
            self.base_url, flow_id, vertex_id
        );
        let response = self.http.post(&url).json(payload).send().await?;
        let response = Self::ensure_success(response, "vertex build").await?;
        Ok(response.json().await?)
    }
}
