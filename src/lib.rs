//! # Flowbuild: Client-side Build Orchestration for AI Flow Graphs
//!
//! Flowbuild drives the execution of a component graph ("flow") against a
//! remote execution service: it asks the service's planner for a
//! dependency-respecting order, starts the build, consumes the per-component
//! event stream (live or polled), and maintains the status model the rest of
//! the application observes.
//!
//! ## Core Concepts
//!
//! - **Status board**: the shared vertex-id to build-status table
//! - **Execution plan**: a layered order where every dependency lands in a
//!   strictly earlier layer
//! - **Delivery strategy**: how events arrive: direct response body, live
//!   stream by job id, or fixed-interval polling, with a one-shot fallback
//!   to polling when live delivery is unavailable
//! - **Observer**: a capability interface the attempt reports progress to
//! - **Cancellation**: one cancellable handle per attempt, checked at every
//!   suspension point and propagated best-effort to the service
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use flowbuild::client::FlowClient;
//! use flowbuild::config::BuildConfig;
//! use flowbuild::driver::{BuildRequest, FlowDriver};
//! use flowbuild::events::MemoryObserver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FlowClient::new("http://localhost:7860/api/v1");
//! let observer = Arc::new(MemoryObserver::new());
//! let driver = FlowDriver::new(client, BuildConfig::default())
//!     .with_observer(observer.clone());
//!
//! let handle = driver.start_build(BuildRequest::new("my-flow"))?;
//! // ... hand `handle.cancel()` to a stop button if needed ...
//! let report = handle.join().await?;
//!
//! println!("valid: {}, executed: {}", report.is_valid(), report.summary.executed);
//! for (vertex, status) in driver.board().snapshot() {
//!     println!("{vertex}: {status}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Scoped Builds
//!
//! A build can be scoped to resume from a vertex or stop at one (never
//! both). Vertices outside the scope are marked inactive and never hit the
//! network:
//!
//! ```rust,no_run
//! use flowbuild::driver::BuildRequest;
//!
//! let from_middle = BuildRequest::new("my-flow").with_start_vertex("retriever");
//! let up_to_prompt = BuildRequest::new("my-flow").with_stop_vertex("prompt");
//! ```
//!
//! ## Module Guide
//!
//! - [`status`] - Shared build-status table
//! - [`order`] - Execution-order resolution and the layered sort
//! - [`events`] - Wire events, decoding, and observers
//! - [`delivery`] - DIRECT/STREAMING/POLLING event feeds
//! - [`driver`] - The build driver and attempt handles
//! - [`cancel`] - Cooperative cancellation primitives
//! - [`client`] - HTTP client for the execution service
//! - [`message`] - Chat messages and token deltas
//! - [`vertex`] - Per-vertex results and outcomes
//! - [`config`] - Orchestrator configuration
//! - [`telemetry`] - Tracing subscriber setup

pub mod cancel;
pub mod client;
pub mod config;
pub mod delivery;
pub mod driver;
pub mod events;
pub mod message;
pub mod order;
pub mod status;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod vertex;

pub use cancel::{CancelHandle, CancelToken};
pub use client::{ClientError, FlowClient};
pub use config::BuildConfig;
pub use delivery::DeliveryMode;
pub use driver::{BuildHandle, BuildReport, BuildRequest, DriverError, FlowDriver};
pub use events::{BuildEvent, BuildObserver, BuildSummary, EventDecoder};
pub use message::{ChatMessage, MessageStore, TokenDelta};
pub use order::{ExecutionPlan, GraphSpec, OrderRequest};
pub use status::{BuildStatus, StatusBoard};
pub use types::RunId;
pub use vertex::{VertexBuildResult, VertexOutcome};
