//! The build driver: sequencing, observation, and recovery of one attempt.
//!
//! [`FlowDriver`] owns the orchestration described in the crate docs: resolve
//! an execution order, obtain an event feed over the chosen delivery
//! strategy, decode events into status and observer effects, and recover via
//! the one-shot polling fallback when live delivery is unavailable. The
//! event-less layered path drives per-vertex build calls directly for
//! services without an event feed.
//!
//! At most one attempt is active per driver. [`FlowDriver::start_build`]
//! claims the active slot atomically and returns an owned [`BuildHandle`];
//! while a handle is outstanding, further starts are rejected rather than
//! queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

use crate::cancel::{CancelHandle, CancelToken};
use crate::client::{
    BuildInputs, BuildPayload, BuildQuery, BuildStarted, ClientError, FlowClient, VertexPayload,
};
use crate::config::BuildConfig;
use crate::delivery::{DeliveryError, DeliveryMode, EventFeed};
use crate::events::decoder::{DecodeError, DecodeStep, EventDecoder, SortedValidator};
use crate::events::event::EventParseError;
use crate::events::observer::{BuildFailure, BuildObserver, BuildSummary, NullObserver};
use crate::message::MessageStore;
use crate::order::{GraphSpec, OrderError, OrderRequest, resolve_order};
use crate::status::{BuildStatus, StatusBoard};
use crate::types::RunId;
use crate::vertex::{VertexBuildResult, VertexOutcome};

/// Executes a single vertex build.
///
/// The seam between the layer driver and the network: production code uses
/// [`FlowClient`]; tests substitute scripted executors.
#[async_trait]
pub trait VertexExecutor: Send + Sync {
    async fn execute(
        &self,
        flow_id: &str,
        vertex_id: &str,
        payload: &VertexPayload,
    ) -> Result<VertexBuildResult, ClientError>;
}

#[async_trait]
impl VertexExecutor for FlowClient {
    async fn execute(
        &self,
        flow_id: &str,
        vertex_id: &str,
        payload: &VertexPayload,
    ) -> Result<VertexBuildResult, ClientError> {
        self.build_vertex(flow_id, vertex_id, payload).await
    }
}

/// Everything needed to start one build attempt.
#[derive(Clone, Debug, Default)]
pub struct BuildRequest {
    pub flow_id: String,
    /// Resume from this vertex onward.
    pub start_vertex: Option<String>,
    /// Build up to and including this vertex.
    pub stop_vertex: Option<String>,
    /// Inline graph override for unsaved edits.
    pub graph: Option<GraphSpec>,
    pub inputs: BuildInputs,
    pub files: Vec<String>,
}

impl BuildRequest {
    #[must_use]
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_start_vertex(mut self, id: impl Into<String>) -> Self {
        self.start_vertex = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_stop_vertex(mut self, id: impl Into<String>) -> Self {
        self.stop_vertex = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_graph(mut self, graph: GraphSpec) -> Self {
        self.graph = Some(graph);
        self
    }

    #[must_use]
    pub fn with_input_value(mut self, value: impl Into<String>) -> Self {
        self.inputs.input_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.inputs.session = Some(session.into());
        self
    }

    fn order_request(&self) -> OrderRequest {
        OrderRequest {
            flow_id: self.flow_id.clone(),
            start_vertex: self.start_vertex.clone(),
            stop_vertex: self.stop_vertex.clone(),
            graph: self.graph.clone(),
        }
    }

    fn build_payload(&self) -> BuildPayload {
        BuildPayload {
            inputs: (!self.inputs.is_empty()).then(|| self.inputs.clone()),
            files: self.files.clone(),
            data: self.graph.clone(),
        }
    }

    fn vertex_payload(&self) -> VertexPayload {
        VertexPayload {
            inputs: (!self.inputs.is_empty()).then(|| self.inputs.clone()),
            files: self.files.clone(),
        }
    }
}

/// Final report of one attempt.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub summary: BuildSummary,
    /// Strategy that delivered the events; `None` for the event-less layered
    /// path and attempts cancelled before any delivery started.
    pub delivery: Option<DeliveryMode>,
    /// True when the attempt was transparently restarted with polling.
    pub fell_back: bool,
}

impl BuildReport {
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.summary.run_id
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.summary.valid
    }

    #[must_use]
    pub fn stopped(&self) -> bool {
        self.summary.stopped
    }
}

/// Failures that end an attempt without a report.
#[derive(Debug, Error, Diagnostic)]
pub enum DriverError {
    #[error("a build attempt is already active for this driver")]
    #[diagnostic(
        code(flowbuild::driver::busy),
        help("cancel or join the outstanding attempt before starting another")
    )]
    BuildInProgress,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Order(#[from] OrderError),

    /// Event delivery failed and the polling fallback was exhausted (or not
    /// applicable).
    #[error("event delivery failed: {source}")]
    #[diagnostic(
        code(flowbuild::driver::transport),
        help("the execution service could not deliver build events")
    )]
    Transport { source: ClientError },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Protocol(#[from] EventParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rejected(#[from] DecodeError),

    #[error("build task join error: {0}")]
    #[diagnostic(code(flowbuild::driver::join))]
    Join(#[from] JoinError),
}

/// Internal attempt classification: retryable failures feed the one-shot
/// polling fallback, fatal ones surface immediately.
enum AttemptError {
    Retryable(ClientError),
    Fatal(DriverError),
}

/// Owned handle to an in-flight attempt.
///
/// Dropping the handle does not cancel the build; it keeps running and
/// releases the driver's active slot when it finishes.
#[derive(Debug)]
pub struct BuildHandle {
    run: tokio::task::JoinHandle<Result<BuildReport, DriverError>>,
    cancel: CancelHandle,
}

impl BuildHandle {
    /// Request cancellation of the attempt. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the attempt to finish.
    ///
    /// A cancelled attempt still resolves `Ok`, with
    /// [`BuildReport::stopped`] set; cancellation is not a failure.
    pub async fn join(self) -> Result<BuildReport, DriverError> {
        self.run.await?
    }
}

/// Releases the driver's active-attempt slot when the attempt ends, however
/// it ends.
struct AttemptSlot(Arc<AtomicBool>);

impl Drop for AttemptSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Client-side build orchestrator for one flow session.
///
/// Cloning shares the status board, message store, observer, and the
/// single-active-attempt slot.
#[derive(Clone)]
pub struct FlowDriver {
    client: FlowClient,
    config: BuildConfig,
    board: StatusBoard,
    messages: MessageStore,
    observer: Arc<dyn BuildObserver>,
    executor: Arc<dyn VertexExecutor>,
    sorted_validator: Option<SortedValidator>,
    active: Arc<AtomicBool>,
}

impl FlowDriver {
    #[must_use]
    pub fn new(client: FlowClient, config: BuildConfig) -> Self {
        let executor: Arc<dyn VertexExecutor> = Arc::new(client.clone());
        Self {
            client,
            config,
            board: StatusBoard::new(),
            messages: MessageStore::new(),
            observer: Arc::new(NullObserver),
            executor,
            sorted_validator: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the observer all attempts report to.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Check the sorted vertex set before any vertex builds; rejection
    /// aborts the attempt.
    #[must_use]
    pub fn with_sorted_validator(mut self, validator: SortedValidator) -> Self {
        self.sorted_validator = Some(validator);
        self
    }

    /// Substitute the per-vertex executor used by the layered path.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn VertexExecutor>) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    #[must_use]
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// True while an attempt is outstanding.
    #[must_use]
    pub fn is_building(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start an event-driven build attempt.
    ///
    /// Rejects with [`DriverError::BuildInProgress`] while another attempt is
    /// outstanding; the check-and-claim is a single atomic step, so two
    /// starts cannot both pass it.
    pub fn start_build(&self, request: BuildRequest) -> Result<BuildHandle, DriverError> {
        let slot = self.claim_slot()?;
        let (cancel, token) = CancelHandle::new();
        let driver = self.clone();
        let run = tokio::spawn(async move {
            let _slot = slot;
            driver.run_attempt(request, token).await
        });
        Ok(BuildHandle { run, cancel })
    }

    /// Run an event-driven build attempt to completion.
    pub async fn build(&self, request: BuildRequest) -> Result<BuildReport, DriverError> {
        self.start_build(request)?.join().await
    }

    /// Start an event-less layered build attempt (legacy path).
    pub fn start_layered_build(&self, request: BuildRequest) -> Result<BuildHandle, DriverError> {
        let slot = self.claim_slot()?;
        let (cancel, token) = CancelHandle::new();
        let driver = self.clone();
        let run = tokio::spawn(async move {
            let _slot = slot;
            driver.run_layered_attempt(request, token).await
        });
        Ok(BuildHandle { run, cancel })
    }

    /// Run an event-less layered build attempt to completion.
    pub async fn build_layered(&self, request: BuildRequest) -> Result<BuildReport, DriverError> {
        self.start_layered_build(request)?.join().await
    }

    fn claim_slot(&self) -> Result<AttemptSlot, DriverError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(AttemptSlot(self.active.clone()))
        } else {
            Err(DriverError::BuildInProgress)
        }
    }

    fn notify_stopped(&self, stop_gate: &AtomicBool) {
        if !stop_gate.swap(true, Ordering::SeqCst) {
            self.observer.on_stopped();
        }
    }

    /// Surface a failed vertex as a chat error message and report it upward.
    fn report_vertex_failure(&self, vertex_id: &str, text: String) {
        let chat = crate::message::ChatMessage::error(&text);
        self.messages.add(chat.clone());
        self.observer
            .on_message(&crate::events::observer::MessageUpdate::Added(chat));
        self.observer.on_error(&BuildFailure {
            vertex_id: Some(vertex_id.to_string()),
            message: text,
        });
    }

    fn spawn_remote_cancel(&self, job_id: String) {
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.cancel_build(&job_id).await {
                Ok(()) => tracing::debug!(job_id = %job_id, "remote build cancelled"),
                Err(error) => tracing::warn!(
                    job_id = %job_id,
                    error = %error,
                    "remote cancel failed; the job may keep running server-side"
                ),
            }
        });
    }

    fn stopped_before_start(&self, stop_gate: &AtomicBool) -> BuildReport {
        self.stopped_report(RunId::generate(), stop_gate)
    }

    /// Report for an attempt cancelled before any vertex produced a result.
    fn stopped_report(&self, run_id: RunId, stop_gate: &AtomicBool) -> BuildReport {
        self.notify_stopped(stop_gate);
        let summary = BuildSummary {
            run_id,
            valid: true,
            executed: 0,
            failed: 0,
            stopped: true,
        };
        self.observer.on_complete(&summary);
        BuildReport {
            summary,
            delivery: None,
            fell_back: false,
        }
    }

    #[instrument(skip_all, fields(flow_id = %request.flow_id))]
    async fn run_attempt(
        self,
        request: BuildRequest,
        cancel: CancelToken,
    ) -> Result<BuildReport, DriverError> {
        let stop_gate = AtomicBool::new(false);
        let mut mode = self.config.delivery.unwrap_or(DeliveryMode::Direct);
        let mut fell_back = false;
        loop {
            match self.attempt_once(&request, &cancel, mode, &stop_gate).await {
                Ok(mut report) => {
                    report.fell_back = fell_back;
                    return Ok(report);
                }
                Err(AttemptError::Retryable(source))
                    if !fell_back && mode != DeliveryMode::Polling =>
                {
                    tracing::warn!(
                        error = %source,
                        from = %mode,
                        "live event delivery failed; restarting attempt with polling"
                    );
                    fell_back = true;
                    mode = DeliveryMode::Polling;
                }
                Err(AttemptError::Retryable(source)) => {
                    return Err(DriverError::Transport { source });
                }
                Err(AttemptError::Fatal(error)) => return Err(error),
            }
        }
    }

    /// One full event-driven attempt at a fixed delivery mode.
    async fn attempt_once(
        &self,
        request: &BuildRequest,
        cancel: &CancelToken,
        mode: DeliveryMode,
        stop_gate: &AtomicBool,
    ) -> Result<BuildReport, AttemptError> {
        let order_request = request.order_request();
        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.stopped_before_start(stop_gate)),
            resolved = resolve_order(&self.client, &self.board, &order_request) => {
                resolved.map_err(|error| AttemptError::Fatal(DriverError::Order(error)))?
            }
        };

        let (mut feed, job_id) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(self.stopped_report(plan.run_id, stop_gate));
            }
            opened = self.open_feed(request, mode, cancel) => {
                opened.map_err(AttemptError::Retryable)?
            }
        };

        let mut decoder = EventDecoder::new(
            self.board.clone(),
            self.messages.clone(),
            self.observer.clone(),
            plan.run_id.clone(),
        )
        .with_min_vertex_duration(self.config.min_vertex_duration);
        if let Some(validator) = &self.sorted_validator {
            decoder = decoder.with_sorted_validator(validator.clone());
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Tear the transport down first, then tell the service.
                    drop(feed);
                    if let Some(job_id) = job_id {
                        self.spawn_remote_cancel(job_id);
                    }
                    self.notify_stopped(stop_gate);
                    let summary = decoder.finalize(true);
                    return Ok(BuildReport {
                        summary,
                        delivery: Some(mode),
                        fell_back: false,
                    });
                }
                item = feed.next() => match item {
                    Some(Ok(event)) => match decoder.apply(event).await {
                        Ok(DecodeStep::Continue) => {}
                        Ok(DecodeStep::Finished(summary)) => {
                            return Ok(BuildReport {
                                summary,
                                delivery: Some(mode),
                                fell_back: false,
                            });
                        }
                        Err(error) => {
                            return Err(AttemptError::Fatal(DriverError::Rejected(error)));
                        }
                    },
                    Some(Err(DeliveryError::Transport(source))) => {
                        return Err(AttemptError::Retryable(source));
                    }
                    Some(Err(DeliveryError::Parse(error))) => {
                        return Err(AttemptError::Fatal(DriverError::Protocol(error)));
                    }
                    None => {
                        // Feed exhausted without a terminal event: the stream
                        // was aborted server-side. Statuses stay as reached.
                        let summary = decoder.finalize(false);
                        return Ok(BuildReport {
                            summary,
                            delivery: Some(mode),
                            fell_back: false,
                        });
                    }
                },
            }
        }
    }

    async fn open_feed(
        &self,
        request: &BuildRequest,
        mode: DeliveryMode,
        cancel: &CancelToken,
    ) -> Result<(EventFeed, Option<String>), ClientError> {
        let payload = request.build_payload();
        let query = BuildQuery {
            start_vertex: request.start_vertex.clone(),
            stop_vertex: request.stop_vertex.clone(),
            log_builds: self.config.log_builds,
            delivery: mode,
        };
        let started = self
            .client
            .start_build(&request.flow_id, &payload, &query)
            .await?;
        match started {
            BuildStarted::Stream(response) => {
                Ok((EventFeed::from_response(response, cancel.clone()), None))
            }
            BuildStarted::Job(job_id) => {
                let feed = match mode {
                    DeliveryMode::Polling => EventFeed::polling(
                        self.client.clone(),
                        job_id.clone(),
                        self.config.poll_interval,
                        cancel.clone(),
                    ),
                    _ => {
                        let response = self.client.open_event_stream(&job_id).await?;
                        EventFeed::from_response(response, cancel.clone())
                    }
                };
                Ok((feed, Some(job_id)))
            }
        }
    }

    #[instrument(skip_all, fields(flow_id = %request.flow_id))]
    async fn run_layered_attempt(
        self,
        request: BuildRequest,
        cancel: CancelToken,
    ) -> Result<BuildReport, DriverError> {
        let stop_gate = AtomicBool::new(false);
        let order_request = request.order_request();
        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.stopped_before_start(&stop_gate)),
            resolved = resolve_order(&self.client, &self.board, &order_request) => resolved?,
        };
        self.observer
            .on_ordered(&plan.run_id, &plan.flattened_ids(), &plan.vertices_to_run);

        let payload = request.vertex_payload();
        let mut outcomes: Vec<VertexOutcome> = Vec::new();

        'layers: for layer in &plan.layers {
            if cancel.is_cancelled() {
                break;
            }
            let mut in_flight = Vec::new();
            for vertex_id in layer {
                if !plan.should_run(vertex_id) {
                    self.board.set(vertex_id.as_str(), BuildStatus::Inactive);
                    let outcome = VertexOutcome::Inactive {
                        id: vertex_id.clone(),
                    };
                    self.observer.on_vertex_done(&outcome);
                    outcomes.push(outcome);
                    continue;
                }
                in_flight.push(self.build_one_vertex(
                    &request.flow_id,
                    vertex_id.clone(),
                    &payload,
                    cancel.clone(),
                ));
            }

            // Structured join: the layer is complete only when every request
            // in it settled, so a failure never orphans in-flight work.
            let settled = futures_util::future::join_all(in_flight).await;
            let mut layer_failed = false;
            for outcome in settled.into_iter().flatten() {
                if matches!(outcome, VertexOutcome::Errored { .. }) {
                    layer_failed = true;
                }
                self.observer.on_vertex_done(&outcome);
                outcomes.push(outcome);
            }

            if cancel.is_cancelled() {
                break 'layers;
            }
            if layer_failed {
                tracing::warn!(run_id = %plan.run_id, "layer failed; later layers not started");
                break 'layers;
            }
        }

        let stopped = cancel.is_cancelled();
        if stopped {
            self.notify_stopped(&stop_gate);
        }
        let executed = outcomes.iter().filter(|o| o.executed()).count();
        let failed = outcomes
            .iter()
            .filter(|o| o.executed() && !o.is_valid())
            .count();
        let summary = BuildSummary {
            run_id: plan.run_id.clone(),
            valid: failed == 0,
            executed,
            failed,
            stopped,
        };
        self.observer.on_complete(&summary);
        Ok(BuildReport {
            summary,
            delivery: None,
            fell_back: false,
        })
    }

    async fn build_one_vertex(
        &self,
        flow_id: &str,
        vertex_id: String,
        payload: &VertexPayload,
        cancel: CancelToken,
    ) -> Option<VertexOutcome> {
        self.board.set(vertex_id.as_str(), BuildStatus::Building);
        let started = tokio::time::Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(vertex = %vertex_id, "vertex build abandoned by cancellation");
                return None;
            }
            result = self.executor.execute(flow_id, &vertex_id, payload) => result,
        };

        // Minimum visible duration: hold the terminal state back so fast
        // vertices are still observable as building.
        let elapsed = started.elapsed();
        if elapsed < self.config.min_vertex_duration {
            tokio::time::sleep(self.config.min_vertex_duration - elapsed).await;
        }

        match result {
            Ok(result) if result.valid => {
                self.board.set(vertex_id.as_str(), BuildStatus::Built);
                Some(VertexOutcome::Built(result))
            }
            Ok(result) => {
                let messages = result.error_messages();
                self.board.set(vertex_id.as_str(), BuildStatus::Error);
                self.report_vertex_failure(&vertex_id, messages.join("\n"));
                Some(VertexOutcome::Errored {
                    id: vertex_id,
                    messages,
                })
            }
            Err(error) => {
                let message = error.to_string();
                self.board.set(vertex_id.as_str(), BuildStatus::Error);
                self.report_vertex_failure(&vertex_id, message.clone());
                Some(VertexOutcome::Errored {
                    id: vertex_id,
                    messages: vec![message],
                })
            }
        }
    }
}
