//! Scripted vertex executors for layered-driver tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use flowbuild::client::{ClientError, VertexPayload};
use flowbuild::driver::VertexExecutor;
use flowbuild::vertex::VertexBuildResult;

use super::fixtures::vertex_result;

/// Executor returning scripted results, recording every call.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    results: Arc<Mutex<Vec<(String, VertexBuildResult)>>>,
    calls: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to widen cancellation windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn respond(self, id: &str, valid: bool) -> Self {
        self.results
            .lock()
            .unwrap()
            .push((id.to_string(), vertex_result(id, valid, &[])));
        self
    }

    /// Vertex ids in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VertexExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _flow_id: &str,
        vertex_id: &str,
        _payload: &VertexPayload,
    ) -> Result<VertexBuildResult, ClientError> {
        self.calls.lock().unwrap().push(vertex_id.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self
            .results
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == vertex_id)
            .map(|(_, result)| result.clone());
        Ok(scripted.unwrap_or_else(|| vertex_result(vertex_id, true, &[])))
    }
}
