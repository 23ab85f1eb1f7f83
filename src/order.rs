//! Execution-order resolution.
//!
//! Before anything builds, the external planner is asked for a
//! dependency-respecting order over the flow graph, optionally scoped to a
//! start or stop vertex. The resolver normalizes the planner's answer into an
//! [`ExecutionPlan`] of layers, marks every vertex that will run as
//! `ToBuild`, and refuses obviously broken requests before touching the
//! network.
//!
//! Planner failures are graph errors: the graph itself is presumed broken
//! (cycle, unresolved dependency), so resolution is never retried
//! automatically.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::client::{ClientError, FlowClient};
use crate::status::StatusBoard;
use crate::types::RunId;

/// Inline graph payload for flows that are not saved server-side.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

impl GraphSpec {
    /// Edges as (source, target) id pairs.
    #[must_use]
    pub fn edge_pairs(&self) -> Vec<(String, String)> {
        self.edges
            .iter()
            .map(|edge| (edge.source.clone(), edge.target.clone()))
            .collect()
    }

    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|node| node.id.clone()).collect()
    }
}

/// What the resolver is asked to order.
#[derive(Clone, Debug, Default)]
pub struct OrderRequest {
    pub flow_id: String,
    /// Resume from this vertex onward.
    pub start_vertex: Option<String>,
    /// Build up to and including this vertex.
    pub stop_vertex: Option<String>,
    /// Explicit node/edge override for unsaved edits.
    pub graph: Option<GraphSpec>,
}

impl OrderRequest {
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
}

/// Planner wire response. Both historical shapes of `ids` are accepted:
/// a flat topological order or pre-grouped layers.
#[derive(Clone, Debug, Deserialize)]
pub struct OrderResponse {
    pub ids: OrderedIds,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub vertices_to_run: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum OrderedIds {
    Layered(Vec<Vec<String>>),
    Flat(Vec<String>),
}

impl OrderedIds {
    /// Normalize to layers. A flat topological order becomes one singleton
    /// layer per id, which trivially keeps every dependency in a strictly
    /// earlier layer.
    #[must_use]
    pub fn into_layers(self) -> Vec<Vec<String>> {
        match self {
            Self::Layered(layers) => layers,
            Self::Flat(ids) => ids.into_iter().map(|id| vec![id]).collect(),
        }
    }
}

/// A resolved, layered execution order for one attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub run_id: RunId,
    /// Every dependency of a vertex appears in a strictly earlier layer.
    pub layers: Vec<Vec<String>>,
    /// The subset of vertices that must actually execute for this scope.
    pub vertices_to_run: Vec<String>,
}

impl ExecutionPlan {
    /// True when the vertex is part of this attempt's executing subset.
    #[must_use]
    pub fn should_run(&self, id: &str) -> bool {
        self.vertices_to_run.iter().any(|run| run == id)
    }

    /// All planned ids in layer order.
    #[must_use]
    pub fn flattened_ids(&self) -> Vec<String> {
        self.layers.iter().flatten().cloned().collect()
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }
}

/// Failures while resolving an execution order.
#[derive(Debug, Error, Diagnostic)]
pub enum OrderError {
    #[error("start and stop vertex cannot both be set")]
    #[diagnostic(
        code(flowbuild::order::conflicting_scope),
        help("scope a build from a vertex or up to a vertex, not both")
    )]
    ConflictingScope,

    #[error("invalid graph: {detail}")]
    #[diagnostic(
        code(flowbuild::order::invalid_graph),
        help("fix the flow before rebuilding; order resolution is not retried")
    )]
    InvalidGraph { detail: String },

    #[error("order endpoint unreachable: {source}")]
    #[diagnostic(code(flowbuild::order::transport))]
    Transport {
        #[from]
        source: ClientError,
    },
}

/// Layered topological sort by in-degree waves.
///
/// Wave N contains every vertex whose dependencies are all satisfied by
/// earlier waves. A dangling edge endpoint or a cycle is an invalid graph.
///
/// # Examples
///
/// ```rust
/// use flowbuild::order::layer_sort;
///
/// let nodes = ["a".to_string(), "b".to_string(), "c".to_string()];
/// let edges = [("a".to_string(), "b".to_string()), ("a".to_string(), "c".to_string())];
/// let layers = layer_sort(&nodes, &edges).unwrap();
/// assert_eq!(layers, vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()]]);
/// ```
pub fn layer_sort(
    nodes: &[String],
    edges: &[(String, String)],
) -> Result<Vec<Vec<String>>, OrderError> {
    let known: FxHashSet<&str> = nodes.iter().map(String::as_str).collect();
    let mut in_degree: FxHashMap<&str, usize> =
        nodes.iter().map(|id| (id.as_str(), 0)).collect();
    let mut successors: FxHashMap<&str, Vec<&str>> = FxHashMap::default();

    for (source, target) in edges {
        if !known.contains(source.as_str()) || !known.contains(target.as_str()) {
            return Err(OrderError::InvalidGraph {
                detail: format!("edge {source} -> {target} references an unknown vertex"),
            });
        }
        *in_degree.entry(target.as_str()).or_default() += 1;
        successors
            .entry(source.as_str())
            .or_default()
            .push(target.as_str());
    }

    let mut layers: Vec<Vec<String>> = Vec::new();
    // Seed from declaration order so the result is deterministic.
    let mut wave: Vec<&str> = nodes
        .iter()
        .map(String::as_str)
        .filter(|id| in_degree[id] == 0)
        .collect();
    let mut placed = 0;

    while !wave.is_empty() {
        placed += wave.len();
        let mut next: Vec<&str> = Vec::new();
        for id in &wave {
            for successor in successors.get(id).into_iter().flatten() {
                let degree = in_degree
                    .get_mut(successor)
                    .expect("successor counted during edge scan");
                *degree -= 1;
                if *degree == 0 {
                    next.push(successor);
                }
            }
        }
        layers.push(wave.iter().map(|id| (*id).to_string()).collect());
        wave = next;
    }

    if placed != nodes.len() {
        return Err(OrderError::InvalidGraph {
            detail: "dependency cycle detected".to_string(),
        });
    }
    Ok(layers)
}

/// Ask the planner for this attempt's execution order.
///
/// Marks every id in `vertices_to_run` as `ToBuild` on the board before
/// returning, so observers see pending state before the first vertex starts.
pub async fn resolve_order(
    client: &FlowClient,
    board: &StatusBoard,
    request: &OrderRequest,
) -> Result<ExecutionPlan, OrderError> {
    if request.start_vertex.is_some() && request.stop_vertex.is_some() {
        return Err(OrderError::ConflictingScope);
    }
    if let Some(graph) = &request.graph {
        // Validate inline graphs locally; a broken override should fail
        // before the planner round-trip.
        layer_sort(&graph.node_ids(), &graph.edge_pairs())?;
    }

    let response = client.resolve_order(request).await.map_err(|error| match error {
        ClientError::Status { detail, .. } => OrderError::InvalidGraph { detail },
        other => OrderError::Transport { source: other },
    })?;

    let layers = response.ids.into_layers();
    if layers.iter().all(Vec::is_empty) {
        return Err(OrderError::InvalidGraph {
            detail: "planner returned an empty order".to_string(),
        });
    }

    let plan = ExecutionPlan {
        run_id: response
            .run_id
            .map(RunId::new)
            .unwrap_or_else(RunId::generate),
        layers,
        vertices_to_run: response.vertices_to_run,
    };

    board.mark_to_build(plan.vertices_to_run.iter().cloned());
    tracing::debug!(
        run_id = %plan.run_id,
        layers = plan.layers.len(),
        to_run = plan.vertices_to_run.len(),
        "execution order resolved"
    );
    Ok(plan)
}
