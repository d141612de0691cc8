//! OperationSets: a DAG of operations plus the linear paths an external
//! graph compiler materialized from it. The agent only reads them; path
//! order and node order within a path are preserved exactly as authored.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ObjectMeta;

/// Cluster-scoped DAG of operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSet {
    pub metadata: ObjectMeta,
    pub spec: OperationSetSpec,
    #[serde(default)]
    pub status: OperationSetStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSetSpec {
    /// Adjacency list over operation names. Node 0 is the virtual source.
    pub adjacency_list: Vec<AdjacencyNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSetStatus {
    /// Set by the graph compiler once `paths` reflects `adjacency_list`.
    #[serde(default)]
    pub ready: bool,
    /// Topologically valid linear sequences through the DAG, in the order
    /// the compiler materialized them.
    #[serde(default)]
    pub paths: Vec<Path>,
}

/// One node of the adjacency list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjacencyNode {
    pub id: usize,
    /// Successor node ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<usize>,
    /// Referenced operation name. Empty on the virtual source node.
    #[serde(default)]
    pub operation: String,
}

/// One attempt through the graph: an ordered sequence of nodes.
pub type Path = Vec<PathNode>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathNode {
    pub operation: String,
}

impl PathNode {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

impl OperationSet {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Content hash over the adjacency list.
    ///
    /// Recorded as a label on every diagnosis that starts against this set;
    /// a mid-run mismatch fails the run rather than silently executing a
    /// different graph than the one the diagnosis started on.
    pub fn adjacency_hash(&self) -> String {
        let canonical = serde_json::to_vec(&self.spec.adjacency_list)
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}
