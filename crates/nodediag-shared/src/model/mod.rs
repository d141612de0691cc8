//! # Declarative Object Model
//!
//! Rust mirrors of the declarative objects the agent consumes: `Operation`,
//! `OperationSet`, `Diagnosis`, `Task`, plus the minimal workload mirrors
//! (`Pod`, `Node`, `Secret`, `Service`, `Endpoints`) the collaborator
//! adapters expose. Operations and OperationSets are authored externally and
//! read-only to the agent; Diagnoses and Tasks are mutated only through
//! status updates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod diagnosis;
pub mod operation;
pub mod operation_set;
pub mod task;
pub mod workload;

pub use diagnosis::{
    Checkpoint, Diagnosis, DiagnosisPhase, DiagnosisSpec, DiagnosisStatus,
    CONDITION_DIAGNOSIS_COMPLETE, CONDITION_DIAGNOSIS_FAILURE,
};
pub use operation::{
    FunctionRuntime, FunctionSpec, HttpScheme, HttpServerSpec, Operation, OperationSpec,
    ProcessorBackend, ProcessorSpec, ScriptRunnerSpec,
};
pub use operation_set::{
    AdjacencyNode, OperationSet, OperationSetSpec, OperationSetStatus, Path, PathNode,
};
pub use task::{DiagnosisRef, Task, TaskPhase, TaskSpec, TaskStatus};
pub use workload::{
    Container, ContainerPort, Endpoints, Node, Pod, PodPhase, PodSpec, PodStatus, Secret, Service,
};

/// Standard object metadata shared by every declarative object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    /// Absent for cluster-scoped objects (Operation, OperationSet, Node).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub uid: Uuid,

    /// Monotonic per-object version used for optimistic-concurrency writes.
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Metadata for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            uid: Uuid::new_v4(),
            ..Default::default()
        }
    }

    /// Metadata for a cluster-scoped object.
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: Uuid::new_v4(),
            ..Default::default()
        }
    }
}

/// Reference from an owned object back to its owner, driving cascade
/// deletion in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
}

/// Reference to a pod (and optionally one of its containers) a diagnosis or
/// task is investigating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodReference {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

/// A single observed condition on an object's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(condition_type: impl Into<String>, status: bool) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: None,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
