//! Diagnoses: one execution instance of an OperationSet, pinned to a node.
//!
//! All mutation happens through `status`; the agent never edits a diagnosis
//! spec. The adjacency hash of the OperationSet the run started against is
//! pinned as a label and checked every tick.

use serde::{Deserialize, Serialize};

use crate::context::ContextMap;

use super::{Condition, ObjectMeta, Path, PodReference};

/// Label key pinning the adjacency hash a diagnosis started against.
pub const OPERATION_SET_HASH_LABEL: &str = "diagnosis.nodediag.io/operationset-hash";

/// Condition type set when a diagnosis finishes its current path.
pub const CONDITION_DIAGNOSIS_COMPLETE: &str = "DiagnosisComplete";

/// Condition type set when a run fails; its reason names the cause.
pub const CONDITION_DIAGNOSIS_FAILURE: &str = "DiagnosisFailure";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub metadata: ObjectMeta,
    pub spec: DiagnosisSpec,
    #[serde(default)]
    pub status: DiagnosisStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisSpec {
    /// Name of the referenced (cluster-scoped) OperationSet.
    pub operation_set: String,
    /// Node this diagnosis is pinned to.
    pub node_name: String,
    /// User-seeded parameters, merged into every dispatch context.
    #[serde(default)]
    pub parameters: ContextMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_reference: Option<PodReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisStatus {
    #[serde(default)]
    pub phase: DiagnosisPhase,
    /// Merged results across all executed nodes.
    #[serde(default)]
    pub operation_results: ContextMap,
    /// Nodes completed so far on the current path. Always a prefix of
    /// `paths[checkpoint.path_index]`; reset when the path advances.
    #[serde(default)]
    pub succeeded_path: Path,
    /// Paths abandoned after a node failure, in abandonment order.
    #[serde(default)]
    pub failed_paths: Vec<Path>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosisPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl DiagnosisPhase {
    /// Terminal phases take no further status writes.
    pub fn is_terminal(self) -> bool {
        matches!(self, DiagnosisPhase::Succeeded | DiagnosisPhase::Failed)
    }
}

/// Position within an OperationSet's materialized paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub path_index: usize,
    pub node_index: usize,
}

impl Diagnosis {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// The pinned adjacency hash, if one was recorded.
    pub fn operation_set_hash(&self) -> Option<&str> {
        self.metadata
            .labels
            .get(OPERATION_SET_HASH_LABEL)
            .map(String::as_str)
    }

    /// Pin the adjacency hash. Only legal once, on first observation.
    pub fn set_operation_set_hash(&mut self, hash: impl Into<String>) {
        self.metadata
            .labels
            .insert(OPERATION_SET_HASH_LABEL.to_string(), hash.into());
    }

    /// Replace any same-typed condition with `condition`.
    pub fn set_condition(&mut self, condition: Condition) {
        self.status
            .conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.status.conditions.push(condition);
    }

    /// Telemetry keys for this diagnosis, written last into every dispatch
    /// context so user parameters cannot shadow them.
    pub fn telemetry(&self, node_name: &str) -> ContextMap {
        use crate::context::*;

        let mut ctx = ContextMap::new();
        ctx.insert(KEY_DIAGNOSIS_UID, self.metadata.uid.to_string());
        ctx.insert(KEY_DIAGNOSIS_NAMESPACE, self.namespace());
        ctx.insert(KEY_DIAGNOSIS_NAME, self.name());
        ctx.insert(KEY_NODE, node_name);
        if let Some(pod) = &self.spec.pod_reference {
            ctx.insert(KEY_POD_NAMESPACE, pod.namespace.clone());
            ctx.insert(KEY_POD_NAME, pod.name.clone());
            if let Some(container) = &pod.container {
                ctx.insert(KEY_CONTAINER, container.clone());
            }
        }
        ctx
    }
}
