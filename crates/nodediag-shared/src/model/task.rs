//! Tasks: one per-node work item executing a single operation on behalf of
//! a diagnosis. The control plane derives them from the graph; the agent
//! only writes status.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ContextMap;

use super::{Condition, ObjectMeta, PodReference};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub metadata: ObjectMeta,
    pub spec: TaskSpec,
    #[serde(default)]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Name of the referenced (cluster-scoped) Operation.
    pub operation: String,
    /// Node this task is pinned to.
    pub node_name: String,
    #[serde(default)]
    pub parameters: ContextMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_reference: Option<PodReference>,
    /// Back-reference to the owning diagnosis, feeding the `diagnosis.*`
    /// telemetry keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<DiagnosisRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisRef {
    pub namespace: String,
    pub name: String,
    pub uid: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub phase: TaskPhase,
    #[serde(default)]
    pub results: ContextMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Succeeded | TaskPhase::Failed)
    }
}

impl Task {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Replace any same-typed condition with `condition`.
    pub fn set_condition(&mut self, condition: Condition) {
        self.status
            .conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.status.conditions.push(condition);
    }

    /// Telemetry keys for this task, written last into every dispatch
    /// context so user parameters cannot shadow them.
    pub fn telemetry(&self, node_name: &str) -> ContextMap {
        use crate::context::*;

        let mut ctx = ContextMap::new();
        ctx.insert(KEY_TASK_UID, self.metadata.uid.to_string());
        ctx.insert(KEY_TASK_NAMESPACE, self.namespace());
        ctx.insert(KEY_TASK_NAME, self.name());
        ctx.insert(KEY_NODE, node_name);
        if let Some(diag) = &self.spec.diagnosis {
            ctx.insert(KEY_DIAGNOSIS_UID, diag.uid.to_string());
            ctx.insert(KEY_DIAGNOSIS_NAMESPACE, diag.namespace.clone());
            ctx.insert(KEY_DIAGNOSIS_NAME, diag.name.clone());
        }
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
