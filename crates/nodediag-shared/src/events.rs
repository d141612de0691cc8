//! # Event Recording
//!
//! User-visible breadcrumbs for task and diagnosis lifecycles. The recorder
//! is a declared seam: production wires a cluster event sink, tests wire
//! `MemoryEventRecorder`, and `TracingEventRecorder` is the default that
//! folds events into the agent log.

use std::sync::Mutex;

use tracing::{info, warn};

/// Reasons emitted by the executor and traversal.
pub const REASON_OPERATION_SUCCEEDED: &str = "OperationSucceeded";
pub const REASON_OPERATION_FAILED: &str = "OperationFailed";
pub const REASON_DIAGNOSIS_SUCCEEDED: &str = "DiagnosisSucceeded";
pub const REASON_DIAGNOSIS_FAILED: &str = "DiagnosisFailed";
pub const REASON_SYNC_TASK_FAILED: &str = "SyncTaskFailed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// What the event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventObject {
    pub kind: &'static str,
    pub namespace: Option<String>,
    pub name: String,
}

impl EventObject {
    pub fn task(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: "Task",
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn diagnosis(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: "Diagnosis",
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

pub trait EventRecorder: Send + Sync + std::fmt::Debug {
    fn event(&self, object: EventObject, event_type: EventType, reason: &str, message: String);
}

/// Default recorder: events land in the structured log.
#[derive(Debug, Default, Clone)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn event(&self, object: EventObject, event_type: EventType, reason: &str, message: String) {
        match event_type {
            EventType::Normal => info!(
                kind = object.kind,
                namespace = object.namespace.as_deref().unwrap_or_default(),
                name = %object.name,
                reason,
                "{message}"
            ),
            EventType::Warning => warn!(
                kind = object.kind,
                namespace = object.namespace.as_deref().unwrap_or_default(),
                name = %object.name,
                reason,
                "{message}"
            ),
        }
    }
}

/// A recorded event, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: EventObject,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Test recorder capturing every event in order.
#[derive(Debug, Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Reasons in recording order, the usual assertion shape.
    pub fn reasons(&self) -> Vec<String> {
        self.recorded().into_iter().map(|e| e.reason).collect()
    }
}

impl EventRecorder for MemoryEventRecorder {
    fn event(&self, object: EventObject, event_type: EventType, reason: &str, message: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                object,
                event_type,
                reason: reason.to_string(),
                message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_recorder_keeps_order() {
        let recorder = MemoryEventRecorder::new();
        recorder.event(
            EventObject::task("default", "t1"),
            EventType::Normal,
            REASON_OPERATION_SUCCEEDED,
            "node A done".to_string(),
        );
        recorder.event(
            EventObject::diagnosis("default", "d1"),
            EventType::Warning,
            REASON_DIAGNOSIS_FAILED,
            "graph exhausted".to_string(),
        );

        assert_eq!(
            recorder.reasons(),
            vec![REASON_OPERATION_SUCCEEDED, REASON_DIAGNOSIS_FAILED]
        );
        assert_eq!(recorder.recorded()[1].event_type, EventType::Warning);
    }
}
