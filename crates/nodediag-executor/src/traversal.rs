//! # Graph Traversal & Checkpointing
//!
//! Advances a diagnosis across the materialized paths of its OperationSet.
//! Each tick dispatches at most one node, then either advances the
//! checkpoint, fails over to the next path, or reaches a terminal phase.
//! Dispatch errors leave the stored state untouched so the scheduler's
//! retry envelope can re-run the same tick.
//!
//! The adjacency hash the diagnosis started against is pinned on first
//! observation and compared on every subsequent tick: a mid-run graph edit
//! fails the run instead of silently executing a different pipeline.

use std::sync::Arc;

use nodediag_shared::events::{
    EventObject, EventRecorder, EventType, REASON_DIAGNOSIS_FAILED, REASON_DIAGNOSIS_SUCCEEDED,
};
use nodediag_shared::model::{
    Checkpoint, Condition, Diagnosis, DiagnosisPhase, CONDITION_DIAGNOSIS_COMPLETE,
    CONDITION_DIAGNOSIS_FAILURE,
};
use nodediag_shared::store::{ObjectStore, StoreError};
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchError, Dispatcher};
use crate::reason;

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The hash label was just pinned; run the tick again.
    Requeue,
    /// One node was dispatched and the checkpoint advanced; still Running.
    Advanced,
    /// The run reached a terminal phase this tick.
    Finished(DiagnosisPhase),
    /// Nothing to do: terminal already, or pinned to another node.
    Skipped,
}

/// Diagnosis-level executor: interprets the graph one node per tick.
#[derive(Debug)]
pub struct DiagnosisRunner {
    node_name: String,
    store: Arc<dyn ObjectStore>,
    events: Arc<dyn EventRecorder>,
    dispatcher: Arc<Dispatcher>,
}

impl DiagnosisRunner {
    pub fn new(
        node_name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventRecorder>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            store,
            events,
            dispatcher,
        }
    }

    /// Run one tick for the named diagnosis.
    pub async fn tick(&self, namespace: &str, name: &str) -> Result<TickOutcome, TickError> {
        let mut diagnosis = self.store.get_diagnosis(namespace, name).await?;

        if diagnosis.status.phase.is_terminal() {
            debug!(namespace, name, phase = ?diagnosis.status.phase, "diagnosis already terminal");
            return Ok(TickOutcome::Skipped);
        }
        if diagnosis.spec.node_name != self.node_name {
            return Ok(TickOutcome::Skipped);
        }

        // Preconditions, each fatal with its own reason.
        let set = match self
            .store
            .get_operation_set(&diagnosis.spec.operation_set)
            .await
        {
            Ok(set) => set,
            Err(err) if err.is_not_found() => {
                let msg = format!(
                    "operation set {:?} not found",
                    diagnosis.spec.operation_set
                );
                return self
                    .fail(&mut diagnosis, reason::OPERATION_SET_NOT_FOUND, msg)
                    .await;
            }
            Err(err) => return Err(err.into()),
        };

        if !set.status.ready {
            return self
                .fail(
                    &mut diagnosis,
                    reason::OPERATION_SET_NOT_READY,
                    format!("operation set {:?} has no materialized paths", set.name()),
                )
                .await;
        }

        let current_hash = set.adjacency_hash();
        match diagnosis.operation_set_hash() {
            None => {
                diagnosis.set_operation_set_hash(&current_hash);
                self.store.update_diagnosis(&diagnosis).await?;
                debug!(namespace, name, hash = %current_hash, "pinned adjacency hash");
                return Ok(TickOutcome::Requeue);
            }
            Some(stored) if stored != current_hash => {
                return self
                    .fail(
                        &mut diagnosis,
                        reason::OPERATION_SET_CHANGED,
                        format!("operation set {:?} changed mid-run", set.name()),
                    )
                    .await;
            }
            Some(_) => {}
        }

        let checkpoint = diagnosis.status.checkpoint.unwrap_or_default();
        let paths = &set.status.paths;
        if checkpoint.path_index >= paths.len()
            || checkpoint.node_index >= paths[checkpoint.path_index].len()
        {
            return self
                .fail(
                    &mut diagnosis,
                    reason::CHECKPOINT_INVALID,
                    format!(
                        "checkpoint ({}, {}) outside {} materialized paths",
                        checkpoint.path_index,
                        checkpoint.node_index,
                        paths.len()
                    ),
                )
                .await;
        }

        let path = &paths[checkpoint.path_index];
        let node = &path[checkpoint.node_index];
        let operation = match self.store.get_operation(&node.operation).await {
            Ok(op) => op,
            Err(err) if err.is_not_found() => {
                return self
                    .fail(
                        &mut diagnosis,
                        reason::OPERATION_NOT_FOUND,
                        format!("operation {:?} not found", node.operation),
                    )
                    .await;
            }
            Err(err) => return Err(err.into()),
        };

        // Parameters, then accumulated results, then telemetry; telemetry
        // last so nothing can shadow it.
        let mut context = diagnosis.spec.parameters.clone();
        context.merge(&diagnosis.status.operation_results);
        context.merge(&diagnosis.telemetry(&self.node_name));

        // A dispatch error surfaces without touching stored state.
        let outcome = self.dispatcher.dispatch(&operation, &context).await?;

        diagnosis.status.phase = DiagnosisPhase::Running;
        if outcome.succeeded {
            diagnosis
                .status
                .operation_results
                .merge_unreserved(&outcome.result);
            diagnosis.status.succeeded_path.push(node.clone());

            if checkpoint.node_index + 1 >= path.len() {
                info!(namespace, name, path = checkpoint.path_index, "diagnosis complete");
                diagnosis.status.phase = DiagnosisPhase::Succeeded;
                diagnosis.set_condition(
                    Condition::new(CONDITION_DIAGNOSIS_COMPLETE, true).with_message(format!(
                        "all {} nodes on path {} succeeded",
                        path.len(),
                        checkpoint.path_index
                    )),
                );
                diagnosis.status.checkpoint = Some(checkpoint);
                self.store.update_diagnosis(&diagnosis).await?;
                self.events.event(
                    EventObject::diagnosis(namespace, name),
                    EventType::Normal,
                    REASON_DIAGNOSIS_SUCCEEDED,
                    format!("path {} completed", checkpoint.path_index),
                );
                return Ok(TickOutcome::Finished(DiagnosisPhase::Succeeded));
            }

            diagnosis.status.checkpoint = Some(Checkpoint {
                path_index: checkpoint.path_index,
                node_index: checkpoint.node_index + 1,
            });
            self.store.update_diagnosis(&diagnosis).await?;
            return Ok(TickOutcome::Advanced);
        }

        // Operation failure: abandon the current path.
        warn!(
            namespace,
            name,
            operation = %node.operation,
            path = checkpoint.path_index,
            "node failed, abandoning path"
        );
        diagnosis.status.failed_paths.push(path.clone());
        diagnosis.status.succeeded_path.clear();

        if checkpoint.path_index + 1 >= paths.len() {
            return self
                .fail(
                    &mut diagnosis,
                    reason::OPERATION_FAILED,
                    format!(
                        "operation {:?} failed and no paths remain",
                        node.operation
                    ),
                )
                .await;
        }

        diagnosis.status.checkpoint = Some(Checkpoint {
            path_index: checkpoint.path_index + 1,
            node_index: 0,
        });
        self.store.update_diagnosis(&diagnosis).await?;
        Ok(TickOutcome::Advanced)
    }

    /// Terminal failure transition: phase, condition, event, one update.
    async fn fail(
        &self,
        diagnosis: &mut Diagnosis,
        reason: &str,
        message: String,
    ) -> Result<TickOutcome, TickError> {
        warn!(
            namespace = diagnosis.namespace(),
            name = diagnosis.name(),
            reason,
            "{message}"
        );
        diagnosis.status.phase = DiagnosisPhase::Failed;
        diagnosis.set_condition(
            Condition::new(CONDITION_DIAGNOSIS_FAILURE, true)
                .with_reason(reason)
                .with_message(message.clone()),
        );
        self.store.update_diagnosis(diagnosis).await?;
        self.events.event(
            EventObject::diagnosis(diagnosis.namespace(), diagnosis.name()),
            EventType::Warning,
            REASON_DIAGNOSIS_FAILED,
            message,
        );
        Ok(TickOutcome::Finished(DiagnosisPhase::Failed))
    }
}
