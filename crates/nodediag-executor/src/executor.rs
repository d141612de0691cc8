//! # Task Executor Loop
//!
//! Drains the bounded queue of node-pinned task references, one spawned
//! worker per dequeued item. Each worker refetches the authoritative task,
//! gates on phase and node identity, dispatches the task's operation under
//! the fixed retry envelope, and persists the outcome with a versioned
//! status update. At-least-once delivery is expected: terminal phases
//! short-circuit, and conflicting writers lose to optimistic concurrency.

use std::sync::Arc;

use nodediag_shared::events::{
    EventObject, EventRecorder, EventType, REASON_DIAGNOSIS_FAILED, REASON_OPERATION_FAILED,
    REASON_OPERATION_SUCCEEDED, REASON_SYNC_TASK_FAILED,
};
use nodediag_shared::metrics::{
    self, EXECUTOR_OPERATION_ERROR_COUNTER, EXECUTOR_OPERATION_FAIL_COUNTER,
    EXECUTOR_OPERATION_SUCCESS_COUNTER, EXECUTOR_SYNC_ERROR_COUNT, EXECUTOR_SYNC_FAIL_COUNT,
    EXECUTOR_SYNC_SKIP_COUNT, EXECUTOR_SYNC_SUCCESS_COUNT,
};
use nodediag_shared::model::{Condition, Task, TaskPhase};
use nodediag_shared::store::{ObjectStore, StoreError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{retry, Backoff};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::reason;

/// Queue item: the identity of a task pinned to this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub namespace: String,
    pub name: String,
}

/// Condition type recording how a task run ended.
pub const CONDITION_TASK_FAILURE: &str = "TaskFailure";

#[derive(Debug, thiserror::Error)]
enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// What one successful sync attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncVerdict {
    Succeeded,
    OperationFailed,
    Skipped,
}

/// Shared state for spawned per-task workers.
#[derive(Debug)]
struct ExecutorCore {
    node_name: String,
    store: Arc<dyn ObjectStore>,
    events: Arc<dyn EventRecorder>,
    dispatcher: Arc<Dispatcher>,
    requeue: mpsc::Sender<TaskRef>,
    envelope: Backoff,
}

/// The per-node task-processing loop.
#[derive(Debug)]
pub struct TaskExecutor {
    core: Arc<ExecutorCore>,
    queue: mpsc::Receiver<TaskRef>,
}

impl TaskExecutor {
    /// Build an executor and the sender side of its task queue.
    pub fn new(
        node_name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventRecorder>,
        dispatcher: Arc<Dispatcher>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Sender<TaskRef>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let core = Arc::new(ExecutorCore {
            node_name: node_name.into(),
            store,
            events,
            dispatcher,
            requeue: tx.clone(),
            envelope: Backoff::sync_envelope(),
        });
        (Self { core, queue: rx }, tx)
    }

    /// Process tasks until `shutdown` fires. Blocks first on the store's
    /// cache readiness; in-flight workers run to completion or to their own
    /// dispatch timeouts.
    pub async fn run(mut self, shutdown: CancellationToken) {
        metrics::register_executor_metrics();

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("executor stopping before cache sync");
                return;
            }
            _ = self.core.store.wait_cache_ready() => {}
        }
        info!(node = %self.core.node_name, "executor running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("executor stopping");
                    return;
                }
                item = self.queue.recv() => {
                    match item {
                        Some(task_ref) => {
                            let core = self.core.clone();
                            tokio::spawn(async move { core.process(task_ref).await });
                        }
                        None => {
                            info!("task queue closed, executor stopping");
                            return;
                        }
                    }
                }
            }
        }
    }
}

impl ExecutorCore {
    /// Handle one dequeued reference end to end.
    async fn process(self: Arc<Self>, task_ref: TaskRef) {
        // Authoritative refetch; queue payloads are hints, not state.
        let task = match self.store.get_task(&task_ref.namespace, &task_ref.name).await {
            Ok(task) => task,
            Err(err) if err.is_not_found() => {
                debug!(namespace = %task_ref.namespace, name = %task_ref.name, "task gone, dropping");
                return;
            }
            Err(err) => {
                warn!(
                    namespace = %task_ref.namespace,
                    name = %task_ref.name,
                    error = %err,
                    "task fetch failed, re-enqueueing"
                );
                metrics::inc(EXECUTOR_SYNC_ERROR_COUNT);
                let _ = self.requeue.try_send(task_ref);
                return;
            }
        };

        if !self.wants(&task) {
            metrics::inc(EXECUTOR_SYNC_SKIP_COUNT);
            return;
        }

        let verdict = retry(self.envelope.clone(), || self.sync_once(&task_ref)).await;
        match verdict {
            Ok(SyncVerdict::Succeeded | SyncVerdict::OperationFailed) => {
                metrics::inc(EXECUTOR_SYNC_SUCCESS_COUNT);
            }
            Ok(SyncVerdict::Skipped) => {
                metrics::inc(EXECUTOR_SYNC_SKIP_COUNT);
            }
            Err(err) => {
                warn!(
                    namespace = %task_ref.namespace,
                    name = %task_ref.name,
                    error = %err,
                    "sync envelope exhausted"
                );
                metrics::inc(EXECUTOR_SYNC_FAIL_COUNT);
                self.fail_task_after_retries(&task_ref, &err).await;
            }
        }
    }

    /// Phase and node gate. Duplicates of finished or foreign tasks fall
    /// out here.
    fn wants(&self, task: &Task) -> bool {
        task.status.phase == TaskPhase::Running && task.spec.node_name == self.node_name
    }

    /// One sync attempt: refetch, gate, dispatch, persist.
    async fn sync_once(&self, task_ref: &TaskRef) -> Result<SyncVerdict, SyncError> {
        let mut task = self
            .store
            .get_task(&task_ref.namespace, &task_ref.name)
            .await?;
        if !self.wants(&task) {
            return Ok(SyncVerdict::Skipped);
        }

        let operation = match self.store.get_operation(&task.spec.operation).await {
            Ok(op) => op,
            Err(err) if err.is_not_found() => {
                // Fatal for the run, not retried.
                task.status.phase = TaskPhase::Failed;
                task.set_condition(
                    Condition::new(CONDITION_TASK_FAILURE, true)
                        .with_reason(reason::OPERATION_NOT_FOUND)
                        .with_message(format!("operation {:?} not found", task.spec.operation)),
                );
                self.store.update_task(&task).await?;
                self.events.event(
                    EventObject::task(task.namespace(), task.name()),
                    EventType::Warning,
                    REASON_OPERATION_FAILED,
                    format!("operation {:?} not found", task.spec.operation),
                );
                metrics::inc(EXECUTOR_OPERATION_FAIL_COUNTER);
                return Ok(SyncVerdict::OperationFailed);
            }
            Err(err) => return Err(err.into()),
        };

        // Parameters first, telemetry last: reserved keys win.
        let mut context = task.spec.parameters.clone();
        context.merge(&task.telemetry(&self.node_name));

        let outcome = match self.dispatcher.dispatch(&operation, &context).await {
            Ok(outcome) => outcome,
            Err(err) => {
                metrics::inc(EXECUTOR_OPERATION_ERROR_COUNTER);
                return Err(err.into());
            }
        };

        if outcome.succeeded {
            let mut results = context;
            results.merge_unreserved(&outcome.result);
            task.status.results = results;
            task.status.phase = TaskPhase::Succeeded;
            self.store.update_task(&task).await?;
            self.events.event(
                EventObject::task(task.namespace(), task.name()),
                EventType::Normal,
                REASON_OPERATION_SUCCEEDED,
                format!("operation {:?} succeeded", task.spec.operation),
            );
            metrics::inc(EXECUTOR_OPERATION_SUCCESS_COUNTER);
            Ok(SyncVerdict::Succeeded)
        } else {
            task.status.phase = TaskPhase::Failed;
            task.set_condition(
                Condition::new(CONDITION_TASK_FAILURE, true)
                    .with_reason(reason::OPERATION_FAILED)
                    .with_message(format!("operation {:?} reported failure", task.spec.operation)),
            );
            self.store.update_task(&task).await?;
            self.events.event(
                EventObject::task(task.namespace(), task.name()),
                EventType::Warning,
                REASON_OPERATION_FAILED,
                format!("operation {:?} reported failure", task.spec.operation),
            );
            metrics::inc(EXECUTOR_OPERATION_FAIL_COUNTER);
            Ok(SyncVerdict::OperationFailed)
        }
    }

    /// Best-effort terminal transition once the envelope is spent.
    async fn fail_task_after_retries(&self, task_ref: &TaskRef, cause: &SyncError) {
        let mut task = match self.store.get_task(&task_ref.namespace, &task_ref.name).await {
            Ok(task) => task,
            Err(err) => {
                warn!(
                    namespace = %task_ref.namespace,
                    name = %task_ref.name,
                    error = %err,
                    "could not refetch task for failure transition"
                );
                return;
            }
        };
        if task.status.phase.is_terminal() {
            return;
        }

        task.status.phase = TaskPhase::Failed;
        task.set_condition(
            Condition::new(CONDITION_TASK_FAILURE, true)
                .with_reason(reason::SYNC_TASK_FAILED)
                .with_message(cause.to_string()),
        );
        if let Err(err) = self.store.update_task(&task).await {
            warn!(
                namespace = %task_ref.namespace,
                name = %task_ref.name,
                error = %err,
                "failure transition did not persist"
            );
            return;
        }
        self.events.event(
            EventObject::task(task.namespace(), task.name()),
            EventType::Warning,
            REASON_DIAGNOSIS_FAILED,
            format!("{}: {cause}", REASON_SYNC_TASK_FAILED),
        );
    }
}
