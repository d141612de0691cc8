//! Condition reasons written by the executor and traversal when a run ends.

/// The referenced OperationSet does not exist.
pub const OPERATION_SET_NOT_FOUND: &str = "OperationSetNotFound";
/// The referenced OperationSet has not materialized its paths yet.
pub const OPERATION_SET_NOT_READY: &str = "OperationSetNotReady";
/// The adjacency list changed under a running diagnosis.
pub const OPERATION_SET_CHANGED: &str = "OperationSetChanged";
/// The operation a node references does not exist.
pub const OPERATION_NOT_FOUND: &str = "OperationNotFound";
/// The stored checkpoint points outside the materialized paths.
pub const CHECKPOINT_INVALID: &str = "CheckpointInvalid";
/// The sync retry envelope was exhausted.
pub const SYNC_TASK_FAILED: &str = "SyncTaskFailed";
/// The dispatched operation reported failure.
pub const OPERATION_FAILED: &str = "OperationFailed";
