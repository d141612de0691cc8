//! # Executor Counters
//!
//! The fixed counter surface published by the executor. Names are part of
//! the operational contract; register once at startup and bump through the
//! helpers so call sites stay greppable.

use once_cell::sync::Lazy;

pub const EXECUTOR_SYNC_SUCCESS_COUNT: &str = "executor_sync_success_count";
pub const EXECUTOR_SYNC_SKIP_COUNT: &str = "executor_sync_skip_count";
pub const EXECUTOR_SYNC_FAIL_COUNT: &str = "executor_sync_fail_count";
pub const EXECUTOR_SYNC_ERROR_COUNT: &str = "executor_sync_error_count";
pub const EXECUTOR_OPERATION_ERROR_COUNTER: &str = "executor_operation_error_counter";
pub const EXECUTOR_OPERATION_SUCCESS_COUNTER: &str = "executor_operation_success_counter";
pub const EXECUTOR_OPERATION_FAIL_COUNTER: &str = "executor_operation_fail_counter";

static REGISTERED: Lazy<()> = Lazy::new(|| {
    metrics::describe_counter!(
        EXECUTOR_SYNC_SUCCESS_COUNT,
        "Tasks synced to a terminal success"
    );
    metrics::describe_counter!(
        EXECUTOR_SYNC_SKIP_COUNT,
        "Tasks skipped by the phase or node gate"
    );
    metrics::describe_counter!(
        EXECUTOR_SYNC_FAIL_COUNT,
        "Tasks failed after exhausting the retry envelope"
    );
    metrics::describe_counter!(
        EXECUTOR_SYNC_ERROR_COUNT,
        "Transient sync errors (refetch, re-enqueue)"
    );
    metrics::describe_counter!(
        EXECUTOR_OPERATION_ERROR_COUNTER,
        "Dispatch errors (transport, timeout, oversize), per attempt"
    );
    metrics::describe_counter!(
        EXECUTOR_OPERATION_SUCCESS_COUNTER,
        "Operations that reported success"
    );
    metrics::describe_counter!(
        EXECUTOR_OPERATION_FAIL_COUNTER,
        "Operations that reported failure"
    );
});

/// Register counter metadata with the installed recorder. Idempotent.
pub fn register_executor_metrics() {
    Lazy::force(&REGISTERED);
}

/// Bump a counter by one.
pub fn inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}
