//! End-to-end task loop tests: queue in, status update out.

mod common;

use axum::extract::Json;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use common::{
    http_operation, running_task, spawn_stub_processor, wait_for_terminal_task, Harness, TEST_NODE,
};
use nodediag_executor::executor::CONDITION_TASK_FAILURE;
use nodediag_executor::TaskRef;
use nodediag_shared::events::{REASON_DIAGNOSIS_FAILED, REASON_OPERATION_SUCCEEDED};
use nodediag_shared::model::TaskPhase;
use nodediag_shared::store::ObjectStore;
use nodediag_shared::ContextMap;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn task_ref(name: &str) -> TaskRef {
    TaskRef {
        namespace: "default".to_string(),
        name: name.to_string(),
    }
}

#[tokio::test]
async fn test_http_backed_task_succeeds_end_to_end() {
    let addr = spawn_stub_processor(Router::new().route(
        "/p",
        post(|Json(_): Json<ContextMap>| async { Json(json!({"answer": "42"})) }),
    ))
    .await;

    let harness = Harness::new();
    harness.store.put_operation(http_operation("o1", addr, "/p", 5));
    harness.store.put_task(running_task(
        "t1",
        "o1",
        [("foo", "bar")].into_iter().collect(),
    ));

    let (executor, queue) = harness.executor(8);
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(executor.run(shutdown.clone()));

    queue.send(task_ref("t1")).await.unwrap();
    let task = wait_for_terminal_task(&harness.store, "default", "t1").await;

    assert_eq!(task.status.phase, TaskPhase::Succeeded);
    assert_eq!(task.status.results.get("foo"), Some("bar"));
    assert_eq!(task.status.results.get("node"), Some(TEST_NODE));
    assert_eq!(task.status.results.get("task.name"), Some("t1"));
    assert_eq!(task.status.results.get("answer"), Some("42"));
    assert!(harness
        .events
        .reasons()
        .contains(&REASON_OPERATION_SUCCEEDED.to_string()));

    shutdown.cancel();
    run.await.unwrap();
}

#[tokio::test]
async fn test_user_parameters_cannot_shadow_telemetry() {
    let addr = spawn_stub_processor(Router::new().route(
        "/p",
        post(|Json(body): Json<ContextMap>| async move {
            // Echo what the processor saw so the test can assert on it.
            Json(json!({"seen.node": body.get("node").unwrap_or_default()}))
        }),
    ))
    .await;

    let harness = Harness::new();
    harness.store.put_operation(http_operation("o1", addr, "/p", 5));
    harness.store.put_task(running_task(
        "t1",
        "o1",
        [("node", "forged"), ("foo", "bar")].into_iter().collect(),
    ));

    let (executor, queue) = harness.executor(8);
    let shutdown = CancellationToken::new();
    tokio::spawn(executor.run(shutdown.clone()));

    queue.send(task_ref("t1")).await.unwrap();
    let task = wait_for_terminal_task(&harness.store, "default", "t1").await;

    assert_eq!(task.status.results.get("seen.node"), Some(TEST_NODE));
    assert_eq!(task.status.results.get("node"), Some(TEST_NODE));
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_oversize_response_exhausts_envelope_and_fails_task() {
    let body = "x".repeat(3 * 1024 * 1024);
    let addr = spawn_stub_processor(Router::new().route(
        "/p",
        post(move || async move { (StatusCode::OK, body) }),
    ))
    .await;

    let harness = Harness::new();
    harness.store.put_operation(http_operation("o1", addr, "/p", 60));
    harness
        .store
        .put_task(running_task("t1", "o1", ContextMap::new()));

    let (executor, queue) = harness.executor(8);
    let shutdown = CancellationToken::new();
    tokio::spawn(executor.run(shutdown.clone()));

    queue.send(task_ref("t1")).await.unwrap();
    let task = wait_for_terminal_task(&harness.store, "default", "t1").await;

    assert_eq!(task.status.phase, TaskPhase::Failed);
    let condition = task
        .status
        .conditions
        .iter()
        .find(|c| c.condition_type == CONDITION_TASK_FAILURE)
        .expect("failure condition");
    assert_eq!(condition.reason.as_deref(), Some("SyncTaskFailed"));
    assert!(harness
        .events
        .reasons()
        .contains(&REASON_DIAGNOSIS_FAILED.to_string()));
    shutdown.cancel();
}

#[tokio::test]
async fn test_operation_failure_is_not_retried() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let hits = Arc::new(AtomicU32::new(0));
    let hits_in = hits.clone();
    let addr = spawn_stub_processor(Router::new().route(
        "/p",
        post(move || {
            let hits = hits_in.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::INTERNAL_SERVER_ERROR, "no")
            }
        }),
    ))
    .await;

    let harness = Harness::new();
    harness.store.put_operation(http_operation("o1", addr, "/p", 5));
    harness
        .store
        .put_task(running_task("t1", "o1", ContextMap::new()));

    let (executor, queue) = harness.executor(8);
    let shutdown = CancellationToken::new();
    tokio::spawn(executor.run(shutdown.clone()));

    queue.send(task_ref("t1")).await.unwrap();
    let task = wait_for_terminal_task(&harness.store, "default", "t1").await;

    assert_eq!(task.status.phase, TaskPhase::Failed);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let condition = &task.status.conditions[0];
    assert_eq!(condition.reason.as_deref(), Some("OperationFailed"));
    shutdown.cancel();
}

#[tokio::test]
async fn test_tasks_for_other_nodes_are_skipped() {
    let harness = Harness::new();
    // No operation seeded: a dispatch attempt would fail loudly.
    let mut task = running_task("t1", "o1", ContextMap::new());
    task.spec.node_name = "some-other-node".to_string();
    harness.store.put_task(task);

    let (executor, queue) = harness.executor(8);
    let shutdown = CancellationToken::new();
    tokio::spawn(executor.run(shutdown.clone()));

    queue.send(task_ref("t1")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let task = harness.store.get_task("default", "t1").await.unwrap();
    assert_eq!(task.status.phase, TaskPhase::Running);
    assert_eq!(task.metadata.resource_version, 0);
    shutdown.cancel();
}

#[tokio::test]
async fn test_terminal_task_redelivery_is_a_no_op() {
    let harness = Harness::new();
    let mut task = running_task("t1", "o1", ContextMap::new());
    task.status.phase = TaskPhase::Succeeded;
    harness.store.put_task(task);

    let (executor, queue) = harness.executor(8);
    let shutdown = CancellationToken::new();
    tokio::spawn(executor.run(shutdown.clone()));

    queue.send(task_ref("t1")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let task = harness.store.get_task("default", "t1").await.unwrap();
    // No status write happened: the version is untouched.
    assert_eq!(task.metadata.resource_version, 0);
    assert!(harness.events.recorded().is_empty());
    shutdown.cancel();
}

#[tokio::test]
async fn test_vanished_task_is_dropped() {
    let harness = Harness::new();
    let (executor, queue) = harness.executor(8);
    let shutdown = CancellationToken::new();
    tokio::spawn(executor.run(shutdown.clone()));

    queue.send(task_ref("ghost")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(harness.events.recorded().is_empty());
    shutdown.cancel();
}
