//! Shared harness for executor integration tests: an in-memory store, a
//! recording event sink, a fake runtime, and axum stub processors on
//! ephemeral ports.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use nodediag_executor::{Dispatcher, DispatcherConfig, FunctionPodManager};
use nodediag_executor::executor::TaskExecutor;
use nodediag_executor::traversal::DiagnosisRunner;
use nodediag_executor::TaskRef;
use nodediag_shared::events::MemoryEventRecorder;
use nodediag_shared::model::{
    AdjacencyNode, Diagnosis, DiagnosisPhase, DiagnosisSpec, HttpServerSpec, ObjectMeta,
    Operation, OperationSet, OperationSetSpec, OperationSetStatus, OperationSpec, Path, PathNode,
    ProcessorBackend, ProcessorSpec, Task, TaskPhase, TaskSpec,
};
use nodediag_shared::runtime::FakeRuntime;
use nodediag_shared::store::InMemoryStore;
use nodediag_shared::ContextMap;
use tokio::sync::mpsc;

pub const TEST_NODE: &str = "n1";

/// Serve `router` on an ephemeral localhost port.
pub async fn spawn_stub_processor(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub processor");
    let addr = listener.local_addr().expect("stub processor addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub events: Arc<MemoryEventRecorder>,
    pub dispatcher: Arc<Dispatcher>,
    pub runtime: Arc<FakeRuntime>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_scripts_dir(std::env::temp_dir())
    }

    pub fn with_scripts_dir(scripts_dir: PathBuf) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(MemoryEventRecorder::new());
        let runtime = Arc::new(FakeRuntime::new());
        let pods = Arc::new(FunctionPodManager::new(
            store.clone(),
            runtime.clone(),
            TEST_NODE,
            "nodediag-agent",
        ));
        let dispatcher = Arc::new(
            Dispatcher::new(
                DispatcherConfig {
                    agent_address: "127.0.0.1".to_string(),
                    agent_port: 8090,
                    scripts_dir,
                },
                pods,
            )
            .expect("build dispatcher"),
        );
        Self {
            store,
            events,
            dispatcher,
            runtime,
        }
    }

    pub fn runner(&self) -> DiagnosisRunner {
        DiagnosisRunner::new(
            TEST_NODE,
            self.store.clone(),
            self.events.clone(),
            self.dispatcher.clone(),
        )
    }

    pub fn executor(&self, capacity: usize) -> (TaskExecutor, mpsc::Sender<TaskRef>) {
        TaskExecutor::new(
            TEST_NODE,
            self.store.clone(),
            self.events.clone(),
            self.dispatcher.clone(),
            capacity,
        )
    }
}

/// An HTTP-backed operation pointed at a stub processor.
pub fn http_operation(name: &str, addr: SocketAddr, path: &str, timeout_seconds: u32) -> Operation {
    Operation {
        metadata: ObjectMeta::cluster_scoped(name),
        spec: OperationSpec {
            processor: ProcessorSpec {
                backend: ProcessorBackend::HttpServer(HttpServerSpec {
                    address: Some(addr.ip().to_string()),
                    port: Some(addr.port()),
                    scheme: None,
                    path: Some(path.to_string()),
                }),
                timeout_seconds,
            },
        },
    }
}

/// A Running task pinned to the test node.
pub fn running_task(name: &str, operation: &str, parameters: ContextMap) -> Task {
    let mut task = Task {
        metadata: ObjectMeta::namespaced("default", name),
        spec: TaskSpec {
            operation: operation.to_string(),
            node_name: TEST_NODE.to_string(),
            parameters,
            pod_reference: None,
            diagnosis: None,
        },
        status: Default::default(),
    };
    task.status.phase = TaskPhase::Running;
    task
}

/// An OperationSet whose paths are already materialized and ready.
pub fn ready_operation_set(name: &str, paths: Vec<Vec<&str>>) -> OperationSet {
    let mut adjacency = vec![AdjacencyNode {
        id: 0,
        to: vec![],
        operation: String::new(),
    }];
    let mut materialized: Vec<Path> = Vec::new();
    let mut next_id = 1;
    for path in paths {
        let mut nodes = Vec::new();
        for op in path {
            adjacency.push(AdjacencyNode {
                id: next_id,
                to: vec![],
                operation: op.to_string(),
            });
            next_id += 1;
            nodes.push(PathNode::new(op));
        }
        materialized.push(nodes);
    }
    OperationSet {
        metadata: ObjectMeta::cluster_scoped(name),
        spec: OperationSetSpec {
            adjacency_list: adjacency,
        },
        status: OperationSetStatus {
            ready: true,
            paths: materialized,
        },
    }
}

/// A Running diagnosis pinned to the test node.
pub fn running_diagnosis(name: &str, operation_set: &str, parameters: ContextMap) -> Diagnosis {
    let mut diagnosis = Diagnosis {
        metadata: ObjectMeta::namespaced("default", name),
        spec: DiagnosisSpec {
            operation_set: operation_set.to_string(),
            node_name: TEST_NODE.to_string(),
            parameters,
            pod_reference: None,
        },
        status: Default::default(),
    };
    diagnosis.status.phase = DiagnosisPhase::Running;
    diagnosis
}

/// Poll the store until the task reaches a terminal phase.
pub async fn wait_for_terminal_task(store: &InMemoryStore, namespace: &str, name: &str) -> Task {
    use nodediag_shared::store::ObjectStore;
    loop {
        let task = store.get_task(namespace, name).await.expect("task exists");
        if task.status.phase.is_terminal() {
            return task;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
