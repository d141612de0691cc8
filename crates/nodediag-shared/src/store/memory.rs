//! In-memory `ObjectStore` driver.
//!
//! Backs the test suites and the standalone agent. Implements the same
//! optimistic-concurrency contract as a real cluster store: updates must
//! carry the resource version they read, and a stale write conflicts.
//! Created pods are immediately given an IP and a Running phase, standing
//! in for the kubelet in single-process deployments.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{
    Diagnosis, Endpoints, Node, ObjectMeta, Operation, OperationSet, Pod, PodPhase, Secret,
    Service, Task,
};

use super::{ObjectStore, StoreError};

/// One keyed collection of objects with versioned writes.
#[derive(Debug)]
struct Bucket<T> {
    items: DashMap<String, T>,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Self {
            items: DashMap::new(),
        }
    }
}

impl<T: Clone> Bucket<T> {
    fn get(&self, key: &str, kind: &'static str) -> Result<T, StoreError> {
        self.items
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found(kind, key))
    }

    fn put(&self, key: String, value: T) {
        self.items.insert(key, value);
    }

    fn list(&self) -> Vec<T> {
        self.items.iter().map(|e| e.value().clone()).collect()
    }

    /// Versioned replace: fails unless `incoming`'s resource version equals
    /// the stored one, then bumps it.
    fn update(
        &self,
        key: &str,
        kind: &'static str,
        mut incoming: T,
        meta: impl Fn(&mut T) -> &mut ObjectMeta,
    ) -> Result<T, StoreError> {
        let mut entry = self
            .items
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(kind, key))?;
        let stored_version = meta(entry.value_mut()).resource_version;
        let incoming_meta = meta(&mut incoming);
        if incoming_meta.resource_version != stored_version {
            return Err(StoreError::conflict(kind, key));
        }
        incoming_meta.resource_version = stored_version + 1;
        *entry.value_mut() = incoming.clone();
        Ok(incoming)
    }
}

fn namespaced_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// In-memory store with a one-shot readiness signal.
#[derive(Debug)]
pub struct InMemoryStore {
    ready_tx: watch::Sender<bool>,
    tasks: Bucket<Task>,
    diagnoses: Bucket<Diagnosis>,
    operations: Bucket<Operation>,
    operation_sets: Bucket<OperationSet>,
    pods: Bucket<Pod>,
    nodes: Bucket<Node>,
    secrets: Bucket<Secret>,
    services: Bucket<Service>,
    endpoints: Bucket<Endpoints>,
    next_pod_ip: AtomicU32,
}

impl InMemoryStore {
    /// A store whose cache is ready from the start.
    pub fn new() -> Self {
        let store = Self::new_unready();
        store.mark_ready();
        store
    }

    /// A store that holds readers until `mark_ready` is called.
    pub fn new_unready() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            ready_tx,
            tasks: Bucket::default(),
            diagnoses: Bucket::default(),
            operations: Bucket::default(),
            operation_sets: Bucket::default(),
            pods: Bucket::default(),
            nodes: Bucket::default(),
            secrets: Bucket::default(),
            services: Bucket::default(),
            endpoints: Bucket::default(),
            next_pod_ip: AtomicU32::new(2),
        }
    }

    pub fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    // Seeding surface for the control-plane side of tests and the
    // standalone binary. Bypasses version checks.

    pub fn put_task(&self, task: Task) {
        let key = namespaced_key(task.namespace(), task.name());
        self.tasks.put(key, task);
    }

    pub fn put_diagnosis(&self, diagnosis: Diagnosis) {
        let key = namespaced_key(diagnosis.namespace(), diagnosis.name());
        self.diagnoses.put(key, diagnosis);
    }

    pub fn put_operation(&self, operation: Operation) {
        self.operations
            .put(operation.metadata.name.clone(), operation);
    }

    pub fn put_operation_set(&self, set: OperationSet) {
        self.operation_sets.put(set.metadata.name.clone(), set);
    }

    pub fn put_node(&self, node: Node) {
        self.nodes.put(node.metadata.name.clone(), node);
    }

    pub fn put_secret(&self, secret: Secret) {
        let key = namespaced_key(
            secret.metadata.namespace.as_deref().unwrap_or_default(),
            &secret.metadata.name,
        );
        self.secrets.put(key, secret);
    }

    pub fn put_service(&self, service: Service) {
        let key = namespaced_key(
            service.metadata.namespace.as_deref().unwrap_or_default(),
            &service.metadata.name,
        );
        self.services.put(key, service);
    }

    pub fn put_endpoints(&self, endpoints: Endpoints) {
        let key = namespaced_key(
            endpoints.metadata.namespace.as_deref().unwrap_or_default(),
            &endpoints.metadata.name,
        );
        self.endpoints.put(key, endpoints);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn wait_cache_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // wait_for returns immediately when already ready; a closed channel
        // cannot happen while self holds the sender.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    async fn get_task(&self, namespace: &str, name: &str) -> Result<Task, StoreError> {
        self.tasks.get(&namespaced_key(namespace, name), "Task")
    }

    async fn update_task(&self, task: &Task) -> Result<Task, StoreError> {
        let key = namespaced_key(task.namespace(), task.name());
        self.tasks
            .update(&key, "Task", task.clone(), |t| &mut t.metadata)
    }

    async fn get_diagnosis(&self, namespace: &str, name: &str) -> Result<Diagnosis, StoreError> {
        self.diagnoses
            .get(&namespaced_key(namespace, name), "Diagnosis")
    }

    async fn update_diagnosis(&self, diagnosis: &Diagnosis) -> Result<Diagnosis, StoreError> {
        let key = namespaced_key(diagnosis.namespace(), diagnosis.name());
        self.diagnoses
            .update(&key, "Diagnosis", diagnosis.clone(), |d| &mut d.metadata)
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, StoreError> {
        self.operations.get(name, "Operation")
    }

    async fn get_operation_set(&self, name: &str) -> Result<OperationSet, StoreError> {
        self.operation_sets.get(name, "OperationSet")
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        self.pods.get(&namespaced_key(namespace, name), "Pod")
    }

    async fn create_pod(&self, mut pod: Pod) -> Result<Pod, StoreError> {
        let key = namespaced_key(
            pod.metadata.namespace.as_deref().unwrap_or_default(),
            &pod.metadata.name,
        );
        if self.pods.items.contains_key(&key) {
            return Err(StoreError::already_exists("Pod", key));
        }
        let host = self.next_pod_ip.fetch_add(1, Ordering::Relaxed);
        pod.status.pod_ip = Some(format!("10.244.0.{host}"));
        pod.status.phase = PodPhase::Running;
        pod.metadata.resource_version = 1;
        self.pods.put(key, pod.clone());
        Ok(pod)
    }

    async fn patch_pod(&self, pod: &Pod) -> Result<Pod, StoreError> {
        let key = namespaced_key(
            pod.metadata.namespace.as_deref().unwrap_or_default(),
            &pod.metadata.name,
        );
        let mut entry = self
            .pods
            .items
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found("Pod", key.clone()))?;
        let existing = entry.value_mut();
        for (k, v) in &pod.metadata.labels {
            existing.metadata.labels.insert(k.clone(), v.clone());
        }
        if !pod.metadata.owner_references.is_empty() {
            existing.metadata.owner_references = pod.metadata.owner_references.clone();
        }
        for (incoming, current) in pod
            .spec
            .containers
            .iter()
            .zip(existing.spec.containers.iter_mut())
        {
            current.image = incoming.image.clone();
        }
        existing.metadata.resource_version += 1;
        Ok(existing.clone())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, StoreError> {
        Ok(self
            .pods
            .list()
            .into_iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, StoreError> {
        self.nodes.get(name, "Node")
    }

    async fn update_node(&self, node: &Node) -> Result<Node, StoreError> {
        self.nodes
            .update(&node.metadata.name, "Node", node.clone(), |n| {
                &mut n.metadata
            })
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.nodes.list())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.secrets.get(&namespaced_key(namespace, name), "Secret")
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, StoreError> {
        self.services
            .get(&namespaced_key(namespace, name), "Service")
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, StoreError> {
        Ok(self
            .services
            .list()
            .into_iter()
            .filter(|s| s.metadata.namespace.as_deref() == Some(namespace))
            .collect())
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints, StoreError> {
        self.endpoints
            .get(&namespaced_key(namespace, name), "Endpoints")
    }

    async fn list_endpoints(&self, namespace: &str) -> Result<Vec<Endpoints>, StoreError> {
        Ok(self
            .endpoints
            .list()
            .into_iter()
            .filter(|e| e.metadata.namespace.as_deref() == Some(namespace))
            .collect())
    }
}
