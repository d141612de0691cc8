//! Built-in processors shipped with the agent.
//!
//! These exercise the collaborator adapters through the standard contract;
//! the wider diagnostic fleet (queries, captures, profilers) registers
//! through the same trait from elsewhere.

use std::sync::Arc;

use async_trait::async_trait;
use nodediag_shared::context::{KEY_POD_NAMESPACE, KEY_TASK_NAME};
use nodediag_shared::runtime::ContainerRuntime;
use nodediag_shared::store::ObjectStore;
use nodediag_shared::ContextMap;

use super::{Processor, ProcessorError, ProcessorResult};

/// Lists containers on this node via the runtime adapter.
#[derive(Debug)]
pub struct ContainerListProcessor {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerListProcessor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Processor for ContainerListProcessor {
    fn name(&self) -> &str {
        "container-list"
    }

    async fn handle(&self, context: ContextMap) -> ProcessorResult {
        let containers = self
            .runtime
            .container_list()
            .await
            .map_err(|e| ProcessorError::internal(e.to_string()))?;

        let mut result = ContextMap::new();
        result.insert("runtime.containers.count", containers.len().to_string());
        let ids: Vec<&str> = containers.iter().map(|c| c.id.as_str()).collect();
        result.insert("runtime.containers.ids", ids.join(","));
        if let Some(task) = context.get(KEY_TASK_NAME) {
            result.insert("runtime.containers.task", task);
        }
        Ok(result)
    }
}

/// Lists pods in the namespace named by `pod.namespace`.
#[derive(Debug)]
pub struct PodListProcessor {
    store: Arc<dyn ObjectStore>,
}

impl PodListProcessor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Processor for PodListProcessor {
    fn name(&self) -> &str {
        "pod-list"
    }

    async fn handle(&self, context: ContextMap) -> ProcessorResult {
        let namespace = context.get(KEY_POD_NAMESPACE).ok_or_else(|| {
            ProcessorError::bad_request(format!("parameter {KEY_POD_NAMESPACE:?} is required"))
        })?;

        let pods = self
            .store
            .list_pods(namespace)
            .await
            .map_err(|e| ProcessorError::internal(e.to_string()))?;

        let mut result = ContextMap::new();
        result.insert("kubernetes.pods.count", pods.len().to_string());
        let names: Vec<&str> = pods.iter().map(|p| p.metadata.name.as_str()).collect();
        result.insert("kubernetes.pods.names", names.join(","));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodediag_shared::model::{ObjectMeta, Pod};
    use nodediag_shared::runtime::{ContainerSummary, FakeRuntime};
    use nodediag_shared::store::InMemoryStore;

    #[tokio::test]
    async fn test_container_list_reports_inventory() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_container(ContainerSummary {
            id: "abc123".to_string(),
            names: vec!["web".to_string()],
            image: "nginx:1".to_string(),
            state: "running".to_string(),
        });

        let processor = ContainerListProcessor::new(runtime);
        let result = processor.handle(ContextMap::new()).await.unwrap();

        assert_eq!(result.get("runtime.containers.count"), Some("1"));
        assert_eq!(result.get("runtime.containers.ids"), Some("abc123"));
    }

    #[tokio::test]
    async fn test_pod_list_requires_namespace_parameter() {
        let store = Arc::new(InMemoryStore::new());
        let processor = PodListProcessor::new(store);

        let err = processor.handle(ContextMap::new()).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pod_list_filters_by_namespace() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_pod(Pod {
                metadata: ObjectMeta::namespaced("apps", "web-0"),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_pod(Pod {
                metadata: ObjectMeta::namespaced("other", "db-0"),
                ..Default::default()
            })
            .await
            .unwrap();

        let processor = PodListProcessor::new(store);
        let ctx: ContextMap = [(KEY_POD_NAMESPACE, "apps")].into_iter().collect();
        let result = processor.handle(ctx).await.unwrap();

        assert_eq!(result.get("kubernetes.pods.count"), Some("1"));
        assert_eq!(result.get("kubernetes.pods.names"), Some("web-0"));
    }
}
