//! # Function-Pod Manager
//!
//! Keeps exactly one ephemeral pod per function-typed operation on this
//! node: build the image on cache miss, then create-or-patch a pod named
//! after the operation in the dedicated function namespace. Concurrent
//! ensures for the same operation serialize on a per-operation lock so they
//! converge instead of double-creating.

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use nodediag_shared::model::{
    Container, ContainerPort, FunctionSpec, ObjectMeta, Operation, OwnerReference, Pod, PodSpec,
};
use nodediag_shared::runtime::{ContainerRuntime, ImageBuild, RuntimeError};
use nodediag_shared::store::{ObjectStore, StoreError};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Namespace every function pod lives in. Fixed; not configurable.
pub const FUNCTION_POD_NAMESPACE: &str = "nodediag-functions";

/// Label marking pods this agent manages. A pod with the right name but the
/// wrong (or no) label belongs to someone else and is never touched.
pub const CREATED_BY_LABEL: &str = "app.nodediag.io/created-by";

/// Port the function server listens on inside its container.
pub const FUNCTION_CONTAINER_PORT: u16 = 8089;

#[derive(Debug, thiserror::Error)]
pub enum FunctionPodError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("pod {name:?} exists but is not labeled {label:?}")]
    ForeignPod { name: String, label: &'static str },

    #[error("pod {name:?} has no routable endpoint yet")]
    NoEndpoint { name: String },
}

/// Where a function pod can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodEndpoint {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug)]
pub struct FunctionPodManager {
    store: Arc<dyn ObjectStore>,
    runtime: Arc<dyn ContainerRuntime>,
    node_name: String,
    /// Value written under `CREATED_BY_LABEL`.
    agent_identity: String,
    ensure_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FunctionPodManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        runtime: Arc<dyn ContainerRuntime>,
        node_name: impl Into<String>,
        agent_identity: impl Into<String>,
    ) -> Self {
        Self {
            store,
            runtime,
            node_name: node_name.into(),
            agent_identity: agent_identity.into(),
            ensure_locks: DashMap::new(),
        }
    }

    /// Ensure the image and pod for `operation` exist on this node and
    /// return the pod's endpoint.
    pub async fn ensure(
        &self,
        operation: &Operation,
        func: &FunctionSpec,
    ) -> Result<PodEndpoint, FunctionPodError> {
        let lock = self
            .ensure_locks
            .entry(operation.name().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let image = operation.function_image(func);
        self.ensure_image(operation, func, &image).await?;
        let pod = self.ensure_pod(operation, &image).await?;

        let ip = pod
            .status
            .pod_ip
            .clone()
            .ok_or_else(|| FunctionPodError::NoEndpoint {
                name: pod.metadata.name.clone(),
            })?;
        let port = pod
            .first_container_port()
            .unwrap_or(FUNCTION_CONTAINER_PORT);
        Ok(PodEndpoint { ip, port })
    }

    async fn ensure_image(
        &self,
        operation: &Operation,
        func: &FunctionSpec,
        image: &str,
    ) -> Result<(), FunctionPodError> {
        if self.runtime.image_exists(image).await? {
            debug!(operation = operation.name(), image, "image cached locally");
            return Ok(());
        }

        info!(operation = operation.name(), image, "building function image");
        let mut build_log = self
            .runtime
            .build_image(ImageBuild {
                image: image.to_string(),
                runtime: func.runtime,
                source: func.source.clone(),
            })
            .await?;
        while let Some(message) = build_log.next().await {
            info!(operation = operation.name(), image, "{message}");
        }
        Ok(())
    }

    async fn ensure_pod(
        &self,
        operation: &Operation,
        image: &str,
    ) -> Result<Pod, FunctionPodError> {
        let desired = self.desired_pod(operation, image);
        match self
            .store
            .get_pod(FUNCTION_POD_NAMESPACE, operation.name())
            .await
        {
            Ok(existing) => {
                let labeled = existing.metadata.labels.get(CREATED_BY_LABEL)
                    == Some(&self.agent_identity);
                if !labeled {
                    return Err(FunctionPodError::ForeignPod {
                        name: existing.metadata.name,
                        label: CREATED_BY_LABEL,
                    });
                }
                debug!(operation = operation.name(), "patching existing function pod");
                Ok(self.store.patch_pod(&desired).await?)
            }
            Err(err) if err.is_not_found() => {
                info!(operation = operation.name(), "creating function pod");
                Ok(self.store.create_pod(desired).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn desired_pod(&self, operation: &Operation, image: &str) -> Pod {
        let mut metadata = ObjectMeta::namespaced(FUNCTION_POD_NAMESPACE, operation.name());
        metadata.labels.insert(
            CREATED_BY_LABEL.to_string(),
            self.agent_identity.clone(),
        );
        metadata.owner_references = vec![OwnerReference {
            kind: "Operation".to_string(),
            name: operation.name().to_string(),
            uid: operation.metadata.uid,
        }];
        Pod {
            metadata,
            spec: PodSpec {
                node_name: self.node_name.clone(),
                containers: vec![Container {
                    name: "function".to_string(),
                    image: image.to_string(),
                    ports: vec![ContainerPort {
                        container_port: FUNCTION_CONTAINER_PORT,
                    }],
                }],
                // The image was just built on this node; never pull.
                image_pull_policy: Some("Never".to_string()),
            },
            status: Default::default(),
        }
    }
}
