//! # Container Runtime Surface
//!
//! Declared interface over the node's container runtime, consumed by the
//! function-pod manager and the container-introspection processors. The
//! concrete driver (Docker/containerd client) is injected at construction;
//! `FakeRuntime` is the in-tree driver for tests and the standalone agent.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::model::FunctionRuntime;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("image build failed for {image}: {reason}")]
    ImageBuild { image: String, reason: String },

    #[error("container {0:?} not found")]
    ContainerNotFound(String),

    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
}

/// Inputs for building a function image from inline source.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuild {
    /// Full image reference (repository:tag).
    pub image: String,
    pub runtime: FunctionRuntime,
    pub source: String,
}

/// One running container, as listed by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
}

/// `top` output for a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerProcesses {
    pub titles: Vec<String>,
    pub processes: Vec<Vec<String>>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync + std::fmt::Debug {
    /// Negotiate and return the API version the driver will speak.
    async fn negotiate_api_version(&self) -> Result<String, RuntimeError>;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Build `build.image` from inline source, yielding build messages as
    /// they arrive. The caller is expected to drain the stream into its log.
    async fn build_image(
        &self,
        build: ImageBuild,
    ) -> Result<BoxStream<'static, String>, RuntimeError>;

    async fn container_list(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn container_inspect(&self, id: &str) -> Result<serde_json::Value, RuntimeError>;

    async fn container_top(&self, id: &str) -> Result<ContainerProcesses, RuntimeError>;
}

/// In-memory runtime driver.
///
/// Tracks the set of "built" images and a fixed container inventory.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    images: DashMap<String, ()>,
    containers: DashMap<String, ContainerSummary>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&self, summary: ContainerSummary) {
        self.containers.insert(summary.id.clone(), summary);
    }

    /// Number of images built so far, for reuse assertions.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn negotiate_api_version(&self) -> Result<String, RuntimeError> {
        Ok("1.41".to_string())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.images.contains_key(image))
    }

    async fn build_image(
        &self,
        build: ImageBuild,
    ) -> Result<BoxStream<'static, String>, RuntimeError> {
        self.images.insert(build.image.clone(), ());
        let messages = vec![
            format!("Step 1/2 : FROM {} base", build.runtime.as_str()),
            format!("Successfully tagged {}", build.image),
        ];
        Ok(stream::iter(messages).boxed())
    }

    async fn container_list(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        Ok(self.containers.iter().map(|e| e.value().clone()).collect())
    }

    async fn container_inspect(&self, id: &str) -> Result<serde_json::Value, RuntimeError> {
        let summary = self
            .containers
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_string()))?;
        serde_json::to_value(&summary)
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn container_top(&self, id: &str) -> Result<ContainerProcesses, RuntimeError> {
        if !self.containers.contains_key(id) {
            return Err(RuntimeError::ContainerNotFound(id.to_string()));
        }
        Ok(ContainerProcesses {
            titles: vec!["PID".to_string(), "CMD".to_string()],
            processes: vec![vec!["1".to_string(), "sleep".to_string()]],
        })
    }
}
