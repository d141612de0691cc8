//! # Object Store Surface
//!
//! The declarative-object store is an external collaborator; this module
//! declares the exact surface the core consumes: Get/Update/Patch on the
//! diagnosis objects and the workload mirrors, List where processors need
//! it, and a one-shot cache-readiness signal. Concrete cluster drivers are
//! injected at construction; `InMemoryStore` is the in-tree driver used by
//! tests and the standalone agent.
//!
//! Writes are optimistically concurrent: every update carries the resource
//! version it read, and a stale version fails with `StoreError::Conflict`
//! so the caller's retry envelope can refetch and reapply.

use async_trait::async_trait;

use crate::model::{
    Diagnosis, Endpoints, Node, Operation, OperationSet, Pod, Secret, Service, Task,
};

pub mod memory;

pub use memory::InMemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("conflict writing {kind} {name:?}: stale resource version")]
    Conflict { kind: &'static str, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn conflict(kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::Conflict {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// The store surface consumed by the core.
///
/// Object identity is `(namespace, name)` for namespaced kinds and plain
/// `name` for cluster-scoped kinds (Operation, OperationSet, Node).
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Resolve once the store's read cache has synced. Reads served before
    /// this resolves may be arbitrarily stale.
    async fn wait_cache_ready(&self);

    // -- tasks ---------------------------------------------------------

    async fn get_task(&self, namespace: &str, name: &str) -> Result<Task, StoreError>;

    /// Versioned status update; bumps the resource version on success.
    async fn update_task(&self, task: &Task) -> Result<Task, StoreError>;

    // -- diagnoses -----------------------------------------------------

    async fn get_diagnosis(&self, namespace: &str, name: &str) -> Result<Diagnosis, StoreError>;

    /// Versioned update covering status and the agent-owned hash label.
    async fn update_diagnosis(&self, diagnosis: &Diagnosis) -> Result<Diagnosis, StoreError>;

    // -- read-only descriptors ----------------------------------------

    async fn get_operation(&self, name: &str) -> Result<Operation, StoreError>;

    async fn get_operation_set(&self, name: &str) -> Result<OperationSet, StoreError>;

    // -- pods ----------------------------------------------------------

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError>;

    async fn create_pod(&self, pod: Pod) -> Result<Pod, StoreError>;

    /// Structural merge of image, labels, and owner references into an
    /// existing pod. Never creates.
    async fn patch_pod(&self, pod: &Pod) -> Result<Pod, StoreError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, StoreError>;

    // -- cluster inventory used by processors -------------------------

    async fn get_node(&self, name: &str) -> Result<Node, StoreError>;

    async fn update_node(&self, node: &Node) -> Result<Node, StoreError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, StoreError>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, StoreError>;

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints, StoreError>;

    async fn list_endpoints(&self, namespace: &str) -> Result<Vec<Endpoints>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(StoreError::not_found("Task", "t").is_not_found());
        assert!(StoreError::conflict("Task", "t").is_conflict());
        assert!(StoreError::Unavailable("cache syncing".into()).is_unavailable());
        assert!(!StoreError::already_exists("Pod", "p").is_conflict());
    }

    /// Compile-time proof that ObjectStore is object-safe.
    fn _assert_object_safe(_: &dyn ObjectStore) {}
}
