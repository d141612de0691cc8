//! # nodediag-shared
//!
//! Shared foundation for the nodediag agent: the declarative object model,
//! the ContextMap payload protocol, collaborator interfaces (object store,
//! event recorder, container runtime) with in-memory drivers, configuration,
//! logging, and the executor's counter surface.
//!
//! ## Layout
//!
//! - [`model`]: Operation / OperationSet / Diagnosis / Task plus workload
//!   mirrors.
//! - [`context`]: the string-to-string payload exchanged with processors.
//! - [`store`]: the object-store surface and the in-memory driver.
//! - [`events`]: lifecycle event recording.
//! - [`runtime`]: container runtime surface and fake driver.
//! - [`config`] / [`logging`] / [`metrics`]: ambient agent concerns.

pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod runtime;
pub mod store;

pub use context::ContextMap;
pub use errors::{AgentError, AgentResult};
