//! # nodediag-agent
//!
//! The HTTP face of the nodediag agent: the processor framework every
//! diagnostic action plugs into, transient side-endpoint management, and
//! the server/binary wiring that composes the executor, dispatcher, and
//! collaborator drivers into one per-node process.

pub mod processors;
pub mod server;

pub use processors::{Processor, ProcessorError, ProcessorRegistry, ProcessorResult};
pub use server::{agent_router, serve, AgentIdentity};
