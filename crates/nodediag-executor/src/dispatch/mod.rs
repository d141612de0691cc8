//! # Operation Dispatcher
//!
//! Turns an `Operation` descriptor plus a `ContextMap` into a processor
//! invocation through one of three backends (remote or in-process HTTP
//! server, local script, ephemeral function pod) behind one contract:
//!
//! - `Ok(OperationOutcome { succeeded: true, result })`: the processor
//!   finished and returned a decodable result map;
//! - `Ok(OperationOutcome { succeeded: false, .. })`: the processor was
//!   reached but reported failure (non-200, or a 200 whose body does not
//!   decode); never retried;
//! - `Err(DispatchError)`: delivery failed (transport, timeout, oversize,
//!   missing script, pod trouble); retried by the caller's envelope.
//!
//! `timeout_seconds` bounds the whole call and every backend enforces the
//! same 2 MiB response cap.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nodediag_shared::model::{Operation, ProcessorBackend};
use nodediag_shared::{AgentError, AgentResult, ContextMap};

use crate::function_pod::{FunctionPodError, FunctionPodManager};

mod http;
mod script;

/// Hard cap on a decoded processor response. A body of exactly this size is
/// accepted; one more byte is a dispatch error.
pub const MAX_RESPONSE_BYTES: usize = nodediag_shared::context::MAX_CONTEXT_BYTES;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transport error calling {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("operation {operation:?} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u32 },

    #[error("response body exceeded the {limit}-byte cap")]
    OversizeResponse { limit: usize },

    #[error("script {path:?} not found")]
    ScriptNotFound { path: PathBuf },

    #[error("failed to run script {path:?}: {source}")]
    ScriptSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("function pod for operation {operation:?}: {source}")]
    FunctionPod {
        operation: String,
        #[source]
        source: FunctionPodError,
    },
}

/// What a well-delivered dispatch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub succeeded: bool,
    pub result: ContextMap,
}

impl OperationOutcome {
    pub fn succeeded(result: ContextMap) -> Self {
        Self {
            succeeded: true,
            result,
        }
    }

    /// Finished but failed: the processor was reached and said no.
    pub fn failed() -> Self {
        Self {
            succeeded: false,
            result: ContextMap::new(),
        }
    }
}

/// Agent-level defaults for HTTP operations that omit address or port.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    pub agent_address: String,
    pub agent_port: u16,
    pub scripts_dir: PathBuf,
}

/// Backend-selecting dispatcher. One long-lived HTTP client serves all
/// HTTP and function dispatches.
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    client: reqwest::Client,
    pods: Arc<FunctionPodManager>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, pods: Arc<FunctionPodManager>) -> AgentResult<Self> {
        // Peer agents present self-signed certificates, and connections are
        // never reused across dispatches: a stalled processor must not hold
        // a pooled connection hostage.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| AgentError::Internal(format!("building dispatch client: {e}")))?;
        Ok(Self {
            config,
            client,
            pods,
        })
    }

    /// Invoke `operation` with `context`. Backend selection is a function
    /// of the descriptor alone.
    pub async fn dispatch(
        &self,
        operation: &Operation,
        context: &ContextMap,
    ) -> Result<OperationOutcome, DispatchError> {
        let timeout = Duration::from_secs(u64::from(operation.timeout_seconds()));
        match &operation.spec.processor.backend {
            ProcessorBackend::HttpServer(spec) => {
                let url = self.resolve_http_url(spec);
                self.post_context(operation, &url, timeout, context).await
            }
            ProcessorBackend::ScriptRunner(spec) => {
                self.run_script(operation, spec, timeout, context).await
            }
            ProcessorBackend::Function(spec) => {
                let endpoint = self.pods.ensure(operation, spec).await.map_err(|source| {
                    DispatchError::FunctionPod {
                        operation: operation.name().to_string(),
                        source,
                    }
                })?;
                let url = format!("http://{}:{}/", endpoint.ip, endpoint.port);
                self.post_context(operation, &url, timeout, context).await
            }
        }
    }
}
