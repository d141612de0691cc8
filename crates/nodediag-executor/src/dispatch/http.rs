//! HTTP backend: resolve the processor endpoint with agent defaults, POST
//! the ContextMap as JSON, and decode the reply under the response cap.
//! The function backend reuses `post_context` against a pod endpoint.

use std::time::Duration;

use nodediag_shared::model::{HttpScheme, HttpServerSpec, Operation};
use nodediag_shared::ContextMap;
use tracing::debug;

use super::{DispatchError, Dispatcher, OperationOutcome, MAX_RESPONSE_BYTES};

impl Dispatcher {
    /// Fill omitted endpoint fields from the agent's own address and port.
    pub(super) fn resolve_http_url(&self, spec: &HttpServerSpec) -> String {
        let scheme = spec.scheme.unwrap_or(HttpScheme::Http);
        let address = spec
            .address
            .as_deref()
            .unwrap_or(&self.config.agent_address);
        let port = spec.port.unwrap_or(self.config.agent_port);
        let path = spec.path.as_deref().unwrap_or("/");
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{}://{address}:{port}/{path}", scheme.as_str())
    }

    /// POST `context` to `url` and fold the reply into the dispatch
    /// contract. Transport trouble is a dispatch error; a reachable
    /// processor that answers non-200 or garbage "finished but failed".
    pub(super) async fn post_context(
        &self,
        operation: &Operation,
        url: &str,
        timeout: Duration,
        context: &ContextMap,
    ) -> Result<OperationOutcome, DispatchError> {
        let response = self
            .client
            .post(url)
            .json(context)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, operation, url))?;

        let status = response.status();
        let body = read_capped(response, operation, url).await?;

        if !status.is_success() {
            debug!(
                operation = operation.name(),
                %status,
                "processor reported failure"
            );
            return Ok(OperationOutcome::failed());
        }

        match ContextMap::from_json(&body) {
            Ok(result) => Ok(OperationOutcome::succeeded(result)),
            Err(err) => {
                debug!(
                    operation = operation.name(),
                    error = %err,
                    "processor returned 200 with an undecodable body"
                );
                Ok(OperationOutcome::failed())
            }
        }
    }
}

/// Accumulate the body, refusing to buffer past the cap.
async fn read_capped(
    mut response: reqwest::Response,
    operation: &Operation,
    url: &str,
) -> Result<Vec<u8>, DispatchError> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| classify(e, operation, url))?
    {
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(DispatchError::OversizeResponse {
                limit: MAX_RESPONSE_BYTES,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn classify(err: reqwest::Error, operation: &Operation, url: &str) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Timeout {
            operation: operation.name().to_string(),
            seconds: operation.timeout_seconds(),
        }
    } else {
        DispatchError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}
