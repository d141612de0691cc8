//! # Processor Framework
//!
//! Every processor is one HTTP endpoint at `/processor/<name>`, accepting a
//! POST ContextMap JSON body and answering one of:
//!
//! - `200` with a ContextMap JSON body: success, keys merge into results;
//! - `4xx/5xx` with a `text/plain` message: finished but failed;
//! - `422`: the processor's feature gate is off;
//! - `405`: any method other than POST.
//!
//! Parameters come only from the request body, never from the URL or
//! headers. Responses must stay strictly under the shared payload cap; a
//! processor that produces more gets a 500 instead of breaking the caller.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use nodediag_shared::config::FeatureGate;
use nodediag_shared::context::MAX_CONTEXT_BYTES;
use nodediag_shared::ContextMap;
use tracing::{debug, warn};

pub mod builtin;
pub mod ephemeral;

/// A processor-reported failure: an HTTP status plus a plain-text message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProcessorError {
    pub status: StatusCode,
    pub message: String,
}

impl ProcessorError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

pub type ProcessorResult = Result<ContextMap, ProcessorError>;

/// One diagnostic action hosted in-process.
#[async_trait]
pub trait Processor: Send + Sync + std::fmt::Debug {
    /// Registry path segment: the endpoint is `/processor/<name>`.
    fn name(&self) -> &str;

    /// Feature-gate key. Defaults to the processor name.
    fn feature(&self) -> &str {
        self.name()
    }

    async fn handle(&self, context: ContextMap) -> ProcessorResult;
}

/// Mounts processors into an axum router behind the feature gate.
#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    gate: FeatureGate,
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new(gate: FeatureGate) -> Self {
        Self {
            gate,
            processors: Vec::new(),
        }
    }

    pub fn register(&mut self, processor: Arc<dyn Processor>) -> &mut Self {
        self.processors.push(processor);
        self
    }

    /// Paths currently registered, for the health endpoint.
    pub fn paths(&self) -> Vec<String> {
        self.processors
            .iter()
            .map(|p| format!("/processor/{}", p.name()))
            .collect()
    }

    /// Build the router. Method routing answers 405 for anything but POST.
    pub fn into_router(self) -> Router {
        let gate = Arc::new(self.gate);
        let mut router = Router::new();
        for processor in self.processors {
            let path = format!("/processor/{}", processor.name());
            let gate = gate.clone();
            router = router.route(
                &path,
                post(move |body: Bytes| invoke(processor, gate, body)),
            );
        }
        router
    }
}

async fn invoke(
    processor: Arc<dyn Processor>,
    gate: Arc<FeatureGate>,
    body: Bytes,
) -> Response {
    if !gate.enabled(processor.feature()) {
        debug!(processor = processor.name(), "feature disabled");
        return plain(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("processor {:?} is disabled by feature gate", processor.name()),
        );
    }

    let context = match ContextMap::from_json(&body) {
        Ok(context) => context,
        Err(err) => {
            return plain(
                StatusCode::BAD_REQUEST,
                format!("request body is not a string map: {err}"),
            );
        }
    };

    match processor.handle(context).await {
        Ok(result) => match result.to_json() {
            Ok(json) if json.len() < MAX_CONTEXT_BYTES => (
                StatusCode::OK,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                )],
                json,
            )
                .into_response(),
            Ok(json) => {
                warn!(
                    processor = processor.name(),
                    bytes = json.len(),
                    "result map exceeds the payload cap"
                );
                plain(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "result exceeds the payload cap".to_string(),
                )
            }
            Err(err) => plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("result serialization failed: {err}"),
            ),
        },
        Err(err) => {
            debug!(processor = processor.name(), status = %err.status, "{err}");
            plain(err.status, err.message)
        }
    }
}

fn plain(status: StatusCode, message: String) -> Response {
    (
        status,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )],
        message,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl Processor for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn handle(&self, context: ContextMap) -> ProcessorResult {
            Ok(context)
        }
    }

    #[derive(Debug)]
    struct Rejecting;

    #[async_trait]
    impl Processor for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn handle(&self, _context: ContextMap) -> ProcessorResult {
            Err(ProcessorError::bad_request("parameter \"target\" missing"))
        }
    }

    #[derive(Debug)]
    struct Oversized;

    #[async_trait]
    impl Processor for Oversized {
        fn name(&self) -> &str {
            "oversized"
        }

        async fn handle(&self, _context: ContextMap) -> ProcessorResult {
            let mut result = ContextMap::new();
            result.insert("blob", "x".repeat(MAX_CONTEXT_BYTES));
            Ok(result)
        }
    }

    fn router(gate: FeatureGate) -> Router {
        let mut registry = ProcessorRegistry::new(gate);
        registry
            .register(Arc::new(Echo))
            .register(Arc::new(Rejecting))
            .register(Arc::new(Oversized));
        registry.into_router()
    }

    async fn send(router: Router, method: &str, path: &str, body: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_post_round_trips_the_context() {
        let (status, body) = send(
            router(FeatureGate::default()),
            "POST",
            "/processor/echo",
            r#"{"foo":"bar"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"foo":"bar"}"#);
    }

    #[tokio::test]
    async fn test_non_post_is_405() {
        let (status, _) = send(
            router(FeatureGate::default()),
            "GET",
            "/processor/echo",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_disabled_feature_is_422() {
        let (status, body) = send(
            router(FeatureGate::with_disabled(["echo"])),
            "POST",
            "/processor/echo",
            r#"{}"#,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.contains("disabled"));
    }

    #[tokio::test]
    async fn test_non_string_map_body_is_400() {
        let (status, _) = send(
            router(FeatureGate::default()),
            "POST",
            "/processor/echo",
            r#"{"n": 1}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_validation_failure_surfaces_as_4xx_text() {
        let (status, body) = send(
            router(FeatureGate::default()),
            "POST",
            "/processor/rejecting",
            r#"{}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("target"));
    }

    #[tokio::test]
    async fn test_oversized_result_is_500() {
        let (status, _) = send(
            router(FeatureGate::default()),
            "POST",
            "/processor/oversized",
            r#"{}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_processor_is_404() {
        let (status, _) = send(
            router(FeatureGate::default()),
            "POST",
            "/processor/absent",
            r#"{}"#,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
