//! Operation descriptors: one declarative object per diagnostic action,
//! carrying exactly one processor backend and an end-to-end timeout.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ObjectMeta;

/// Default end-to-end budget for a single dispatch.
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 30;

/// Image repository prefix for function-backed operations.
const FUNCTION_IMAGE_REPOSITORY: &str = "nodediag/fn";

/// Cluster-scoped descriptor of a single diagnostic action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub metadata: ObjectMeta,
    pub spec: OperationSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    pub processor: ProcessorSpec,
}

/// How an operation is invoked: exactly one backend plus a timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSpec {
    #[serde(flatten)]
    pub backend: ProcessorBackend,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
}

fn default_timeout_seconds() -> u32 {
    DEFAULT_TIMEOUT_SECONDS
}

/// The processor backend sum. Selection is a function of the descriptor
/// alone; the executor never guesses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessorBackend {
    HttpServer(HttpServerSpec),
    ScriptRunner(ScriptRunnerSpec),
    Function(FunctionSpec),
}

/// Remote (or in-process) HTTP processor endpoint. Every field falls back
/// to an agent-level default at dispatch time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpServerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<HttpScheme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpScheme {
    Http,
    Https,
}

impl HttpScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpScheme::Http => "http",
            HttpScheme::Https => "https",
        }
    }
}

/// Local script under `<data_root>/scripts/<operation_name>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRunnerSpec {
    /// Context keys whose values are passed positionally to the shell, in
    /// order. Missing keys are skipped silently.
    #[serde(default)]
    pub arg_keys: Vec<String>,
    /// When set, stdout and stderr land under
    /// `operation.<operation_result_key>.{output,error}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_result_key: Option<String>,
}

/// Function-backed processor: inline source built into a local image and
/// run as an ephemeral pod on this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    pub runtime: FunctionRuntime,
    /// Inline source the image is built from.
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionRuntime {
    Python3,
    Shell,
}

impl FunctionRuntime {
    pub fn as_str(self) -> &'static str {
        match self {
            FunctionRuntime::Python3 => "python3",
            FunctionRuntime::Shell => "shell",
        }
    }
}

impl Operation {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Dispatch timeout for this operation.
    pub fn timeout_seconds(&self) -> u32 {
        self.spec.processor.timeout_seconds
    }

    /// Image reference for a function-backed operation.
    ///
    /// The tag is a short content hash of the runtime and source, so editing
    /// the function source produces a new image while an unchanged operation
    /// keeps hitting the local cache.
    pub fn function_image(&self, func: &FunctionSpec) -> String {
        let mut hasher = Sha256::new();
        hasher.update(func.runtime.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(func.source.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!(
            "{}-{}:{}",
            FUNCTION_IMAGE_REPOSITORY,
            self.metadata.name,
            &digest[..12]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_op(source: &str) -> (Operation, FunctionSpec) {
        let func = FunctionSpec {
            runtime: FunctionRuntime::Python3,
            source: source.to_string(),
        };
        let op = Operation {
            metadata: ObjectMeta::cluster_scoped("f1"),
            spec: OperationSpec {
                processor: ProcessorSpec {
                    backend: ProcessorBackend::Function(func.clone()),
                    timeout_seconds: 30,
                },
            },
        };
        (op, func)
    }

    #[test]
    fn test_timeout_default_applies_on_decode() {
        let raw = r#"{"httpServer":{"path":"/p"}}"#;
        let spec: ProcessorSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(spec.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert!(matches!(spec.backend, ProcessorBackend::HttpServer(_)));
    }

    #[test]
    fn test_backend_sum_is_exclusive_on_the_wire() {
        let raw = r#"{"scriptRunner":{"argKeys":["url"]},"timeoutSeconds":10}"#;
        let spec: ProcessorSpec = serde_json::from_str(raw).unwrap();
        match spec.backend {
            ProcessorBackend::ScriptRunner(s) => assert_eq!(s.arg_keys, vec!["url"]),
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn test_function_image_is_stable_for_same_source() {
        let (op, func) = function_op("print('ok')");
        assert_eq!(op.function_image(&func), op.function_image(&func));
        assert!(op.function_image(&func).starts_with("nodediag/fn-f1:"));
    }

    #[test]
    fn test_function_image_changes_with_source() {
        let (op, func_a) = function_op("print('a')");
        let func_b = FunctionSpec {
            source: "print('b')".to_string(),
            ..func_a.clone()
        };
        assert_ne!(op.function_image(&func_a), op.function_image(&func_b));
    }
}
