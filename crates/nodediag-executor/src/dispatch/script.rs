//! Script backend: run `<scripts_dir>/<operation_name>` through a shell
//! with positional arguments looked up from the ContextMap, in its own
//! process group so a timeout can take the whole tree down.
//!
//! The dispatch layer always reports success for a script that ran; exit
//! status and stderr are encoded into the result keys
//! `operation.<key>.output` / `operation.<key>.error` and interpreted by
//! graph authors, not by the executor.

use std::process::Stdio;
use std::time::Duration;

use nodediag_shared::model::{Operation, ScriptRunnerSpec};
use nodediag_shared::ContextMap;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{DispatchError, Dispatcher, OperationOutcome};

impl Dispatcher {
    pub(super) async fn run_script(
        &self,
        operation: &Operation,
        spec: &ScriptRunnerSpec,
        timeout: Duration,
        context: &ContextMap,
    ) -> Result<OperationOutcome, DispatchError> {
        let path = self.config.scripts_dir.join(operation.name());
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(DispatchError::ScriptNotFound { path }),
        }

        // Missing keys are skipped silently; argument order follows
        // arg_keys, not the map.
        let args: Vec<&str> = spec
            .arg_keys
            .iter()
            .filter_map(|key| context.get(key))
            .collect();

        let mut command = Command::new("sh");
        command
            .arg(&path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|source| DispatchError::ScriptSpawn {
                path: path.clone(),
                source,
            })?;
        #[cfg(unix)]
        let pgid = child.id();

        debug!(
            operation = operation.name(),
            script = %path.display(),
            args = args.len(),
            "running script"
        );

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(DispatchError::ScriptSpawn { path, source }),
            Err(_) => {
                // The dropped child is killed by kill_on_drop; the group
                // signal catches anything it spawned.
                #[cfg(unix)]
                if let Some(pgid) = pgid {
                    kill_process_group(pgid);
                }
                return Err(DispatchError::Timeout {
                    operation: operation.name().to_string(),
                    seconds: operation.timeout_seconds(),
                });
            }
        };

        let mut result = ContextMap::new();
        if let Some(key) = &spec.operation_result_key {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stdout = stdout.trim_end_matches(['\n', '\r']);
            if !stdout.is_empty() {
                result.insert(format!("operation.{key}.output"), stdout);
            }
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                result.insert(
                    format!("operation.{key}.error"),
                    format!("{}: {}", output.status, stderr.trim_end_matches(['\n', '\r'])),
                );
            }
        }
        Ok(OperationOutcome::succeeded(result))
    }
}

/// SIGKILL the script's process group.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(pgid) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        warn!(pgid, %err, "failed to kill script process group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatcherConfig;
    use crate::function_pod::FunctionPodManager;
    use nodediag_shared::model::{
        ObjectMeta, OperationSpec, ProcessorBackend, ProcessorSpec,
    };
    use nodediag_shared::runtime::FakeRuntime;
    use nodediag_shared::store::InMemoryStore;
    use std::sync::Arc;

    fn dispatcher_with_scripts(dir: &std::path::Path) -> Dispatcher {
        let store = Arc::new(InMemoryStore::new());
        let runtime = Arc::new(FakeRuntime::new());
        let pods = Arc::new(FunctionPodManager::new(store, runtime, "n1", "nodediag-agent"));
        Dispatcher::new(
            DispatcherConfig {
                agent_address: "127.0.0.1".to_string(),
                agent_port: 8090,
                scripts_dir: dir.to_path_buf(),
            },
            pods,
        )
        .unwrap()
    }

    fn script_operation(name: &str, spec: ScriptRunnerSpec, timeout_seconds: u32) -> Operation {
        Operation {
            metadata: ObjectMeta::cluster_scoped(name),
            spec: OperationSpec {
                processor: ProcessorSpec {
                    backend: ProcessorBackend::ScriptRunner(spec),
                    timeout_seconds,
                },
            },
        }
    }

    fn write_script(dir: &std::path::Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn test_stdout_lands_in_output_key() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "probe", "echo hello");
        let dispatcher = dispatcher_with_scripts(dir.path());

        let op = script_operation(
            "probe",
            ScriptRunnerSpec {
                arg_keys: vec!["url".to_string(), "tag".to_string()],
                operation_result_key: Some("probe".to_string()),
            },
            10,
        );
        let ctx: ContextMap = [("url", "http://x"), ("tag", "1"), ("other", "ignored")]
            .into_iter()
            .collect();

        let outcome = dispatcher.dispatch(&op, &ctx).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.result.get("operation.probe.output"), Some("hello"));
        assert!(outcome.result.get("operation.probe.error").is_none());
    }

    #[tokio::test]
    async fn test_args_are_positional_and_missing_keys_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "argdump", r#"echo "$1,$2""#);
        let dispatcher = dispatcher_with_scripts(dir.path());

        let op = script_operation(
            "argdump",
            ScriptRunnerSpec {
                arg_keys: vec![
                    "absent".to_string(),
                    "first".to_string(),
                    "second".to_string(),
                ],
                operation_result_key: Some("argdump".to_string()),
            },
            10,
        );
        let ctx: ContextMap = [("first", "a"), ("second", "b")].into_iter().collect();

        let outcome = dispatcher.dispatch(&op, &ctx).await.unwrap();
        // "absent" was skipped, so positional args shift down.
        assert_eq!(outcome.result.get("operation.argdump.output"), Some("a,b"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fills_error_key_and_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "broken", "echo oops >&2; exit 3");
        let dispatcher = dispatcher_with_scripts(dir.path());

        let op = script_operation(
            "broken",
            ScriptRunnerSpec {
                arg_keys: vec![],
                operation_result_key: Some("broken".to_string()),
            },
            10,
        );

        let outcome = dispatcher.dispatch(&op, &ContextMap::new()).await.unwrap();
        assert!(outcome.succeeded);
        let error = outcome.result.get("operation.broken.error").unwrap();
        assert!(error.contains("oops"), "error key was {error:?}");
        assert!(outcome.result.get("operation.broken.output").is_none());
    }

    #[tokio::test]
    async fn test_no_result_key_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "quiet", "echo noise");
        let dispatcher = dispatcher_with_scripts(dir.path());

        let op = script_operation("quiet", ScriptRunnerSpec::default(), 10);
        let outcome = dispatcher.dispatch(&op, &ContextMap::new()).await.unwrap();
        assert!(outcome.succeeded);
        assert!(outcome.result.is_empty());
    }

    #[tokio::test]
    async fn test_missing_script_is_a_dispatch_error() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with_scripts(dir.path());

        let op = script_operation("absent", ScriptRunnerSpec::default(), 10);
        let err = dispatcher.dispatch(&op, &ContextMap::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::ScriptNotFound { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_the_script() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "slow", "sleep 30");
        let dispatcher = dispatcher_with_scripts(dir.path());

        let op = script_operation("slow", ScriptRunnerSpec::default(), 1);
        let started = std::time::Instant::now();
        let err = dispatcher.dispatch(&op, &ContextMap::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { seconds: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
