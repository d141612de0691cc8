//! # Transient Side Endpoints
//!
//! Processors may publish debug surfaces (shells, profilers, captures) as
//! child processes listening on ephemeral ports. Every such child runs in
//! its own process group under a watchdog: it is torn down on explicit
//! cancellation or when its expiration elapses, whichever comes first. The
//! processor's result map carries the endpoint URL only, never the child's
//! output.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default lifetime of a side endpoint.
pub const DEFAULT_EXPIRATION_SECONDS: u64 = 7200;

/// Expirations below this are raised to it.
pub const MIN_EXPIRATION_SECONDS: u64 = 1;

/// Clamp a requested expiration into the legal range; `None` means the
/// default.
pub fn expiration(requested: Option<u64>) -> Duration {
    let seconds = requested
        .unwrap_or(DEFAULT_EXPIRATION_SECONDS)
        .max(MIN_EXPIRATION_SECONDS);
    Duration::from_secs(seconds)
}

/// Reserve an ephemeral localhost port for a child to bind.
pub async fn allocate_port() -> std::io::Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// A running side endpoint and its watchdog.
#[derive(Debug)]
pub struct EphemeralEndpoint {
    url: String,
    cancel: CancellationToken,
}

impl EphemeralEndpoint {
    /// Spawn `command` in its own process group and arm the watchdog.
    ///
    /// The caller has already pointed the command at `port`; the returned
    /// endpoint reports `http://<bind>:<port><path>`.
    pub fn spawn(
        mut command: Command,
        bind_address: &str,
        port: u16,
        path: &str,
        lifetime: Duration,
    ) -> std::io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        #[cfg(unix)]
        let pgid = child.id();

        let cancel = CancellationToken::new();
        let watchdog_cancel = cancel.clone();
        let url = format!("http://{bind_address}:{port}{path}");
        let endpoint_url = url.clone();

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    debug!(url = %endpoint_url, ?status, "side endpoint exited on its own");
                    return;
                }
                _ = watchdog_cancel.cancelled() => {
                    info!(url = %endpoint_url, "side endpoint cancelled");
                }
                _ = tokio::time::sleep(lifetime) => {
                    info!(
                        url = %endpoint_url,
                        lifetime_secs = lifetime.as_secs(),
                        "side endpoint expired"
                    );
                }
            }
            #[cfg(unix)]
            if let Some(pgid) = pgid {
                terminate_group(pgid);
            }
            // Dropping the child kills the direct descendant if the group
            // signal missed it.
            drop(child);
        });

        Ok(Self { url, cancel })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Tear the endpoint down before its expiration.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// SIGTERM the child's process group.
#[cfg(unix)]
fn terminate_group(pgid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(pgid) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGTERM) {
        warn!(pgid, %err, "failed to signal side endpoint process group");
    }
}
