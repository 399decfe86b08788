//! Backend process control.
//!
//! Backends routinely run in a different session than the daemon (the
//! user started them from the Start menu, an installer service, or a
//! previous login), so termination must be system-wide: the implementation
//! shells out to PowerShell CIM rather than relying on any
//! parent-kills-child relationship.  Launching is equally detached, via
//! a `start`-style indirection, so the child is not reaped when the
//! daemon exits.
//!
//! Everything is behind the [`ProcessControl`] trait so the router can be
//! driven with a spy in tests.

use std::time::Duration;

use agentmux_core::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

/// How long to wait for a terminated process to actually vanish.
const TERMINATE_WAIT: Duration = Duration::from_secs(5);
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Is any process with this image name running, in any session?
    async fn is_running(&self, process_name: &str) -> bool;

    /// Terminate every process with this image name, cross-session, then
    /// wait up to 5 s for them to vanish.  Logged and non-fatal if they
    /// do not.
    async fn terminate(&self, process_name: &str) -> Result<()>;

    /// Launch the backend detached, unless it is already running.
    ///
    /// A bare command (no path separator) is launched by name via `PATH`;
    /// an explicit path must exist or the launch is skipped with a
    /// warning.
    async fn launch_detached(&self, process_name: &str, exe_path: &str) -> Result<()>;
}

/// Real implementation backed by `sysinfo` enumeration and shell-outs.
#[derive(Debug, Default)]
pub struct SystemProcessControl;

impl SystemProcessControl {
    pub fn new() -> Self {
        Self
    }

    async fn poll_until_gone(&self, process_name: &str) {
        let deadline = tokio::time::Instant::now() + TERMINATE_WAIT;
        while tokio::time::Instant::now() < deadline {
            if !self.is_running(process_name).await {
                return;
            }
            tokio::time::sleep(TERMINATE_POLL_INTERVAL).await;
        }
        warn!(process = %process_name, "process still running 5s after terminate");
    }
}

/// `true` when `exe_path` is a bare command to be resolved via `PATH`.
pub fn is_bare_command(exe_path: &str) -> bool {
    !exe_path.contains(['/', '\\'])
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
    async fn is_running(&self, process_name: &str) -> bool {
        let name = process_name.to_string();
        let running = tokio::task::spawn_blocking(move || {
            use sysinfo::{ProcessesToUpdate, System};

            let mut system = System::new();
            system.refresh_processes(ProcessesToUpdate::All, true);
            system
                .processes_by_name(std::ffi::OsStr::new(&name))
                .next()
                .is_some()
        })
        .await
        .unwrap_or(false);

        debug!(process = %process_name, running, "process query");
        running
    }

    async fn terminate(&self, process_name: &str) -> Result<()> {
        debug!(process = %process_name, "terminating all instances");

        #[cfg(windows)]
        let status = {
            // CIM terminate reaches processes in every session, which
            // taskkill under a non-elevated token does not.
            let filter = format!("Name='{}'", process_name.replace('\'', ""));
            tokio::process::Command::new("powershell")
                .args([
                    "-NoProfile",
                    "-NonInteractive",
                    "-Command",
                    &format!(
                        "Get-CimInstance Win32_Process -Filter \"{filter}\" | \
                         Invoke-CimMethod -MethodName Terminate | Out-Null"
                    ),
                ])
                .status()
                .await
        };

        #[cfg(not(windows))]
        let status = tokio::process::Command::new("pkill")
            .args(["-x", process_name])
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                // pkill exits 1 when nothing matched; that is fine.
                debug!(process = %process_name, code = ?status.code(), "terminate command exit");
            }
            Err(e) => {
                return Err(Error::ProcessControl(format!(
                    "terminate {process_name}: {e}"
                )));
            }
        }

        self.poll_until_gone(process_name).await;
        Ok(())
    }

    async fn launch_detached(&self, process_name: &str, exe_path: &str) -> Result<()> {
        if self.is_running(process_name).await {
            debug!(process = %process_name, "already running, not launching");
            return Ok(());
        }

        if !is_bare_command(exe_path) && !std::path::Path::new(exe_path).exists() {
            warn!(process = %process_name, path = %exe_path, "executable not found, not launching");
            return Ok(());
        }

        debug!(process = %process_name, path = %exe_path, "launching detached");

        #[cfg(windows)]
        let spawned = {
            // `start` detaches the child from our process tree so it
            // survives the daemon's own exit.
            tokio::process::Command::new("cmd")
                .args(["/c", "start", "", exe_path])
                .spawn()
        };

        #[cfg(not(windows))]
        let spawned = tokio::process::Command::new(exe_path).spawn();

        match spawned {
            Ok(_child) => Ok(()),
            Err(e) => Err(Error::ProcessControl(format!(
                "launch {process_name} from {exe_path}: {e}"
            ))),
        }
    }
}
