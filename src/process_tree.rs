//! Forced process-tree termination.
//!
//! The gateway JVM has been observed to outlive a graceful shutdown request,
//! and it forks helpers of its own. Teardown therefore always ends with a
//! kill of the whole tree, addressed by the PID of the launched child.
//!
//! - Unix: the child is spawned as the leader of its own process group, so
//!   `killpg(pid, SIGKILL)` reaches every descendant that did not escape
//!   the group.
//! - Windows: `taskkill /f /t /pid <pid>`.
//!
//! "No such process" counts as success on both platforms.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::{GatewayError, Result};

/// Capability to forcibly terminate a process and its descendants.
pub trait ProcessTreeKiller: Send + Sync {
    /// Kill `pid` and all of its descendants.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Teardown` if the platform refuses the kill for
    /// any reason other than the process being gone already.
    fn kill_tree(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Kills process trees with the host platform's native facility.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformTreeKiller;

impl ProcessTreeKiller for PlatformTreeKiller {
    fn kill_tree(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if pid == 0 {
                return Err(GatewayError::Teardown("pid must be non-zero".into()));
            }
            kill_tree_native(pid).await
        })
    }
}

/// Kill `pid` and its descendants without an async runtime.
///
/// Used where awaiting is impossible, such as `Drop`.
///
/// # Errors
///
/// Returns `GatewayError::Teardown` if the platform refuses the kill for any
/// reason other than the process being gone already.
pub fn kill_tree_blocking(pid: u32) -> Result<()> {
    if pid == 0 {
        return Err(GatewayError::Teardown("pid must be non-zero".into()));
    }
    kill_group(pid)
}

#[cfg(unix)]
#[allow(clippy::unused_async)]
async fn kill_tree_native(pid: u32) -> Result<()> {
    kill_group(pid)
}

#[cfg(unix)]
fn kill_group(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| GatewayError::Teardown(format!("pid {pid} out of range")))?;

    // A group id is never recycled while any member is alive, so this stays
    // safe even after the leader itself has been reaped.
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pid, "sent SIGKILL to process group");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!(pid, "process group already gone");
            Ok(())
        }
        Err(err) => Err(GatewayError::Teardown(format!(
            "killpg {pid} failed: {err}"
        ))),
    }
}

/// `taskkill` exit code when no process matches the PID.
#[cfg(windows)]
const TASKKILL_NOT_FOUND: i32 = 128;
/// Suppress the console window `taskkill` would otherwise flash.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[cfg(windows)]
fn taskkill_args(pid: u32) -> [String; 4] {
    ["/f".into(), "/t".into(), "/pid".into(), pid.to_string()]
}

#[cfg(windows)]
async fn kill_tree_native(pid: u32) -> Result<()> {
    use std::process::Stdio;

    use tokio::process::Command;

    let status = Command::new("taskkill")
        .args(taskkill_args(pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()
        .await
        .map_err(|err| GatewayError::Teardown(format!("failed to run taskkill: {err}")))?;
    taskkill_result(pid, status.code())
}

#[cfg(windows)]
fn kill_group(pid: u32) -> Result<()> {
    use std::os::windows::process::CommandExt;
    use std::process::{Command, Stdio};

    let status = Command::new("taskkill")
        .args(taskkill_args(pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()
        .map_err(|err| GatewayError::Teardown(format!("failed to run taskkill: {err}")))?;
    taskkill_result(pid, status.code())
}

#[cfg(windows)]
fn taskkill_result(pid: u32, code: Option<i32>) -> Result<()> {
    match code {
        Some(0) => {
            debug!(pid, "taskkill terminated process tree");
            Ok(())
        }
        Some(TASKKILL_NOT_FOUND) => {
            debug!(pid, "process already gone");
            Ok(())
        }
        code => Err(GatewayError::Teardown(format!(
            "taskkill failed for pid {pid} (exit {code:?})"
        ))),
    }
}
