//! Gateway teardown.
//!
//! Graceful shutdown of the engine is unreliable, so teardown is
//! best-effort-then-forceful:
//!
//! 1. ask the gateway to shut down over the control channel;
//! 2. close the child's stdin;
//! 3. kill the whole process tree, whatever steps 1 and 2 reported;
//! 4. wait for the child to be reaped.
//!
//! Nothing here returns an error to the caller. Failures are logged and the
//! next step proceeds.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::gateway::channel::ControlChannel;
use crate::gateway::launcher::GatewayHandle;
use crate::process_tree::ProcessTreeKiller;

/// Default bound on each graceful step and on the final reap.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What happened during one teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapOutcome {
    /// PID that was torn down.
    pub pid: u32,
    /// Whether the gateway accepted the shutdown request.
    pub graceful: bool,
    /// Whether the tree kill reported success.
    pub tree_killed: bool,
    /// Exit status collected from the child, if it was reaped in time.
    pub exit_status: Option<ExitStatus>,
}

impl ReapOutcome {
    /// Whether the child is confirmed gone.
    #[must_use]
    pub fn reaped(&self) -> bool {
        self.exit_status.is_some()
    }
}

/// Tears down gateway processes.
#[derive(Clone)]
pub struct ProcessReaper {
    killer: Arc<dyn ProcessTreeKiller>,
    grace: Duration,
}

impl std::fmt::Debug for ProcessReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessReaper")
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl ProcessReaper {
    /// Create a reaper that bounds each graceful step by `grace`.
    #[must_use]
    pub fn new(killer: Arc<dyn ProcessTreeKiller>, grace: Duration) -> Self {
        Self { killer, grace }
    }

    /// Bound on each graceful step.
    #[must_use]
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Tear down `handle`, shutting `channel` down first when present.
    pub async fn reap(
        &self,
        handle: GatewayHandle,
        channel: Option<Box<dyn ControlChannel>>,
    ) -> ReapOutcome {
        let span = info_span!("reap_gateway", pid = handle.pid());
        self.reap_inner(handle, channel).instrument(span).await
    }

    async fn reap_inner(
        &self,
        handle: GatewayHandle,
        channel: Option<Box<dyn ControlChannel>>,
    ) -> ReapOutcome {
        let (mut child, stdin, pid) = handle.into_parts();

        let graceful = match channel {
            Some(mut channel) => match tokio::time::timeout(self.grace, channel.shutdown()).await
            {
                Ok(Ok(())) => {
                    debug!(pid, "gateway accepted shutdown request");
                    true
                }
                Ok(Err(err)) => {
                    warn!(pid, %err, "graceful gateway shutdown failed");
                    false
                }
                Err(_) => {
                    warn!(pid, grace = ?self.grace, "graceful gateway shutdown timed out");
                    false
                }
            },
            None => false,
        };

        // The gateway watches its stdin and exits on EOF.
        drop(stdin);

        let tree_killed = match self.killer.kill_tree(pid).await {
            Ok(()) => true,
            Err(err) => {
                warn!(pid, %err, "process tree kill failed, killing child directly");
                if let Err(err) = child.start_kill() {
                    debug!(pid, %err, "direct kill skipped");
                }
                false
            }
        };

        let exit_status = match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                warn!(pid, %err, "error waiting for gateway process");
                None
            }
            Err(_) => {
                warn!(pid, "gateway process not reaped within grace period, forcing kill");
                child.start_kill().ok();
                tokio::time::timeout(self.grace, child.wait())
                    .await
                    .ok()
                    .and_then(std::result::Result::ok)
            }
        };

        info!(pid, graceful, tree_killed, ?exit_status, "gateway torn down");
        ReapOutcome {
            pid,
            graceful,
            tree_killed,
            exit_status,
        }
    }
}
