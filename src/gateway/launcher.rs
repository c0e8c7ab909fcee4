//! Gateway process launcher.
//!
//! Spawns the engine's submit script with:
//! - the effective configuration as `--conf key=value` arguments;
//! - the prepared environment, with stale gateway variables removed;
//! - stdout and stderr discarded, because the engine aborts when it inherits
//!   the diagnostic streams of some host UI processes;
//! - stdin piped, since the gateway exits when its stdin closes;
//! - its own process group (Unix) or no console window (Windows).
//!
//! The launcher then waits, bounded by `startup_timeout`, for the gateway to
//! advertise its port and secret and for that port to accept connections.
//! On every failure after spawn the process tree is killed and the child
//! reaped before the error is returned.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::environment::PreparedEnvironment;
use crate::gateway::conn_info::{self, GatewayEndpoint, CONN_INFO_PATH_ENV};
use crate::process_tree::ProcessTreeKiller;
use crate::resolver::ResolvedConf;
use crate::{GatewayError, Result};

/// Default bound on the whole launch sequence.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a failed launch waits for the killed child to be reaped.
const ABORT_REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Launcher tuning.
#[derive(Debug, Clone)]
pub struct LauncherSettings {
    /// Submit program; defaults to `<SPARK_HOME>/bin/spark-submit`.
    pub submit_command: Option<PathBuf>,
    /// Maximum time from spawn until the gateway port accepts connections.
    pub startup_timeout: Duration,
    /// Interval between readiness polls.
    pub poll_interval: Duration,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            submit_command: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A spawned gateway process, exclusively owned by its session.
#[derive(Debug)]
pub struct GatewayHandle {
    child: Child,
    pid: u32,
    stdin: Option<ChildStdin>,
    endpoint: GatewayEndpoint,
}

impl GatewayHandle {
    /// OS process id of the launched child.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Port and secret the gateway advertised.
    #[must_use]
    pub fn endpoint(&self) -> &GatewayEndpoint {
        &self.endpoint
    }

    /// Whether the child process has not exited yet.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub(crate) fn into_parts(self) -> (Child, Option<ChildStdin>, u32) {
        (self.child, self.stdin, self.pid)
    }
}

/// Spawns gateway processes.
#[derive(Clone)]
pub struct GatewayLauncher {
    settings: LauncherSettings,
    killer: Arc<dyn ProcessTreeKiller>,
}

impl std::fmt::Debug for GatewayLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayLauncher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GatewayLauncher {
    /// Create a launcher that uses `killer` to clean up failed launches.
    #[must_use]
    pub fn new(settings: LauncherSettings, killer: Arc<dyn ProcessTreeKiller>) -> Self {
        Self { settings, killer }
    }

    /// Launcher tuning in effect.
    #[must_use]
    pub fn settings(&self) -> &LauncherSettings {
        &self.settings
    }

    /// Program the launcher will run for `prepared`.
    #[must_use]
    pub fn submit_program(&self, prepared: &PreparedEnvironment) -> PathBuf {
        self.settings
            .submit_command
            .clone()
            .unwrap_or_else(|| default_submit_program(&prepared.spark_home))
    }

    /// Full argument list (without the program) for one launch.
    #[must_use]
    pub fn submit_args(resolved: &ResolvedConf, prepared: &PreparedEnvironment) -> Vec<String> {
        let mut args = resolved.conf.to_conf_args();
        args.extend(prepared.submit_args.iter().cloned());
        args
    }

    /// Spawn the gateway and wait until its control port is connectable.
    ///
    /// # Errors
    ///
    /// - `GatewayError::Launch("failed to spawn …")`: OS spawn failure.
    /// - `GatewayError::Launch("gateway exited before …")`: early exit.
    /// - `GatewayError::Launch("startup timeout …")`: deadline elapsed.
    ///
    /// No process remains running when an error is returned.
    pub async fn launch(
        &self,
        resolved: &ResolvedConf,
        prepared: &PreparedEnvironment,
    ) -> Result<GatewayHandle> {
        let span = info_span!("launch_gateway", local_mode = resolved.local_mode);
        self.launch_inner(resolved, prepared).instrument(span).await
    }

    async fn launch_inner(
        &self,
        resolved: &ResolvedConf,
        prepared: &PreparedEnvironment,
    ) -> Result<GatewayHandle> {
        let conn_dir = tempfile::Builder::new()
            .prefix("spark-gateway-")
            .tempdir()
            .map_err(|err| {
                GatewayError::Launch(format!("cannot create connection-info dir: {err}"))
            })?;
        let conn_path = conn_dir.path().join("connection.info");

        let program = self.submit_program(prepared);
        let mut cmd = Command::new(&program);
        cmd.args(Self::submit_args(resolved, prepared));
        prepared.apply(&mut cmd);
        cmd.env(CONN_INFO_PATH_ENV, &conn_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(|err| {
            GatewayError::Launch(format!(
                "failed to spawn {}: {err}",
                program.display()
            ))
        })?;

        let Some(pid) = child.id() else {
            let status = child.wait().await.ok();
            return Err(GatewayError::Launch(format!(
                "gateway exited immediately ({})",
                describe_exit(status)
            )));
        };
        info!(pid, program = %program.display(), "gateway process spawned");

        let stdin = child.stdin.take();
        let deadline = Instant::now() + self.settings.startup_timeout;

        match self.await_ready(&mut child, &conn_path, deadline).await {
            Ok(endpoint) => {
                info!(pid, port = endpoint.port, "gateway ready");
                Ok(GatewayHandle {
                    child,
                    pid,
                    stdin,
                    endpoint,
                })
            }
            Err(err) => {
                warn!(pid, %err, "gateway launch failed, killing process tree");
                drop(stdin);
                self.abort(&mut child, pid).await;
                Err(err)
            }
        }
    }

    /// Wait for the connection-info file, then for the port to accept.
    async fn await_ready(
        &self,
        child: &mut Child,
        conn_path: &Path,
        deadline: Instant,
    ) -> Result<GatewayEndpoint> {
        let endpoint = loop {
            if let Some(endpoint) = conn_info::read(conn_path).await? {
                break endpoint;
            }
            check_alive(child, "sending its port number")?;
            self.pause_until(deadline, "advertise its port").await?;
        };
        debug!(port = endpoint.port, "connection info received");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = tokio::time::timeout(
                remaining.max(Duration::from_millis(1)),
                TcpStream::connect(("127.0.0.1", endpoint.port)),
            )
            .await;
            if let Ok(Ok(_probe)) = attempt {
                return Ok(endpoint);
            }
            check_alive(child, "accepting connections")?;
            self.pause_until(deadline, "accept connections").await?;
        }
    }

    async fn pause_until(&self, deadline: Instant, what: &str) -> Result<()> {
        let now = Instant::now();
        if now >= deadline {
            return Err(GatewayError::Launch(format!(
                "startup timeout: gateway did not {what} within {:?}",
                self.settings.startup_timeout
            )));
        }
        let pause = self.settings.poll_interval.min(deadline - now);
        tokio::time::sleep(pause).await;
        Ok(())
    }

    /// Kill the tree of a failed launch and reap the child.
    async fn abort(&self, child: &mut Child, pid: u32) {
        if let Err(err) = self.killer.kill_tree(pid).await {
            warn!(pid, %err, "process tree kill failed, killing child directly");
        }
        if let Err(err) = child.start_kill() {
            debug!(pid, %err, "direct kill skipped");
        }
        match tokio::time::timeout(ABORT_REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!(pid, %status, "failed gateway reaped"),
            Ok(Err(err)) => warn!(pid, %err, "error reaping failed gateway"),
            Err(_) => warn!(pid, "failed gateway was not reaped in time"),
        }
    }
}

/// `<spark_home>/bin/spark-submit`, with the platform script suffix.
#[must_use]
pub fn default_submit_program(spark_home: &Path) -> PathBuf {
    let script = if cfg!(windows) {
        "spark-submit.cmd"
    } else {
        "spark-submit"
    };
    spark_home.join("bin").join(script)
}

fn check_alive(child: &mut Child, stage: &str) -> Result<()> {
    match child.try_wait() {
        Ok(None) => Ok(()),
        Ok(Some(status)) => Err(GatewayError::Launch(format!(
            "gateway exited before {stage} ({})",
            describe_exit(Some(status))
        ))),
        Err(err) => Err(GatewayError::Launch(format!(
            "failed to poll gateway process: {err}"
        ))),
    }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.code().map_or_else(
            || "terminated by signal".to_owned(),
            |code| format!("exit code {code}"),
        ),
        None => "status unknown".to_owned(),
    }
}
