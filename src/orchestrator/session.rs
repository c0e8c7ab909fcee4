//! The live gateway session.
//!
//! A [`Session`] runs the launch pipeline (resolve, prepare, launch,
//! connect, probe) and owns the resulting process and channel until
//! [`Session::stop`] tears them down.
//!
//! State machine: `Unstarted -> Starting -> Live -> Stopped`. A failed
//! start falls back to `Unstarted`; `Stopped` is terminal.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, warn, Instrument};

use crate::environment::{clear_stale_gateway_vars, EnvironmentPreparer};
use crate::gateway::channel::{ChannelConnector, ControlChannel, Py4jConnector};
use crate::gateway::conn_info::GatewayEndpoint;
use crate::gateway::launcher::{GatewayHandle, GatewayLauncher, LauncherSettings};
use crate::models::conf::EngineConf;
use crate::models::host::HostInstall;
use crate::models::session::SessionState;
use crate::orchestrator::reaper::{ProcessReaper, ReapOutcome, DEFAULT_SHUTDOWN_GRACE};
use crate::orchestrator::slot::{SessionSlot, SlotGuard};
use crate::process_tree::{kill_tree_blocking, PlatformTreeKiller, ProcessTreeKiller};
use crate::resolver::{ConfigResolver, ResolvedConf};
use crate::{GatewayError, Result};

/// Default bound on the liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Tuning for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Host installation the engine runs from.
    pub host: HostInstall,
    /// Launcher tuning.
    pub launcher: LauncherSettings,
    /// Bound on each liveness probe.
    pub probe_timeout: Duration,
    /// Bound on each graceful teardown step.
    pub shutdown_grace: Duration,
}

impl SessionOptions {
    /// Options with default timeouts for `host`.
    #[must_use]
    pub fn new(host: HostInstall) -> Self {
        Self {
            host,
            launcher: LauncherSettings::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Engine-facing handle on a live gateway.
pub struct EngineHandle {
    channel: Box<dyn ControlChannel>,
    resolved: ResolvedConf,
    endpoint: GatewayEndpoint,
    pid: u32,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("resolved", &self.resolved)
            .field("endpoint", &self.endpoint)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    /// Effective configuration the engine was started with.
    #[must_use]
    pub fn conf(&self) -> &EngineConf {
        &self.resolved.conf
    }

    /// Whether local-mode defaults were applied.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.resolved.local_mode
    }

    /// Gateway port and secret.
    #[must_use]
    pub fn endpoint(&self) -> &GatewayEndpoint {
        &self.endpoint
    }

    /// PID of the gateway process.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Control channel for engine calls.
    pub fn channel(&mut self) -> &mut dyn ControlChannel {
        self.channel.as_mut()
    }

    /// Issue one trivial round-trip.
    ///
    /// # Errors
    ///
    /// Propagates the channel error.
    pub async fn probe(&mut self) -> Result<()> {
        self.channel.probe().await
    }
}

struct LiveGateway {
    handle: GatewayHandle,
    engine: EngineHandle,
    slot: SlotGuard,
}

/// Single live gateway session.
pub struct Session {
    state: SessionState,
    slot: Arc<SessionSlot>,
    resolver: ConfigResolver,
    preparer: EnvironmentPreparer,
    launcher: GatewayLauncher,
    reaper: ProcessReaper,
    connector: Arc<dyn ChannelConnector>,
    probe_timeout: Duration,
    live: Option<LiveGateway>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create an unstarted session using the process-wide slot, the platform
    /// tree killer, the Py4J connector and the current process environment.
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        let killer: Arc<dyn ProcessTreeKiller> = Arc::new(PlatformTreeKiller);
        Self {
            state: SessionState::Unstarted,
            slot: SessionSlot::global(),
            resolver: ConfigResolver::new(&options.host),
            preparer: EnvironmentPreparer::from_process_env(options.host),
            launcher: GatewayLauncher::new(options.launcher, Arc::clone(&killer)),
            reaper: ProcessReaper::new(killer, options.shutdown_grace),
            connector: Arc::new(Py4jConnector::default()),
            probe_timeout: options.probe_timeout,
            live: None,
        }
    }

    /// Use `slot` instead of the process-wide slot.
    #[must_use]
    pub fn with_slot(mut self, slot: Arc<SessionSlot>) -> Self {
        self.slot = slot;
        self
    }

    /// Use `connector` to open the control channel.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn ChannelConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Use `killer` for failed launches and teardown.
    #[must_use]
    pub fn with_killer(mut self, killer: Arc<dyn ProcessTreeKiller>) -> Self {
        let settings = self.launcher.settings().clone();
        self.launcher = GatewayLauncher::new(settings, Arc::clone(&killer));
        self.reaper = ProcessReaper::new(killer, self.reaper.grace());
        self
    }

    /// Use `preparer` instead of one built from the process environment.
    #[must_use]
    pub fn with_preparer(mut self, preparer: EnvironmentPreparer) -> Self {
        self.resolver = ConfigResolver::new(preparer.host());
        self.preparer = preparer;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// PID of the live gateway process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.live.as_ref().map(|live| live.handle.pid())
    }

    /// Launch the gateway and confirm the engine answers.
    ///
    /// # Errors
    ///
    /// - `GatewayError::SessionActive` if this or another session is live.
    /// - `GatewayError::NotLive` if this session was already stopped.
    /// - `GatewayError::Config` if a host directory is missing.
    /// - `GatewayError::Launch` if spawn, readiness or channel connect failed.
    /// - `GatewayError::Startup` if the liveness probe failed.
    ///
    /// On error no gateway process remains and the slot is free again.
    pub async fn start(&mut self, user_conf: &EngineConf) -> Result<&mut EngineHandle> {
        match self.state {
            SessionState::Unstarted => {}
            SessionState::Starting | SessionState::Live => {
                return Err(GatewayError::SessionActive(
                    "session is already started".into(),
                ));
            }
            SessionState::Stopped => {
                return Err(GatewayError::NotLive(
                    "session was stopped; create a new session".into(),
                ));
            }
        }

        let slot = self.slot.try_acquire()?;
        self.transition(SessionState::Starting);

        let span = info_span!("start_session");
        match self.launch_pipeline(user_conf).instrument(span).await {
            Ok((handle, engine)) => {
                info!(pid = engine.pid, port = engine.endpoint.port, "session live");
                self.transition(SessionState::Live);
                let live = self.live.insert(LiveGateway {
                    handle,
                    engine,
                    slot,
                });
                Ok(&mut live.engine)
            }
            Err(err) => {
                warn!(%err, "session start failed");
                self.transition(SessionState::Unstarted);
                drop(slot);
                Err(err)
            }
        }
    }

    async fn launch_pipeline(
        &self,
        user_conf: &EngineConf,
    ) -> Result<(GatewayHandle, EngineHandle)> {
        let resolved = self.resolver.resolve(user_conf);
        let prepared = self.preparer.prepare(&resolved)?;
        clear_stale_gateway_vars();

        let handle = self.launcher.launch(&resolved, &prepared).await?;
        let pid = handle.pid();
        let endpoint = handle.endpoint().clone();

        let connect = self.connector.connect(&endpoint);
        let connected = match tokio::time::timeout(self.probe_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Channel(format!(
                "no handshake within {:?}",
                self.probe_timeout
            ))),
        };
        let mut channel = match connected {
            Ok(channel) => channel,
            Err(err) => {
                self.reaper.reap(handle, None).await;
                return Err(GatewayError::Launch(format!("gateway unreachable: {err}")));
            }
        };

        let probe = match tokio::time::timeout(self.probe_timeout, channel.probe()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Channel(format!(
                "no answer within {:?}",
                self.probe_timeout
            ))),
        };
        if let Err(err) = probe {
            self.reaper.reap(handle, Some(channel)).await;
            return Err(GatewayError::Startup(format!("liveness probe failed: {err}")));
        }

        let engine = EngineHandle {
            channel,
            resolved,
            endpoint,
            pid,
        };
        Ok((handle, engine))
    }

    /// The live engine handle.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotLive` unless the session is live.
    pub fn engine(&mut self) -> Result<&mut EngineHandle> {
        self.live
            .as_mut()
            .map(|live| &mut live.engine)
            .ok_or_else(|| GatewayError::NotLive(format!("session is {:?}", self.state)))
    }

    /// Check that the gateway process is running and answers a probe.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotLive` unless the session is live, or
    /// `GatewayError::Startup` if the process exited or the probe failed.
    pub async fn verify(&mut self) -> Result<()> {
        let probe_timeout = self.probe_timeout;
        let state = self.state;
        let live = self
            .live
            .as_mut()
            .ok_or_else(|| GatewayError::NotLive(format!("session is {state:?}")))?;

        if !live.handle.is_running() {
            return Err(GatewayError::Startup("gateway process has exited".into()));
        }
        match tokio::time::timeout(probe_timeout, live.engine.probe()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(GatewayError::Startup(format!(
                "liveness probe failed: {err}"
            ))),
            Err(_) => Err(GatewayError::Startup(format!(
                "liveness probe timed out after {probe_timeout:?}"
            ))),
        }
    }

    /// Tear the gateway down and release the slot.
    ///
    /// Idempotent and infallible; returns the teardown outcome when a live
    /// gateway was actually reaped.
    pub async fn stop(&mut self) -> Option<ReapOutcome> {
        if self.state == SessionState::Stopped {
            return None;
        }

        let outcome = match self.live.take() {
            Some(LiveGateway {
                handle,
                engine,
                slot,
            }) => {
                let outcome = self.reaper.reap(handle, Some(engine.channel)).await;
                // Released only once the process is confirmed gone.
                drop(slot);
                Some(outcome)
            }
            None => None,
        };

        self.transition(SessionState::Stopped);
        info!("session stopped");
        outcome
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid session transition {:?} -> {next:?}",
            self.state
        );
        self.state = next;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        let pid = live.handle.pid();
        warn!(pid, "session dropped while live, killing gateway process tree");
        if let Err(err) = kill_tree_blocking(pid) {
            warn!(pid, %err, "process tree kill on drop failed");
        }
        let LiveGateway {
            handle,
            engine,
            slot,
        } = live;
        drop(engine);
        let (mut child, stdin, _) = handle.into_parts();
        drop(stdin);
        if let Err(err) = child.start_kill() {
            warn!(pid, %err, "direct kill on drop failed");
        }
        drop(child);
        // Released only after the tree has been signalled.
        drop(slot);
    }
}
