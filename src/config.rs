//! Manager configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::gateway::launcher::{LauncherSettings, DEFAULT_POLL_INTERVAL};
use crate::models::conf::EngineConf;
use crate::models::host::{HostInstall, DEFAULT_PYTHON_ENV};
use crate::orchestrator::session::SessionOptions;
use crate::{GatewayError, Result};

/// Host installation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HostConfig {
    /// Installation root of the host application.
    pub install_dir: PathBuf,
    /// File naming the interpreter environment directory.
    #[serde(default)]
    pub interpreter_hint_file: Option<PathBuf>,
    /// Interpreter environment used when no hint file is found.
    #[serde(default = "default_python_env")]
    pub python_env: String,
}

fn default_python_env() -> String {
    DEFAULT_PYTHON_ENV.to_owned()
}

/// Launcher and teardown timing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LauncherConfig {
    /// Submit program overriding `<SPARK_HOME>/bin/spark-submit`.
    #[serde(default)]
    pub submit_command: Option<PathBuf>,
    /// Seconds allowed from spawn until the gateway port accepts connections.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,
    /// Seconds allowed for the liveness probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,
    /// Seconds allowed for each graceful teardown step.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            submit_command: None,
            startup_timeout_seconds: default_startup_timeout(),
            probe_timeout_seconds: default_probe_timeout(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_startup_timeout() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    5
}

/// Manager configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ManagerConfig {
    /// Host installation settings.
    pub host: HostConfig,
    /// Launcher tuning.
    #[serde(default)]
    pub launcher: LauncherConfig,
    /// Engine settings applied beneath command-line overrides.
    #[serde(default)]
    pub engine: EngineConf,
}

impl ManagerConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| GatewayError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Host installation described by this configuration.
    #[must_use]
    pub fn host_install(&self) -> HostInstall {
        HostInstall::new(&self.host.install_dir)
            .with_interpreter_hint_file(self.host.interpreter_hint_file.clone())
            .with_python_env(&self.host.python_env)
    }

    /// Launcher tuning described by this configuration.
    #[must_use]
    pub fn launcher_settings(&self) -> LauncherSettings {
        LauncherSettings {
            submit_command: self.launcher.submit_command.clone(),
            startup_timeout: Duration::from_secs(self.launcher.startup_timeout_seconds),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Session options described by this configuration.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            host: self.host_install(),
            launcher: self.launcher_settings(),
            probe_timeout: Duration::from_secs(self.launcher.probe_timeout_seconds),
            shutdown_grace: Duration::from_secs(self.launcher.shutdown_grace_seconds),
        }
    }

    fn validate(&mut self) -> Result<()> {
        let timeouts = [
            ("startup_timeout_seconds", self.launcher.startup_timeout_seconds),
            ("probe_timeout_seconds", self.launcher.probe_timeout_seconds),
            ("shutdown_grace_seconds", self.launcher.shutdown_grace_seconds),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(GatewayError::Config(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.host.python_env.trim().is_empty() {
            return Err(GatewayError::Config("python_env must not be empty".into()));
        }

        let canonical = self
            .host
            .install_dir
            .canonicalize()
            .map_err(|err| GatewayError::Config(format!("install_dir invalid: {err}")))?;
        self.host.install_dir = canonical;

        Ok(())
    }
}
