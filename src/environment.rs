//! Child process environment preparation.
//!
//! The engine finds its runtimes through environment variables. Rather than
//! mutating the host process environment, [`EnvironmentPreparer::prepare`]
//! computes a [`PreparedEnvironment`] value that the launcher applies to the
//! child command only.
//!
//! The one exception is [`clear_stale_gateway_vars`]: in-process host code
//! discovers a running gateway through `PYSPARK_GATEWAY_PORT` and
//! `PYSPARK_GATEWAY_SECRET`, so values left over from a previous session must
//! be removed from the host environment before every launch. That mutation is
//! unsynchronized global state; callers serialize `start`/`stop` with any
//! other environment-sensitive host activity.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::models::host::{interpreter_in, HostInstall};
use crate::resolver::ResolvedConf;
use crate::{GatewayError, Result};

/// Engine distribution root.
pub const SPARK_HOME: &str = "SPARK_HOME";
/// Hadoop support directory.
pub const HADOOP_HOME: &str = "HADOOP_HOME";
/// Java runtime used by the engine.
pub const JAVA_HOME: &str = "JAVA_HOME";
/// Interpreter the engine starts for auxiliary scripting.
pub const PYSPARK_PYTHON: &str = "PYSPARK_PYTHON";
/// Extra launcher arguments supplied by the host.
pub const PYSPARK_SUBMIT_ARGS: &str = "PYSPARK_SUBMIT_ARGS";
/// Port of an already running gateway.
pub const PYSPARK_GATEWAY_PORT: &str = "PYSPARK_GATEWAY_PORT";
/// Secret of an already running gateway.
pub const PYSPARK_GATEWAY_SECRET: &str = "PYSPARK_GATEWAY_SECRET";
/// Per-user application data root used to locate the interpreter hint file.
pub const LOCALAPPDATA: &str = "LOCALAPPDATA";

/// Variables that describe a previous gateway and must never reach a launch.
pub const STALE_GATEWAY_VARS: &[&str] = &[PYSPARK_GATEWAY_PORT, PYSPARK_GATEWAY_SECRET];

/// Launcher arguments used when the host supplies none.
pub const DEFAULT_SUBMIT_ARGS: &[&str] = &["pyspark-shell"];

/// Host variables the preparer consults.
const INHERITED_VARS: &[&str] = &[SPARK_HOME, LOCALAPPDATA, PYSPARK_SUBMIT_ARGS];

/// Environment computed for one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedEnvironment {
    /// Variables set on the child.
    pub vars: BTreeMap<String, OsString>,
    /// Variables removed from the child.
    pub removed: Vec<String>,
    /// Engine distribution the launcher runs from.
    pub spark_home: PathBuf,
    /// Trailing launcher arguments.
    pub submit_args: Vec<String>,
}

impl PreparedEnvironment {
    /// Look up a variable destined for the child.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&OsString> {
        self.vars.get(key)
    }

    /// Apply the prepared variables to `cmd`.
    pub fn apply(&self, cmd: &mut Command) {
        for key in &self.removed {
            cmd.env_remove(key);
        }
        cmd.envs(&self.vars);
    }
}

/// Computes child environments from the host installation.
#[derive(Debug, Clone)]
pub struct EnvironmentPreparer {
    host: HostInstall,
    inherited: HashMap<String, OsString>,
}

impl EnvironmentPreparer {
    /// Build a preparer that consults the current process environment.
    #[must_use]
    pub fn from_process_env(host: HostInstall) -> Self {
        let inherited = INHERITED_VARS
            .iter()
            .filter_map(|&key| std::env::var_os(key).map(|value| (key.to_owned(), value)))
            .collect();
        Self { host, inherited }
    }

    /// Build a preparer from an explicit set of host variables.
    #[must_use]
    pub fn with_inherited<K, V, I>(host: HostInstall, vars: I) -> Self
    where
        K: Into<String>,
        V: Into<OsString>,
        I: IntoIterator<Item = (K, V)>,
    {
        let inherited = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self { host, inherited }
    }

    /// Host installation this preparer resolves against.
    #[must_use]
    pub fn host(&self) -> &HostInstall {
        &self.host
    }

    /// Compute the child environment for `resolved`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the engine distribution, the Hadoop
    /// support directory or the Java runtime is missing, or if the interpreter
    /// hint file exists but cannot be read.
    pub fn prepare(&self, resolved: &ResolvedConf) -> Result<PreparedEnvironment> {
        let mut vars = BTreeMap::new();

        let spark_home = self
            .inherited
            .get(SPARK_HOME)
            .filter(|value| !value.is_empty())
            .map_or_else(|| self.host.bundled_spark_home(), PathBuf::from);
        let spark_home = require_dir(SPARK_HOME, spark_home)?;
        vars.insert(SPARK_HOME.to_owned(), spark_home.clone().into_os_string());

        let hadoop_home = require_dir(HADOOP_HOME, self.host.hadoop_home())?;
        vars.insert(HADOOP_HOME.to_owned(), hadoop_home.into_os_string());

        let java_home = require_dir(JAVA_HOME, self.host.java_home())?;
        vars.insert(JAVA_HOME.to_owned(), java_home.into_os_string());

        if resolved.local_mode {
            let interpreter = self.resolve_interpreter()?;
            debug!(interpreter = %interpreter.display(), "resolved engine interpreter");
            vars.insert(PYSPARK_PYTHON.to_owned(), interpreter.into_os_string());
        }

        let submit_args = self
            .inherited
            .get(PYSPARK_SUBMIT_ARGS)
            .map(|raw| {
                raw.to_string_lossy()
                    .split_whitespace()
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .filter(|args| !args.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBMIT_ARGS.iter().map(|&a| a.to_owned()).collect());

        Ok(PreparedEnvironment {
            vars,
            removed: STALE_GATEWAY_VARS.iter().map(|&v| v.to_owned()).collect(),
            spark_home,
            submit_args,
        })
    }

    /// Interpreter named by the hint file, or the host fallback.
    fn resolve_interpreter(&self) -> Result<PathBuf> {
        let Some(hint) = self.hint_file() else {
            return Ok(self.host.fallback_interpreter());
        };
        if !hint.is_file() {
            return Ok(self.host.fallback_interpreter());
        }

        let raw = fs::read_to_string(&hint).map_err(|err| {
            GatewayError::Config(format!(
                "cannot read interpreter hint {}: {err}",
                hint.display()
            ))
        })?;
        let env_dir = raw.lines().next().map(str::trim).unwrap_or_default();
        if env_dir.is_empty() {
            warn!(hint = %hint.display(), "interpreter hint file is empty, using fallback");
            return Ok(self.host.fallback_interpreter());
        }
        Ok(interpreter_in(Path::new(env_dir)))
    }

    fn hint_file(&self) -> Option<PathBuf> {
        if let Some(path) = self.host.interpreter_hint_file() {
            return Some(path.to_path_buf());
        }
        self.inherited.get(LOCALAPPDATA).map(|root| {
            PathBuf::from(root)
                .join("ESRI")
                .join("conda")
                .join("envs")
                .join("proenv.txt")
        })
    }
}

/// Remove leftover gateway variables from the host process environment.
pub fn clear_stale_gateway_vars() {
    for &key in STALE_GATEWAY_VARS {
        if std::env::var_os(key).is_some() {
            debug!(key, "clearing stale gateway variable");
            std::env::remove_var(key);
        }
    }
}

fn require_dir(name: &str, path: PathBuf) -> Result<PathBuf> {
    if path.is_dir() {
        Ok(path)
    } else {
        Err(GatewayError::Config(format!(
            "{name} directory not found: {}",
            path.display()
        )))
    }
}
