//! Host installation layout.
//!
//! The host application owns the Java runtime, the Spark distribution and
//! the support jars the engine needs. [`HostInstall`] captures where those
//! live; it is built once and treated as read-only afterwards.

use std::path::{Path, PathBuf};

/// Interpreter environment used when no hint file names one.
pub const DEFAULT_PYTHON_ENV: &str = "arcgispro-py3";

/// Derived, read-only facts about the host installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInstall {
    install_dir: PathBuf,
    interpreter_hint_file: Option<PathBuf>,
    python_env: String,
}

impl HostInstall {
    /// Describe an installation rooted at `install_dir`.
    #[must_use]
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            interpreter_hint_file: None,
            python_env: DEFAULT_PYTHON_ENV.to_owned(),
        }
    }

    /// Use `path` as the interpreter discovery file.
    #[must_use]
    pub fn with_interpreter_hint_file(mut self, path: Option<PathBuf>) -> Self {
        self.interpreter_hint_file = path;
        self
    }

    /// Use `env` as the fallback interpreter environment name.
    #[must_use]
    pub fn with_python_env(mut self, env: impl Into<String>) -> Self {
        self.python_env = env.into();
        self
    }

    /// Installation root.
    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// `<install>/Java/runtime`.
    #[must_use]
    pub fn runtime_dir(&self) -> PathBuf {
        self.install_dir.join("Java").join("runtime")
    }

    /// `<install>/Java/lib`.
    #[must_use]
    pub fn lib_dir(&self) -> PathBuf {
        self.install_dir.join("Java").join("lib")
    }

    /// Spark distribution bundled with the host.
    #[must_use]
    pub fn bundled_spark_home(&self) -> PathBuf {
        self.runtime_dir().join("spark")
    }

    /// Hadoop support directory bundled with the host.
    #[must_use]
    pub fn hadoop_home(&self) -> PathBuf {
        self.runtime_dir().join("hadoop")
    }

    /// Java runtime bundled with the host.
    #[must_use]
    pub fn java_home(&self) -> PathBuf {
        self.runtime_dir().join("jre")
    }

    /// Jars the engine needs to talk to the host, in load order.
    #[must_use]
    pub fn support_jars(&self) -> Vec<PathBuf> {
        let lib = self.lib_dir();
        vec![
            lib.join("spark-desktop-engine.jar"),
            lib.join("arcobjects.jar"),
        ]
    }

    /// Configured interpreter discovery file, if any.
    #[must_use]
    pub fn interpreter_hint_file(&self) -> Option<&Path> {
        self.interpreter_hint_file.as_deref()
    }

    /// Interpreter used when the discovery file is absent.
    #[must_use]
    pub fn fallback_interpreter(&self) -> PathBuf {
        interpreter_in(
            &self
                .install_dir
                .join("bin")
                .join("Python")
                .join("envs")
                .join(&self.python_env),
        )
    }
}

/// Interpreter executable inside an environment directory.
#[must_use]
pub fn interpreter_in(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}
