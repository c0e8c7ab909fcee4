//! Effective engine configuration.
//!
//! Merges caller overrides with the host's local-mode defaults. Caller
//! values always win; defaults only fill gaps. A caller pointing the engine
//! at a non-local master keeps its configuration untouched apart from the
//! support jars, which the engine needs regardless of where it runs.

use crate::models::conf::{ConfValue, EngineConf};
use crate::models::host::HostInstall;

/// Execution target key.
pub const MASTER_KEY: &str = "spark.master";

/// Prefix of every local execution target.
pub const LOCAL_TOKEN: &str = "local";

/// Supplementary jar list key.
pub const JARS_KEY: &str = "spark.jars";

/// Separator used by the engine for list-valued settings.
pub const LIST_SEPARATOR: &str = ",";

/// Defaults applied when the engine runs embedded on the host.
pub const LOCAL_DEFAULTS: &[(&str, LocalDefault)] = &[
    (MASTER_KEY, LocalDefault::Str("local[*]")),
    ("spark.ui.enabled", LocalDefault::Bool(false)),
    ("spark.ui.showConsoleProgress", LocalDefault::Bool(false)),
    ("spark.sql.execution.arrow.enabled", LocalDefault::Bool(true)),
    ("spark.sql.catalogImplementation", LocalDefault::Str("in-memory")),
    (
        "spark.serializer",
        LocalDefault::Str("org.apache.spark.serializer.KryoSerializer"),
    ),
    ("spark.driver.host", LocalDefault::Str("localhost")),
];

/// Compile-time form of a default value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalDefault {
    /// String default.
    Str(&'static str),
    /// Boolean default.
    Bool(bool),
}

impl From<LocalDefault> for ConfValue {
    fn from(value: LocalDefault) -> Self {
        match value {
            LocalDefault::Str(s) => ConfValue::Str(s.to_owned()),
            LocalDefault::Bool(b) => ConfValue::Bool(b),
        }
    }
}

/// Configuration after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConf {
    /// Configuration handed to the engine.
    pub conf: EngineConf,
    /// Whether local-mode defaults were applied.
    pub local_mode: bool,
}

/// Merges caller configuration with host defaults.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    support_jars: String,
}

impl ConfigResolver {
    /// Build a resolver for the given host installation.
    #[must_use]
    pub fn new(host: &HostInstall) -> Self {
        let support_jars = host
            .support_jars()
            .iter()
            .map(|jar| jar.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR);
        Self { support_jars }
    }

    /// Comma-joined jars appended to every configuration.
    #[must_use]
    pub fn support_jars(&self) -> &str {
        &self.support_jars
    }

    /// Produce the effective configuration for `user_conf`.
    #[must_use]
    pub fn resolve(&self, user_conf: &EngineConf) -> ResolvedConf {
        let mut conf = user_conf.clone();
        let local_mode = wants_local_defaults(user_conf);

        if local_mode {
            for (key, value) in LOCAL_DEFAULTS {
                conf.set_if_absent(key, *value);
            }
        }

        let jars = match conf.get(JARS_KEY) {
            Some(existing) if !existing.to_string().is_empty() => {
                format!("{existing}{LIST_SEPARATOR}{}", self.support_jars)
            }
            _ => self.support_jars.clone(),
        };
        conf.set(JARS_KEY, jars);

        ResolvedConf { conf, local_mode }
    }
}

/// Local defaults apply when no master is set or the master is local.
fn wants_local_defaults(conf: &EngineConf) -> bool {
    conf.get(MASTER_KEY)
        .map_or(true, |master| master.to_string().starts_with(LOCAL_TOKEN))
}
