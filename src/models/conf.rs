//! Engine configuration model.
//!
//! An [`EngineConf`] is the key/value set handed to the engine as
//! `--conf key=value` startup parameters. Keys are case-sensitive and kept
//! in sorted order so the rendered command line is deterministic.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A single engine configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfValue {
    /// Boolean toggle, rendered lower-case.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Free-form string value.
    Str(String),
}

impl Display for ConfValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ConfValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for ConfValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for ConfValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ConfValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Engine configuration mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineConf(BTreeMap<String, ConfValue>);

impl EngineConf {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfValue>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set `key` only when it is not already present. Returns `true` if the
    /// value was inserted.
    pub fn set_if_absent(&mut self, key: &str, value: impl Into<ConfValue>) -> bool {
        if self.0.contains_key(key) {
            return false;
        }
        self.0.insert(key.to_owned(), value.into());
        true
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfValue> {
        self.0.get(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the configuration has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn extend(&mut self, other: EngineConf) {
        self.0.extend(other.0);
    }

    /// Render as `--conf key=value` argument pairs.
    #[must_use]
    pub fn to_conf_args(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(key, value)| ["--conf".to_owned(), format!("{key}={value}")])
            .collect()
    }

    /// Parse a `key=value` override as given on the command line.
    ///
    /// `true`/`false` become booleans and integers become [`ConfValue::Int`];
    /// everything else is kept as a string.
    ///
    /// # Errors
    ///
    /// Returns an error message when `pair` has no `=` or an empty key.
    pub fn parse_pair(pair: &str) -> std::result::Result<(String, ConfValue), String> {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got {pair:?}"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty key in {pair:?}"));
        }
        let value = match raw {
            "true" => ConfValue::Bool(true),
            "false" => ConfValue::Bool(false),
            other => other
                .parse::<i64>()
                .map_or_else(|_| ConfValue::Str(other.to_owned()), ConfValue::Int),
        };
        Ok((key.to_owned(), value))
    }
}

impl<K: Into<String>, V: Into<ConfValue>> FromIterator<(K, V)> for EngineConf {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}
