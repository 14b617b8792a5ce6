use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Reserved values meaning "option not set". Compared case-insensitively.
pub const SENTINELS: [&str; 4] = ["auto", "none", "disabled", "0"];

pub fn is_sentinel(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || SENTINELS
            .iter()
            .any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConfigValue {
    Flag(bool),
    Number(i64),
    Text(String),
}

impl ConfigValue {
    /// Value to emit for a `--flag=value` option, or `None` when it is a sentinel.
    /// Booleans never carry a value.
    pub fn as_setting(&self) -> Option<String> {
        match self {
            ConfigValue::Flag(_) => None,
            ConfigValue::Number(value) => (*value != 0).then(|| value.to_string()),
            ConfigValue::Text(value) => {
                if is_sentinel(value) {
                    None
                } else {
                    Some(value.trim().to_string())
                }
            }
        }
    }

    pub fn as_flag(&self) -> bool {
        match self {
            ConfigValue::Flag(value) => *value,
            ConfigValue::Number(value) => *value != 0,
            ConfigValue::Text(value) => {
                let lower = value.trim().to_ascii_lowercase();
                matches!(lower.as_str(), "true" | "1" | "yes" | "on")
            }
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Flag(value) => write!(f, "{value}"),
            ConfigValue::Number(value) => write!(f, "{value}"),
            ConfigValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Text(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Flag(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Number(value)
    }
}

/// Flat option-name to value mapping consumed by the command builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LaunchOptions(BTreeMap<String, ConfigValue>);

impl LaunchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.0.remove(key)
    }

    /// Value after sentinel suppression.
    pub fn setting(&self, key: &str) -> Option<String> {
        self.get(key).and_then(ConfigValue::as_setting)
    }

    /// Raw textual value, no suppression applied.
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(|value| value.to_string())
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).map(ConfigValue::as_flag).unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries of `other` replace entries of `self`.
    pub fn merge(&mut self, other: &LaunchOptions) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

impl FromIterator<(String, ConfigValue)> for LaunchOptions {
    fn from_iter<T: IntoIterator<Item = (String, ConfigValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionKind {
    #[serde(rename = "app")]
    App,
    #[serde(rename = "compat-layer")]
    CompatLayer,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::App => f.write_str("app"),
            SessionKind::CompatLayer => f.write_str("compat-layer"),
        }
    }
}

/// One live mirroring process started by this launcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub pid: u32,
    pub name: String,
    pub icon_path: Option<PathBuf>,
    pub argv: Vec<String>,
    pub kind: SessionKind,
    pub launch_token: String,
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Shell-quoted command line, suitable for copy/paste.
    pub fn command_line(&self) -> String {
        shell_words::join(&self.argv)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShortcutEntry {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    pub model_name: String,
    pub battery_level: Option<u8>,
}

impl DeviceStatus {
    pub fn summary(&self) -> String {
        let battery = self
            .battery_level
            .map(|level| level.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!("Connected to {} (Battery: {battery}%)", self.model_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInfo {
    pub available: bool,
    pub version_output: String,
    pub command_path: String,
    pub major_version: Option<i32>,
}
