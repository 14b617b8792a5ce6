use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::adb::runner::DEFAULT_COMMAND_TIMEOUT;
use crate::app::error::AppError;
use crate::app::models::{ConfigValue, LaunchOptions};

pub const CONFIG_DIR_ENV: &str = "SCRCPY_LAUNCHER_CONFIG_DIR";
pub const DEFAULT_SHORTCUTS_DIR: &str = "/storage/emulated/0/Download/Winlator/Frontend/";

/// Option keys understood by the command builder, used to fold legacy flat files.
pub const OPTION_KEYS: &[&str] = &[
    "start_app",
    "start_app_name",
    "mouse_mode",
    "gamepad_mode",
    "keyboard_mode",
    "mouse_bind",
    "render_driver",
    "max_fps",
    "resolution",
    "max_size",
    "display",
    "new_display",
    "video_codec",
    "video_encoder",
    "audio_codec",
    "audio_encoder",
    "video_bitrate_slider",
    "audio_buffer",
    "video_buffer",
    "extraargs",
    "mipmaps",
    "turn_screen_off",
    "fullscreen",
    "stay_awake",
    "no_audio",
    "no_video",
    "use_ludashi_pkg",
];

pub fn default_launch_options() -> LaunchOptions {
    LaunchOptions::new()
        .with("start_app", "")
        .with("start_app_name", "None")
        .with("mouse_mode", "sdk")
        .with("mouse_bind", "++++:bhsn")
        .with("render_driver", "opengl")
        .with("max_fps", "60")
        .with("resolution", "Auto")
        .with("display", "Auto")
        .with("new_display", "Disabled")
        .with("video_codec", "Auto")
        .with("video_encoder", "Auto")
        .with("audio_codec", "Auto")
        .with("audio_encoder", "Auto")
        .with("extraargs", "")
        .with("mipmaps", false)
        .with("turn_screen_off", false)
        .with("fullscreen", false)
        .with("video_bitrate_slider", 3000i64)
        .with("audio_buffer", 5i64)
        .with("video_buffer", 0i64)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolSettings {
    pub scrcpy_path: String,
    pub adb_path: String,
    pub device_serial: String,
    /// Upper bound for a single adb call.
    pub bridge_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            scrcpy_path: String::new(),
            adb_path: String::new(),
            device_serial: String::new(),
            bridge_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompatSettings {
    pub use_ludashi_pkg: bool,
    pub settle_delay_ms: u64,
    pub display_timeout_secs: u64,
    pub readiness_attempts: u32,
    pub readiness_interval_ms: u64,
    pub shortcuts_dir: String,
}

impl Default for CompatSettings {
    fn default() -> Self {
        Self {
            use_ludashi_pkg: false,
            settle_delay_ms: 1000,
            display_timeout_secs: 30,
            readiness_attempts: 5,
            readiness_interval_ms: 200,
            shortcuts_dir: DEFAULT_SHORTCUTS_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    pub terminate_timeout_ms: u64,
    pub worker_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            terminate_timeout_ms: 3000,
            worker_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LauncherConfig {
    #[serde(default = "default_launch_options")]
    pub options: LaunchOptions,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub compat: CompatSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub version: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            options: default_launch_options(),
            tools: ToolSettings::default(),
            compat: CompatSettings::default(),
            sessions: SessionSettings::default(),
            logging: LoggingSettings::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Per-package entry of `app_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppMetadata {
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub custom_icon: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<LaunchOptions>,
}

/// On-disk locations, all rooted at one config directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub root: PathBuf,
}

impl ConfigPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve() -> Self {
        if let Ok(path) = std::env::var(CONFIG_DIR_ENV) {
            if !path.trim().is_empty() {
                return Self::new(path);
            }
        }
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("scrcpy_launcher"))
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn backup_file(&self) -> PathBuf {
        self.root.join("config.backup.json")
    }

    pub fn compat_targets_dir(&self) -> PathBuf {
        self.root.join("compat_targets")
    }

    pub fn icon_cache_dir(&self) -> PathBuf {
        self.root.join("icon_cache")
    }

    pub fn app_metadata_file(&self) -> PathBuf {
        self.root.join("app_metadata.json")
    }

    pub fn installed_apps_cache(&self) -> PathBuf {
        self.root.join("installed_apps.json")
    }

    pub fn encoders_cache(&self) -> PathBuf {
        self.root.join("encoders.json")
    }

    /// Override file for a compat shortcut, keyed by the shortcut's file name.
    pub fn compat_target_file(&self, shortcut_path: &str) -> PathBuf {
        self.compat_targets_dir()
            .join(format!("{}.json", remote_basename(shortcut_path)))
    }

    /// Cached icon for a launch target, if present on disk.
    pub fn icon_for(&self, key: &str) -> Option<PathBuf> {
        let path = self.icon_cache_dir().join(format!("{key}.png"));
        path.is_file().then_some(path)
    }
}

pub fn remote_basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

pub fn load_config(paths: &ConfigPaths, trace_id: &str) -> Result<LauncherConfig, AppError> {
    load_config_from_path(&paths.config_file(), trace_id)
}

pub fn save_config(config: &LauncherConfig, paths: &ConfigPaths, trace_id: &str) -> Result<(), AppError> {
    save_config_to_path(config, &paths.config_file(), &paths.backup_file(), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<LauncherConfig, AppError> {
    if !path.exists() {
        return Ok(LauncherConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    let mut config: LauncherConfig = serde_json::from_value(value.clone()).unwrap_or_default();
    config = apply_legacy_overrides(config, &value);
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &LauncherConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    write_json(path, config, trace_id)
}

/// Options saved for one compat shortcut, or empty when none were saved.
pub fn load_compat_override(
    paths: &ConfigPaths,
    shortcut_path: &str,
    trace_id: &str,
) -> Result<LaunchOptions, AppError> {
    let path = paths.compat_target_file(shortcut_path);
    if !path.exists() {
        return Ok(LaunchOptions::new());
    }
    read_json(&path, trace_id)
}

pub fn save_compat_override(
    paths: &ConfigPaths,
    shortcut_path: &str,
    options: &LaunchOptions,
    trace_id: &str,
) -> Result<PathBuf, AppError> {
    let path = paths.compat_target_file(shortcut_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::system(format!("Failed to create override dir: {err}"), trace_id)
        })?;
    }
    write_json(&path, options, trace_id)?;
    Ok(path)
}

/// Returns false when there was nothing to delete.
pub fn delete_compat_override(
    paths: &ConfigPaths,
    shortcut_path: &str,
    trace_id: &str,
) -> Result<bool, AppError> {
    let path = paths.compat_target_file(shortcut_path);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path)
        .map_err(|err| AppError::system(format!("Failed to delete override: {err}"), trace_id))?;
    Ok(true)
}

pub fn load_app_metadata(
    paths: &ConfigPaths,
    trace_id: &str,
) -> Result<BTreeMap<String, AppMetadata>, AppError> {
    let path = paths.app_metadata_file();
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    read_json(&path, trace_id)
}

pub fn save_app_metadata(
    paths: &ConfigPaths,
    package: &str,
    metadata: AppMetadata,
    trace_id: &str,
) -> Result<(), AppError> {
    let mut all = load_app_metadata(paths, trace_id)?;
    all.insert(package.to_string(), metadata);
    if let Some(parent) = paths.app_metadata_file().parent() {
        let _ = fs::create_dir_all(parent);
    }
    write_json(&paths.app_metadata_file(), &all, trace_id)
}

/// Base options with the target override applied on top.
pub fn merge_target_options(base: &LaunchOptions, target: Option<&LaunchOptions>) -> LaunchOptions {
    let mut merged = base.clone();
    if let Some(target) = target {
        merged.merge(target);
    }
    merged
}

/// Compat targets are started through the bridge, never through `--start-app`.
pub fn compat_launch_options(base: &LaunchOptions, target: &LaunchOptions) -> LaunchOptions {
    let mut merged = merge_target_options(base, Some(target));
    merged.set("start_app", "");
    merged
}

pub fn app_launch_options(base: &LaunchOptions, target: Option<&LaunchOptions>, package: &str) -> LaunchOptions {
    let mut merged = merge_target_options(base, target);
    merged.set("start_app", package);
    merged
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path, trace_id: &str) -> Result<T, AppError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        AppError::system(format!("Failed to read {}: {err}", path.display()), trace_id)
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        AppError::system(format!("Failed to parse {}: {err}", path.display()), trace_id)
    })
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, trace_id: &str) -> Result<(), AppError> {
    let payload = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::system(format!("Failed to serialize: {err}"), trace_id))?;
    fs::write(path, payload).map_err(|err| {
        AppError::system(format!("Failed to write {}: {err}", path.display()), trace_id)
    })
}

fn apply_legacy_overrides(mut config: LauncherConfig, value: &serde_json::Value) -> LauncherConfig {
    let Some(object) = value.as_object() else {
        return config;
    };
    for &key in OPTION_KEYS {
        if key == "use_ludashi_pkg" {
            continue;
        }
        let Some(raw) = object.get(key) else {
            continue;
        };
        if let Ok(parsed) = serde_json::from_value::<ConfigValue>(raw.clone()) {
            config.options.set(key, parsed);
        }
    }
    if let Some(flag) = object.get("use_ludashi_pkg").and_then(|v| v.as_bool()) {
        config.compat.use_ludashi_pkg = flag;
    }
    config
}

fn validate_config(mut config: LauncherConfig) -> LauncherConfig {
    if config.tools.bridge_timeout_secs == 0 || config.tools.bridge_timeout_secs > 600 {
        config.tools.bridge_timeout_secs = ToolSettings::default().bridge_timeout_secs;
    }
    let defaults = CompatSettings::default();
    if config.compat.settle_delay_ms > 30_000 {
        config.compat.settle_delay_ms = defaults.settle_delay_ms;
    }
    if config.compat.display_timeout_secs == 0 {
        config.compat.display_timeout_secs = defaults.display_timeout_secs;
    }
    if config.compat.readiness_interval_ms == 0 {
        config.compat.readiness_interval_ms = defaults.readiness_interval_ms;
    }
    if config.compat.shortcuts_dir.trim().is_empty() {
        config.compat.shortcuts_dir = defaults.shortcuts_dir;
    }
    if config.sessions.terminate_timeout_ms < 100 {
        config.sessions.terminate_timeout_ms = SessionSettings::default().terminate_timeout_ms;
    }
    if config.sessions.worker_limit == 0 {
        config.sessions.worker_limit = SessionSettings::default().worker_limit;
    }
    config
}
