use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::adb::parse::{
    am_start_error, dumpsys_has_display, parse_battery_level, parse_shortcut_executable,
    parse_shortcut_listing,
};
use crate::app::adb::runner::{run_bridge, CommandOutput, DEFAULT_COMMAND_TIMEOUT};
use crate::app::config::remote_basename;
use crate::app::error::AppError;
use crate::app::models::{DeviceStatus, ShortcutEntry};

pub const XSERVER_ACTIVITY: &str = ".XServerDisplayActivity";

/// Thin gateway over the `adb` CLI for one (optional) device serial.
#[derive(Debug, Clone)]
pub struct Bridge {
    program: String,
    serial: Option<String>,
    timeout: Duration,
}

impl Bridge {
    pub fn new(program: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            program: program.into(),
            serial: serial.filter(|value| !value.trim().is_empty()),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Full adb argv for `command`, with `-s <serial>` when a device is pinned.
    pub fn device_args<I, S>(&self, command: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = Vec::new();
        if let Some(serial) = &self.serial {
            args.push("-s".to_string());
            args.push(serial.clone());
        }
        args.extend(command.into_iter().map(Into::into));
        args
    }

    fn run<I, S>(&self, command: I, trace_id: &str) -> Result<CommandOutput, AppError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = self.device_args(command);
        run_bridge(&self.program, &args, self.timeout, trace_id)
    }

    pub fn device_info(&self, trace_id: &str) -> Result<DeviceStatus, AppError> {
        let name = self.run(["shell", "getprop", "ro.product.vendor.marketname"], trace_id)?;
        let mut model_name = name.stdout.trim().to_string();
        if model_name.is_empty() {
            let model = self.run(["shell", "getprop", "ro.product.model"], trace_id)?;
            model_name = model.stdout.trim().to_string();
        }
        if model_name.is_empty() {
            return Err(AppError::bridge("Device not connected or ADB error", trace_id));
        }
        let battery_level = match self.run(["shell", "dumpsys", "battery"], trace_id) {
            Ok(output) => parse_battery_level(&output.stdout),
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, "battery query failed");
                None
            }
        };
        Ok(DeviceStatus {
            model_name,
            battery_level,
        })
    }

    pub fn list_shortcuts(&self, shortcuts_dir: &str, trace_id: &str) -> Result<Vec<ShortcutEntry>, AppError> {
        let output = self.run(
            ["shell", "find", shortcuts_dir, "-type", "f", "-name", "'*.desktop'"],
            trace_id,
        )?;
        Ok(parse_shortcut_listing(&output.stdout))
    }

    pub fn read_text_file(&self, remote_path: &str, trace_id: &str) -> Result<String, AppError> {
        let quoted = shell_words::quote(remote_path).to_string();
        let output = self.run(["shell".to_string(), "cat".to_string(), quoted], trace_id)?;
        Ok(output.stdout)
    }

    /// Remote `.exe` referenced by a Winlator shortcut, if the shortcut is understood.
    pub fn shortcut_executable(&self, shortcut_path: &str, trace_id: &str) -> Result<Option<String>, AppError> {
        let content = self.read_text_file(shortcut_path, trace_id)?;
        Ok(parse_shortcut_executable(&content))
    }

    pub fn pull_file(&self, remote_path: &str, local_path: &Path, trace_id: &str) -> Result<(), AppError> {
        let local = local_path.to_string_lossy().to_string();
        self.run(["pull".to_string(), remote_path.to_string(), local], trace_id)?;
        if !local_path.exists() {
            return Err(AppError::bridge(
                format!("adb pull reported success but {} is missing", local_path.display()),
                trace_id,
            ));
        }
        Ok(())
    }

    /// `am start` of the Winlator display activity on a virtual display.
    pub fn start_app_on_display(
        &self,
        display_id: &str,
        shortcut_path: &str,
        shortcuts_dir: &str,
        package: &str,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let remote = start_on_display_command(display_id, shortcut_path, shortcuts_dir, package);
        let output = self.run(["shell".to_string(), remote], trace_id)?;
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if let Some(error) = am_start_error(&combined) {
            return Err(AppError::bridge(format!("am start failed: {error}"), trace_id));
        }
        info!(trace_id = %trace_id, display_id = %display_id, package = %package, "compat app started");
        Ok(())
    }

    pub fn display_ready(&self, display_id: &str, trace_id: &str) -> Result<bool, AppError> {
        let output = self.run(["shell", "dumpsys", "display"], trace_id)?;
        Ok(dumpsys_has_display(&output.stdout, display_id))
    }

    pub fn wake_screen(&self, trace_id: &str) -> Result<(), AppError> {
        self.run(["shell", "input", "keyevent", "KEYCODE_WAKEUP"], trace_id)?;
        Ok(())
    }
}

/// Remote shell line for starting a shortcut on `display_id`.
pub fn start_on_display_command(
    display_id: &str,
    shortcut_path: &str,
    shortcuts_dir: &str,
    package: &str,
) -> String {
    let file_name = remote_basename(shortcut_path);
    let full_path = format!("{}/{file_name}", shortcuts_dir.trim_end_matches('/'));
    let quoted_path = shell_words::quote(&full_path);
    format!(
        "am start --display {display_id} -n {package}/{XSERVER_ACTIVITY} \
         --es shortcut_path {quoted_path} \
         --activity-clear-task --activity-clear-top --activity-no-history"
    )
}
