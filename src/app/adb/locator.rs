use std::path::Path;
use std::process::Command;

use crate::app::models::ToolInfo;

pub const ADB_PROGRAM: &str = "adb";
pub const SCRCPY_PROGRAM: &str = "scrcpy";

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Configured path if any, else the bare program name resolved through PATH.
pub fn resolve_program(config_command_path: &str, default_program: &str) -> String {
    let normalized = expand_home(&normalize_command_path(config_command_path));
    if normalized.is_empty() {
        default_program.to_string()
    } else {
        normalized
    }
}

pub fn validate_program(program: &str, label: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err(format!("{label} command is empty"));
    }
    if !program.contains('/') && !program.contains('\\') {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(format!("{label} path must point to an executable file"));
    }
    if !path.exists() {
        return Err(format!("{label} executable not found at the configured path"));
    }
    Ok(())
}

/// Probes `program --version`, then well-known install locations.
pub fn probe_tool(program: &str, fallbacks: &[&str]) -> ToolInfo {
    let mut result = ToolInfo {
        available: false,
        version_output: String::new(),
        command_path: program.to_string(),
        major_version: None,
    };

    if let Some(output) = try_version(program) {
        result.available = true;
        result.major_version = parse_major_version(&output);
        result.version_output = output;
        return result;
    }

    for path in fallbacks {
        let expanded = expand_home(path);
        if !Path::new(&expanded).is_file() {
            continue;
        }
        if let Some(output) = try_version(&expanded) {
            result.available = true;
            result.major_version = parse_major_version(&output);
            result.version_output = output;
            result.command_path = expanded;
            return result;
        }
    }

    result
}

pub fn scrcpy_fallback_paths() -> Vec<&'static str> {
    match std::env::consts::OS {
        "macos" => vec![
            "/opt/homebrew/bin/scrcpy",
            "/usr/local/bin/scrcpy",
            "~/Applications/scrcpy.app/Contents/MacOS/scrcpy",
        ],
        "windows" => vec!["C:\\scrcpy\\scrcpy.exe"],
        _ => vec![
            "/usr/bin/scrcpy",
            "/usr/local/bin/scrcpy",
            "/snap/bin/scrcpy",
            "~/.local/bin/scrcpy",
            "/opt/scrcpy/scrcpy",
        ],
    }
}

pub fn adb_fallback_paths() -> Vec<&'static str> {
    match std::env::consts::OS {
        "macos" => vec![
            "/opt/homebrew/bin/adb",
            "~/Library/Android/sdk/platform-tools/adb",
        ],
        "windows" => vec![],
        _ => vec!["/usr/bin/adb", "~/Android/Sdk/platform-tools/adb"],
    }
}

/// First integer major version found in `--version` output, e.g. `scrcpy 3.1 <...>`.
pub fn parse_major_version(output: &str) -> Option<i32> {
    let lower = output.to_lowercase();
    for token in lower.split_whitespace() {
        let candidate = token
            .trim_start_matches("scrcpy")
            .trim_start_matches('v');
        if let Some(major) = candidate.split('.').next() {
            if candidate.contains('.') {
                if let Ok(value) = major.parse::<i32>() {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn try_version(command: &str) -> Option<String> {
    let output = Command::new(command).arg("--version").output().ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    path.to_string()
}
