use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::ShortcutEntry;

const SDCARD_DOWNLOAD: &str = "/storage/emulated/0/Download";
const WINE_DRIVE_D: &str = "/home/xuser/.wine/dosdevices/d:";

pub fn parse_battery_level(output: &str) -> Option<u8> {
    static LEVEL: OnceLock<Regex> = OnceLock::new();
    let re = LEVEL.get_or_init(|| Regex::new(r"level:\s*(\d+)").expect("battery regex"));
    re.captures(output)?.get(1)?.as_str().parse::<u8>().ok()
}

/// One path per line from `find ... -name '*.desktop'`; sorted by display name.
pub fn parse_shortcut_listing(output: &str) -> Vec<ShortcutEntry> {
    let mut entries: Vec<ShortcutEntry> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.starts_with('/'))
        .map(|path| {
            let basename = path.rsplit('/').next().unwrap_or(path);
            let name = basename
                .strip_suffix(".desktop")
                .unwrap_or(basename)
                .to_string();
            ShortcutEntry {
                name,
                path: path.to_string(),
            }
        })
        .collect();
    entries.sort();
    entries
}

/// On-device path of the `.exe` a Winlator shortcut points at.
///
/// Newer shortcuts carry `Path=.../dosdevices/d:/Games/X` plus `StartupWMClass=x.exe`;
/// older ones only have `Exec=wine "/home/xuser/.wine/dosdevices/d:/..."`.
pub fn parse_shortcut_executable(content: &str) -> Option<String> {
    static DOS_PATH: OnceLock<Regex> = OnceLock::new();
    static WINE_EXEC: OnceLock<Regex> = OnceLock::new();
    let dos_path =
        DOS_PATH.get_or_init(|| Regex::new(r#"(?i)dosdevices/d:([^"]+)"#).expect("path regex"));
    let wine_exec =
        WINE_EXEC.get_or_init(|| Regex::new(r#"(?i)wine\s+"([^"]+)""#).expect("exec regex"));

    let mut game_dir = None;
    let mut exe_name = None;
    for line in content.lines() {
        let lower = line.to_lowercase();
        if lower.starts_with("path=") {
            if let Some(found) = dos_path.captures(line).and_then(|caps| caps.get(1)) {
                game_dir = Some(found.as_str().trim().to_string());
            }
        } else if lower.starts_with("startupwmclass=") {
            if let Some((_, value)) = line.split_once('=') {
                exe_name = Some(value.trim().to_string());
            }
        }
    }
    if let (Some(dir), Some(exe)) = (game_dir, exe_name) {
        return Some(format!("{SDCARD_DOWNLOAD}{dir}/{exe}").replace('\\', "/"));
    }

    for line in content.lines() {
        if !line.to_lowercase().starts_with("exec=") {
            continue;
        }
        let Some(exec_path) = wine_exec.captures(line).and_then(|caps| caps.get(1)) else {
            continue;
        };
        let exec_path = exec_path.as_str();
        if exec_path.to_lowercase().starts_with(WINE_DRIVE_D) {
            let rest = &exec_path[WINE_DRIVE_D.len()..];
            return Some(format!("{SDCARD_DOWNLOAD}{rest}").replace('\\', "/"));
        }
    }
    None
}

/// True when `dumpsys display` lists a logical display with the given id.
pub fn dumpsys_has_display(output: &str, display_id: &str) -> bool {
    static DISPLAY_ID: OnceLock<Regex> = OnceLock::new();
    let re = DISPLAY_ID.get_or_init(|| Regex::new(r"mDisplayId=(\d+)").expect("display regex"));
    re.captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .any(|id| id.as_str() == display_id)
}

/// `am start` can exit 0 while printing an error block.
pub fn am_start_error(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("Error:") || line.starts_with("Exception"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_battery_level() {
        let output = "Current Battery Service state:\n  AC powered: false\n  level: 87\n  scale: 100\n";
        assert_eq!(parse_battery_level(output), Some(87));
        assert_eq!(parse_battery_level("no battery"), None);
    }

    #[test]
    fn parses_shortcut_listing_sorted() {
        let output = "/storage/emulated/0/Download/Winlator/Frontend/Zeta.desktop\n\
                      /storage/emulated/0/Download/Winlator/Frontend/Alan Wake.desktop\n\
                      find: permission denied\n\n";
        let entries = parse_shortcut_listing(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Alan Wake");
        assert_eq!(
            entries[0].path,
            "/storage/emulated/0/Download/Winlator/Frontend/Alan Wake.desktop"
        );
        assert_eq!(entries[1].name, "Zeta");
    }

    #[test]
    fn parses_executable_from_path_and_wm_class() {
        let content = "[Desktop Entry]\nName=Alan Wake\n\
                       Path=/home/xuser/.wine/dosdevices/d:/Games/Alan Wake\n\
                       StartupWMClass=alanwake.exe\n";
        assert_eq!(
            parse_shortcut_executable(content).as_deref(),
            Some("/storage/emulated/0/Download/Games/Alan Wake/alanwake.exe")
        );
    }

    #[test]
    fn parses_executable_from_legacy_exec() {
        let content = "[Desktop Entry]\n\
                       Exec=env WINEPREFIX=\"/home/xuser/.wine\" wine \"/home/xuser/.wine/dosdevices/d:/Games\\Doom\\doom.exe\"\n";
        assert_eq!(
            parse_shortcut_executable(content).as_deref(),
            Some("/storage/emulated/0/Download/Games/Doom/doom.exe")
        );
    }

    #[test]
    fn executable_missing_when_no_known_format() {
        assert_eq!(parse_shortcut_executable("[Desktop Entry]\nName=X\n"), None);
    }

    #[test]
    fn finds_display_in_dumpsys() {
        let output = "Logical Displays: size=2\n  Display 0:\n    mDisplayId=0\n  Display 3:\n    mDisplayId=3\n";
        assert!(dumpsys_has_display(output, "3"));
        assert!(!dumpsys_has_display(output, "4"));
        assert!(!dumpsys_has_display("mDisplayId=31", "3"));
    }

    #[test]
    fn detects_am_start_errors() {
        let ok = "Starting: Intent { cmp=com.winlator/.XServerDisplayActivity }";
        assert_eq!(am_start_error(ok), None);
        let failed = "Starting: Intent { ... }\nError: Activity class {com.winlator/.X} does not exist.";
        assert!(am_start_error(failed).expect("error").contains("does not exist"));
    }
}
