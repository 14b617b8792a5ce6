use std::io::{BufRead, Write};

use scrcpy_launcher_lib::app::commands::{
    check_dependencies, device_status, launch_session, list_encoders, list_installed_apps,
    list_sessions, list_shortcuts, preview_command, spawn_compat_session, terminate_session,
    wake_device, LaunchTarget,
};
use scrcpy_launcher_lib::app::config::{load_config, ConfigPaths};
use scrcpy_launcher_lib::app::error::AppError;
use scrcpy_launcher_lib::app::logging::init_logging;
use scrcpy_launcher_lib::app::models::CommandResponse;
use scrcpy_launcher_lib::app::scrcpy::catalog::MediaKind;
use scrcpy_launcher_lib::app::state::AppState;
use serde::Serialize;
use uuid::Uuid;

const USAGE: &str = "Usage: scrcpy_launcher [console|command|encoders|apps|shortcuts|device|check] [--serial SERIAL] [--title TITLE] [--json] [--refresh]";

const CONSOLE_HELP: &str = "Commands:
  app <package> [name]    mirror an installed app
  game <shortcut path>    start a Winlator shortcut on a new virtual display
  sessions                list running sessions
  kill <pid>              stop a session
  wake                    turn the device screen on
  command                 print the scrcpy command for the current config
  quit                    leave the console (sessions keep running)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Console,
    Command,
    Encoders,
    Apps,
    Shortcuts,
    Device,
    Check,
}

#[derive(Debug, Clone)]
struct Args {
    mode: Mode,
    serial: Option<String>,
    title: Option<String>,
    json: bool,
    refresh: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut mode = Mode::Console;
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut title: Option<String> = None;
    let mut json = false;
    let mut refresh = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "console" => mode = Mode::Console,
            "command" => mode = Mode::Command,
            "encoders" => mode = Mode::Encoders,
            "apps" => mode = Mode::Apps,
            "shortcuts" => mode = Mode::Shortcuts,
            "device" => mode = Mode::Device,
            "check" => mode = Mode::Check,
            "--serial" => {
                serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--title" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--title requires a value".to_string())?;
                title = Some(value);
            }
            "--json" => json = true,
            "--refresh" => refresh = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("Unknown arg: {other}\n{USAGE}")),
        }
    }

    Ok(Args {
        mode,
        serial,
        title,
        json,
        refresh,
    })
}

/// Prints a response as JSON or through `human`; errors go to stderr. Returns success.
fn report<T: Serialize>(
    json: bool,
    result: Result<CommandResponse<T>, AppError>,
    human: impl FnOnce(&T) -> String,
) -> bool {
    match result {
        Ok(response) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
            } else {
                println!("{}", human(&response.data));
            }
            true
        }
        Err(err) => {
            if json {
                eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
            } else {
                eprintln!("error: {err} [trace {}]", err.trace_id);
            }
            false
        }
    }
}

fn run_once(state: &AppState, args: &Args) -> bool {
    let json = args.json;
    match args.mode {
        Mode::Command => report(
            json,
            preview_command(state, LaunchTarget::Device, args.title.clone(), None),
            |argv| shell_words::join(argv),
        ),
        Mode::Encoders => report(json, list_encoders(state, args.refresh, None), |catalog| {
            let mut lines = Vec::new();
            for kind in [MediaKind::Video, MediaKind::Audio] {
                for choice in catalog.codec_choices(kind) {
                    let encoders: Vec<String> = catalog
                        .encoders_for(kind, &choice)
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    lines.push(format!("{} {choice}: {}", kind.as_str(), encoders.join(", ")));
                }
            }
            lines.join("\n")
        }),
        Mode::Apps => report(json, list_installed_apps(state, args.refresh, None), |apps| {
            apps.iter()
                .map(|(name, package)| format!("{name}\t{package}"))
                .collect::<Vec<_>>()
                .join("\n")
        }),
        Mode::Shortcuts => report(json, list_shortcuts(state, None), |shortcuts| {
            shortcuts
                .iter()
                .map(|entry| format!("{}\t{}", entry.name, entry.path))
                .collect::<Vec<_>>()
                .join("\n")
        }),
        Mode::Device => report(json, device_status(state, None), |status| status.summary()),
        Mode::Check => report(json, check_dependencies(state, None), |deps| {
            format!(
                "scrcpy: {} ({})\nadb: {} ({})",
                deps.scrcpy.command_path,
                deps.scrcpy.version_output.lines().next().unwrap_or_default(),
                deps.adb.command_path,
                deps.adb.version_output.lines().next().unwrap_or_default(),
            )
        }),
        Mode::Console => true,
    }
}

fn console(state: &AppState, args: &Args) {
    let json = args.json;
    println!("{CONSOLE_HELP}");
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let Some(Ok(line)) = lines.next() else {
            break;
        };
        let words = match shell_words::split(&line) {
            Ok(words) => words,
            Err(err) => {
                eprintln!("error: {err}");
                continue;
            }
        };
        let Some((command, rest)) = words.split_first() else {
            continue;
        };
        match command.as_str() {
            "app" => {
                let Some(package) = rest.first() else {
                    eprintln!("usage: app <package> [name]");
                    continue;
                };
                let name = (rest.len() > 1).then(|| rest[1..].join(" "));
                let target = LaunchTarget::App {
                    package: package.clone(),
                    name,
                };
                report(json, launch_session(state, target, None, None), |session| {
                    format!("started {} (pid {})", session.name, session.pid)
                });
            }
            "game" => {
                if rest.is_empty() {
                    eprintln!("usage: game <shortcut path>");
                    continue;
                }
                let shortcut = rest.join(" ");
                let submitted = spawn_compat_session(state, &shortcut, None, move |result| {
                    report(json, result, |launch| {
                        format!(
                            "started {} on display {} (pid {})",
                            launch.package, launch.display_id, launch.pid
                        )
                    });
                });
                match submitted {
                    Ok(trace_id) => println!("launching {shortcut} [trace {trace_id}]"),
                    Err(err) => eprintln!("error: {err}"),
                }
            }
            "sessions" => {
                report(json, list_sessions(state, None), |sessions| {
                    if sessions.is_empty() {
                        return "no active sessions".to_string();
                    }
                    sessions
                        .iter()
                        .map(|session| format!("{}\t{}\t{}", session.pid, session.kind, session.name))
                        .collect::<Vec<_>>()
                        .join("\n")
                });
            }
            "kill" => {
                let Some(pid) = rest.first().and_then(|value| value.parse::<u32>().ok()) else {
                    eprintln!("usage: kill <pid>");
                    continue;
                };
                report(json, terminate_session(state, pid, None), |pid| format!("stopped {pid}"));
            }
            "wake" => {
                report(json, wake_device(state, None), |_| "screen on".to_string());
            }
            "command" => {
                report(
                    json,
                    preview_command(state, LaunchTarget::Device, args.title.clone(), None),
                    |argv| shell_words::join(argv),
                );
            }
            "help" => println!("{CONSOLE_HELP}"),
            "quit" | "exit" => break,
            other => eprintln!("unknown command: {other}"),
        }
    }
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let paths = ConfigPaths::resolve();
    let trace_id = Uuid::new_v4().to_string();
    let config = match load_config(&paths, &trace_id) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.log_level);

    let state = AppState::new(paths)
        .with_worker_limit(config.sessions.worker_limit)
        .with_device_serial(args.serial.clone());

    if args.mode == Mode::Console {
        console(&state, &args);
        return;
    }
    if !run_once(&state, &args) {
        std::process::exit(1);
    }
}
