use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::bridge::Bridge;
use crate::app::adb::locator::{
    adb_fallback_paths, probe_tool, resolve_program, scrcpy_fallback_paths, validate_program,
    ADB_PROGRAM, SCRCPY_PROGRAM,
};
use crate::app::compat::orchestrator::{
    BridgeStarter, CompatLaunch, CompatOrchestrator, CompatPackage, CompatReport, CompatState,
    CompatTimings, MirrorProcess,
};
use crate::app::config::{
    app_launch_options, compat_launch_options, delete_compat_override, load_app_metadata,
    load_compat_override, load_config, remote_basename, save_app_metadata, save_compat_override,
    save_config, AppMetadata, LauncherConfig,
};
use crate::app::error::AppError;
use crate::app::models::{
    CommandResponse, DeviceStatus, LaunchOptions, Session, SessionKind, ShortcutEntry, ToolInfo,
};
use crate::app::scrcpy::catalog::{
    load_cached, query_encoders, query_installed_apps, save_cached, EncoderCatalog,
};
use crate::app::scrcpy::command::build_scrcpy_command;
use crate::app::scrcpy::launcher::{LaunchRequest, MirrorLauncher};
use crate::app::session::registry::SessionRegistry;
use crate::app::state::AppState;

pub fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{field} is required"), trace_id));
    }
    Ok(())
}

/// What a launch is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Plain device mirror.
    Device,
    App { package: String, name: Option<String> },
    Compat { shortcut_path: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyReport {
    pub scrcpy: ToolInfo,
    pub adb: ToolInfo,
}

struct Tools {
    scrcpy: String,
    adb: String,
    serial: Option<String>,
    bridge_timeout: Duration,
}

impl Tools {
    /// Programs from config; a serial pinned on the state wins over the configured one.
    fn resolve(state: &AppState, config: &LauncherConfig) -> Self {
        let serial = state
            .device_serial
            .as_deref()
            .unwrap_or(&config.tools.device_serial)
            .trim();
        Self {
            scrcpy: resolve_program(&config.tools.scrcpy_path, SCRCPY_PROGRAM),
            adb: resolve_program(&config.tools.adb_path, ADB_PROGRAM),
            serial: (!serial.is_empty()).then(|| serial.to_string()),
            bridge_timeout: Duration::from_secs(config.tools.bridge_timeout_secs),
        }
    }

    fn bridge(&self) -> Bridge {
        Bridge::new(self.adb.clone(), self.serial.clone()).with_timeout(self.bridge_timeout)
    }
}

/// Shortcut file name without its `.desktop` extension.
pub fn shortcut_title(shortcut_path: &str) -> &str {
    let name = remote_basename(shortcut_path);
    name.strip_suffix(".desktop").unwrap_or(name)
}

/// Runs a bridge call under the global cap and the per-device lock.
fn on_device<T>(
    state: &AppState,
    serial: Option<&str>,
    call: impl FnOnce() -> Result<T, AppError>,
) -> Result<T, AppError> {
    let _permit = state.scheduler.acquire_global();
    let lock = serial.map(|serial| state.scheduler.device_lock(serial));
    let _guard = lock
        .as_ref()
        .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
    call()
}

pub fn get_config(state: &AppState, trace_id: Option<String>) -> Result<CommandResponse<LauncherConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&state.paths, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

pub fn save_launcher_config(
    state: &AppState,
    config: LauncherConfig,
    trace_id: Option<String>,
) -> Result<CommandResponse<LauncherConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    save_config(&config, &state.paths, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

pub fn check_dependencies(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<DependencyReport>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&state.paths, &trace_id)?;
    let tools = Tools::resolve(state, &config);
    validate_program(&tools.scrcpy, "scrcpy").map_err(|err| AppError::dependency(err, &trace_id))?;
    validate_program(&tools.adb, "adb").map_err(|err| AppError::dependency(err, &trace_id))?;

    let scrcpy = probe_tool(&tools.scrcpy, &scrcpy_fallback_paths());
    if !scrcpy.available {
        return Err(AppError::dependency("scrcpy is not available", &trace_id));
    }
    let adb = probe_tool(&tools.adb, &adb_fallback_paths());
    if !adb.available {
        return Err(AppError::dependency("adb is not available", &trace_id));
    }
    info!(trace_id = %trace_id, scrcpy_major = ?scrcpy.major_version, "dependencies available");
    Ok(CommandResponse {
        trace_id,
        data: DependencyReport { scrcpy, adb },
    })
}

fn prepare_launch(
    state: &AppState,
    config: &LauncherConfig,
    tools: &Tools,
    target: &LaunchTarget,
    window_title: Option<String>,
    trace_id: &str,
) -> Result<LaunchRequest, AppError> {
    let request = match target {
        LaunchTarget::Device => {
            LaunchRequest::new(config.options.clone(), SessionKind::App).window_title(window_title)
        }
        LaunchTarget::App { package, name } => {
            ensure_non_empty(package, "package", trace_id)?;
            let metadata = load_app_metadata(&state.paths, trace_id)?;
            let target_options = metadata.get(package).and_then(|entry| entry.config.as_ref());
            let options = app_launch_options(&config.options, target_options, package);
            let title = window_title
                .or_else(|| name.clone())
                .or_else(|| Some(package.clone()));
            LaunchRequest::new(options, SessionKind::App)
                .window_title(title)
                .icon_path(state.paths.icon_for(package))
        }
        LaunchTarget::Compat { shortcut_path } => {
            ensure_non_empty(shortcut_path, "shortcut_path", trace_id)?;
            let target_options = load_compat_override(&state.paths, shortcut_path, trace_id)?;
            let options = compat_launch_options(&config.options, &target_options);
            let title = shortcut_title(shortcut_path);
            LaunchRequest::new(options, SessionKind::CompatLayer)
                .capture_output(true)
                .window_title(window_title.or_else(|| Some(title.to_string())))
                .icon_path(state.paths.icon_for(title))
        }
    };
    Ok(request.device_id(tools.serial.clone()))
}

/// The exact argv a launch of `target` would use.
pub fn preview_command(
    state: &AppState,
    target: LaunchTarget,
    window_title: Option<String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&state.paths, &trace_id)?;
    let tools = Tools::resolve(state, &config);
    let request = prepare_launch(state, &config, &tools, &target, window_title, &trace_id)?;
    let mut argv = build_scrcpy_command(
        &request.options,
        request.window_title.as_deref(),
        request.device_id.as_deref(),
        &trace_id,
    )?;
    argv[0] = tools.scrcpy;
    Ok(CommandResponse {
        trace_id,
        data: argv,
    })
}

/// Starts a mirror for the device or an installed app; compat shortcuts go through
/// [`launch_compat_session`].
pub fn launch_session(
    state: &AppState,
    target: LaunchTarget,
    window_title: Option<String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Session>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    if matches!(target, LaunchTarget::Compat { .. }) {
        return Err(AppError::validation(
            "Compat shortcuts need the two-stage launch",
            &trace_id,
        ));
    }
    let config = load_config(&state.paths, &trace_id)?;
    let tools = Tools::resolve(state, &config);
    let request = prepare_launch(state, &config, &tools, &target, window_title, &trace_id)?;
    let launcher = MirrorLauncher::new(tools.scrcpy, Arc::clone(&state.registry));
    let launched = launcher.launch(&request, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: launched.session,
    })
}

/// Everything one compat launch needs, detached from [`AppState`] so it can move to a worker.
///
/// The device lock is taken around the spawn and around each bridge call, never across the
/// display scan, so several compat launches on one device can be mirroring at once.
struct CompatJob {
    launcher: MirrorLauncher,
    request: LaunchRequest,
    orchestrator: CompatOrchestrator,
    device_lock: Option<Arc<Mutex<()>>>,
}

impl CompatJob {
    fn prepare(state: &AppState, shortcut_path: &str, trace_id: &str) -> Result<Self, AppError> {
        let config = load_config(&state.paths, trace_id)?;
        let tools = Tools::resolve(state, &config);
        let target = LaunchTarget::Compat {
            shortcut_path: shortcut_path.to_string(),
        };
        let request = prepare_launch(state, &config, &tools, &target, None, trace_id)?;
        let package = CompatPackage::select(
            config.compat.use_ludashi_pkg || request.options.flag("use_ludashi_pkg"),
        );
        let device_lock = tools
            .serial
            .as_deref()
            .map(|serial| state.scheduler.device_lock(serial));
        let starter = BridgeStarter {
            bridge: tools.bridge(),
            shortcuts_dir: config.compat.shortcuts_dir.clone(),
            device_lock: device_lock.clone(),
        };
        let orchestrator = CompatOrchestrator::new(
            shortcut_path,
            package,
            CompatTimings::from(&config.compat),
            Box::new(starter),
        );
        Ok(Self {
            launcher: MirrorLauncher::new(tools.scrcpy, Arc::clone(&state.registry)),
            request,
            orchestrator,
            device_lock,
        })
    }

    fn run(self, trace_id: &str) -> CompatReport {
        let Self {
            launcher,
            request,
            orchestrator,
            device_lock,
        } = self;
        orchestrator.run(
            || {
                let launched = {
                    let _guard = device_lock
                        .as_ref()
                        .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
                    launcher.launch(&request, trace_id)?
                };
                launched
                    .process
                    .map(|process| Box::new(process) as Box<dyn MirrorProcess>)
                    .ok_or_else(|| AppError::system("Mirroring output was not captured", trace_id))
            },
            trace_id,
        )
    }
}

/// Drops the session of a compat launch that never got a display; its process is already killed.
fn settle_compat_report(
    registry: &SessionRegistry,
    report: CompatReport,
    trace_id: &str,
) -> Result<CompatLaunch, AppError> {
    if report.result.is_err() {
        let resolved = report
            .history
            .iter()
            .any(|state| matches!(state, CompatState::DisplayResolved { .. }));
        let started = report.history.iter().find_map(|state| match state {
            CompatState::MirroringStarted { pid } => Some(*pid),
            _ => None,
        });
        if let (false, Some(pid)) = (resolved, started) {
            if registry.remove(pid).is_some() {
                info!(trace_id = %trace_id, pid, "removed session of failed compat launch");
            }
        }
    }
    report.result
}

/// Two-stage compat launch, blocking the caller until the shortcut is started or the launch fails.
pub fn launch_compat_session(
    state: &AppState,
    shortcut_path: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<CompatLaunch>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let job = CompatJob::prepare(state, shortcut_path, &trace_id)?;
    let report = job.run(&trace_id);
    let data = settle_compat_report(&state.registry, report, &trace_id)?;
    Ok(CommandResponse { trace_id, data })
}

/// Same as [`launch_compat_session`] on a scheduler worker; `on_done` runs on the dispatcher.
pub fn spawn_compat_session<F>(
    state: &AppState,
    shortcut_path: &str,
    trace_id: Option<String>,
    on_done: F,
) -> Result<String, AppError>
where
    F: FnOnce(Result<CommandResponse<CompatLaunch>, AppError>) + Send + 'static,
{
    let trace_id = resolve_trace_id(trace_id);
    let job = CompatJob::prepare(state, shortcut_path, &trace_id)?;
    let registry = Arc::clone(&state.registry);
    let worker_trace = trace_id.clone();
    let completion_trace = trace_id.clone();
    state.scheduler.submit(
        None,
        move || job.run(&worker_trace),
        move |report| {
            let result = settle_compat_report(&registry, report, &completion_trace).map(|data| {
                CommandResponse {
                    trace_id: completion_trace.clone(),
                    data,
                }
            });
            on_done(result);
        },
    );
    Ok(trace_id)
}

pub fn list_sessions(state: &AppState, trace_id: Option<String>) -> Result<CommandResponse<Vec<Session>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let sessions = state.registry.list_active(&trace_id);
    Ok(CommandResponse {
        trace_id,
        data: sessions,
    })
}

pub fn terminate_session(
    state: &AppState,
    pid: u32,
    trace_id: Option<String>,
) -> Result<CommandResponse<u32>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&state.paths, &trace_id)?;
    let timeout = Duration::from_millis(config.sessions.terminate_timeout_ms);
    state.registry.terminate(pid, timeout, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: pid,
    })
}

/// Encoder catalog from cache, or from `scrcpy --list-encoders` when missing or `refresh` is set.
pub fn list_encoders(
    state: &AppState,
    refresh: bool,
    trace_id: Option<String>,
) -> Result<CommandResponse<EncoderCatalog>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let cache = state.paths.encoders_cache();
    if !refresh {
        let cached: EncoderCatalog = load_cached(&cache, &trace_id);
        if !cached.is_empty() {
            return Ok(CommandResponse {
                trace_id,
                data: cached,
            });
        }
    }
    let config = load_config(&state.paths, &trace_id)?;
    let tools = Tools::resolve(state, &config);
    let catalog = on_device(state, tools.serial.as_deref(), || {
        query_encoders(&tools.scrcpy, tools.serial.as_deref(), &trace_id)
    })?;
    if let Err(err) = save_cached(&cache, &catalog, &trace_id) {
        warn!(trace_id = %trace_id, error = %err, "failed to cache encoders");
    }
    Ok(CommandResponse {
        trace_id,
        data: catalog,
    })
}

pub fn list_installed_apps(
    state: &AppState,
    refresh: bool,
    trace_id: Option<String>,
) -> Result<CommandResponse<BTreeMap<String, String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let cache = state.paths.installed_apps_cache();
    if !refresh {
        let cached: BTreeMap<String, String> = load_cached(&cache, &trace_id);
        if !cached.is_empty() {
            return Ok(CommandResponse {
                trace_id,
                data: cached,
            });
        }
    }
    let config = load_config(&state.paths, &trace_id)?;
    let tools = Tools::resolve(state, &config);
    let apps = on_device(state, tools.serial.as_deref(), || {
        query_installed_apps(&tools.scrcpy, tools.serial.as_deref(), &trace_id)
    })?;
    if let Err(err) = save_cached(&cache, &apps, &trace_id) {
        warn!(trace_id = %trace_id, error = %err, "failed to cache installed apps");
    }
    Ok(CommandResponse {
        trace_id,
        data: apps,
    })
}

pub fn list_shortcuts(state: &AppState, trace_id: Option<String>) -> Result<CommandResponse<Vec<ShortcutEntry>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&state.paths, &trace_id)?;
    let tools = Tools::resolve(state, &config);
    let bridge = tools.bridge();
    let shortcuts = on_device(state, bridge.serial(), || {
        bridge.list_shortcuts(&config.compat.shortcuts_dir, &trace_id)
    })?;
    Ok(CommandResponse {
        trace_id,
        data: shortcuts,
    })
}

pub fn device_status(state: &AppState, trace_id: Option<String>) -> Result<CommandResponse<DeviceStatus>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&state.paths, &trace_id)?;
    let bridge = Tools::resolve(state, &config).bridge();
    let status = on_device(state, bridge.serial(), || bridge.device_info(&trace_id))?;
    Ok(CommandResponse {
        trace_id,
        data: status,
    })
}

/// Turns the device screen on.
pub fn wake_device(state: &AppState, trace_id: Option<String>) -> Result<CommandResponse<()>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&state.paths, &trace_id)?;
    let bridge = Tools::resolve(state, &config).bridge();
    on_device(state, bridge.serial(), || bridge.wake_screen(&trace_id))?;
    Ok(CommandResponse { trace_id, data: () })
}

/// Pulls the Windows executable a shortcut points at into `output_dir`.
pub fn pull_shortcut_executable(
    state: &AppState,
    shortcut_path: &str,
    output_dir: &Path,
    trace_id: Option<String>,
) -> Result<CommandResponse<PathBuf>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(shortcut_path, "shortcut_path", &trace_id)?;
    let config = load_config(&state.paths, &trace_id)?;
    let bridge = Tools::resolve(state, &config).bridge();

    let local_path = on_device(state, bridge.serial(), || {
        let remote = bridge
            .shortcut_executable(shortcut_path, &trace_id)?
            .ok_or_else(|| {
                AppError::validation(format!("{shortcut_path} does not reference an executable"), &trace_id)
            })?;
        fs::create_dir_all(output_dir).map_err(|err| {
            AppError::system(format!("Failed to create output dir: {err}"), &trace_id)
        })?;
        let local_path = output_dir.join(remote_basename(&remote));
        bridge.pull_file(&remote, &local_path, &trace_id)?;
        Ok(local_path)
    })?;
    Ok(CommandResponse {
        trace_id,
        data: local_path,
    })
}

pub fn save_compat_target(
    state: &AppState,
    shortcut_path: &str,
    options: LaunchOptions,
    trace_id: Option<String>,
) -> Result<CommandResponse<PathBuf>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(shortcut_path, "shortcut_path", &trace_id)?;
    let path = save_compat_override(&state.paths, shortcut_path, &options, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: path,
    })
}

pub fn delete_compat_target(
    state: &AppState,
    shortcut_path: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let deleted = delete_compat_override(&state.paths, shortcut_path, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: deleted,
    })
}

/// Stores per-app options on top of the existing metadata entry.
pub fn save_app_target(
    state: &AppState,
    package: &str,
    options: Option<LaunchOptions>,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppMetadata>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(package, "package", &trace_id)?;
    let mut metadata = load_app_metadata(&state.paths, &trace_id)?
        .remove(package)
        .unwrap_or_default();
    metadata.config = options;
    save_app_metadata(&state.paths, package, metadata.clone(), &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: metadata,
    })
}
