use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::compat::orchestrator::MirrorProcess;
use crate::app::error::AppError;
use crate::app::models::{LaunchOptions, Session, SessionKind};
use crate::app::scrcpy::command::{build_scrcpy_command, resolve_window_title, DEFAULT_WINDOW_TITLE};
use crate::app::session::registry::SessionRegistry;

/// Read by scrcpy to pick the window icon.
pub const ICON_ENV: &str = "SCRCPY_ICON_PATH";
/// Per-launch token exported to the child so reconciliation can recognise it.
pub const SESSION_TOKEN_ENV: &str = "SCRCPY_LAUNCHER_SESSION";

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub options: LaunchOptions,
    pub capture_output: bool,
    pub window_title: Option<String>,
    pub device_id: Option<String>,
    pub icon_path: Option<PathBuf>,
    pub kind: SessionKind,
}

impl LaunchRequest {
    pub fn new(options: LaunchOptions, kind: SessionKind) -> Self {
        Self {
            options,
            capture_output: false,
            window_title: None,
            device_id: None,
            icon_path: None,
            kind,
        }
    }

    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn window_title(mut self, title: Option<String>) -> Self {
        self.window_title = title;
        self
    }

    pub fn device_id(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn icon_path(mut self, icon_path: Option<PathBuf>) -> Self {
        self.icon_path = icon_path;
        self
    }
}

/// Icon hint to export, only for an existing file.
pub fn icon_env_value(icon_path: Option<&Path>) -> Option<&Path> {
    icon_path.filter(|path| path.is_file())
}

/// Spawned scrcpy process plus the session it was registered as.
pub struct LaunchedMirror {
    pub session: Session,
    /// Present only for captured launches.
    pub process: Option<MirrorChild>,
}

pub struct MirrorLauncher {
    program: String,
    registry: Arc<SessionRegistry>,
}

impl MirrorLauncher {
    pub fn new(program: impl Into<String>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            program: program.into(),
            registry,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn launch(&self, request: &LaunchRequest, trace_id: &str) -> Result<LaunchedMirror, AppError> {
        let mut argv = build_scrcpy_command(
            &request.options,
            request.window_title.as_deref(),
            request.device_id.as_deref(),
            trace_id,
        )?;
        argv[0] = self.program.clone();

        let launch_token = Uuid::new_v4().to_string();
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]).env(SESSION_TOKEN_ENV, &launch_token);
        match icon_env_value(request.icon_path.as_deref()) {
            Some(icon) => {
                info!(trace_id = %trace_id, icon = %icon.display(), "setting scrcpy window icon");
                command.env(ICON_ENV, icon);
            }
            None => {
                command.env_remove(ICON_ENV);
            }
        }
        command.stdin(Stdio::null());
        if request.capture_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        info!(trace_id = %trace_id, command = %shell_words::join(&argv), "executing scrcpy command");
        let mut child = command.spawn().map_err(|err| {
            AppError::launch(format!("Failed to launch {}: {err}", self.program), trace_id)
        })?;
        let pid = child.id();

        let name = resolve_window_title(&request.options, request.window_title.as_deref())
            .unwrap_or_else(|| DEFAULT_WINDOW_TITLE.to_string());
        let session = Session {
            pid,
            name,
            icon_path: icon_env_value(request.icon_path.as_deref()).map(Path::to_path_buf),
            argv,
            kind: request.kind,
            launch_token,
            started_at: Utc::now(),
        };
        self.registry.register(session.clone());

        let process = if request.capture_output {
            Some(MirrorChild::capture(child, trace_id))
        } else {
            spawn_reaper(child, trace_id);
            None
        };
        Ok(LaunchedMirror { session, process })
    }
}

/// Captured scrcpy child with its stdout and stderr merged into one line channel.
pub struct MirrorChild {
    pid: u32,
    child: Option<Child>,
    output: Option<Receiver<String>>,
    trace_id: String,
}

impl MirrorChild {
    fn capture(mut child: Child, trace_id: &str) -> Self {
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }
        Self {
            pid: child.id(),
            child: Some(child),
            output: Some(rx),
            trace_id: trace_id.to_string(),
        }
    }
}

impl MirrorProcess for MirrorChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn take_output(&mut self) -> Option<Box<dyn Iterator<Item = String> + Send>> {
        self.output
            .take()
            .map(|rx| Box::new(rx.into_iter()) as Box<dyn Iterator<Item = String> + Send>)
    }

    fn kill(&mut self) -> std::io::Result<()> {
        match self.child.take() {
            Some(mut child) => {
                let result = child.kill();
                let _ = child.wait();
                result
            }
            None => Ok(()),
        }
    }

    fn release(&mut self) {
        if let Some(child) = self.child.take() {
            spawn_reaper(child, &self.trace_id);
        }
    }
}

impl Drop for MirrorChild {
    fn drop(&mut self) {
        // never leave an un-reaped child behind
        self.release();
    }
}

/// Forwards output lines until EOF. Bytes that are not UTF-8 are replaced, never fatal.
fn forward_lines<R: Read + Send + 'static>(reader: R, tx: Sender<String>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Waits on the child in the background so an exited scrcpy does not linger as a zombie.
fn spawn_reaper(mut child: Child, trace_id: &str) {
    let trace_id = trace_id.to_string();
    thread::spawn(move || {
        let pid = child.id();
        match child.wait() {
            Ok(status) => debug!(trace_id = %trace_id, pid, status = %status, "scrcpy exited"),
            Err(err) => warn!(trace_id = %trace_id, pid, error = %err, "failed to wait for scrcpy"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::session::probe::tests::FakeProbe;

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
        LOCK.get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::with_probe(Box::new(FakeProbe::default())))
    }

    #[cfg(unix)]
    fn fake_scrcpy(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("scrcpy");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             echo \"icon=${SCRCPY_ICON_PATH-unset}\"\n\
             echo \"token=${SCRCPY_LAUNCHER_SESSION-unset}\"\n\
             echo \"args=$*\"\n\
             echo 'INFO: New display: 1280x720/140 (id=5)' >&2\n",
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        script.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    fn collect(mut process: MirrorChild) -> Vec<String> {
        let lines: Vec<String> = process.take_output().expect("output").collect();
        process.release();
        lines
    }

    #[test]
    fn icon_env_requires_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let icon = dir.path().join("game.png");
        assert!(icon_env_value(Some(&icon)).is_none());
        std::fs::write(&icon, b"png").expect("write icon");
        assert_eq!(icon_env_value(Some(&icon)), Some(icon.as_path()));
        assert!(icon_env_value(Some(dir.path())).is_none());
        assert!(icon_env_value(None).is_none());
    }

    #[test]
    fn launch_failure_registers_nothing() {
        let registry = registry();
        let launcher = MirrorLauncher::new("/this/path/should/not/exist/scrcpy", Arc::clone(&registry));
        let request = LaunchRequest::new(LaunchOptions::new(), SessionKind::App);
        let err = launcher.launch(&request, "trace-l").err().expect("launch error");
        assert_eq!(err.code, "ERR_LAUNCH");
        assert_eq!(err.trace_id, "trace-l");
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn parse_error_aborts_before_spawn() {
        let registry = registry();
        let launcher = MirrorLauncher::new("/this/path/should/not/exist/scrcpy", Arc::clone(&registry));
        let options = LaunchOptions::new().with("extraargs", "\"unterminated");
        let request = LaunchRequest::new(options, SessionKind::App);
        let err = launcher.launch(&request, "trace").err().expect("parse error");
        assert_eq!(err.code, "ERR_PARSE");
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn captured_launch_merges_output_and_registers_session() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry();
        let launcher = MirrorLauncher::new(fake_scrcpy(dir.path()), Arc::clone(&registry));
        let request = LaunchRequest::new(LaunchOptions::new().with("fullscreen", true), SessionKind::CompatLayer)
            .capture_output(true)
            .window_title(Some("Alan Wake".to_string()));

        let launched = launcher.launch(&request, "trace").expect("launch");
        let session = launched.session.clone();
        let lines = collect(launched.process.expect("captured"));

        assert!(lines.iter().any(|line| line == "icon=unset"));
        assert!(lines.iter().any(|line| line == &format!("token={}", session.launch_token)));
        assert!(lines.iter().any(|line| line.contains("--window-title=Alan Wake --fullscreen")));
        assert!(lines.iter().any(|line| line.contains("(id=5)")), "stderr is merged");

        assert_eq!(session.name, "Alan Wake");
        assert_eq!(session.kind, SessionKind::CompatLayer);
        assert_eq!(session.argv[0], launcher.program());
        assert_eq!(registry.snapshot(), vec![session]);
    }

    #[test]
    #[cfg(unix)]
    fn invalid_utf8_output_keeps_later_lines() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("scrcpy");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             printf 'INFO: Device: \\377\\376 phone\\n'\n\
             echo 'INFO: New display: 1280x720/140 (id=6)'\n",
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let launcher = MirrorLauncher::new(script.to_string_lossy(), registry());
        let request = LaunchRequest::new(LaunchOptions::new(), SessionKind::CompatLayer).capture_output(true);
        let launched = launcher.launch(&request, "trace").expect("launch");
        let lines = collect(launched.process.expect("captured"));

        assert_eq!(lines.len(), 2, "{lines:?}");
        assert!(lines[0].starts_with("INFO: Device: \u{FFFD}"), "{lines:?}");
        assert!(lines[0].ends_with(" phone"));
        assert_eq!(lines[1], "INFO: New display: 1280x720/140 (id=6)");
    }

    #[test]
    #[cfg(unix)]
    fn icon_variable_is_set_or_removed() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry();
        let launcher = MirrorLauncher::new(fake_scrcpy(dir.path()), Arc::clone(&registry));

        std::env::set_var(ICON_ENV, "/inherited/icon.png");
        let request = LaunchRequest::new(LaunchOptions::new(), SessionKind::App)
            .capture_output(true)
            .icon_path(Some(dir.path().join("missing.png")));
        let launched = launcher.launch(&request, "trace").expect("launch");
        let lines = collect(launched.process.expect("captured"));
        std::env::remove_var(ICON_ENV);
        assert!(lines.iter().any(|line| line == "icon=unset"), "{lines:?}");
        assert_eq!(launched.session.icon_path, None);

        let icon = dir.path().join("icon.png");
        std::fs::write(&icon, b"png").expect("icon");
        let request = LaunchRequest::new(LaunchOptions::new(), SessionKind::App)
            .capture_output(true)
            .icon_path(Some(icon.clone()));
        let launched = launcher.launch(&request, "trace").expect("launch");
        let lines = collect(launched.process.expect("captured"));
        assert!(lines.iter().any(|line| line == &format!("icon={}", icon.display())));
        assert_eq!(launched.session.icon_path, Some(icon));
    }

    #[test]
    #[cfg(unix)]
    fn uncaptured_launch_has_no_process_handle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry();
        let launcher = MirrorLauncher::new(fake_scrcpy(dir.path()), Arc::clone(&registry));
        let request = LaunchRequest::new(LaunchOptions::new(), SessionKind::App);
        let launched = launcher.launch(&request, "trace").expect("launch");
        assert!(launched.process.is_none());
        assert_eq!(launched.session.name, "Android Device");
        assert_eq!(registry.snapshot().len(), 1);
    }
}
