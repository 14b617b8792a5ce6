use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::app::adb::bridge::Bridge;
use crate::app::config::CompatSettings;
use crate::app::error::{AppError, ERR_DISPLAY_NOT_FOUND};
use crate::app::scrcpy::display::{DisplayScan, ScanEnd};

/// Running mirroring process as seen by the orchestrator.
pub trait MirrorProcess: Send {
    fn pid(&self) -> u32;
    /// Merged output lines; yields `None` after the first call.
    fn take_output(&mut self) -> Option<Box<dyn Iterator<Item = String> + Send>>;
    fn kill(&mut self) -> io::Result<()>;
    /// Hands the process off so it keeps running unattended.
    fn release(&mut self);
}

/// Second-stage device call that starts the target on a virtual display.
pub trait AppStarter: Send {
    fn start_on_display(
        &self,
        display_id: &str,
        shortcut_path: &str,
        package: &str,
        trace_id: &str,
    ) -> Result<(), AppError>;

    /// Whether `display_id` is visible on the device yet. Polled between the two stages.
    fn display_ready(&self, display_id: &str, trace_id: &str) -> Result<bool, AppError>;
}

/// [`AppStarter`] backed by the adb bridge and a fixed shortcut directory.
///
/// Each bridge call takes `device_lock` for its own duration only, so other launches on the
/// same device are not held up between the two stages.
#[derive(Debug, Clone)]
pub struct BridgeStarter {
    pub bridge: Bridge,
    pub shortcuts_dir: String,
    pub device_lock: Option<Arc<Mutex<()>>>,
}

impl BridgeStarter {
    fn on_device<T>(&self, call: impl FnOnce(&Bridge) -> T) -> T {
        let _guard = self
            .device_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        call(&self.bridge)
    }
}

impl AppStarter for BridgeStarter {
    fn start_on_display(
        &self,
        display_id: &str,
        shortcut_path: &str,
        package: &str,
        trace_id: &str,
    ) -> Result<(), AppError> {
        self.on_device(|bridge| {
            bridge.start_app_on_display(display_id, shortcut_path, &self.shortcuts_dir, package, trace_id)
        })
    }

    fn display_ready(&self, display_id: &str, trace_id: &str) -> Result<bool, AppError> {
        self.on_device(|bridge| bridge.display_ready(display_id, trace_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompatPackage {
    Winlator,
    Ludashi,
}

impl CompatPackage {
    pub fn select(use_ludashi_pkg: bool) -> Self {
        if use_ludashi_pkg {
            Self::Ludashi
        } else {
            Self::Winlator
        }
    }

    pub fn package_name(self) -> &'static str {
        match self {
            Self::Winlator => "com.winlator",
            Self::Ludashi => "com.ludashi.benchmark",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CompatState {
    Idle,
    MirroringStarted { pid: u32 },
    DisplayResolved { pid: u32, display_id: String },
    AppStarted { pid: u32, display_id: String },
    Failed { code: String },
}

impl CompatState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AppStarted { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatTimings {
    pub settle_delay: Duration,
    pub display_timeout: Option<Duration>,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
}

impl From<&CompatSettings> for CompatTimings {
    fn from(settings: &CompatSettings) -> Self {
        Self {
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            display_timeout: (settings.display_timeout_secs > 0)
                .then(|| Duration::from_secs(settings.display_timeout_secs)),
            readiness_attempts: settings.readiness_attempts,
            readiness_interval: Duration::from_millis(settings.readiness_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatLaunch {
    pub pid: u32,
    pub display_id: String,
    pub package: String,
}

#[derive(Debug)]
pub struct CompatReport {
    pub history: Vec<CompatState>,
    pub result: Result<CompatLaunch, AppError>,
}

impl CompatReport {
    pub fn final_state(&self) -> Option<&CompatState> {
        self.history.last()
    }
}

/// Single-shot two-stage launch: mirror, resolve the virtual display, start the shortcut.
pub struct CompatOrchestrator {
    shortcut_path: String,
    package: CompatPackage,
    timings: CompatTimings,
    starter: Box<dyn AppStarter>,
    history: Vec<CompatState>,
}

impl CompatOrchestrator {
    pub fn new(
        shortcut_path: impl Into<String>,
        package: CompatPackage,
        timings: CompatTimings,
        starter: Box<dyn AppStarter>,
    ) -> Self {
        Self {
            shortcut_path: shortcut_path.into(),
            package,
            timings,
            starter,
            history: vec![CompatState::Idle],
        }
    }

    fn enter(&mut self, state: CompatState, trace_id: &str) {
        info!(trace_id = %trace_id, state = ?state, "compat launch state");
        self.history.push(state);
    }

    fn fail(mut self, error: AppError, trace_id: &str) -> CompatReport {
        warn!(trace_id = %trace_id, code = %error.code, error = %error.error, "compat launch failed");
        self.enter(CompatState::Failed { code: error.code.clone() }, trace_id);
        CompatReport {
            history: self.history,
            result: Err(error),
        }
    }

    /// Consumes the orchestrator; `spawn` must start the mirroring process with captured output.
    pub fn run<F>(mut self, spawn: F, trace_id: &str) -> CompatReport
    where
        F: FnOnce() -> Result<Box<dyn MirrorProcess>, AppError>,
    {
        let mut process = match spawn() {
            Ok(process) => process,
            Err(err) => return self.fail(err, trace_id),
        };
        let pid = process.pid();
        self.enter(CompatState::MirroringStarted { pid }, trace_id);

        let display_id = match self.resolve_display(process.as_mut(), trace_id) {
            Ok(display_id) => display_id,
            Err(err) => {
                if let Err(kill_err) = process.kill() {
                    warn!(trace_id = %trace_id, pid, error = %kill_err, "failed to kill mirroring process");
                }
                return self.fail(err, trace_id);
            }
        };
        self.enter(
            CompatState::DisplayResolved {
                pid,
                display_id: display_id.clone(),
            },
            trace_id,
        );

        thread::sleep(self.timings.settle_delay);
        self.await_readiness(&display_id, trace_id);

        let package = self.package.package_name();
        let started = self
            .starter
            .start_on_display(&display_id, &self.shortcut_path, package, trace_id);
        // the mirroring window stays up either way; only the second stage failed
        process.release();
        if let Err(err) = started {
            return self.fail(err, trace_id);
        }

        self.enter(
            CompatState::AppStarted {
                pid,
                display_id: display_id.clone(),
            },
            trace_id,
        );
        CompatReport {
            history: self.history,
            result: Ok(CompatLaunch {
                pid,
                display_id,
                package: package.to_string(),
            }),
        }
    }

    fn resolve_display(&self, process: &mut dyn MirrorProcess, trace_id: &str) -> Result<String, AppError> {
        let output = process.take_output().ok_or_else(|| {
            AppError::display_not_found("Mirroring output was not captured", trace_id)
        })?;
        let scan = DisplayScan::spawn(output, trace_id);
        match scan.wait(self.timings.display_timeout) {
            Ok(display_id) => Ok(display_id),
            Err(ScanEnd::TimedOut) => Err(AppError::new(
                ERR_DISPLAY_NOT_FOUND,
                format!(
                    "No virtual display reported within {}s",
                    self.timings.display_timeout.map(|t| t.as_secs()).unwrap_or_default()
                ),
                trace_id,
            )),
            Err(ScanEnd::StreamClosed) | Err(ScanEnd::Cancelled) => Err(AppError::display_not_found(
                "Mirroring process exited before reporting a virtual display",
                trace_id,
            )),
        }
    }

    /// Best-effort wait for the display to show up on the device; never fails the launch.
    fn await_readiness(&self, display_id: &str, trace_id: &str) {
        for attempt in 0..self.timings.readiness_attempts {
            match self.starter.display_ready(display_id, trace_id) {
                Ok(true) => return,
                Ok(false) => thread::sleep(self.timings.readiness_interval),
                Err(err) => {
                    warn!(trace_id = %trace_id, display_id = %display_id, error = %err, "display readiness check failed");
                    return;
                }
            }
            if attempt + 1 == self.timings.readiness_attempts {
                warn!(trace_id = %trace_id, display_id = %display_id, "display not reported ready, starting anyway");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    struct FakeMirror {
        pid: u32,
        output: Option<Box<dyn Iterator<Item = String> + Send>>,
        killed: Arc<AtomicBool>,
        released: Arc<AtomicBool>,
    }

    impl FakeMirror {
        fn new(lines: &[&str]) -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
            let owned: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
            Self::from_iter(Box::new(owned.into_iter()))
        }

        fn from_iter(
            output: Box<dyn Iterator<Item = String> + Send>,
        ) -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
            let killed = Arc::new(AtomicBool::new(false));
            let released = Arc::new(AtomicBool::new(false));
            (
                Self {
                    pid: 4242,
                    output: Some(output),
                    killed: Arc::clone(&killed),
                    released: Arc::clone(&released),
                },
                killed,
                released,
            )
        }
    }

    impl MirrorProcess for FakeMirror {
        fn pid(&self) -> u32 {
            self.pid
        }
        fn take_output(&mut self) -> Option<Box<dyn Iterator<Item = String> + Send>> {
            self.output.take()
        }
        fn kill(&mut self) -> io::Result<()> {
            self.killed.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default, Clone)]
    struct FakeStarter {
        calls: Arc<Mutex<Vec<(String, String, String)>>>,
        readiness_checks: Arc<AtomicU32>,
        ready_after: u32,
        fail: bool,
    }

    impl AppStarter for FakeStarter {
        fn start_on_display(
            &self,
            display_id: &str,
            shortcut_path: &str,
            package: &str,
            trace_id: &str,
        ) -> Result<(), AppError> {
            self.calls.lock().expect("calls").push((
                display_id.to_string(),
                shortcut_path.to_string(),
                package.to_string(),
            ));
            if self.fail {
                return Err(AppError::bridge("am start failed", trace_id));
            }
            Ok(())
        }

        fn display_ready(&self, _display_id: &str, _trace_id: &str) -> Result<bool, AppError> {
            let seen = self.readiness_checks.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(seen > self.ready_after)
        }
    }

    fn fast_timings() -> CompatTimings {
        CompatTimings {
            settle_delay: Duration::from_millis(1),
            display_timeout: Some(Duration::from_secs(5)),
            readiness_attempts: 3,
            readiness_interval: Duration::from_millis(1),
        }
    }

    fn orchestrator(starter: &FakeStarter, package: CompatPackage) -> CompatOrchestrator {
        CompatOrchestrator::new(
            "/storage/emulated/0/Download/Winlator/Frontend/Alan Wake.desktop",
            package,
            fast_timings(),
            Box::new(starter.clone()),
        )
    }

    #[test]
    fn resolved_display_drives_exactly_one_start_call() {
        let starter = FakeStarter::default();
        let (mirror, killed, released) =
            FakeMirror::new(&["INFO: Renderer: opengl", "...New display (id=3) created...", "INFO: late"]);

        let report = orchestrator(&starter, CompatPackage::Winlator)
            .run(|| Ok(Box::new(mirror) as Box<dyn MirrorProcess>), "trace");

        let launch = report.result.as_ref().expect("launch ok");
        assert_eq!(launch.display_id, "3");
        assert_eq!(launch.package, "com.winlator");
        let calls = starter.calls.lock().expect("calls").clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "3");
        assert!(calls[0].1.ends_with("Alan Wake.desktop"));
        assert!(!killed.load(Ordering::SeqCst));
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(
            report.history,
            vec![
                CompatState::Idle,
                CompatState::MirroringStarted { pid: 4242 },
                CompatState::DisplayResolved {
                    pid: 4242,
                    display_id: "3".to_string()
                },
                CompatState::AppStarted {
                    pid: 4242,
                    display_id: "3".to_string()
                },
            ]
        );
    }

    #[test]
    fn closed_stream_fails_and_kills_process() {
        let starter = FakeStarter::default();
        let (mirror, killed, _released) = FakeMirror::new(&["ERROR: Could not find any ADB device"]);

        let report = orchestrator(&starter, CompatPackage::Winlator)
            .run(|| Ok(Box::new(mirror) as Box<dyn MirrorProcess>), "trace-dn");

        let err = report.result.as_ref().expect_err("no display");
        assert_eq!(err.code, "ERR_DISPLAY_NOT_FOUND");
        assert_eq!(err.trace_id, "trace-dn");
        assert!(killed.load(Ordering::SeqCst));
        assert!(starter.calls.lock().expect("calls").is_empty());
        assert_eq!(
            report.final_state(),
            Some(&CompatState::Failed {
                code: "ERR_DISPLAY_NOT_FOUND".to_string()
            })
        );
    }

    #[test]
    fn silent_stream_times_out_as_display_not_found() {
        let starter = FakeStarter::default();
        let (tx, rx) = mpsc::channel::<String>();
        let (mirror, killed, _released) = FakeMirror::from_iter(Box::new(rx.into_iter()));
        let mut orchestrator = orchestrator(&starter, CompatPackage::Winlator);
        orchestrator.timings.display_timeout = Some(Duration::from_millis(100));

        let report = orchestrator.run(|| Ok(Box::new(mirror) as Box<dyn MirrorProcess>), "trace");
        drop(tx);
        assert!(report.result.as_ref().expect_err("timeout").is(ERR_DISPLAY_NOT_FOUND));
        assert!(killed.load(Ordering::SeqCst));
    }

    #[test]
    fn spawn_failure_fails_from_idle() {
        let starter = FakeStarter::default();
        let report = orchestrator(&starter, CompatPackage::Winlator).run(
            || Err(AppError::launch("scrcpy not found", "trace")),
            "trace",
        );
        assert_eq!(
            report.history,
            vec![
                CompatState::Idle,
                CompatState::Failed {
                    code: "ERR_LAUNCH".to_string()
                }
            ]
        );
    }

    #[test]
    fn bridge_failure_is_reported_without_killing_mirror() {
        let starter = FakeStarter {
            fail: true,
            ..FakeStarter::default()
        };
        let (mirror, killed, released) = FakeMirror::new(&["INFO: New display: 1920x1080/420 (id=9)"]);

        let report = orchestrator(&starter, CompatPackage::Ludashi)
            .run(|| Ok(Box::new(mirror) as Box<dyn MirrorProcess>), "trace");

        assert_eq!(report.result.as_ref().expect_err("bridge").code, "ERR_BRIDGE_COMMAND");
        assert!(!killed.load(Ordering::SeqCst));
        assert!(released.load(Ordering::SeqCst));
        let calls = starter.calls.lock().expect("calls").clone();
        assert_eq!(calls[0].2, "com.ludashi.benchmark");
        assert!(report.final_state().is_some_and(CompatState::is_terminal));
    }

    #[test]
    fn readiness_poll_is_bounded() {
        let starter = FakeStarter {
            ready_after: 100,
            ..FakeStarter::default()
        };
        let (mirror, _killed, _released) = FakeMirror::new(&["New display (id=2)"]);
        let report = orchestrator(&starter, CompatPackage::Winlator)
            .run(|| Ok(Box::new(mirror) as Box<dyn MirrorProcess>), "trace");
        assert!(report.result.is_ok());
        assert_eq!(starter.readiness_checks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn timings_follow_settings() {
        let timings = CompatTimings::from(&CompatSettings::default());
        assert_eq!(timings.settle_delay, Duration::from_millis(1000));
        assert_eq!(timings.display_timeout, Some(Duration::from_secs(30)));
        assert_eq!(CompatPackage::select(true), CompatPackage::Ludashi);
        assert_eq!(CompatPackage::select(false).package_name(), "com.winlator");
    }
}
