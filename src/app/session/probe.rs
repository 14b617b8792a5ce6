use std::io;

use crate::app::models::Session;

/// Program token a tracked process must carry in its name or command line.
pub const EXPECTED_PROGRAM: &str = "scrcpy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    Present(String),
    Absent,
    /// The OS does not expose the environment of the process.
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub command_line: String,
    pub launch_token: TokenState,
}

impl ProcessInfo {
    /// Whether this process is the one `session` was launched as.
    ///
    /// A readable launch token decides on its own; otherwise the process name or command
    /// line has to mention the mirroring program.
    pub fn matches(&self, session: &Session) -> bool {
        match &self.launch_token {
            TokenState::Present(token) => token == &session.launch_token,
            TokenState::Absent => false,
            TokenState::Unreadable => {
                let name = self.name.to_ascii_lowercase();
                let command_line = self.command_line.to_ascii_lowercase();
                name.contains(EXPECTED_PROGRAM) || command_line.contains(EXPECTED_PROGRAM)
            }
        }
    }
}

/// OS process inspection and signalling, swappable for tests.
pub trait ProcessProbe: Send + Sync {
    /// `None` when no live (non-zombie) process has this pid.
    fn inspect(&self, pid: u32) -> Option<ProcessInfo>;
    fn terminate(&self, pid: u32) -> io::Result<()>;
    fn kill(&self, pid: u32) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessProbe;

#[cfg(target_os = "linux")]
impl ProcessProbe for SystemProcessProbe {
    fn inspect(&self, pid: u32) -> Option<ProcessInfo> {
        let proc_dir = std::path::PathBuf::from(format!("/proc/{pid}"));
        let stat = std::fs::read_to_string(proc_dir.join("stat")).ok()?;
        if stat_state(&stat) == Some('Z') {
            return None;
        }
        let name = std::fs::read_to_string(proc_dir.join("comm"))
            .map(|comm| comm.trim().to_string())
            .unwrap_or_default();
        let command_line = std::fs::read(proc_dir.join("cmdline"))
            .map(|raw| split_nul(&raw).join(" "))
            .unwrap_or_default();
        let launch_token = match std::fs::read(proc_dir.join("environ")) {
            Ok(raw) => environ_token(&raw),
            Err(_) => TokenState::Unreadable,
        };
        Some(ProcessInfo {
            name,
            command_line,
            launch_token,
        })
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        send_signal(pid, nix::sys::signal::Signal::SIGTERM)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        send_signal(pid, nix::sys::signal::Signal::SIGKILL)
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
impl ProcessProbe for SystemProcessProbe {
    fn inspect(&self, pid: u32) -> Option<ProcessInfo> {
        use crate::app::adb::runner::run_command;

        let args = vec![
            "-o".to_string(),
            "stat=,comm=".to_string(),
            "-p".to_string(),
            pid.to_string(),
        ];
        let output = run_command("ps", &args, "process-probe").ok()?;
        let line = output.stdout.lines().find(|line| !line.trim().is_empty())?;
        let (state, name) = line.trim().split_once(char::is_whitespace)?;
        if state.starts_with('Z') {
            return None;
        }
        let args = vec!["-o".to_string(), "args=".to_string(), "-p".to_string(), pid.to_string()];
        let command_line = run_command("ps", &args, "process-probe")
            .map(|output| output.stdout.trim().to_string())
            .unwrap_or_default();
        Some(ProcessInfo {
            name: name.trim().to_string(),
            command_line,
            launch_token: TokenState::Unreadable,
        })
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        send_signal(pid, nix::sys::signal::Signal::SIGTERM)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        send_signal(pid, nix::sys::signal::Signal::SIGKILL)
    }
}

#[cfg(windows)]
impl ProcessProbe for SystemProcessProbe {
    fn inspect(&self, pid: u32) -> Option<ProcessInfo> {
        use crate::app::adb::runner::run_command;

        let args = vec![
            "/FI".to_string(),
            format!("PID eq {pid}"),
            "/FO".to_string(),
            "CSV".to_string(),
            "/NH".to_string(),
        ];
        let output = run_command("tasklist", &args, "process-probe").ok()?;
        let name = tasklist_image_name(&output.stdout, pid)?;
        Some(ProcessInfo {
            command_line: name.clone(),
            name,
            launch_token: TokenState::Unreadable,
        })
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        taskkill(pid, false)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        taskkill(pid, true)
    }
}

#[cfg(windows)]
fn taskkill(pid: u32, force: bool) -> io::Result<()> {
    use crate::app::adb::runner::run_command;

    let mut args = vec!["/PID".to_string(), pid.to_string()];
    if force {
        args.push("/F".to_string());
    }
    run_command("taskkill", &args, "process-probe")
        .map(|_| ())
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.error))
}

#[cfg(windows)]
fn tasklist_image_name(output: &str, pid: u32) -> Option<String> {
    let pid = pid.to_string();
    output.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(',').map(|field| field.trim().trim_matches('"')).collect();
        (fields.len() > 1 && fields[1] == pid).then(|| fields[0].to_string())
    })
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match nix::sys::signal::kill(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Process state letter from `/proc/<pid>/stat`; the comm field may itself contain `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn stat_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn split_nul(raw: &[u8]) -> Vec<String> {
    raw.split(|byte| *byte == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).to_string())
        .collect()
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn environ_token(raw: &[u8]) -> TokenState {
    let prefix = format!("{}=", crate::app::scrcpy::launcher::SESSION_TOKEN_ENV);
    split_nul(raw)
        .into_iter()
        .find_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
        .map(TokenState::Present)
        .unwrap_or(TokenState::Absent)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;

    use crate::app::models::SessionKind;

    /// In-memory process table. `stubborn` pids ignore SIGTERM.
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub processes: Mutex<HashMap<u32, ProcessInfo>>,
        pub stubborn: Mutex<Vec<u32>>,
        pub signals: Mutex<Vec<(u32, &'static str)>>,
    }

    impl FakeProbe {
        pub fn spawn(&self, pid: u32, info: ProcessInfo) {
            self.processes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(pid, info);
        }

        pub fn exit(&self, pid: u32) {
            self.processes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&pid);
        }

        pub fn signals(&self) -> Vec<(u32, &'static str)> {
            self.signals
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()
        }
    }

    impl ProcessProbe for FakeProbe {
        fn inspect(&self, pid: u32) -> Option<ProcessInfo> {
            self.processes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(&pid)
                .cloned()
        }

        fn terminate(&self, pid: u32) -> io::Result<()> {
            self.signals.lock().unwrap_or_else(|p| p.into_inner()).push((pid, "TERM"));
            let stubborn = self.stubborn.lock().unwrap_or_else(|p| p.into_inner()).contains(&pid);
            if !stubborn {
                self.exit(pid);
            }
            Ok(())
        }

        fn kill(&self, pid: u32) -> io::Result<()> {
            self.signals.lock().unwrap_or_else(|p| p.into_inner()).push((pid, "KILL"));
            self.exit(pid);
            Ok(())
        }
    }

    pub(crate) fn scrcpy_process(token: TokenState) -> ProcessInfo {
        ProcessInfo {
            name: "scrcpy".to_string(),
            command_line: "scrcpy --window-title=Game".to_string(),
            launch_token: token,
        }
    }

    pub(crate) fn session(pid: u32, token: &str) -> Session {
        Session {
            pid,
            name: format!("session-{pid}"),
            icon_path: None,
            argv: vec!["scrcpy".to_string()],
            kind: SessionKind::App,
            launch_token: token.to_string(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn token_decides_when_readable() {
        let session = session(10, "abc");
        assert!(scrcpy_process(TokenState::Present("abc".to_string())).matches(&session));
        assert!(!scrcpy_process(TokenState::Present("other".to_string())).matches(&session));
        assert!(!scrcpy_process(TokenState::Absent).matches(&session));

        let renamed = ProcessInfo {
            name: "wrapper".to_string(),
            command_line: "/opt/wrapper".to_string(),
            launch_token: TokenState::Present("abc".to_string()),
        };
        assert!(renamed.matches(&session));
    }

    #[test]
    fn name_or_command_line_used_without_token() {
        let session = session(10, "abc");
        assert!(scrcpy_process(TokenState::Unreadable).matches(&session));
        let by_command = ProcessInfo {
            name: "java".to_string(),
            command_line: "/usr/local/bin/SCRCPY --serial=x".to_string(),
            launch_token: TokenState::Unreadable,
        };
        assert!(by_command.matches(&session));
        let unrelated = ProcessInfo {
            name: "bash".to_string(),
            command_line: "bash -l".to_string(),
            launch_token: TokenState::Unreadable,
        };
        assert!(!unrelated.matches(&session));
    }

    #[test]
    fn parses_proc_stat_state() {
        assert_eq!(stat_state("1234 (scrcpy) S 1 1234 1234 0"), Some('S'));
        assert_eq!(stat_state("99 (odd) name)) Z 1 99"), Some('Z'));
        assert_eq!(stat_state("garbage"), None);
    }

    #[test]
    fn reads_token_from_environ_block() {
        let raw = b"HOME=/root\0SCRCPY_LAUNCHER_SESSION=tok-1\0PATH=/bin\0";
        assert_eq!(environ_token(raw), TokenState::Present("tok-1".to_string()));
        assert_eq!(environ_token(b"HOME=/root\0"), TokenState::Absent);
        assert_eq!(split_nul(b"scrcpy\0--fullscreen\0"), vec!["scrcpy", "--fullscreen"]);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn system_probe_sees_child_and_its_exit() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "sleep 5"])
            .env(crate::app::scrcpy::launcher::SESSION_TOKEN_ENV, "probe-token")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();
        let info = SystemProcessProbe.inspect(pid).expect("running");
        assert_eq!(info.launch_token, TokenState::Present("probe-token".to_string()));

        SystemProcessProbe.kill(pid).expect("kill");
        let _ = child.wait();
        assert!(SystemProcessProbe.inspect(pid).is_none());
    }
}
