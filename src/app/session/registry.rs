use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::models::Session;
use crate::app::session::probe::{ProcessProbe, SystemProcessProbe};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Table of launched mirroring sessions, reconciled against the OS on read.
///
/// Entries keep insertion order. Probing and signalling happen outside the table lock so a
/// slow process query never stalls concurrent registrations.
pub struct SessionRegistry {
    sessions: Mutex<Vec<Session>>,
    probe: Box<dyn ProcessProbe>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_probe(Box::new(SystemProcessProbe))
    }

    pub fn with_probe(probe: Box<dyn ProcessProbe>) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            probe,
        }
    }

    fn table(&self) -> MutexGuard<'_, Vec<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, session: Session) {
        let mut sessions = self.table();
        if let Some(existing) = sessions.iter_mut().find(|entry| entry.pid == session.pid) {
            warn!(pid = session.pid, previous = %existing.name, "replacing session with reused pid");
            *existing = session;
            return;
        }
        info!(pid = session.pid, name = %session.name, kind = %session.kind, "session registered");
        sessions.push(session);
    }

    /// Current table contents without consulting the OS.
    pub fn snapshot(&self) -> Vec<Session> {
        self.table().clone()
    }

    pub fn get(&self, pid: u32) -> Option<Session> {
        self.table().iter().find(|session| session.pid == pid).cloned()
    }

    pub fn remove(&self, pid: u32) -> Option<Session> {
        let mut sessions = self.table();
        let index = sessions.iter().position(|session| session.pid == pid)?;
        Some(sessions.remove(index))
    }

    fn is_live(&self, session: &Session) -> bool {
        self.probe
            .inspect(session.pid)
            .map(|info| info.matches(session))
            .unwrap_or(false)
    }

    /// Drops sessions whose process is gone or no longer the launched program, then returns
    /// the survivors.
    pub fn list_active(&self, trace_id: &str) -> Vec<Session> {
        let candidates = self.snapshot();
        let stale: Vec<(u32, String)> = candidates
            .iter()
            .filter(|session| !self.is_live(session))
            .map(|session| (session.pid, session.launch_token.clone()))
            .collect();
        if stale.is_empty() {
            return candidates;
        }

        let mut sessions = self.table();
        for (pid, token) in stale {
            // a re-registration under the same pid since the snapshot is a different session
            if let Some(index) = sessions
                .iter()
                .position(|entry| entry.pid == pid && entry.launch_token == token)
            {
                let removed = sessions.remove(index);
                info!(trace_id = %trace_id, pid = removed.pid, name = %removed.name, "dropping stale session");
            }
        }
        sessions.clone()
    }

    /// Graceful stop, escalating to a forced kill after `timeout`.
    ///
    /// A pid that is not running (or is no longer the launched program) counts as already
    /// terminated. The entry is kept only when the process survives the forced kill.
    pub fn terminate(&self, pid: u32, timeout: Duration, trace_id: &str) -> Result<(), AppError> {
        let Some(session) = self.get(pid) else {
            return Err(AppError::validation(format!("No tracked session with pid {pid}"), trace_id));
        };
        if !self.is_live(&session) {
            self.remove(pid);
            info!(trace_id = %trace_id, pid, "session already exited");
            return Ok(());
        }

        info!(trace_id = %trace_id, pid, name = %session.name, "terminating session");
        if let Err(err) = self.probe.terminate(pid) {
            warn!(trace_id = %trace_id, pid, error = %err, "graceful termination failed");
        }
        if !self.wait_for_exit(&session, timeout) {
            warn!(trace_id = %trace_id, pid, "session ignored termination, killing");
            self.probe
                .kill(pid)
                .map_err(|err| AppError::system(format!("Failed to kill pid {pid}: {err}"), trace_id))?;
            if !self.wait_for_exit(&session, timeout) {
                return Err(AppError::system(
                    format!("Process {pid} is still running after kill"),
                    trace_id,
                ));
            }
        }
        self.remove(pid);
        Ok(())
    }

    fn wait_for_exit(&self, session: &Session, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_live(session) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
