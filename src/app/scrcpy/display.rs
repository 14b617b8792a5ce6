use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

/// Extracts the id from a scrcpy status line such as
/// `[server] INFO: New display: 1280x720/240 (id=3)`.
pub fn parse_display_id(line: &str) -> Option<String> {
    if !line.contains("New display") {
        return None;
    }
    let (_, rest) = line.split_once("id=")?;
    let id = rest.split(')').next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEnd {
    /// Output closed without a display line.
    StreamClosed,
    TimedOut,
    Cancelled,
}

/// Background scan of a line stream for the first virtual-display id.
///
/// The worker keeps draining the stream after a match so the child never blocks on a full
/// pipe; drained lines are only logged.
pub struct DisplayScan {
    result: Receiver<Option<String>>,
    cancelled: Arc<AtomicBool>,
}

impl DisplayScan {
    pub fn spawn<I>(lines: I, trace_id: &str) -> Self
    where
        I: IntoIterator<Item = String> + Send + 'static,
        I::IntoIter: Send,
    {
        let (tx, rx) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_worker = Arc::clone(&cancelled);
        let trace_id = trace_id.to_string();
        thread::spawn(move || {
            let mut pending = Some(tx);
            for line in lines {
                debug!(trace_id = %trace_id, line = %line.trim_end(), "scrcpy output");
                if cancelled_worker.load(Ordering::Relaxed) {
                    pending = None;
                    continue;
                }
                if let Some(id) = parse_display_id(&line) {
                    if let Some(tx) = pending.take() {
                        let _ = tx.send(Some(id));
                    }
                }
            }
            if let Some(tx) = pending {
                let _ = tx.send(None);
            }
        });
        Self {
            result: rx,
            cancelled,
        }
    }

    /// Blocks until a display id is found, the stream ends, or `timeout` expires.
    pub fn wait(self, timeout: Option<Duration>) -> Result<String, ScanEnd> {
        let outcome = match timeout {
            Some(limit) => match self.result.recv_timeout(limit) {
                Ok(value) => value,
                Err(RecvTimeoutError::Timeout) => {
                    self.cancel();
                    return Err(ScanEnd::TimedOut);
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.result.recv().unwrap_or(None),
        };
        match outcome {
            Some(id) => Ok(id),
            None if self.cancelled.load(Ordering::Relaxed) => Err(ScanEnd::Cancelled),
            None => Err(ScanEnd::StreamClosed),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}
