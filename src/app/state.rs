use std::sync::Arc;

use crate::app::config::{ConfigPaths, SessionSettings};
use crate::app::scheduler::TaskScheduler;
use crate::app::session::registry::SessionRegistry;

/// Long-lived launcher state, created once at startup and shared by every command.
pub struct AppState {
    pub paths: ConfigPaths,
    pub registry: Arc<SessionRegistry>,
    pub scheduler: Arc<TaskScheduler>,
    /// Device pinned for this run, overriding the configured serial.
    pub device_serial: Option<String>,
}

impl AppState {
    pub fn new(paths: ConfigPaths) -> Self {
        Self::with_registry(paths, Arc::new(SessionRegistry::new()))
    }

    pub fn with_registry(paths: ConfigPaths, registry: Arc<SessionRegistry>) -> Self {
        Self {
            paths,
            registry,
            scheduler: Arc::new(TaskScheduler::new(SessionSettings::default().worker_limit)),
            device_serial: None,
        }
    }

    pub fn with_device_serial(mut self, serial: Option<String>) -> Self {
        self.device_serial = serial.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.scheduler = Arc::new(TaskScheduler::new(limit));
        self
    }
}
