use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::warn;

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct GlobalSemaphore {
    limit: usize,
    used: Mutex<usize>,
    cv: Condvar,
}

impl GlobalSemaphore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            used: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn acquire(self: &Arc<Self>) -> GlobalPermit {
        let mut used = lock_recover(&self.used);
        while *used >= self.limit {
            used = self
                .cv
                .wait(used)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *used += 1;
        GlobalPermit {
            semaphore: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut used = lock_recover(&self.used);
        *used = used.saturating_sub(1);
        self.cv.notify_one();
    }
}

pub struct GlobalPermit {
    semaphore: Arc<GlobalSemaphore>,
}

impl Drop for GlobalPermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

type Completion = Box<dyn FnOnce() + Send>;

/// Worker-per-operation executor.
///
/// Each submitted operation runs on its own thread under the global cap (and the device lock,
/// when a serial is given). Completion callbacks are queued to one dispatcher thread, so they
/// run one at a time in the order the operations finished.
pub struct TaskScheduler {
    global: Arc<GlobalSemaphore>,
    device_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    completions: Mutex<Sender<Completion>>,
}

impl TaskScheduler {
    pub fn new(global_limit: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Completion>();
        let spawned = thread::Builder::new()
            .name("completion-dispatcher".to_string())
            .spawn(move || {
                for completion in rx {
                    completion();
                }
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to start completion dispatcher");
        }
        Self {
            global: Arc::new(GlobalSemaphore::new(global_limit)),
            device_locks: Mutex::new(HashMap::new()),
            completions: Mutex::new(tx),
        }
    }

    pub fn acquire_global(&self) -> GlobalPermit {
        self.global.acquire()
    }

    pub fn device_lock(&self, serial: &str) -> Arc<Mutex<()>> {
        let mut guard = lock_recover(&self.device_locks);
        guard
            .entry(serial.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `work` on a new worker and hands its result to `complete` on the dispatcher.
    pub fn submit<T, W, C>(&self, device: Option<&str>, work: W, complete: C) -> JoinHandle<()>
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let global = Arc::clone(&self.global);
        let device_lock = device
            .filter(|serial| !serial.is_empty())
            .map(|serial| self.device_lock(serial));
        let completions = lock_recover(&self.completions).clone();
        thread::spawn(move || {
            let value = {
                let _permit = global.acquire();
                let _device = device_lock.as_ref().map(|lock| lock_recover(lock));
                work()
            };
            if completions.send(Box::new(move || complete(value))).is_err() {
                warn!("completion dispatcher is gone, dropping result");
            }
        })
    }
}
