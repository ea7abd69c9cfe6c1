// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The scheduler interface: `spawn`, `yield_now`, `park`/`unpark`, `join_evt`,
//! `current_id`, cooperative cancellation.
//!
//! Every task still runs on its own OS thread (the teacher's Phase A
//! strategy, `spawn.rs`'s `rask_spawn`/`TaskHandle`) rather than atop a
//! work-stealing M:N pool; DESIGN.md records why the Phase-B `green/`
//! machinery was not carried forward. `TaskHandle` keeps the teacher's
//! affine join/detach/cancel shape and `JoinError` taxonomy unchanged; this
//! module adds a global `TaskId` (via `task.rs`) so a task can also be
//! joined as a CML `Event<()>` from anywhere, independent of which code
//! holds the `TaskHandle`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, Thread};

use crate::cancel::CancelToken;
use crate::task::TaskId;

pub use crate::task::{current_id, join_evt};

/// The only configurable knob (§9): worker-pool size. `0` means
/// auto-detect via `available_parallelism`, matching
/// `RuntimeContext::with_green_tasks(worker_count)`'s own convention.
/// Construction-time only — no config file, no env var.
static WORKER_COUNT: OnceLock<AtomicUsize> = OnceLock::new();

/// Set the worker-pool size hint. `0` resolves to
/// `std::thread::available_parallelism()`. Informational: every task still
/// runs on its own OS thread (see DESIGN.md on why a bounded M:N pool isn't
/// safe here, since a task body may block its worker for the duration of a
/// `sync` call), but `worker_threads()` reports this value for any caller
/// that wants to size its own work around it.
pub fn configure_workers(n: usize) {
    WORKER_COUNT
        .get_or_init(|| AtomicUsize::new(0))
        .store(n, Ordering::Release);
}

/// The configured worker-pool size, resolving `0`/unconfigured to
/// `available_parallelism()`.
pub fn worker_threads() -> usize {
    let configured = WORKER_COUNT
        .get_or_init(|| AtomicUsize::new(0))
        .load(Ordering::Acquire);
    if configured == 0 {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        configured
    }
}

/// Error returned by `join()` when the task failed.
#[derive(Debug)]
pub enum JoinError {
    Panicked(String),
    Cancelled,
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinError::Panicked(msg) => write!(f, "task panicked: {}", msg),
            JoinError::Cancelled => write!(f, "task was cancelled"),
        }
    }
}

impl std::error::Error for JoinError {}

/// Affine task handle. Must be consumed via `join()`, `detach()`, or
/// `cancel()` (dropping it unconsumed panics, same as the teacher's H1).
pub struct TaskHandle<T> {
    id: TaskId,
    handle: Mutex<Option<JoinHandle<Result<T, String>>>>,
    cancel_token: Arc<CancelToken>,
    consumed: AtomicBool,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn join(self) -> Result<T, JoinError> {
        self.consumed.store(true, Ordering::Release);
        let jh = self
            .handle
            .lock()
            .unwrap()
            .take()
            .expect("handle already consumed");
        match jh.join() {
            Ok(Ok(val)) => Ok(val),
            Ok(Err(msg)) => Err(JoinError::Panicked(msg)),
            Err(_) => Err(JoinError::Panicked("thread panicked".to_string())),
        }
    }

    /// Fire-and-forget. The task still registers its completion, so
    /// `join_evt(handle.id())` keeps working after `detach`.
    pub fn detach(self) {
        self.consumed.store(true, Ordering::Release);
        let _ = self.handle.lock().unwrap().take();
    }

    pub fn cancel(self) -> Result<T, JoinError> {
        self.consumed.store(true, Ordering::Release);
        self.cancel_token.cancel();
        let jh = self
            .handle
            .lock()
            .unwrap()
            .take()
            .expect("handle already consumed");
        match jh.join() {
            Ok(Ok(val)) => Ok(val),
            Ok(Err(_)) => Err(JoinError::Cancelled),
            Err(_) => Err(JoinError::Cancelled),
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if !self.consumed.load(Ordering::Acquire) && !std::thread::panicking() {
            panic!("TaskHandle dropped without being joined, detached, or cancelled");
        }
    }
}

/// Spawn a new task. Returns an affine `TaskHandle` that must be consumed.
pub fn spawn<T, F>(f: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let cancel_token = Arc::new(CancelToken::new());
    let token_clone = cancel_token.clone();
    let (id, completion) = crate::task::register();

    let handle = thread::spawn(move || {
        crate::task::set_current(id);
        REGISTERED_THREADS
            .lock()
            .unwrap()
            .insert(id, thread::current());
        CANCEL_TOKEN.with(|cell| {
            *cell.borrow_mut() = Some(token_clone);
        });
        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
            Ok(val) => Ok(val),
            Err(e) => {
                let msg = if let Some(s) = e.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = e.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                Err(msg)
            }
        };
        REGISTERED_THREADS.lock().unwrap().remove(&id);
        crate::task::complete(id);
        let _ = &completion; // kept alive until complete() fires it
        result
    });

    TaskHandle {
        id,
        handle: Mutex::new(Some(handle)),
        cancel_token,
        consumed: AtomicBool::new(false),
    }
}

/// Yield the current OS thread's timeslice.
pub fn yield_now() {
    thread::yield_now();
}

/// Park the current thread until `unpark` targets it (or spuriously — same
/// caveat as `std::thread::park`, callers re-check their own condition).
pub fn park() {
    thread::park();
}

/// Wake a parked task by id, if it is currently registered (alive and
/// spawned through `scheduler::spawn`). No-op otherwise.
pub fn unpark(id: TaskId) {
    if let Some(t) = REGISTERED_THREADS.lock().unwrap().get(&id) {
        t.unpark();
    }
}

/// Check if the current task has been cancelled.
pub fn cancelled() -> bool {
    CANCEL_TOKEN.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    })
}

thread_local! {
    static CANCEL_TOKEN: std::cell::RefCell<Option<Arc<CancelToken>>> =
        std::cell::RefCell::new(None);
}

static REGISTERED_THREADS: Mutex<HashMap<TaskId, Thread>> = Mutex::new(HashMap::new());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_workers_overrides_the_hint_then_resets_to_auto() {
        // Shares one process-wide knob with every other test, so this is
        // the only test touching it, exercised start to finish in one go.
        configure_workers(4);
        assert_eq!(worker_threads(), 4);
        configure_workers(0);
        assert!(worker_threads() >= 1);
    }

    #[test]
    fn spawn_and_join() {
        let h = spawn(|| 42);
        assert_eq!(h.join().unwrap(), 42);
    }

    #[test]
    fn spawn_and_detach() {
        let h = spawn(|| {
            std::thread::sleep(std::time::Duration::from_millis(10));
        });
        h.detach();
    }

    #[test]
    fn spawn_panic_returns_join_error() {
        let h = spawn(|| -> i32 { panic!("boom") });
        match h.join() {
            Err(JoinError::Panicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected Panicked, got {:?}", other),
        }
    }

    #[test]
    fn join_evt_fires_after_completion() {
        let h = spawn(|| 7);
        let id = h.id();
        h.detach();
        let evt = join_evt(id);
        assert_eq!(crate::event::sync(&evt), ());
    }

    #[test]
    fn cancel_sets_flag() {
        let h = spawn(|| {
            while !cancelled() {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            "done"
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        match h.cancel() {
            Ok(val) => assert_eq!(val, "done"),
            Err(JoinError::Cancelled) => {}
            Err(e) => panic!("unexpected: {:?}", e),
        }
    }
}
