// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task identity and the completion registry behind `join_evt`.
//!
//! Grounded on `spawn.rs`'s `CANCEL_TOKEN` thread-local (the "what task am I"
//! pattern) and generalized into a small global registry so a task can be
//! joined as an `Event<()>` from anywhere that holds its `TaskId`, not just
//! from the `TaskHandle` `spawn` originally returned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::sync_vars::cvar::CVar;

/// Opaque task identity, unique for the process's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    fn fresh() -> Self {
        TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct Registry {
    completions: Mutex<HashMap<TaskId, Arc<CVar>>>,
}

static REGISTRY: Registry = Registry {
    completions: Mutex::new(HashMap::new()),
};

/// Register a fresh task identity and its completion signal. Called once
/// per `scheduler::spawn`.
pub(crate) fn register() -> (TaskId, Arc<CVar>) {
    let id = TaskId::fresh();
    let cvar = Arc::new(CVar::new());
    REGISTRY
        .completions
        .lock()
        .unwrap()
        .insert(id, cvar.clone());
    (id, cvar)
}

/// Mark `id` as finished and drop it from the registry. Any `join_evt(id)`
/// built before this point still fires (it holds its own `Arc<CVar>`); any
/// built after sees the task as already-finished, via `CVar::wait_evt`'s own
/// "already set" fast path.
pub(crate) fn complete(id: TaskId) {
    if let Some(cvar) = REGISTRY.completions.lock().unwrap().remove(&id) {
        cvar.set_internal();
    }
}

/// An event that fires once the task identified by `id` has finished.
/// Fires immediately if the task has already finished or was never known
/// (joining a bogus or already-reaped id is not an error — it is simply an
/// event that is always ready, matching "join a task that's already gone").
pub fn join_evt(id: TaskId) -> Event<()> {
    let cvar = REGISTRY.completions.lock().unwrap().get(&id).cloned();
    match cvar {
        Some(cvar) => cvar.wait_evt(),
        None => crate::event::always(()),
    }
}

thread_local! {
    static CURRENT: std::cell::Cell<Option<TaskId>> = std::cell::Cell::new(None);
}

pub(crate) fn set_current(id: TaskId) {
    CURRENT.with(|c| c.set(Some(id)));
}

/// The identity of the task running on this OS thread, if any (the main
/// thread and any thread not spawned through `scheduler::spawn` has none).
pub fn current_id() -> Option<TaskId> {
    CURRENT.with(|c| c.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_evt_on_unknown_id_fires_immediately() {
        let bogus = TaskId(u64::MAX);
        assert_eq!(crate::event::sync(&join_evt(bogus)), ());
    }

    #[test]
    fn register_then_complete_fires_join_evt() {
        let (id, _cvar) = register();
        let evt = join_evt(id);
        complete(id);
        assert_eq!(crate::event::sync(&evt), ());
    }
}
