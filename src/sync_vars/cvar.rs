// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `CVar` — a write-once broadcast signal (conc.sync-vars CV1-CV3).
//!
//! Every `wait_evt` fires the moment the cvar is `set`, including those
//! built after the set already happened (a signal, once raised, stays
//! raised). Used directly by `with_nack`/`wrap_abort`'s nack channel and by
//! `task.rs`'s task-completion registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::PutTwice;
use crate::event::{always, BaseEvent, Cancel, Event, EventStatus, Probe};
use crate::transaction::Sink;
use crate::waitqueue::WaitQueue;

struct Inner {
    signalled: AtomicBool,
    waiters: WaitQueue<()>,
}

/// A write-once broadcast signal.
#[derive(Clone)]
pub struct CVar {
    inner: Arc<Inner>,
}

impl CVar {
    pub fn new() -> Self {
        CVar {
            inner: Arc::new(Inner {
                signalled: AtomicBool::new(false),
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// Raise the signal. Errs with `PutTwice` if already raised (CV2).
    pub fn set(&self) -> Result<(), PutTwice> {
        if self.raise() {
            Ok(())
        } else {
            Err(PutTwice)
        }
    }

    /// Idempotent raise used by internal callers (`with_nack` cleanup,
    /// `task::complete`) that may race to fire the same cvar and don't care
    /// who wins.
    pub fn set_internal(&self) {
        self.raise();
    }

    fn raise(&self) -> bool {
        if self.inner.signalled.swap(true, Ordering::AcqRel) {
            return false;
        }
        for w in self.inner.waiters.drain_live() {
            let _ = w.try_commit(());
        }
        true
    }

    pub fn is_set(&self) -> bool {
        self.inner.signalled.load(Ordering::Acquire)
    }

    /// Block until `set`/`set_internal` is called.
    pub fn wait(&self) {
        crate::event::sync(&self.wait_evt())
    }

    /// An event that fires with `()` once this cvar is signalled.
    pub fn wait_evt(&self) -> Event<()> {
        if self.inner.signalled.load(Ordering::Acquire) {
            return always(());
        }
        struct Wait {
            inner: Arc<Inner>,
        }
        impl BaseEvent<()> for Wait {
            fn poll_probe(&self) -> Probe {
                if self.inner.signalled.load(Ordering::Acquire) {
                    Probe::Enabled { priority: 0 }
                } else {
                    Probe::Blocked
                }
            }
            fn poll(&self, sink: &Arc<dyn Sink<()>>) -> EventStatus<()> {
                if self.inner.signalled.load(Ordering::Acquire) {
                    let _ = sink.try_commit(());
                    return EventStatus::Enabled { priority: 0 };
                }
                let inner = self.inner.clone();
                EventStatus::Blocked(Box::new(move |sink| -> Cancel {
                    let id = inner.waiters.push(sink);
                    let inner = inner.clone();
                    Box::new(move || inner.waiters.remove(id))
                }))
            }
        }
        Event::from_base(Arc::new(Wait {
            inner: self.inner.clone(),
        }))
    }
}

impl Default for CVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::sync;

    #[test]
    fn set_twice_errs() {
        let c = CVar::new();
        assert!(c.set().is_ok());
        assert_eq!(c.set(), Err(PutTwice));
    }

    #[test]
    fn wait_evt_fires_after_set() {
        let c = CVar::new();
        let c2 = c.clone();
        let h = std::thread::spawn(move || sync(&c2.wait_evt()));
        std::thread::sleep(std::time::Duration::from_millis(20));
        c.set().unwrap();
        h.join().unwrap();
    }

    #[test]
    fn wait_evt_built_after_set_fires_immediately() {
        let c = CVar::new();
        c.set().unwrap();
        assert_eq!(sync(&c.wait_evt()), ());
    }
}
