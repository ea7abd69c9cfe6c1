// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `IVar<T>` — a write-once cell (conc.sync-vars IV1-IV3).
//!
//! The building block `spawn_evt` and `task::join_evt` are both made of: a
//! cell a single writer fills once, whose readers (there may be any number,
//! each getting its own clone) can block on it as an event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::PutTwice;
use crate::event::{always, BaseEvent, Cancel, Event, EventStatus, Probe};
use crate::transaction::Sink;
use crate::waitqueue::WaitQueue;

struct Inner<T> {
    value: Mutex<Option<T>>,
    filled: AtomicBool,
    waiters: WaitQueue<T>,
}

/// A write-once cell. Cheap to `Clone` — clones share the same cell.
pub struct IVar<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for IVar<T> {
    fn clone(&self) -> Self {
        IVar {
            inner: self.inner.clone(),
        }
    }
}

impl<T> IVar<T> {
    pub fn new() -> Self {
        IVar {
            inner: Arc::new(Inner {
                value: Mutex::new(None),
                filled: AtomicBool::new(false),
                waiters: WaitQueue::new(),
            }),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.inner.filled.load(Ordering::Acquire)
    }
}

impl<T: Clone + Send + Sync + 'static> IVar<T> {
    /// Fill the cell. Errs with `PutTwice` if already filled (IV2).
    pub fn put(&self, v: T) -> Result<(), PutTwice> {
        let mut guard = self.inner.value.lock().unwrap();
        if guard.is_some() {
            return Err(PutTwice);
        }
        *guard = Some(v.clone());
        drop(guard);
        self.inner.filled.store(true, Ordering::Release);
        for w in self.inner.waiters.drain_live() {
            let _ = w.try_commit(v.clone());
        }
        Ok(())
    }

    /// Non-blocking read: `Some(v)` if already filled, else `None`.
    pub fn read_poll(&self) -> Option<T> {
        self.inner.value.lock().unwrap().clone()
    }

    /// Block until filled, then return a clone of the value.
    pub fn read(&self) -> T {
        crate::event::sync(&self.read_evt())
    }

    /// An event that fires with a clone of the value once filled.
    pub fn read_evt(&self) -> Event<T> {
        if let Some(v) = self.read_poll() {
            return always(v);
        }
        struct Read<T> {
            inner: Arc<Inner<T>>,
        }
        impl<T: Clone + Send + Sync + 'static> BaseEvent<T> for Read<T> {
            fn poll_probe(&self) -> Probe {
                if self.inner.filled.load(Ordering::Acquire) {
                    Probe::Enabled { priority: 0 }
                } else {
                    Probe::Blocked
                }
            }
            fn poll(&self, sink: &Arc<dyn Sink<T>>) -> EventStatus<T> {
                if let Some(v) = self.inner.value.lock().unwrap().clone() {
                    let _ = sink.try_commit(v);
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
        Event::from_base(Arc::new(Read {
            inner: self.inner.clone(),
        }))
    }
}

impl<T: Clone + Send + Sync + 'static> Default for IVar<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::sync;

    #[test]
    fn put_then_read() {
        let v: IVar<i32> = IVar::new();
        v.put(5).unwrap();
        assert_eq!(v.read(), 5);
        assert_eq!(v.put(6), Err(PutTwice));
    }

    #[test]
    fn read_evt_blocks_until_put() {
        let v: IVar<i32> = IVar::new();
        let v2 = v.clone();
        let h = std::thread::spawn(move || sync(&v2.read_evt()));
        std::thread::sleep(std::time::Duration::from_millis(20));
        v.put(9).unwrap();
        assert_eq!(h.join().unwrap(), 9);
    }

    #[test]
    fn multiple_readers_all_see_the_value() {
        let v: IVar<i32> = IVar::new();
        v.put(1).unwrap();
        assert_eq!(v.read(), 1);
        assert_eq!(v.read(), 1);
    }
}
