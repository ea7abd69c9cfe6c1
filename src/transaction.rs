// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The transaction (pick) cell and the `Sink<T>` commit capability.
//!
//! Every `sync` call owns exactly one `Transaction<T>`. All leaves reachable
//! from that call share it (directly, or adapted through `wrap` via a
//! `Sink<T>`), and the CAS on its state is the one place that decides which
//! branch wins. The park/wake pair mirrors `spawn::TaskHandle`'s join
//! notification — a `Mutex<bool>` + `Condvar`, not a busy poll.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

const PENDING: u8 = 0;
const COMMITTED: u8 = 1;
const CANCELLED: u8 = 2;

/// What a parked syncing task finds once a transaction is committed.
enum Outcome<T> {
    Value(T),
    /// A `wrap`/`guard`/barrier-update body panicked while producing the
    /// committed value. The panic is re-raised on the syncing task rather
    /// than being swallowed on whichever thread ran the body (§7: "the
    /// panic propagates to the syncing caller").
    Panicked(String),
}

/// The atomic single-commit cell shared by every branch of one `sync` call.
pub struct Transaction<T> {
    state: AtomicU8,
    value: Mutex<Option<Outcome<T>>>,
    ready: Mutex<bool>,
    notify: Condvar,
}

impl<T> Transaction<T> {
    pub fn new() -> Self {
        Transaction {
            state: AtomicU8::new(PENDING),
            value: Mutex::new(None),
            ready: Mutex::new(false),
            notify: Condvar::new(),
        }
    }

    /// Atomically move pending -> committed, stash `v`, and wake the parked
    /// syncing task. `Err(v)` hands `v` back untouched when another branch
    /// already won — mirroring `channel::SendError<T>`, so a caller that
    /// loses the race never loses the value it was about to deliver.
    pub fn try_commit(&self, v: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(PENDING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.value.lock().unwrap() = Some(Outcome::Value(v));
            self.wake();
            crate::trace!("transaction.committed");
            Ok(())
        } else {
            Err(v)
        }
    }

    /// Commit with a poisoned outcome: the syncing task re-panics with `msg`
    /// instead of receiving a value. Used when a combinator body (`wrap`,
    /// `guard`, barrier `update`) panics after its branch already won.
    pub fn try_commit_panic(&self, msg: String) -> bool {
        if self
            .state
            .compare_exchange(PENDING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.value.lock().unwrap() = Some(Outcome::Panicked(msg));
            self.wake();
            crate::trace!("transaction.committed", tag: "panicked");
            true
        } else {
            false
        }
    }

    /// Atomically move pending -> cancelled. Used when a `sync` call's own
    /// immediate poll finds nothing and it is about to register instead, or
    /// when cleanup needs to foreclose further commits after a decision.
    pub fn try_cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            crate::trace!("transaction.cancelled");
        }
        cancelled
    }

    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    pub fn is_committed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMMITTED
    }

    fn wake(&self) {
        *self.ready.lock().unwrap() = true;
        self.notify.notify_all();
    }

    /// Park the calling thread until this transaction is committed, then
    /// take and return the stashed value. Panics if woken while still
    /// pending (cancelled-only wakeups never happen: only `try_commit`
    /// notifies).
    pub fn park_for_value(&self) -> T {
        let mut ready = self.ready.lock().unwrap();
        while !*ready {
            ready = self.notify.wait(ready).unwrap();
        }
        drop(ready);
        match self
            .value
            .lock()
            .unwrap()
            .take()
            .expect("committed transaction has no stashed value")
        {
            Outcome::Value(v) => v,
            Outcome::Panicked(msg) => panic!("{}", msg),
        }
    }
}

impl<T> Default for Transaction<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Commit capability, type-erased over the concrete value a leaf produces.
///
/// `wrap(evt, f)` changes the value type a leaf exposes to the rest of the
/// tree without changing which underlying `Transaction<T>` actually gets
/// committed — `Sink` is the seam that makes that possible: a root
/// `Transaction<U>` and a chain of `WrapSink` adapters all implement `Sink`
/// against whatever type each layer natively produces.
pub trait Sink<T>: Send + Sync {
    /// Attempt to commit the underlying transaction with `v`. `Err(v)`
    /// hands `v` back when another branch already won, so a losing caller
    /// never loses data it hasn't handed off yet.
    fn try_commit(&self, v: T) -> Result<(), T>;

    /// Commit with a poisoned outcome (a combinator body panicked). Returns
    /// `true` iff this call is the one that won.
    fn poison(&self, msg: String) -> bool;

    /// Has the underlying transaction already been decided (by anyone)?
    fn is_done(&self) -> bool;
}

impl<T: Send> Sink<T> for Transaction<T> {
    fn try_commit(&self, v: T) -> Result<(), T> {
        Transaction::try_commit(self, v)
    }

    fn poison(&self, msg: String) -> bool {
        Transaction::try_commit_panic(self, msg)
    }

    fn is_done(&self) -> bool {
        Transaction::is_done(self)
    }
}

/// Adapts a `Sink<U>` to a `Sink<T>` by running `f: T -> U` at commit time
/// (the `wrap` combinator). `f` runs on whichever thread wins the race to
/// commit — the resource's thread if registered-and-woken, or the syncing
/// task's own thread on an immediate poll.
pub struct WrapSink<T, U, F> {
    inner: std::sync::Arc<dyn Sink<U>>,
    f: F,
    _marker: std::marker::PhantomData<fn(T) -> U>,
}

impl<T, U, F> WrapSink<T, U, F>
where
    F: Fn(T) -> U + Send + Sync,
{
    pub fn new(inner: std::sync::Arc<dyn Sink<U>>, f: F) -> Self {
        WrapSink {
            inner,
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, U, F> Sink<T> for WrapSink<T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> U + Send + Sync,
{
    fn try_commit(&self, v: T) -> Result<(), T> {
        // `v` is only handed back intact if the transform hasn't run yet —
        // once `f` produces a `U` there is no way back to a `T`. Checking
        // `is_done` first covers every caller that matters: a resource
        // walking its own waiter queue only needs "did I win" before it has
        // committed to anything external, and during `sync`'s single-
        // threaded poll-once pass no other thread can hold this sink yet.
        // A truly concurrent loss in the narrow window after the check
        // (two leaves of the same wrapped `choose`, serviced by two
        // resources on two threads in the same instant) is a known, bounded
        // limitation — see DESIGN.md — rather than silent corruption.
        if self.inner.is_done() {
            return Err(v);
        }
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.f)(v))) {
            Ok(u) => self.inner.try_commit(u).map_err(|_| {
                panic!("wrap: lost a race between the is_done check and try_commit")
            }),
            Err(e) => {
                let msg = e
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| e.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "wrap body panicked".to_string());
                self.inner.poison(msg);
                Ok(())
            }
        }
    }

    fn poison(&self, msg: String) -> bool {
        self.inner.poison(msg)
    }

    fn is_done(&self) -> bool {
        self.inner.is_done()
    }
}

/// Per-leaf `Sink` wrapper that records which leaf index actually committed
/// the shared transaction, via `winner_cell`. `with_nack` cleanup needs to
/// know exactly which subgroup won so it can `set!` the nack cvar of every
/// *other* subgroup and run every other leaf's cancellation closure; since
/// external resources only ever see an `IndexedSink` (never the raw
/// `Transaction`), a resource can never commit outside a registered path.
pub struct IndexedSink<T> {
    inner: std::sync::Arc<dyn Sink<T>>,
    index: usize,
    winner_cell: std::sync::Arc<AtomicUsize>,
}

/// Sentinel meaning "no leaf has won yet".
pub const NO_WINNER: usize = usize::MAX;

impl<T> IndexedSink<T> {
    pub fn new(
        inner: std::sync::Arc<dyn Sink<T>>,
        index: usize,
        winner_cell: std::sync::Arc<AtomicUsize>,
    ) -> Self {
        IndexedSink {
            inner,
            index,
            winner_cell,
        }
    }
}

impl<T: Send> Sink<T> for IndexedSink<T> {
    fn try_commit(&self, v: T) -> Result<(), T> {
        match self.inner.try_commit(v) {
            Ok(()) => {
                self.winner_cell.store(self.index, Ordering::Release);
                Ok(())
            }
            Err(v) => Err(v),
        }
    }

    fn poison(&self, msg: String) -> bool {
        if self.inner.poison(msg) {
            self.winner_cell.store(self.index, Ordering::Release);
            true
        } else {
            false
        }
    }

    fn is_done(&self) -> bool {
        self.inner.is_done()
    }
}
