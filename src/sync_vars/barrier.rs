// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `Barrier<S>` — a dynamically-enrolled N-party barrier with a folded round
//! state (conc.sync-vars BR1-BR4).
//!
//! Every enrolled party calls `wait` once per round; once as many parties
//! are registered in the round's waiter queue as are enrolled, the party
//! that completes the queue runs the barrier's `update` closure over the
//! current state to produce the next round's state, and every party
//! (including itself) observes it. `enroll`/`resign` let the party count
//! change between rounds. If `update` panics, the round's state is left
//! unchanged, the party whose own `wait` call completed the round re-panics
//! with the original message at that same call, and every other waiter of
//! the round observes a plain `Err(BarrierUpdatePanicked)` instead. A round
//! completed by `resign` (no one's own `wait` call triggered it) delivers
//! the plain `Err` to everyone.
//!
//! The round's arrival count is simply the waiter queue's length, not a
//! separate counter — joining the queue is the only side effect `wait_evt`
//! has, and it is exactly what a cancellation closure undoes, so a losing
//! branch of a surrounding `choose` never leaves the barrier in a state an
//! un-chosen branch couldn't have produced by never synchronizing at all.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{BarrierMisuse, BarrierUpdatePanicked};
use crate::event::{BaseEvent, Cancel, Event, EventStatus, Probe};
use crate::transaction::Sink;

type Outcome<S> = Result<S, BarrierUpdatePanicked>;

struct Inner<S> {
    enrolled: usize,
    state: S,
    waiters: VecDeque<Arc<dyn Sink<Outcome<S>>>>,
}

struct Core<S> {
    inner: Mutex<Inner<S>>,
    update: Box<dyn Fn(&S) -> S + Send + Sync>,
}

/// Run `update` over the current state. Leaves `inner.state` untouched on
/// panic, returning the panic message instead — the caller decides how to
/// route it (the triggering task's own `sync` re-panics with it via
/// `Sink::poison`; every other waiter just gets `BarrierUpdatePanicked`).
fn run_update<S: Clone>(inner: &mut Inner<S>, core: &Core<S>) -> Result<S, String> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (core.update)(&inner.state))) {
        Ok(new_state) => {
            inner.state = new_state.clone();
            Ok(new_state)
        }
        Err(e) => {
            let msg = e
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| e.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "barrier update panicked".to_string());
            Err(msg)
        }
    }
}

/// Deliver a round's result. `trigger`, if given, is the sink of the party
/// whose own arrival completed the round — on a panic it gets `poison`ed so
/// the panic re-raises at its own `wait()` call (§7/§10: the triggering
/// task's panic propagates to itself); every other waiter just observes
/// `Err(BarrierUpdatePanicked)`. `resign`-triggered completions pass no
/// trigger at all, since no party's own `sync` call caused them — everyone
/// (there is no "self" to single out) gets the distinguished error.
fn deliver<S: Clone + Send + Sync + 'static>(
    result: Result<S, String>,
    trigger: Option<&Arc<dyn Sink<Outcome<S>>>>,
    others: Vec<Arc<dyn Sink<Outcome<S>>>>,
) {
    match result {
        Ok(state) => {
            if let Some(t) = trigger {
                let _ = t.try_commit(Ok(state.clone()));
            }
            for w in others {
                if !w.is_done() {
                    let _ = w.try_commit(Ok(state.clone()));
                }
            }
        }
        Err(msg) => {
            if let Some(t) = trigger {
                t.poison(msg);
            }
            for w in others {
                if !w.is_done() {
                    let _ = w.try_commit(Err(BarrierUpdatePanicked));
                }
            }
        }
    }
}

/// If the round's queue is now exactly as large as `enrolled`, complete it:
/// run `update` and deliver the outcome to every waiter, routing a panic to
/// `trigger` (if any) as a real re-raised panic rather than a plain `Err`.
fn try_complete_round<S: Clone + Send + Sync + 'static>(
    core: &Arc<Core<S>>,
    trigger: Option<&Arc<dyn Sink<Outcome<S>>>>,
) {
    let mut inner = core.inner.lock().unwrap();
    if inner.enrolled == 0 || inner.waiters.len() != inner.enrolled {
        return;
    }
    let result = run_update(&mut inner, core);
    let waiters: Vec<_> = inner.waiters.drain(..).collect();
    drop(inner);
    let others: Vec<_> = match trigger {
        Some(t) => waiters.into_iter().filter(|w| !Arc::ptr_eq(w, t)).collect(),
        None => waiters,
    };
    deliver(result, trigger, others);
}

/// Error surface for `Enrollment::wait`: either a protocol misuse or a
/// propagated `update` panic.
#[derive(Debug)]
pub enum WaitError {
    Misuse(BarrierMisuse),
    UpdatePanicked(BarrierUpdatePanicked),
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Misuse(e) => write!(f, "{}", e),
            WaitError::UpdatePanicked(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for WaitError {}

/// A dynamically-enrolled barrier folding a shared round state `S`.
pub struct Barrier<S> {
    core: Arc<Core<S>>,
}

impl<S> Clone for Barrier<S> {
    fn clone(&self) -> Self {
        Barrier {
            core: self.core.clone(),
        }
    }
}

impl<S: Clone + Send + Sync + 'static> Barrier<S> {
    pub fn new<F>(initial: S, update: F) -> Self
    where
        F: Fn(&S) -> S + Send + Sync + 'static,
    {
        Barrier {
            core: Arc::new(Core {
                inner: Mutex::new(Inner {
                    enrolled: 0,
                    state: initial,
                    waiters: VecDeque::new(),
                }),
                update: Box::new(update),
            }),
        }
    }

    /// Add a new party. Returns a handle it uses to `wait`/`resign`.
    pub fn enroll(&self) -> Enrollment<S> {
        self.core.inner.lock().unwrap().enrolled += 1;
        Enrollment {
            core: self.core.clone(),
            waiting: std::sync::atomic::AtomicBool::new(false),
            resigned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// The current round's state, without waiting.
    pub fn value(&self) -> S {
        self.core.inner.lock().unwrap().state.clone()
    }
}

/// One party's handle into a `Barrier`.
pub struct Enrollment<S> {
    core: Arc<Core<S>>,
    waiting: std::sync::atomic::AtomicBool,
    resigned: std::sync::atomic::AtomicBool,
}

impl<S: Clone + Send + Sync + 'static> Enrollment<S> {
    /// Block until every enrolled party has called `wait` this round,
    /// returning the new folded state (BR2).
    pub fn wait(&self) -> Result<S, WaitError> {
        if self.resigned.load(std::sync::atomic::Ordering::Acquire) {
            return Err(WaitError::Misuse(BarrierMisuse::WaitAfterResign));
        }
        if self
            .waiting
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return Err(WaitError::Misuse(BarrierMisuse::AlreadyWaiting));
        }
        let result = crate::event::sync(&self.wait_evt());
        self.waiting
            .store(false, std::sync::atomic::Ordering::Release);
        result.map_err(WaitError::UpdatePanicked)
    }

    /// The CML event form of `wait`.
    pub fn wait_evt(&self) -> Event<Outcome<S>> {
        struct Wait<S> {
            core: Arc<Core<S>>,
        }
        impl<S: Clone + Send + Sync + 'static> BaseEvent<Outcome<S>> for Wait<S> {
            fn poll_probe(&self) -> Probe {
                let inner = self.core.inner.lock().unwrap();
                if inner.enrolled > 0 && inner.waiters.len() + 1 == inner.enrolled {
                    Probe::Enabled { priority: 0 }
                } else {
                    Probe::Blocked
                }
            }

            fn poll(&self, sink: &Arc<dyn Sink<Outcome<S>>>) -> EventStatus<Outcome<S>> {
                let core = self.core.clone();
                let mut inner = core.inner.lock().unwrap();
                let would_complete =
                    inner.enrolled > 0 && inner.waiters.len() + 1 == inner.enrolled;
                if would_complete {
                    let result = run_update(&mut inner, &core);
                    let others: Vec<_> = inner.waiters.drain(..).collect();
                    drop(inner);
                    deliver(result, Some(sink), others);
                    return EventStatus::Enabled { priority: 0 };
                }
                drop(inner);
                let core = self.core.clone();
                EventStatus::Blocked(Box::new(move |sink: Arc<dyn Sink<Outcome<S>>>| -> Cancel {
                    core.inner.lock().unwrap().waiters.push_back(sink.clone());
                    try_complete_round(&core, Some(&sink));
                    let core = core.clone();
                    let sink = sink.clone();
                    Box::new(move || {
                        let mut inner = core.inner.lock().unwrap();
                        if let Some(pos) = inner.waiters.iter().position(|w| Arc::ptr_eq(w, &sink))
                        {
                            inner.waiters.remove(pos);
                        }
                    })
                }))
            }
        }
        Event::from_base(Arc::new(Wait {
            core: self.core.clone(),
        }))
    }

    /// Leave the barrier, shrinking the enrolled count (BR3). Errs if a
    /// `wait` on this enrollment is still pending.
    pub fn resign(&self) -> Result<(), BarrierMisuse> {
        if self.waiting.load(std::sync::atomic::Ordering::Acquire) {
            return Err(BarrierMisuse::ResignWhileWaiting);
        }
        if self
            .resigned
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return Ok(());
        }
        {
            let mut inner = self.core.inner.lock().unwrap();
            inner.enrolled = inner.enrolled.saturating_sub(1);
        }
        try_complete_round(&self.core, None);
        Ok(())
    }

    pub fn value(&self) -> S {
        self.core.inner.lock().unwrap().state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_parties_release_together() {
        let b: Barrier<i32> = Barrier::new(0, |s| s + 1);
        let e1 = b.enroll();
        let e2 = b.enroll();
        let h = std::thread::spawn(move || e1.wait());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(e2.wait().unwrap(), 1);
        assert_eq!(h.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn resign_can_complete_a_pending_round() {
        let b: Barrier<i32> = Barrier::new(0, |s| s + 1);
        let e1 = b.enroll();
        let e2 = b.enroll();
        let h = std::thread::spawn(move || e1.wait());
        std::thread::sleep(std::time::Duration::from_millis(20));
        e2.resign().unwrap();
        assert_eq!(h.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn wait_after_resign_is_misuse() {
        let b: Barrier<i32> = Barrier::new(0, |s| *s);
        let e1 = b.enroll();
        e1.resign().unwrap();
        match e1.wait() {
            Err(WaitError::Misuse(BarrierMisuse::WaitAfterResign)) => {}
            other => panic!("expected WaitAfterResign, got {:?}", other),
        }
    }

    #[test]
    fn update_panic_reports_to_other_waiters() {
        let b: Barrier<i32> = Barrier::new(0, |_| panic!("round blew up"));
        let e1 = b.enroll();
        let e2 = b.enroll();
        // e1 registers asynchronously and waits for the round to complete.
        let h = std::thread::spawn(move || e1.wait());
        std::thread::sleep(std::time::Duration::from_millis(20));
        // e2's own `wait` call is the one whose arrival completes the round
        // and runs `update` — its own panic must re-raise right here.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| e2.wait()));
        assert!(result.is_err(), "triggering wait() should itself panic");
        match h.join().unwrap() {
            Err(WaitError::UpdatePanicked(BarrierUpdatePanicked)) => {}
            other => panic!("expected UpdatePanicked, got {:?}", other),
        }
    }
}
