// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The event model: `Event<T>`, `EventStatus<T>`, `EventGroup<T>`, and `sync`.
//!
//! A base resource (channel, ivar, timer, ...) implements `BaseEvent<T>` and
//! is wrapped in an `Event<T>` via `Event::from_base`. Combinators in
//! `combinators.rs` build on top of `force`/`EventGroup` without needing to
//! know about any concrete resource.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::transaction::{IndexedSink, Sink, Transaction, NO_WINNER};

/// What a `BaseEvent::poll` returns.
///
/// `Enabled` means the leaf has already attempted (and won) the commit
/// against the `sink` it was handed — the leaf's value travels through the
/// sink/transaction rather than back out through this enum, so the same
/// code path serves both an immediate poll and a later asynchronous
/// register-then-commit. `priority` is the value `sync` ranked this leaf by
/// during its probe pass (see `Probe`); a resource whose readiness doesn't
/// carry a meaningful priority (most of them) always reports 0.
pub enum EventStatus<T> {
    Enabled { priority: u64 },
    Blocked(RegisterFn<T>),
}

/// What a `BaseEvent::poll_probe` returns: a read-only readiness check, used
/// by `sync` to rank every leaf of a `choose` before committing any of them.
pub enum Probe {
    Enabled { priority: u64 },
    Blocked,
}

/// Cancellation thunk returned by a register closure.
pub type Cancel = Box<dyn FnOnce() + Send>;

/// Links a transaction into a resource's waiter structure. Must not block,
/// perform I/O, or call `sync` — it may take the resource's lock, enqueue,
/// and return.
pub type RegisterFn<T> = Box<dyn FnOnce(Arc<dyn Sink<T>>) -> Cancel + Send>;

/// A base, resource-backed synchronization action.
pub trait BaseEvent<T>: Send + Sync {
    /// Check whether this leaf could fire right now, without mutating the
    /// resource's own state, matching an external partner, or touching any
    /// `Sink`. `sync` calls this on every leaf of a `choose` first, so it can
    /// compare `priority` across every simultaneously-ready branch before
    /// `poll` actually commits one of them (§3/§4.1: "pick the one with
    /// highest priority… ties broken by shuffle").
    fn poll_probe(&self) -> Probe;

    /// Actually attempt to fire, mutating the resource's own state and
    /// committing `sink` on success. `sync` only calls this on a leaf
    /// `poll_probe` already reported `Enabled` for, highest priority first;
    /// if the opportunity evaporated in the meantime (a racing thread got
    /// there first) this returns `Blocked` same as an ordinary miss, and
    /// `sync` moves on to the next-ranked candidate.
    fn poll(&self, sink: &Arc<dyn Sink<T>>) -> EventStatus<T>;
}

/// The forced tree of candidate sub-events for one `sync` call.
pub enum EventGroup<T> {
    Leaf(Arc<dyn BaseEvent<T>>),
    Nested(Vec<EventGroup<T>>),
    Nack {
        inner: Box<EventGroup<T>>,
        on_not_chosen: Arc<dyn Fn() + Send + Sync>,
    },
}

impl<T> EventGroup<T> {
    pub fn leaf(base: Arc<dyn BaseEvent<T>>) -> Self {
        EventGroup::Leaf(base)
    }
}

/// A first-class synchronization value. Events are plain data: they can be
/// passed, returned, stored, and composed without owning task identity.
pub struct Event<T> {
    force: Arc<dyn Fn() -> EventGroup<T> + Send + Sync>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Event {
            force: self.force.clone(),
        }
    }
}

impl<T: 'static> Event<T> {
    /// Build an event directly from a base resource poller.
    pub fn from_base(base: Arc<dyn BaseEvent<T>>) -> Self {
        Event {
            force: Arc::new(move || EventGroup::Leaf(base.clone())),
        }
    }

    /// Build an event from an arbitrary force thunk — the hook `guard` and
    /// the other combinators use to defer tree construction to force time.
    pub fn from_force<F>(force: F) -> Self
    where
        F: Fn() -> EventGroup<T> + Send + Sync + 'static,
    {
        Event {
            force: Arc::new(force),
        }
    }

    pub fn force(&self) -> EventGroup<T> {
        (self.force)()
    }
}

struct FlatLeaf<T> {
    base: Arc<dyn BaseEvent<T>>,
    nack_idx: Vec<usize>,
}

type Nacks = Vec<Arc<dyn Fn() + Send + Sync>>;

fn flatten<T>(group: EventGroup<T>) -> (Vec<FlatLeaf<T>>, Nacks) {
    let mut leaves = Vec::new();
    let mut nacks = Vec::new();
    let mut active = Vec::new();
    flatten_rec(group, &mut active, &mut nacks, &mut leaves);
    (leaves, nacks)
}

fn flatten_rec<T>(
    group: EventGroup<T>,
    active: &mut Vec<usize>,
    nacks: &mut Nacks,
    leaves: &mut Vec<FlatLeaf<T>>,
) {
    match group {
        EventGroup::Leaf(base) => leaves.push(FlatLeaf {
            base,
            nack_idx: active.clone(),
        }),
        EventGroup::Nested(children) => {
            for child in children {
                flatten_rec(child, active, nacks, leaves);
            }
        }
        EventGroup::Nack { inner, on_not_chosen } => {
            let idx = nacks.len();
            nacks.push(on_not_chosen);
            active.push(idx);
            flatten_rec(*inner, active, nacks, leaves);
            active.pop();
        }
    }
}

/// Fisher-Yates shuffle seeded from an address + the clock, same scheme
/// `select::select_recv` already uses for its fair permutation.
fn shuffled_indices(n: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    let seed = &indices as *const _ as u64;
    let mut rng = seed.wrapping_add(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64,
    );
    for i in (1..indices.len()).rev() {
        rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
        let j = (rng as usize) % (i + 1);
        indices.swap(i, j);
    }
    indices
}

/// Run the one-commit protocol: force, probe every leaf to rank the
/// simultaneously-ready ones by priority, commit the highest-ranked one,
/// register & park if nothing was ready, then clean up every non-chosen
/// branch.
pub fn sync<T: Send + 'static>(evt: &Event<T>) -> T {
    let group = evt.force();
    let (leaves, nacks) = flatten(group);

    crate::trace!("sync.begin", leaves = leaves.len());

    let tx: Arc<Transaction<T>> = Arc::new(Transaction::new());
    let sink: Arc<dyn Sink<T>> = tx.clone();

    let order = shuffled_indices(leaves.len());

    // Probe pass: a pure readiness check, so a leaf found later in the
    // shuffle but with a higher priority can still beat one found earlier.
    // Preserving shuffle order while collecting means a stable sort below
    // breaks ties by shuffle order, not by probe order.
    let mut ranked: Vec<(usize, u64)> = Vec::new();
    for &idx in &order {
        if let Probe::Enabled { priority } = leaves[idx].base.poll_probe() {
            ranked.push((idx, priority));
        }
    }
    ranked.sort_by_key(|&(_, priority)| std::cmp::Reverse(priority));

    let mut pending: Vec<Option<RegisterFn<T>>> = (0..leaves.len()).map(|_| None).collect();
    let mut tried: Vec<bool> = (0..leaves.len()).map(|_| false).collect();
    let mut winner: Option<usize> = None;

    // Commit pass: try the ranked candidates highest-priority first. A real
    // `poll` can still lose a race to a concurrent thread between the probe
    // and here (the matched partner got claimed elsewhere); treat that as a
    // miss and fall through to the next candidate instead of failing sync.
    for &(idx, _priority) in &ranked {
        tried[idx] = true;
        match leaves[idx].base.poll(&sink) {
            EventStatus::Enabled { .. } => {
                winner = Some(idx);
                break;
            }
            EventStatus::Blocked(reg) => {
                pending[idx] = Some(reg);
            }
        }
    }

    // Any leaf the probe pass didn't find ready still needs a real poll —
    // both to get its register closure and because it may have become
    // ready in the meantime.
    if winner.is_none() {
        for &idx in &order {
            if tried[idx] {
                continue;
            }
            match leaves[idx].base.poll(&sink) {
                EventStatus::Enabled { .. } => {
                    winner = Some(idx);
                    break;
                }
                EventStatus::Blocked(reg) => {
                    pending[idx] = Some(reg);
                }
            }
        }
    }

    let value = if let Some(winner_idx) = winner {
        crate::trace!("sync.commit_immediate", winner = winner_idx);
        fire_nacks_except(&nacks, &leaves[winner_idx].nack_idx);
        tx.park_for_value()
    } else {
        let winner_cell = Arc::new(AtomicUsize::new(NO_WINNER));
        let mut cancels: Vec<Option<Cancel>> = Vec::with_capacity(leaves.len());
        for (i, reg) in pending.into_iter().enumerate() {
            match reg {
                Some(reg) => {
                    let indexed: Arc<dyn Sink<T>> =
                        Arc::new(IndexedSink::new(sink.clone(), i, winner_cell.clone()));
                    cancels.push(Some(reg(indexed)));
                }
                None => cancels.push(None),
            }
        }

        crate::trace!("sync.registered", tag: "blocked");
        let value = tx.park_for_value();
        let winner_idx = winner_cell.load(Ordering::Acquire);
        crate::trace!("sync.commit_async", winner = winner_idx);

        for (i, cancel) in cancels.into_iter().enumerate() {
            if i != winner_idx {
                if let Some(c) = cancel {
                    crate::trace!("sync.cancel_leaf", leaf = i);
                    c();
                }
            }
        }
        if winner_idx != NO_WINNER {
            fire_nacks_except(&nacks, &leaves[winner_idx].nack_idx);
        } else {
            fire_nacks_except(&nacks, &[]);
        }
        value
    };

    value
}

fn fire_nacks_except(nacks: &Nacks, keep: &[usize]) {
    let keep: HashSet<usize> = keep.iter().copied().collect();
    for (idx, nack) in nacks.iter().enumerate() {
        if !keep.contains(&idx) {
            nack();
        }
    }
}

/// An event that is immediately enabled with `v`, always.
pub fn always<T: Clone + Send + Sync + 'static>(v: T) -> Event<T> {
    struct Always<T>(T);
    impl<T: Clone + Send + Sync> BaseEvent<T> for Always<T> {
        fn poll_probe(&self) -> Probe {
            Probe::Enabled { priority: 0 }
        }
        fn poll(&self, sink: &Arc<dyn Sink<T>>) -> EventStatus<T> {
            let _ = sink.try_commit(self.0.clone());
            EventStatus::Enabled { priority: 0 }
        }
    }
    Event::from_base(Arc::new(Always(v)))
}

/// An event that is never enabled and registers into no resource.
pub fn never<T: Send + Sync + 'static>() -> Event<T> {
    struct Never;
    impl<T: Send> BaseEvent<T> for Never {
        fn poll_probe(&self) -> Probe {
            Probe::Blocked
        }
        fn poll(&self, _sink: &Arc<dyn Sink<T>>) -> EventStatus<T> {
            EventStatus::Blocked(Box::new(|_sink| -> Cancel { Box::new(|| {}) }))
        }
    }
    Event::from_base(Arc::new(Never))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn always_syncs_immediately() {
        let evt = always(7);
        assert_eq!(sync(&evt), 7);
    }

    #[test]
    fn choose_always_over_never() {
        let a = never::<i32>();
        let b = always(9);
        let direct: Event<i32> = Event::from_force(move || EventGroup::Nested(vec![a.force(), b.force()]));
        assert_eq!(sync(&direct), 9);
    }

    #[test]
    fn with_nack_fires_on_non_chosen_branch() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let nacked_leaf: Event<i32> = {
            let never_leaf = never::<i32>();
            Event::from_force(move || EventGroup::Nack {
                inner: Box::new(never_leaf.force()),
                on_not_chosen: Arc::new({
                    let fired = fired2.clone();
                    move || fired.store(true, Ordering::SeqCst)
                }),
            })
        };
        let winner = always(5);
        let evt: Event<i32> = Event::from_force({
            let nacked = nacked_leaf.clone();
            let winner = winner.clone();
            move || EventGroup::Nested(vec![nacked.force(), winner.force()])
        });
        assert_eq!(sync(&evt), 5);
        assert!(fired.load(Ordering::SeqCst));
    }
}
