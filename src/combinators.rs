// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Event combinators: `wrap`, `guard`, `choose`, `with_nack`, `wrap_abort`,
//! `select`, `spawn_evt`, and the timer-backed `timeout`/`after`/`at_time`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::event::{BaseEvent, Cancel, Event, EventGroup, EventStatus, Probe, RegisterFn};
use crate::sync_vars::cvar::CVar;
use crate::transaction::{Sink, WrapSink};

/// Adapts a `BaseEvent<T>` into a `BaseEvent<U>` by applying `f: T -> U` at
/// commit time, via a `WrapSink` translation of whichever `Sink<U>` the
/// driver hands it. The same adapter serves both the immediate-poll path
/// (`poll`) and the later register-then-commit path (the closure returned
/// inside `Blocked`).
struct MappedBase<T, U, F> {
    inner: Arc<dyn BaseEvent<T>>,
    f: Arc<F>,
    _marker: std::marker::PhantomData<fn(T) -> U>,
}

impl<T, U, F> BaseEvent<U> for MappedBase<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    fn poll_probe(&self) -> Probe {
        // Readiness doesn't depend on `f` — only on the wrapped leaf.
        self.inner.poll_probe()
    }

    fn poll(&self, sink: &Arc<dyn Sink<U>>) -> EventStatus<U> {
        let f = self.f.clone();
        let translated: Arc<dyn Sink<T>> = Arc::new(WrapSink::new(sink.clone(), move |v: T| {
            let f = f.clone();
            (f)(v)
        }));
        match self.inner.poll(&translated) {
            EventStatus::Enabled { priority } => EventStatus::Enabled { priority },
            EventStatus::Blocked(reg) => {
                let f = self.f.clone();
                let wrapped: RegisterFn<U> = Box::new(move |sink_u: Arc<dyn Sink<U>>| -> Cancel {
                    let translated: Arc<dyn Sink<T>> =
                        Arc::new(WrapSink::new(sink_u, move |v: T| (f)(v)));
                    reg(translated)
                });
                EventStatus::Blocked(wrapped)
            }
        }
    }
}

fn map_group<T, U, F>(group: EventGroup<T>, f: Arc<F>) -> EventGroup<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    match group {
        EventGroup::Leaf(base) => EventGroup::Leaf(Arc::new(MappedBase {
            inner: base,
            f,
            _marker: std::marker::PhantomData,
        })),
        EventGroup::Nested(children) => EventGroup::Nested(
            children
                .into_iter()
                .map(|c| map_group(c, f.clone()))
                .collect(),
        ),
        EventGroup::Nack { inner, on_not_chosen } => EventGroup::Nack {
            inner: Box::new(map_group(*inner, f)),
            on_not_chosen,
        },
    }
}

/// `wrap(evt, f)` — the committed value is `f(evt.value)`. `f` is attributed
/// to the syncing call (it is what decides the sync's result), though it
/// may physically execute on whichever thread wins the commit race — the
/// syncing thread itself for an immediate poll, or the partnering
/// resource's thread for an asynchronous register-then-commit. A panicking
/// `f` poisons the transaction instead of silently dropping the result; the
/// panic re-raises on the syncing task's own `sync` call (see
/// `transaction::Transaction::try_commit_panic`).
pub fn wrap<T, U, F>(evt: Event<T>, f: F) -> Event<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Event::from_force(move || map_group(evt.force(), f.clone()))
}

/// `guard(thunk)` — defers constructing the sub-event until force time, so
/// it can read state current as of the `sync` call rather than as of
/// whenever the `Event` value was built. Runs on the syncing task, never
/// under a resource lock (§4.1).
pub fn guard<T, F>(thunk: F) -> Event<T>
where
    T: Send + 'static,
    F: Fn() -> Event<T> + Send + Sync + 'static,
{
    Event::from_force(move || thunk().force())
}

/// `choose([e1, .., en])` — a `Nested` group over each branch's forced
/// subgroup. At most one of them commits.
pub fn choose<T: Send + 'static>(events: Vec<Event<T>>) -> Event<T> {
    Event::from_force(move || EventGroup::Nested(events.iter().map(|e| e.force()).collect()))
}

/// `with_nack(body)` — allocates a fresh `CVar`, builds `body(nack_wait_evt)`,
/// and wraps the result under a `Nack` node bound to that cvar. If the
/// overall `sync` commits a branch outside this subgroup, the nack cvar is
/// `set!` during cleanup — the signal `wrap_abort` and nack-registered
/// cleanup tasks wait on.
pub fn with_nack<T, F>(body: F) -> Event<T>
where
    T: Send + 'static,
    F: Fn(Event<()>) -> Event<T> + Send + Sync + 'static,
{
    Event::from_force(move || {
        let nack = Arc::new(CVar::new());
        let inner = body(nack.wait_evt()).force();
        let nack_for_fire = nack.clone();
        EventGroup::Nack {
            inner: Box::new(inner),
            on_not_chosen: Arc::new(move || nack_for_fire.set_internal()),
        }
    })
}

/// Sugar over `with_nack`: spawns a task that waits on the nack and runs
/// `abort_fn` when the subgroup is not chosen.
pub fn wrap_abort<T, A>(evt: Event<T>, abort_fn: A) -> Event<T>
where
    T: Send + 'static,
    A: Fn() + Send + Sync + 'static,
{
    let abort_fn = Arc::new(abort_fn);
    with_nack(move |nack_wait| {
        let abort_fn = abort_fn.clone();
        crate::scheduler::spawn(move || {
            crate::event::sync(&nack_wait);
            abort_fn();
        })
        .detach();
        evt.clone()
    })
}

/// `select` over a fixed slice of events — sugar for `choose` when callers
/// already hold a `Vec`/slice rather than building it combinator-style.
pub fn select<T: Send + 'static>(events: Vec<Event<T>>) -> Event<T> {
    choose(events)
}

/// `spawn_evt(thunk)` — runs `thunk` on a fresh task, producing an `Event<T>`
/// that fires with the thunk's return value on completion. Built the same
/// way a CML future is always built atop this core: a write-once cell that
/// the spawned task fills, and whose `read_evt` is handed back as the
/// result event.
pub fn spawn_evt<T, F>(thunk: F) -> Event<T>
where
    T: Send + Sync + Clone + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let result = crate::sync_vars::ivar::IVar::new();
    let result_writer = result.clone();
    crate::scheduler::spawn(move || {
        let v = thunk();
        let _ = result_writer.put(v);
    })
    .detach();
    result.read_evt()
}

/// A one-shot timer event: fires with `()` after `duration` elapses.
pub fn timeout(duration: Duration) -> Event<()> {
    crate::timer::timer_evt(duration)
}

/// Sugar over `timeout`: fires `thunk()` after `duration` elapses.
pub fn after<T, F>(duration: Duration, thunk: F) -> Event<T>
where
    T: Send + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    wrap(timeout(duration), move |_| thunk())
}

/// A one-shot timer event firing at an absolute `Instant`.
pub fn at_time(instant: Instant) -> Event<()> {
    let now = Instant::now();
    let duration = instant.saturating_duration_since(now);
    timeout(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{always, never, sync};

    #[test]
    fn wrap_transforms_committed_value() {
        let evt = wrap(always(21), |n: i32| n * 2);
        assert_eq!(sync(&evt), 42);
    }

    #[test]
    fn guard_builds_lazily() {
        let built = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let built2 = built.clone();
        let evt = guard(move || {
            built2.store(true, std::sync::atomic::Ordering::SeqCst);
            always(1)
        });
        assert!(!built.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(sync(&evt), 1);
        assert!(built.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn choose_prefers_whichever_leaf_polls_enabled() {
        let evt = choose(vec![never::<i32>(), always(3)]);
        assert_eq!(sync(&evt), 3);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn wrap_panic_propagates_to_syncing_caller() {
        let evt = wrap(always(1), |_: i32| -> i32 { panic!("boom") });
        sync(&evt);
    }

    #[test]
    fn with_nack_signals_losing_subgroup() {
        let triggered = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let triggered2 = triggered.clone();
        let loser: Event<i32> = with_nack(move |nack_wait| {
            let triggered = triggered2.clone();
            std::thread::spawn(move || {
                sync(&nack_wait);
                triggered.store(true, std::sync::atomic::Ordering::SeqCst);
            });
            never::<i32>()
        });
        let evt = choose(vec![loser, always(99)]);
        assert_eq!(sync(&evt), 99);
        // Give the spawned nack-waiter a moment to observe the signal.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(triggered.load(std::sync::atomic::Ordering::SeqCst));
    }
}
