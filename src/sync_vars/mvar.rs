// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `MVar<T>` — a single mutable slot (conc.sync-vars MV1-MV4).
//!
//! Unlike `IVar`, an `MVar` can be filled and drained repeatedly: `put`
//! blocks while the slot is full, `take` blocks while it is empty and
//! empties it, `get` blocks while empty but leaves the value in place, and
//! `swap` atomically takes the old value and installs a new one in its
//! place. All four transitions are decided under one lock (`settle`), the
//! same closure-everything-under-one-lock idiom `mutex.rs`/`shared.rs` use,
//! generalized from a plain guard to a queue of pending `Sink`s.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::event::{always, BaseEvent, Cancel, Event, EventStatus, Probe};
use crate::transaction::Sink;

struct State<T> {
    slot: Option<T>,
    takers: VecDeque<Arc<dyn Sink<T>>>,
    getters: VecDeque<Arc<dyn Sink<T>>>,
    putters: VecDeque<(T, Arc<dyn Sink<()>>)>,
    swappers: VecDeque<(T, Arc<dyn Sink<T>>)>,
}

/// Drive every pending party to a fixed point: fill from queued putters,
/// hand a full slot off to a swapper first (it leaves the slot full with
/// its own new value so the loop keeps going), then broadcast to getters,
/// then hand off to one taker, repeat while progress is made.
fn settle<T: Clone>(state: &mut State<T>) {
    loop {
        if let Some(v) = state.slot.clone() {
            let mut swapped = false;
            while let Some((new_v, sink)) = state.swappers.pop_front() {
                if sink.is_done() {
                    continue;
                }
                match sink.try_commit(v.clone()) {
                    Ok(()) => {
                        state.slot = Some(new_v);
                        swapped = true;
                        break;
                    }
                    Err(_) => continue,
                }
            }
            if swapped {
                continue;
            }

            state.getters.retain(|g| !g.is_done());
            for g in state.getters.drain(..) {
                let _ = g.try_commit(v.clone());
            }
            let mut consumed = false;
            while let Some(t) = state.takers.pop_front() {
                if t.is_done() {
                    continue;
                }
                match t.try_commit(v.clone()) {
                    Ok(()) => {
                        state.slot = None;
                        consumed = true;
                        break;
                    }
                    Err(_) => continue,
                }
            }
            if !consumed {
                return;
            }
        }
        // slot is empty here: try to fill from a queued putter.
        let mut filled = false;
        while let Some((val, sink)) = state.putters.pop_front() {
            if sink.is_done() {
                continue;
            }
            match sink.try_commit(()) {
                Ok(()) => {
                    state.slot = Some(val);
                    filled = true;
                    break;
                }
                Err(()) => continue,
            }
        }
        if !filled {
            return;
        }
    }
}

/// A single mutable synchronizing slot. Cheap to `Clone`.
pub struct MVar<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for MVar<T> {
    fn clone(&self) -> Self {
        MVar {
            state: self.state.clone(),
        }
    }
}

impl<T> MVar<T> {
    pub fn new_empty() -> Self {
        MVar {
            state: Arc::new(Mutex::new(State {
                slot: None,
                takers: VecDeque::new(),
                getters: VecDeque::new(),
                putters: VecDeque::new(),
                swappers: VecDeque::new(),
            })),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MVar<T> {
    pub fn new_full(v: T) -> Self {
        let m = Self::new_empty();
        m.state.lock().unwrap().slot = Some(v);
        m
    }

    pub fn put(&self, v: T) {
        crate::event::sync(&self.put_evt(v))
    }

    pub fn take(&self) -> T {
        crate::event::sync(&self.take_evt())
    }

    pub fn get(&self) -> T {
        crate::event::sync(&self.get_evt())
    }

    /// Atomically take the current value and install `v` in its place,
    /// blocking until the slot is full.
    pub fn swap(&self, v: T) -> T {
        crate::event::sync(&self.swap_evt(v))
    }

    pub fn put_evt(&self, v: T) -> Event<()> {
        struct Put<T> {
            state: Arc<Mutex<State<T>>>,
            v: Mutex<Option<T>>,
        }
        impl<T: Clone + Send + Sync + 'static> BaseEvent<()> for Put<T> {
            fn poll_probe(&self) -> Probe {
                if self.state.lock().unwrap().slot.is_none() {
                    Probe::Enabled { priority: 0 }
                } else {
                    Probe::Blocked
                }
            }
            fn poll(&self, sink: &Arc<dyn Sink<()>>) -> EventStatus<()> {
                let v = self.v.lock().unwrap().take().expect("polled twice");
                let mut state = self.state.lock().unwrap();
                if state.slot.is_none() && sink.try_commit(()).is_ok() {
                    state.slot = Some(v);
                    settle(&mut state);
                    return EventStatus::Enabled { priority: 0 };
                }
                drop(state);
                let state_h = self.state.clone();
                EventStatus::Blocked(Box::new(move |sink| -> Cancel {
                    let mut state = state_h.lock().unwrap();
                    state.putters.push_back((v, sink));
                    settle(&mut state);
                    let state_h2 = state_h.clone();
                    Box::new(move || {
                        let mut state = state_h2.lock().unwrap();
                        state.putters.retain(|(_, s)| !s.is_done());
                    })
                }))
            }
        }
        Event::from_base(Arc::new(Put {
            state: self.state.clone(),
            v: Mutex::new(Some(v)),
        }))
    }

    pub fn take_evt(&self) -> Event<T> {
        struct Take<T> {
            state: Arc<Mutex<State<T>>>,
        }
        impl<T: Clone + Send + Sync + 'static> BaseEvent<T> for Take<T> {
            fn poll_probe(&self) -> Probe {
                if self.state.lock().unwrap().slot.is_some() {
                    Probe::Enabled { priority: 0 }
                } else {
                    Probe::Blocked
                }
            }
            fn poll(&self, sink: &Arc<dyn Sink<T>>) -> EventStatus<T> {
                let mut state = self.state.lock().unwrap();
                if let Some(v) = state.slot.clone() {
                    if sink.try_commit(v).is_ok() {
                        state.slot = None;
                        settle(&mut state);
                        return EventStatus::Enabled { priority: 0 };
                    }
                }
                let state_h = self.state.clone();
                EventStatus::Blocked(Box::new(move |sink| -> Cancel {
                    let mut state = state_h.lock().unwrap();
                    state.takers.push_back(sink);
                    settle(&mut state);
                    let state_h2 = state_h.clone();
                    Box::new(move || {
                        let mut state = state_h2.lock().unwrap();
                        state.takers.retain(|s| !s.is_done());
                    })
                }))
            }
        }
        Event::from_base(Arc::new(Take {
            state: self.state.clone(),
        }))
    }

    pub fn get_evt(&self) -> Event<T> {
        if let Some(v) = self.state.lock().unwrap().slot.clone() {
            return always(v);
        }
        struct Get<T> {
            state: Arc<Mutex<State<T>>>,
        }
        impl<T: Clone + Send + Sync + 'static> BaseEvent<T> for Get<T> {
            fn poll_probe(&self) -> Probe {
                if self.state.lock().unwrap().slot.is_some() {
                    Probe::Enabled { priority: 0 }
                } else {
                    Probe::Blocked
                }
            }
            fn poll(&self, sink: &Arc<dyn Sink<T>>) -> EventStatus<T> {
                let mut state = self.state.lock().unwrap();
                if let Some(v) = state.slot.clone() {
                    let _ = sink.try_commit(v);
                    return EventStatus::Enabled { priority: 0 };
                }
                let state_h = self.state.clone();
                EventStatus::Blocked(Box::new(move |sink| -> Cancel {
                    let mut state = state_h.lock().unwrap();
                    state.getters.push_back(sink);
                    let state_h2 = state_h.clone();
                    Box::new(move || {
                        let mut state = state_h2.lock().unwrap();
                        state.getters.retain(|s| !s.is_done());
                    })
                }))
            }
        }
        Event::from_base(Arc::new(Get {
            state: self.state.clone(),
        }))
    }

    /// Atomically take the current value and install `v` in its place under
    /// one lock acquisition and one commit — unlike `swap`'s old `take` then
    /// `put` composition, no other party can observe or fill the slot while
    /// it is momentarily empty, because it never is.
    pub fn swap_evt(&self, v: T) -> Event<T> {
        struct Swap<T> {
            state: Arc<Mutex<State<T>>>,
            v: Mutex<Option<T>>,
        }
        impl<T: Clone + Send + Sync + 'static> BaseEvent<T> for Swap<T> {
            fn poll_probe(&self) -> Probe {
                if self.state.lock().unwrap().slot.is_some() {
                    Probe::Enabled { priority: 0 }
                } else {
                    Probe::Blocked
                }
            }
            fn poll(&self, sink: &Arc<dyn Sink<T>>) -> EventStatus<T> {
                let v = self.v.lock().unwrap().take().expect("polled twice");
                let mut state = self.state.lock().unwrap();
                if let Some(old) = state.slot.clone() {
                    if sink.try_commit(old).is_ok() {
                        state.slot = Some(v);
                        settle(&mut state);
                        return EventStatus::Enabled { priority: 0 };
                    }
                    // Our own transaction was already decided by a sibling
                    // branch; leave the slot untouched for the next poller.
                    return EventStatus::Blocked(Box::new(|_| -> Cancel { Box::new(|| {}) }));
                }
                let state_h = self.state.clone();
                EventStatus::Blocked(Box::new(move |sink| -> Cancel {
                    let mut state = state_h.lock().unwrap();
                    state.swappers.push_back((v, sink));
                    settle(&mut state);
                    let state_h2 = state_h.clone();
                    Box::new(move || {
                        let mut state = state_h2.lock().unwrap();
                        state.swappers.retain(|(_, s)| !s.is_done());
                    })
                }))
            }
        }
        Event::from_base(Arc::new(Swap {
            state: self.state.clone(),
            v: Mutex::new(Some(v)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::sync;

    #[test]
    fn put_then_take() {
        let m: MVar<i32> = MVar::new_empty();
        m.put(1);
        assert_eq!(m.take(), 1);
    }

    #[test]
    fn take_blocks_until_put() {
        let m: MVar<i32> = MVar::new_empty();
        let m2 = m.clone();
        let h = std::thread::spawn(move || m2.take());
        std::thread::sleep(std::time::Duration::from_millis(20));
        m.put(42);
        assert_eq!(h.join().unwrap(), 42);
    }

    #[test]
    fn put_blocks_until_slot_empty() {
        let m: MVar<i32> = MVar::new_full(1);
        let m2 = m.clone();
        let h = std::thread::spawn(move || {
            m2.put(2);
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(m.take(), 1);
        h.join().unwrap();
        assert_eq!(m.take(), 2);
    }

    #[test]
    fn get_does_not_consume() {
        let m: MVar<i32> = MVar::new_full(7);
        assert_eq!(m.get(), 7);
        assert_eq!(m.take(), 7);
    }

    #[test]
    fn swap_replaces_value() {
        let m: MVar<i32> = MVar::new_full(1);
        assert_eq!(m.swap(2), 1);
        assert_eq!(m.get(), 2);
    }

    /// Each concurrent `swap` must take exactly the value the previous one
    /// installed — no party can observe the slot empty in between, the way
    /// a `take` followed by a separate `put` would allow.
    #[test]
    fn swap_evt_is_atomic_under_concurrency() {
        let m: MVar<i32> = MVar::new_full(0);
        let n = 8;
        let handles: Vec<_> = (1..=n)
            .map(|i| {
                let m = m.clone();
                std::thread::spawn(move || m.swap(i))
            })
            .collect();
        let mut olds: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        olds.push(m.take());
        olds.sort();
        assert_eq!(olds, (0..=n).collect::<Vec<_>>());
    }

    #[test]
    fn choose_over_take_prefers_ready_slot() {
        let m: MVar<i32> = MVar::new_full(3);
        let never: Event<i32> = crate::event::never();
        let evt = crate::combinators::choose(vec![never, m.take_evt()]);
        assert_eq!(sync(&evt), 3);
    }
}
