// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The timer service (conc.runtime TM1-TM8): one background driver thread
//! running a monotonic-clock loop against a binary min-heap keyed by
//! deadline.
//!
//! Grounded on `timeout.rs`'s thread-plus-channel race, but replaces one
//! thread per timer with a single driver thread and an adaptive
//! `Condvar::wait_timeout` sleep — the shape `spawn.rs`'s own lazily-started
//! worker pool uses for "don't spin up machinery until the first real use".

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::event::{BaseEvent, Cancel, Event, EventStatus, Probe};
use crate::transaction::Sink;

/// Identifies a scheduled timer for `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Diagnostics snapshot: `stats() → TimerStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStats {
    pub pending: usize,
    pub next_deadline: Option<Instant>,
}

struct Entry {
    id: TimerId,
    deadline: Instant,
    cancelled: AtomicBool,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Min-heap ordering by deadline only; ties are broken arbitrarily by the
/// heap, which is fine since `schedule` order among equal deadlines isn't
/// promised (§6.7 only promises d1 ≤ d2 ⇒ callback-1 no later than
/// callback-2).
struct HeapEntry(Arc<Entry>);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so `BinaryHeap` (a max-heap) pops the earliest deadline.
        other.0.deadline.cmp(&self.0.deadline)
    }
}

struct Driver {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    by_id: Mutex<HashMap<TimerId, Arc<Entry>>>,
    wake: Condvar,
}

impl Driver {
    fn new() -> Arc<Self> {
        let driver = Arc::new(Driver {
            heap: Mutex::new(BinaryHeap::new()),
            by_id: Mutex::new(HashMap::new()),
            wake: Condvar::new(),
        });
        let driver_thread = driver.clone();
        std::thread::Builder::new()
            .name("rask-timer".into())
            .spawn(move || driver_thread.run())
            .expect("failed to spawn timer driver thread");
        driver
    }

    fn schedule(self: &Arc<Self>, duration: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerId {
        let id = TimerId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            id,
            deadline: Instant::now() + duration,
            cancelled: AtomicBool::new(false),
            callback: Mutex::new(Some(callback)),
        });
        self.by_id.lock().unwrap().insert(id, entry.clone());
        let mut heap = self.heap.lock().unwrap();
        heap.push(HeapEntry(entry));
        drop(heap);
        // A new, possibly nearer, deadline may have just been pushed — wake
        // the driver so its sleep is recomputed rather than waiting out a
        // stale timeout.
        self.wake.notify_one();
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some(entry) = self.by_id.lock().unwrap().remove(&id) {
            entry.cancelled.store(true, Ordering::Release);
        }
    }

    fn stats(&self) -> TimerStats {
        let heap = self.heap.lock().unwrap();
        TimerStats {
            pending: heap.len(),
            next_deadline: heap.peek().map(|e| e.0.deadline),
        }
    }

    fn run(self: Arc<Self>) {
        let mut heap = self.heap.lock().unwrap();
        loop {
            match heap.peek() {
                None => {
                    heap = self.wake.wait(heap).unwrap();
                }
                Some(top) => {
                    let now = Instant::now();
                    if top.0.deadline <= now {
                        let HeapEntry(entry) = heap.pop().unwrap();
                        drop(heap);
                        self.by_id.lock().unwrap().remove(&entry.id);
                        if !entry.cancelled.load(Ordering::Acquire) {
                            if let Some(cb) = entry.callback.lock().unwrap().take() {
                                // A callback only ever `try_commit`s a transaction, but a
                                // poisoned transaction lock or a user `wrap` body run
                                // inline could still panic; the driver thread must survive
                                // it; a dead driver would silently strand every future
                                // `schedule`.
                                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(cb));
                            }
                        }
                        heap = self.heap.lock().unwrap();
                    } else {
                        let wait_for = top.0.deadline - now;
                        let (guard, _timeout_result) =
                            self.wake.wait_timeout(heap, wait_for).unwrap();
                        heap = guard;
                    }
                }
            }
        }
    }
}

fn driver() -> &'static Arc<Driver> {
    static DRIVER: OnceLock<Arc<Driver>> = OnceLock::new();
    DRIVER.get_or_init(Driver::new)
}

/// Enqueue a one-shot timer (TM4). The callback runs on the driver thread
/// and must be short — it should only `try_commit` a transaction.
pub fn schedule<F>(duration: Duration, callback: F) -> TimerId
where
    F: FnOnce() + Send + 'static,
{
    driver().schedule(duration, Box::new(callback))
}

/// Cancel a pending timer (TM4). O(1): flips a flag the driver checks when
/// the entry is popped. A no-op if the timer already fired or was already
/// cancelled.
pub fn cancel(id: TimerId) {
    driver().cancel(id);
}

/// Diagnostics only (TM4): pending count and the next deadline, if any.
pub fn stats() -> TimerStats {
    driver().stats()
}

/// A one-shot timer event: fires with `()` after `duration` elapses
/// (§4.1's `timeout(d)`). Always registers — a timer only becomes Enabled
/// once the driver thread pops its entry, strictly after any same-tick
/// immediate poll of sibling branches.
pub fn timer_evt(duration: Duration) -> Event<()> {
    struct Timer {
        duration: Duration,
    }
    impl BaseEvent<()> for Timer {
        fn poll_probe(&self) -> Probe {
            // A timer never fires from a probe: it only becomes enabled
            // once the driver thread pops its entry and commits directly,
            // strictly after any same-tick immediate poll of sibling
            // branches.
            Probe::Blocked
        }
        fn poll(&self, sink: &Arc<dyn Sink<()>>) -> EventStatus<()> {
            let duration = self.duration;
            EventStatus::Blocked(Box::new(move |sink| -> Cancel {
                let sink_for_fire = sink.clone();
                let id = schedule(duration, move || {
                    let _ = sink_for_fire.try_commit(());
                });
                Box::new(move || cancel(id))
            }))
        }
    }
    Event::from_base(Arc::new(Timer { duration }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::sync;

    #[test]
    fn timer_evt_fires_after_duration() {
        let start = Instant::now();
        sync(&timer_evt(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn cancel_prevents_callback() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let id = schedule(Duration::from_millis(20), move || {
            fired2.store(true, Ordering::SeqCst);
        });
        cancel(id);
        std::thread::sleep(Duration::from_millis(60));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn earlier_deadline_scheduled_after_still_fires_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        schedule(Duration::from_millis(100), move || o1.lock().unwrap().push(1));
        schedule(Duration::from_millis(20), move || o2.lock().unwrap().push(2));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn stats_reports_pending_and_next_deadline() {
        let before = stats().pending;
        let id = schedule(Duration::from_millis(50), || {});
        let mid = stats();
        assert!(mid.pending >= before + 1);
        assert!(mid.next_deadline.is_some());
        cancel(id);
    }

    #[test]
    fn choose_prefers_ready_branch_over_timer() {
        use crate::combinators::choose;
        use crate::event::always;
        let evt = choose(vec![always(1), timer_evt(Duration::from_millis(50))]);
        assert_eq!(sync(&evt), 1);
    }
}
