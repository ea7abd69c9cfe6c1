// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! FIFO waiter queue shared by the sync-vars and by `Channel<T>`.
//!
//! Every resource that can block a `sync` call (ivar readers, mvar takers,
//! cvar waiters, mailbox receivers, barrier parties, channel partners) keeps
//! its waiters in one of these. Grounded on the same shape as the teacher's
//! `green/queue.rs` local queue (a `Mutex`-protected `VecDeque`), generalized
//! from "queue of runnable tasks" to "queue of pending `Sink`s" per
//! DESIGN.md's design notes.
//!
//! `offer` is what makes the `Sink::try_commit -> Result<(), T>` refactor
//! pay off: a value that a front waiter refuses (already decided elsewhere)
//! is retried against the next waiter instead of being dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::transaction::Sink;

struct Waiter<T> {
    id: u64,
    sink: Arc<dyn Sink<T>>,
}

/// A FIFO queue of parties waiting to exchange a value of type `T`.
pub struct WaitQueue<T> {
    next_id: Mutex<u64>,
    waiters: Mutex<VecDeque<Waiter<T>>>,
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        WaitQueue {
            next_id: Mutex::new(0),
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue a waiter, returning an id `remove` can use to cancel it.
    pub fn push(&self, sink: Arc<dyn Sink<T>>) -> u64 {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        self.waiters.lock().unwrap().push_back(Waiter { id, sink });
        id
    }

    /// Remove a waiter by id, e.g. from a `sync` cancellation closure for a
    /// leaf that did not win. No-op if it already left the queue (it was
    /// already handed a value, or already removed).
    pub fn remove(&self, id: u64) {
        self.waiters.lock().unwrap().retain(|w| w.id != id);
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }

    /// Offer `v` to waiters front-to-back until one of them actually commits
    /// it, dropping stale waiters (already decided elsewhere) along the way.
    /// Returns the value back if the whole queue refuses it.
    pub fn offer(&self, mut v: T) -> Result<(), T> {
        loop {
            let next = self.waiters.lock().unwrap().pop_front();
            let waiter = match next {
                Some(w) => w,
                None => return Err(v),
            };
            if waiter.sink.is_done() {
                continue;
            }
            match waiter.sink.try_commit(v) {
                Ok(()) => return Ok(()),
                Err(back) => {
                    v = back;
                    continue;
                }
            }
        }
    }

    /// Pop the first live (not-yet-decided) waiter without offering a value,
    /// e.g. for a barrier round that needs to notify every party at once.
    pub fn drain_live(&self) -> Vec<Arc<dyn Sink<T>>> {
        let mut waiters = self.waiters.lock().unwrap();
        let drained: Vec<Waiter<T>> = waiters.drain(..).collect();
        drained
            .into_iter()
            .filter(|w| !w.sink.is_done())
            .map(|w| w.sink)
            .collect()
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;

    #[test]
    fn offer_skips_already_decided_waiter() {
        let q: WaitQueue<i32> = WaitQueue::new();
        let tx1: Arc<Transaction<i32>> = Arc::new(Transaction::new());
        let tx2: Arc<Transaction<i32>> = Arc::new(Transaction::new());
        tx1.try_commit(999).unwrap(); // tx1 already decided elsewhere
        q.push(tx1.clone());
        q.push(tx2.clone());
        assert!(q.offer(5).is_ok());
        assert_eq!(tx2.park_for_value(), 5);
    }

    #[test]
    fn offer_returns_value_when_queue_empty() {
        let q: WaitQueue<i32> = WaitQueue::new();
        assert_eq!(q.offer(7), Err(7));
    }

    #[test]
    fn remove_forecloses_a_waiter() {
        let q: WaitQueue<i32> = WaitQueue::new();
        let tx: Arc<Transaction<i32>> = Arc::new(Transaction::new());
        let id = q.push(tx.clone());
        q.remove(id);
        assert!(q.is_empty());
        assert_eq!(q.offer(3), Err(3));
    }
}
