// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `Mailbox<T>` — an unbounded FIFO (conc.sync-vars MB1-MB3).
//!
//! Unlike `Channel<T>`, `send` never blocks: messages queue up if no one is
//! receiving yet. `reset` clears the queue and wakes every currently
//! blocked `recv_evt` with `Err(MailboxReset)` instead of a message — the
//! resolved open question on what a reset does to in-flight receives.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::MailboxReset;
use crate::event::{BaseEvent, Cancel, Event, EventStatus, Probe};
use crate::transaction::Sink;
use crate::waitqueue::WaitQueue;

type Delivery<T> = Result<T, MailboxReset>;

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    waiters: WaitQueue<Delivery<T>>,
}

/// An unbounded FIFO mailbox. Cheap to `Clone`.
pub struct Mailbox<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Mailbox {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Mailbox {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                waiters: WaitQueue::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + Sync + 'static> Mailbox<T> {
    /// Enqueue a message. Never blocks (MB1).
    pub fn send(&self, v: T) {
        match self.inner.waiters.offer(Ok(v)) {
            Ok(()) => {}
            Err(Ok(v)) => self.inner.queue.lock().unwrap().push_back(v),
            Err(Err(_)) => unreachable!("send never offers an Err"),
        }
    }

    /// Non-blocking receive: `Some(v)` if a message is already queued.
    pub fn recv_poll(&self) -> Option<T> {
        self.inner.queue.lock().unwrap().pop_front()
    }

    /// Block until a message arrives, or the mailbox is reset.
    pub fn recv(&self) -> Delivery<T> {
        crate::event::sync(&self.recv_evt())
    }

    /// Clear the queue and wake every blocked receiver with `MailboxReset`.
    pub fn reset(&self) {
        self.inner.queue.lock().unwrap().clear();
        for w in self.inner.waiters.drain_live() {
            let _ = w.try_commit(Err(MailboxReset));
        }
    }

    pub fn recv_evt(&self) -> Event<Delivery<T>> {
        // A fresh leaf each call: its `poll` either delivers the message
        // already sitting in the queue (no `Clone` bound needed, it just
        // moves the value out of its own one-shot slot) or registers.
        struct Recv<T> {
            inner: Arc<Inner<T>>,
        }
        impl<T: Send + Sync + 'static> BaseEvent<Delivery<T>> for Recv<T> {
            fn poll_probe(&self) -> Probe {
                if self.inner.queue.lock().unwrap().is_empty() {
                    Probe::Blocked
                } else {
                    Probe::Enabled { priority: 0 }
                }
            }
            fn poll(&self, sink: &Arc<dyn Sink<Delivery<T>>>) -> EventStatus<Delivery<T>> {
                if let Some(v) = self.inner.queue.lock().unwrap().pop_front() {
                    let _ = sink.try_commit(Ok(v));
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
        Event::from_base(Arc::new(Recv {
            inner: self.inner.clone(),
        }))
    }
}

impl<T: Send + Sync + 'static> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_recv_fifo() {
        let m: Mailbox<i32> = Mailbox::new();
        m.send(1);
        m.send(2);
        assert_eq!(m.recv(), Ok(1));
        assert_eq!(m.recv(), Ok(2));
    }

    #[test]
    fn recv_blocks_until_send() {
        let m: Mailbox<i32> = Mailbox::new();
        let m2 = m.clone();
        let h = std::thread::spawn(move || m2.recv());
        std::thread::sleep(std::time::Duration::from_millis(20));
        m.send(7);
        assert_eq!(h.join().unwrap(), Ok(7));
    }

    #[test]
    fn reset_wakes_blocked_receiver() {
        let m: Mailbox<i32> = Mailbox::new();
        let m2 = m.clone();
        let h = std::thread::spawn(move || m2.recv());
        std::thread::sleep(std::time::Duration::from_millis(20));
        m.reset();
        assert_eq!(h.join().unwrap(), Err(MailboxReset));
    }

    #[test]
    fn reset_clears_queued_messages() {
        let m: Mailbox<i32> = Mailbox::new();
        m.send(1);
        m.reset();
        assert!(m.is_empty());
    }
}
