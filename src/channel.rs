// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `Channel<T>` — a synchronous rendezvous point (conc.async CH1-CH4).
//!
//! Unlike the teacher's original `mpsc`-backed channel, this channel never
//! buffers: a value only ever moves directly from a waiting sender to a
//! waiting receiver, under the channel's own mutex. Both sides are plain
//! `Event`s built from the same `BaseEvent`/`poll`/`Sink` seam as every
//! other resource in the crate, so `choose`/`wrap`/`with_nack` compose over
//! them for free.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::event::{BaseEvent, Cancel, Event, EventStatus, Probe};
use crate::transaction::Sink;

struct Queues<T> {
    senders: VecDeque<(T, Arc<dyn Sink<()>>)>,
    receivers: VecDeque<Arc<dyn Sink<T>>>,
    priority: u64,
}

struct Inner<T> {
    queues: Mutex<Queues<T>>,
}

/// A synchronous rendezvous channel. Cheap to `Clone` — clones name the
/// same channel.
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Channel {
            inner: Arc::new(Inner {
                queues: Mutex::new(Queues {
                    senders: VecDeque::new(),
                    receivers: VecDeque::new(),
                    priority: 0,
                }),
            }),
        }
    }

    /// Identity compare (CH4): do `self` and `other` name the same channel?
    pub fn same_channel(&self, other: &Channel<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Channel<T> {
    pub fn send(&self, v: T) {
        crate::event::sync(&self.send_evt(v))
    }

    pub fn recv(&self) -> T {
        crate::event::sync(&self.recv_evt())
    }

    /// Attempt exactly one immediate rendezvous with a waiting receiver,
    /// without parking. Hands `v` back on failure, so a caller never loses
    /// a value it couldn't deliver (same convention as `Sink::try_commit`).
    pub fn send_poll(&self, v: T) -> Result<(), T> {
        let mut q = self.inner.queues.lock().unwrap();
        let mut v = v;
        loop {
            match q.receivers.pop_front() {
                None => return Err(v),
                Some(sink) => {
                    if sink.is_done() {
                        continue;
                    }
                    match sink.try_commit(v) {
                        Ok(()) => {
                            q.priority += 1;
                            return Ok(());
                        }
                        Err(back) => {
                            v = back;
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Attempt exactly one immediate rendezvous with a waiting sender,
    /// without parking.
    pub fn recv_poll(&self) -> Option<T> {
        let mut q = self.inner.queues.lock().unwrap();
        while let Some((v, sender_sink)) = q.senders.pop_front() {
            if sender_sink.is_done() {
                continue;
            }
            if sender_sink.try_commit(()).is_ok() {
                q.priority += 1;
                return Some(v);
            }
        }
        None
    }

    /// Synchronizes with a waiting receiver; the value moves to the
    /// receiver on commit (CH2).
    pub fn send_evt(&self, v: T) -> Event<()> {
        struct Send<T> {
            inner: Arc<Inner<T>>,
            v: Mutex<Option<T>>,
        }
        impl<T: Send + Sync + 'static> BaseEvent<()> for Send<T> {
            fn poll_probe(&self) -> Probe {
                let q = self.inner.queues.lock().unwrap();
                if q.receivers.iter().any(|s| !s.is_done()) {
                    Probe::Enabled { priority: q.priority }
                } else {
                    Probe::Blocked
                }
            }
            fn poll(&self, sink: &Arc<dyn Sink<()>>) -> EventStatus<()> {
                let v = self.v.lock().unwrap().take().expect("polled twice");
                let mut q = self.inner.queues.lock().unwrap();
                let mut v = v;
                // Algorithm (send poll, §4.2): find a live receiver, commit
                // its recv_tx with the value, then commit our own sender_tx.
                // A dead receiver (cancelled, or already matched by another
                // of its own choose branches) is discarded and the next is
                // tried.
                loop {
                    match q.receivers.pop_front() {
                        None => break,
                        Some(recv_sink) => {
                            if recv_sink.is_done() {
                                continue;
                            }
                            match recv_sink.try_commit(v) {
                                Ok(()) => {
                                    if sink.try_commit(()).is_ok() {
                                        q.priority += 1;
                                        let p = q.priority;
                                        drop(q);
                                        crate::trace!("channel.send_commit", priority = p);
                                        return EventStatus::Enabled { priority: p };
                                    }
                                    // Our own transaction was already
                                    // decided by a sibling branch racing us
                                    // from another resource while we were
                                    // registered. The receiver has already
                                    // been told the rendezvous happened —
                                    // see DESIGN.md's note on this same
                                    // structural limitation in `WrapSink`.
                                    drop(q);
                                    return EventStatus::Blocked(Box::new(|_| -> Cancel {
                                        Box::new(|| {})
                                    }));
                                }
                                Err(back) => {
                                    v = back;
                                    continue;
                                }
                            }
                        }
                    }
                }
                drop(q);
                let inner = self.inner.clone();
                EventStatus::Blocked(Box::new(move |sink| -> Cancel {
                    let mut q = inner.queues.lock().unwrap();
                    q.senders.push_back((v, sink));
                    drop(q);
                    let inner = inner.clone();
                    Box::new(move || {
                        let mut q = inner.queues.lock().unwrap();
                        q.senders.retain(|(_, s)| !s.is_done());
                    })
                }))
            }
        }
        Event::from_base(Arc::new(Send {
            inner: self.inner.clone(),
            v: Mutex::new(Some(v)),
        }))
    }

    /// Synchronizes with a waiting sender, returning the transferred value
    /// (CH2).
    pub fn recv_evt(&self) -> Event<T> {
        struct Recv<T> {
            inner: Arc<Inner<T>>,
        }
        impl<T: Send + Sync + 'static> BaseEvent<T> for Recv<T> {
            fn poll_probe(&self) -> Probe {
                let q = self.inner.queues.lock().unwrap();
                if q.senders.iter().any(|(_, s)| !s.is_done()) {
                    Probe::Enabled { priority: q.priority }
                } else {
                    Probe::Blocked
                }
            }
            fn poll(&self, sink: &Arc<dyn Sink<T>>) -> EventStatus<T> {
                let mut q = self.inner.queues.lock().unwrap();
                // Algorithm (recv poll, §4.2): commit the pending sender's
                // transaction first — it's cheap to discard on failure (the
                // sender was claimed by its own timeout, say) since we
                // haven't touched our own sink yet. Only once a sender is
                // genuinely claimed do we commit our own sink with its
                // value.
                loop {
                    match q.senders.pop_front() {
                        None => break,
                        Some((v, sender_sink)) => {
                            if sender_sink.is_done() {
                                continue;
                            }
                            match sender_sink.try_commit(()) {
                                Ok(()) => match sink.try_commit(v) {
                                    Ok(()) => {
                                        q.priority += 1;
                                        let p = q.priority;
                                        drop(q);
                                        crate::trace!("channel.recv_commit", priority = p);
                                        return EventStatus::Enabled { priority: p };
                                    }
                                    Err(_lost) => {
                                        // Same structural limitation as
                                        // `send_evt`'s symmetric branch: the
                                        // sender has already been released,
                                        // but our own sink had already been
                                        // decided elsewhere. See DESIGN.md.
                                        drop(q);
                                        return EventStatus::Blocked(Box::new(|_| -> Cancel {
                                            Box::new(|| {})
                                        }));
                                    }
                                },
                                Err(()) => continue,
                            }
                        }
                    }
                }
                drop(q);
                let inner = self.inner.clone();
                EventStatus::Blocked(Box::new(move |sink| -> Cancel {
                    let mut q = inner.queues.lock().unwrap();
                    q.receivers.push_back(sink);
                    drop(q);
                    let inner = inner.clone();
                    Box::new(move || {
                        let mut q = inner.queues.lock().unwrap();
                        q.receivers.retain(|s| !s.is_done());
                    })
                }))
            }
        }
        Event::from_base(Arc::new(Recv {
            inner: self.inner.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::choose;
    use crate::event::never;

    #[test]
    fn send_then_recv() {
        let ch: Channel<i32> = Channel::new();
        let ch2 = ch.clone();
        let h = std::thread::spawn(move || ch2.send(42));
        assert_eq!(ch.recv(), 42);
        h.join().unwrap();
    }

    #[test]
    fn recv_blocks_until_send() {
        let ch: Channel<i32> = Channel::new();
        let ch2 = ch.clone();
        let h = std::thread::spawn(move || ch2.recv());
        std::thread::sleep(std::time::Duration::from_millis(20));
        ch.send(7);
        assert_eq!(h.join().unwrap(), 7);
    }

    #[test]
    fn send_poll_without_receiver_hands_value_back() {
        let ch: Channel<i32> = Channel::new();
        assert_eq!(ch.send_poll(5), Err(5));
    }

    #[test]
    fn recv_poll_without_sender_is_none() {
        let ch: Channel<i32> = Channel::new();
        assert_eq!(ch.recv_poll(), None);
    }

    #[test]
    fn same_channel_identity() {
        let a: Channel<i32> = Channel::new();
        let b: Channel<i32> = Channel::new();
        let a2 = a.clone();
        assert!(a.same_channel(&a2));
        assert!(!a.same_channel(&b));
    }

    #[test]
    fn choose_prefers_ready_sender_over_never() {
        let ch: Channel<i32> = Channel::new();
        let ch2 = ch.clone();
        std::thread::spawn(move || ch2.send(9)).join().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let evt = choose(vec![never(), ch.recv_evt()]);
        assert_eq!(crate::event::sync(&evt), 9);
    }

    /// Two channels with live senders at once: `choose` must pick the one
    /// with the higher `priority`, not whichever `poll_probe` happens to
    /// visit first in the shuffle. Run several rounds since the shuffle
    /// order is randomized and a first-enabled-wins bug would only show up
    /// on the rounds where the lower-priority channel is probed first.
    #[test]
    fn choose_arbitrates_by_priority_among_several_ready_branches() {
        for _ in 0..20 {
            let low: Channel<&'static str> = Channel::new();
            let high: Channel<&'static str> = Channel::new();

            // Bump `high`'s priority counter above `low`'s by rendezvousing
            // on it a few times first.
            for _ in 0..3 {
                let high2 = high.clone();
                let warmup = std::thread::spawn(move || high2.send("warmup"));
                assert_eq!(high.recv(), "warmup");
                warmup.join().unwrap();
            }

            let low2 = low.clone();
            let high2 = high.clone();
            let h_low = std::thread::spawn(move || low2.send("low"));
            let h_high = std::thread::spawn(move || high2.send("high"));
            std::thread::sleep(std::time::Duration::from_millis(10));

            let evt = choose(vec![low.recv_evt(), high.recv_evt()]);
            assert_eq!(crate::event::sync(&evt), "high");

            // Drain the losing sender so its thread can exit.
            assert_eq!(low.recv(), "low");
            h_low.join().unwrap();
            h_high.join().unwrap();
        }
    }
}
