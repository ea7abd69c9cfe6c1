// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `MChannel<T>` — a broadcast channel built atop a chain of `IVar`s, with a
//! per-subscriber cursor (conc.async MC1-MC3).
//!
//! Each multicast value lives in its own node's `value` cell; `next` points
//! to the following (initially empty) node. A `Port` is nothing but a
//! cursor into this chain: `recv` reads the node it is parked at and
//! advances to `next`. A port created before any values are sent starts at
//! the chain's head and sees everything; `copy` snapshots a port's current
//! position, so the copy only sees values multicast from that point on.

use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::sync_vars::ivar::IVar;

struct NodeInner<T> {
    value: IVar<T>,
    next: IVar<Node<T>>,
}

type Node<T> = Arc<NodeInner<T>>;

fn empty_node<T: Clone + Send + Sync + 'static>() -> Node<T> {
    Arc::new(NodeInner {
        value: IVar::new(),
        next: IVar::new(),
    })
}

/// A broadcast channel. Cheap to `Clone` — clones share the same chain.
pub struct MChannel<T> {
    tail: Arc<Mutex<Node<T>>>,
}

impl<T> Clone for MChannel<T> {
    fn clone(&self) -> Self {
        MChannel {
            tail: self.tail.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MChannel<T> {
    pub fn new() -> Self {
        MChannel {
            tail: Arc::new(Mutex::new(empty_node())),
        }
    }

    /// Broadcast `v` to every port, present and future, positioned at or
    /// before the current tail.
    pub fn multicast(&self, v: T) {
        let mut tail = self.tail.lock().unwrap();
        let new_tail = empty_node();
        // `next` is filled before `value` so that any reader who observes
        // `value` filled (via `read_evt`/`read_poll`) is guaranteed to also
        // find `next` already filled — `recv`'s commit-time cursor advance
        // relies on this order, not on still holding `tail`'s lock.
        let _ = tail.next.put(new_tail.clone());
        let _ = tail.value.put(v);
        *tail = new_tail;
    }

    /// A fresh subscriber positioned at the current tail: it observes every
    /// value multicast from this call onward.
    pub fn port(&self) -> Port<T> {
        Port {
            cursor: Arc::new(Mutex::new(self.tail.lock().unwrap().clone())),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for MChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's cursor into an `MChannel`'s value chain.
pub struct Port<T> {
    cursor: Arc<Mutex<Node<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Port<T> {
    pub fn recv(&self) -> T {
        crate::event::sync(&self.recv_evt())
    }

    /// An event firing with the next value this port hasn't yet seen,
    /// advancing the port's cursor to the following node as a side effect
    /// of the commit.
    pub fn recv_evt(&self) -> Event<T> {
        let node = self.cursor.lock().unwrap().clone();
        let cursor = self.cursor.clone();
        crate::combinators::wrap(node.value.read_evt(), move |v| {
            let next = node
                .next
                .read_poll()
                .expect("next is always filled before value");
            *cursor.lock().unwrap() = next;
            v
        })
    }

    /// A new port sharing this one's current position: it sees every value
    /// multicast from here onward, but none already delivered to `self`
    /// before the copy (an already-advanced cursor is not rewound).
    pub fn copy(&self) -> Port<T> {
        Port {
            cursor: Arc::new(Mutex::new(self.cursor.lock().unwrap().clone())),
        }
    }
}
