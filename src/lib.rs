// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! A Concurrent ML style synchronization runtime.
//!
//! Events are first-class values (`Event<T>`); `sync` is the one operation
//! that ever commits one. Every blocking primitive in this crate — channel
//! rendezvous, sync-vars, timers, task joins, barriers — is built as a leaf
//! `Event` under the same `poll`/register/commit protocol in `event.rs`, so
//! `choose`, `wrap`, `guard`, `with_nack`, and `wrap_abort` compose over all
//! of them uniformly.
//!
//! Components:
//! - `event`/`transaction`/`waitqueue` — the core algebra: polling, atomic
//!   single-commit transactions, and the shared FIFO waiter queue every
//!   blocking resource registers into.
//! - `combinators` — `wrap`, `guard`, `choose`, `with_nack`, `wrap_abort`,
//!   `timeout`, `after`, `at_time`.
//! - `channel` — synchronous rendezvous, no buffering.
//! - `sync_vars` — `CVar`, `IVar`, `MVar`, `Mailbox`, `Barrier`.
//! - `multicast` — broadcast channel with per-subscriber cursors.
//! - `timer` — the timer service backing `timeout`/`after`/`at_time`.
//! - `scheduler`/`task` — task spawn/join/cancel, and joining a task as an
//!   `Event<()>` from anywhere via its id.
//! - `mutex`/`shared`/`cancel` — internal locking and cancellation utilities
//!   the above are built from.
//! - `trace` — an optional `tracing`-backed instrumentation hook.

pub mod cancel;
pub mod channel;
pub mod combinators;
pub mod error;
pub mod event;
pub mod multicast;
pub mod mutex;
pub mod scheduler;
pub mod shared;
pub mod sync_vars;
pub mod task;
pub mod timer;
pub mod trace;
pub mod transaction;
pub mod waitqueue;
