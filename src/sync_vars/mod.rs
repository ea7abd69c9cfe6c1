// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Synchronizing variables: write-once cells, mutable single-slots, signals,
//! mailboxes, and barriers, each exposing both blocking methods and CML
//! events built on `event::BaseEvent`.

pub mod barrier;
pub mod cvar;
pub mod ivar;
pub mod mailbox;
pub mod mvar;
