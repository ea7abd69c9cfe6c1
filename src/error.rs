// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error taxonomy (conc.sync-vars error surface).
//!
//! Hand-rolled `Display`/`Error` impls, no `thiserror` — same convention as
//! `spawn::JoinError` and `timeout::TimedOut`.

use std::fmt;

/// Raised by a write-once cell (`IVar::put`, `CVar::set`) on a second write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutTwice;

impl fmt::Display for PutTwice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value already set")
    }
}

impl std::error::Error for PutTwice {}

/// Misuse of a `Barrier` `Enrollment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierMisuse {
    /// `wait` called again while a previous `wait` on the same enrollment
    /// has not yet been released.
    AlreadyWaiting,
    /// `wait` called after `resign`.
    WaitAfterResign,
    /// `resign` called while a `wait` on the same enrollment is pending.
    ResignWhileWaiting,
}

impl fmt::Display for BarrierMisuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BarrierMisuse::AlreadyWaiting => "enrollment is already waiting",
            BarrierMisuse::WaitAfterResign => "enrollment has resigned",
            BarrierMisuse::ResignWhileWaiting => "enrollment is waiting, cannot resign",
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for BarrierMisuse {}

/// Distinguished value a barrier waiter observes when the round's `update`
/// closure panicked instead of producing a new state (DESIGN.md open
/// question: barrier-update panics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierUpdatePanicked;

impl fmt::Display for BarrierUpdatePanicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "barrier update panicked")
    }
}

impl std::error::Error for BarrierUpdatePanicked {}

/// Distinguished value a blocked `Mailbox::recv_evt` observes when `reset`
/// clears the mailbox out from under it, instead of a delivered message
/// (DESIGN.md open question: mailbox reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxReset;

impl fmt::Display for MailboxReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mailbox was reset")
    }
}

impl std::error::Error for MailboxReset {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(PutTwice.to_string(), "value already set");
        assert_eq!(
            BarrierMisuse::AlreadyWaiting.to_string(),
            "enrollment is already waiting"
        );
        assert_eq!(BarrierUpdatePanicked.to_string(), "barrier update panicked");
        assert_eq!(MailboxReset.to_string(), "mailbox was reset");
    }
}
