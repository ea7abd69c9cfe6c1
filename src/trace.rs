// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Compile-time-disableable tracing hook (§6 "Tracing hook").
//!
//! Off by default. Enable the `trace` Cargo feature to have `trace!` emit a
//! `tracing` event at `Level::TRACE` under the `cml_rt` target; off, the
//! call sites compile away entirely. This crate never installs a
//! subscriber — that is the embedding application's job, same as any other
//! `tracing` producer.

/// Emit a structured trace event. No-op unless the `trace` feature is on.
///
/// ```ignore
/// trace!("channel.recv", tag: "rendezvous", channel_id = 3);
/// ```
#[cfg(feature = "trace")]
#[macro_export]
macro_rules! trace {
    ($event_name:expr $(, tag: $tag:expr)? $(, $key:ident = $val:expr)* $(,)?) => {
        ::tracing::event!(
            target: "cml_rt",
            ::tracing::Level::TRACE,
            event_name = $event_name,
            $(tag = $tag,)?
            $($key = ?$val,)*
        )
    };
}

#[cfg(not(feature = "trace"))]
#[macro_export]
macro_rules! trace {
    ($($tt:tt)*) => {};
}

#[cfg(test)]
mod tests {
    #[test]
    fn trace_macro_compiles_with_bare_event() {
        crate::trace!("event.happened");
    }

    #[test]
    fn trace_macro_compiles_with_tag_and_fields() {
        let task_id: u64 = 7;
        crate::trace!("event.happened", tag: "test", task_id = task_id);
    }
}
