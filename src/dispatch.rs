//! Delivery-part dispatch.
//!
//! For each `(identifier, cursor)` pair of a part: strip the namespace
//! prefix, create the channel if the server pushed to one the client never
//! pre-registered (broadcasts do this), update the cursor, and invoke
//! every registered callback. Callback failures are isolated per
//! invocation: one panicking subscriber never starves the others or the
//! poll loop.

use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::Mutex;
use tracing::error;

use crate::{decode::DeliveryPart, subscription::SubscriptionTable};

/// Strip `namespace` from `id` only if `id` actually starts with it.
///
/// The namespace is never assumed; an unprefixed identifier passes through
/// unchanged.
pub(crate) fn strip_namespace<'a>(id: &'a str, namespace: &str) -> &'a str {
    if namespace.is_empty() {
        return id;
    }
    id.strip_prefix(namespace).unwrap_or(id)
}

/// Dispatch a single delivery part against the subscription table.
///
/// The table lock is held only while updating the cursor and snapshotting
/// the callback list; callbacks run with the lock released, so they may
/// freely call back into the client (subscribe, unsubscribe, even
/// re-arm).
///
/// Returns the number of callback invocations that panicked. Dispatch is
/// deliberately not deduplicating: delivering the same part twice updates
/// the cursor to the same value and invokes the callbacks twice.
pub fn dispatch_part(
    table: &Mutex<SubscriptionTable>,
    namespace: &str,
    part: &DeliveryPart,
) -> usize {
    let mut failures = 0;

    for (wire_id, cursor) in &part.cursors {
        let id = strip_namespace(wire_id, namespace);

        let callbacks = {
            let mut table = table.lock();
            let channel = table.channel_entry(id);
            channel.set_cursor(*cursor);
            channel.callbacks().to_vec()
        };

        for (index, callback) in callbacks.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&part.data, id, *cursor)));
            if outcome.is_err() {
                failures += 1;
                error!(id, index, cursor = *cursor, "subscriber callback panicked");
            }
        }
    }

    failures
}
