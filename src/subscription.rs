//! Per-channel subscription state.
//!
//! The [`SubscriptionTable`] maps bare (unprefixed) channel identifiers to
//! their replay cursor and registered callbacks. It is pure bookkeeping:
//! no I/O happens here. Channels are created lazily and never destroyed —
//! unsubscribing clears the callback list but keeps the cursor, so a later
//! re-subscription resumes the stream instead of restarting it.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

/// A subscriber callback.
///
/// Invoked with the delivered payload, the bare channel identifier
/// (namespace prefix already stripped), and the updated cursor. The `Arc`
/// doubles as the subscription handle: removal compares by identity, so
/// keep the value returned by
/// [`MuxClient::subscribe`](crate::client::MuxClient::subscribe) if you
/// intend to unsubscribe a single callback later.
pub type Callback = Arc<dyn Fn(&Value, &str, u64) + Send + Sync>;

/// Identity comparison for callbacks.
pub(crate) fn same_callback(a: &Callback, b: &Callback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// State of a single channel: replay cursor plus registered callbacks, in
/// registration order.
#[derive(Clone, Default)]
pub struct ChannelState {
    cursor: Option<u64>,
    callbacks: Vec<Callback>,
}

impl ChannelState {
    /// The channel's current replay cursor, if one has been set or received.
    #[must_use]
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// The registered callbacks, in registration order.
    #[must_use]
    pub fn callbacks(&self) -> &[Callback] {
        &self.callbacks
    }

    pub(crate) fn set_cursor(&mut self, cursor: u64) {
        self.cursor = Some(cursor);
    }
}

impl std::fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelState")
            .field("cursor", &self.cursor)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Mapping from bare channel identifier to [`ChannelState`], with
/// insertion-order iteration.
///
/// A channel with zero callbacks is still valid (it may hold a cursor) but
/// is excluded from outgoing requests — only channels with at least one
/// callback are polled.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    channels: IndexMap<String, ChannelState>,
}

impl SubscriptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the replay position for a channel, creating the channel if it
    /// does not exist yet.
    ///
    /// The stored cursor is overwritten unconditionally; monotonicity is
    /// the caller's responsibility.
    pub fn set_cursor(&mut self, id: &str, cursor: u64) {
        self.channel_entry(id).set_cursor(cursor);
    }

    /// Register a callback on a channel, creating the channel if needed.
    ///
    /// Registering the same `Arc` twice on one channel is a no-op; distinct
    /// `Arc`s wrapping equal closures count as distinct callbacks.
    pub fn subscribe(&mut self, id: &str, callback: Callback) {
        let chain = &mut self.channel_entry(id).callbacks;
        if !chain.iter().any(|existing| same_callback(existing, &callback)) {
            chain.push(callback);
        }
    }

    /// Remove a callback from a channel.
    ///
    /// With `Some(callback)`, removes the first identity match; with
    /// `None`, clears every callback on the channel. A missing channel is
    /// a no-op. The cursor is retained either way, and the change takes
    /// effect on the next request build — no re-arm is required.
    pub fn unsubscribe(&mut self, id: &str, callback: Option<&Callback>) {
        let Some(state) = self.channels.get_mut(id) else {
            return;
        };

        match callback {
            None => state.callbacks.clear(),
            Some(target) => {
                if let Some(index) = state
                    .callbacks
                    .iter()
                    .position(|existing| same_callback(existing, target))
                {
                    state.callbacks.remove(index);
                }
            }
        }
    }

    /// Look up a channel by its bare identifier.
    #[must_use]
    pub fn channel(&self, id: &str) -> Option<&ChannelState> {
        self.channels.get(id)
    }

    /// Iterate channels in insertion order.
    pub fn channels(&self) -> impl Iterator<Item = (&str, &ChannelState)> {
        self.channels.iter().map(|(id, state)| (id.as_str(), state))
    }

    /// Get or lazily create the state for a channel.
    pub(crate) fn channel_entry(&mut self, id: &str) -> &mut ChannelState {
        self.channels.entry(id.to_owned()).or_default()
    }
}
