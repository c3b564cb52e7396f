//! The multiplexer client: public API and lifecycle.
//!
//! A [`MuxClient`] owns the subscription table and the single poll loop.
//! The usual flow is a sequence of [`subscribe`](MuxClient::subscribe) /
//! [`set_cursor`](MuxClient::set_cursor) calls followed by one
//! [`execute`](MuxClient::execute), which (re)connects and starts
//! delivering pushes. Subscription changes made afterwards are picked up
//! on the next poll without re-arming; only cursor rewinds or an urgent
//! reconnect need another `execute`.

mod poll_loop;

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    error::ConfigError,
    request::Endpoint,
    subscription::{Callback, SubscriptionTable},
    transport::{HttpTransport, ReqwestTransport},
    DEFAULT_IDENTIFIER_MARKER, DEFAULT_MAX_BOUNCES, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_WAIT_TIMEOUT_SECS,
};

use poll_loop::poll_loop;

/// Grace margin added to the transport timeout on top of the server's
/// wait timeout, so an idle long poll is closed by the server, not the
/// socket.
const REQUEST_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Tunables for the poll loop.
#[derive(Debug, Clone)]
pub struct MuxOptions {
    /// How long the server holds an idle poll before answering with an
    /// empty body. Completions faster than half of this are bounces.
    pub wait_timeout: Duration,

    /// Base delay between poll requests.
    pub reconnect_delay: Duration,

    /// Number of sequential bounces tolerated before progressive backoff.
    pub max_bounces: u32,

    /// Name of the identifier parameter.
    pub identifier_marker: String,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_bounces: DEFAULT_MAX_BOUNCES,
            identifier_marker: DEFAULT_IDENTIFIER_MARKER.to_owned(),
        }
    }
}

/// Shared interior state. Client clones hold it behind an `Arc`; the
/// poll task holds only a `Weak`, so dropping the last clone drops this
/// struct and its destructor aborts the task.
pub(crate) struct Inner<T> {
    pub(crate) transport: T,
    pub(crate) endpoint: Endpoint,
    pub(crate) options: MuxOptions,
    pub(crate) namespace: String,
    pub(crate) login: Mutex<Option<String>>,
    pub(crate) table: Mutex<SubscriptionTable>,

    /// Count of sequential bounces; reset only by a successful decode.
    pub(crate) bounce_count: AtomicU32,

    /// Incremented on every `execute` (and on close). A running loop that
    /// observes a newer generation stops scheduling and leaves the field
    /// to its successor.
    pub(crate) generation: AtomicU64,

    pub(crate) closed: AtomicBool,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Inner<T> {
    /// The prefix applied to all identifiers on the wire: the login (if
    /// any) followed by an underscore, then the namespace.
    pub(crate) fn effective_prefix(&self) -> String {
        match self.login.lock().as_deref() {
            Some(login) => format!("{login}_{}", self.namespace),
            None => self.namespace.clone(),
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_handle.get_mut().take() {
            handle.abort();
        }
    }
}

/// A long-poll multiplexer client.
///
/// Cloning is cheap and clones share all state, including the single
/// in-flight request.
pub struct MuxClient<T: HttpTransport = ReqwestTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: HttpTransport> Clone for MuxClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl MuxClient<ReqwestTransport> {
    /// Create a client for the given server URL and namespace, with
    /// default options and the reqwest transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `base_url` is not a fully-qualified
    /// http(s) URL.
    pub fn new(base_url: &str, namespace: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_options(base_url, namespace, MuxOptions::default())
    }

    /// Create a client with custom options and the reqwest transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `base_url` is not a fully-qualified
    /// http(s) URL.
    pub fn with_options(
        base_url: &str,
        namespace: impl Into<String>,
        options: MuxOptions,
    ) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::with_timeout(options.wait_timeout + REQUEST_TIMEOUT_GRACE);
        Self::with_transport(base_url, namespace, options, transport)
    }
}

impl<T: HttpTransport> MuxClient<T> {
    /// Create a client over a custom transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `base_url` is not a fully-qualified
    /// http(s) URL.
    pub fn with_transport(
        base_url: &str,
        namespace: impl Into<String>,
        options: MuxOptions,
        transport: T,
    ) -> Result<Self, ConfigError> {
        let endpoint = Endpoint::parse(base_url)?;

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                endpoint,
                options,
                namespace: namespace.into(),
                login: Mutex::new(None),
                table: Mutex::new(SubscriptionTable::new()),
                bounce_count: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                poll_handle: Mutex::new(None),
            }),
        })
    }

    /// Set the active login. All identifiers are then prefixed with
    /// `<login>_` before the namespace on the wire.
    ///
    /// The wire prefix is bound when [`execute`](Self::execute) arms the
    /// loop; a login change while connected takes effect on the next
    /// `execute`.
    pub fn logon(&self, login: impl Into<String>) {
        *self.inner.login.lock() = Some(login.into());
    }

    /// Set the position from which to replay a channel, creating the
    /// channel if needed. Takes effect on the next request build.
    pub fn set_cursor(&self, id: &str, cursor: u64) {
        self.inner.table.lock().set_cursor(id, cursor);
    }

    /// Subscribe a callback to a channel.
    ///
    /// Returns the callback handle; pass it to
    /// [`unsubscribe`](Self::unsubscribe) to remove this subscription
    /// specifically. Call [`execute`](Self::execute) after a batch of
    /// subscriptions to (re)connect.
    pub fn subscribe<F>(&self, id: &str, callback: F) -> Callback
    where
        F: Fn(&Value, &str, u64) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.inner.table.lock().subscribe(id, callback.clone());
        callback
    }

    /// Unsubscribe one callback (`Some`) or every callback (`None`) from
    /// a channel.
    ///
    /// No re-arm is needed: delivery to the removed callback stops with
    /// the next dispatch, and the channel drops out of the next request
    /// build once no callbacks remain. The channel's cursor is retained,
    /// so a later re-subscription resumes rather than restarts.
    pub fn unsubscribe(&self, id: &str, callback: Option<&Callback>) {
        self.inner.table.lock().unsubscribe(id, callback);
    }

    /// Reconnect to the server and listen for all subscribed channels.
    ///
    /// Any in-flight request is aborted first (never counted as a
    /// bounce) and a new one is issued immediately, bypassing the
    /// reconnect delay. Safe to call from inside a subscriber callback:
    /// the stale loop notices the newer generation and stops scheduling.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn execute(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let prefix = self.inner.effective_prefix();
        let mut slot = self.inner.poll_handle.lock();

        if let Some(previous) = slot.take() {
            // Dropping the in-flight future aborts the request without a
            // completion, so this never reads as a bounce.
            previous.abort();
        }

        debug!(generation, prefix, "starting poll loop");

        // The task gets a Weak handle so that dropping the last client
        // clone drops `Inner`, whose destructor aborts the task.
        *slot = Some(tokio::spawn(poll_loop(
            Arc::downgrade(&self.inner),
            generation,
            prefix,
        )));
    }

    /// Dispose of the client: abort any in-flight request and prevent any
    /// further scheduled poll from firing.
    ///
    /// Also runs on drop of the last clone.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(handle) = self.inner.poll_handle.lock().take() {
            handle.abort();
        }

        debug!("client closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The current replay cursor of a channel, if any.
    #[must_use]
    pub fn cursor(&self, id: &str) -> Option<u64> {
        self.inner.table.lock().channel(id).and_then(|c| c.cursor())
    }

    /// Count of sequential bounces since the last successful decode.
    #[must_use]
    pub fn bounces(&self) -> u32 {
        self.inner.bounce_count.load(Ordering::SeqCst)
    }
}
