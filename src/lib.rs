//! # pushmux
//!
//! A client-side transport multiplexer for a long-polling push protocol.
//!
//! Many independently-subscribed logical channels are served by a single
//! outstanding HTTP request, re-issued in a loop. Each channel carries a
//! replay cursor, so a reconnecting client resumes exactly where it left
//! off without data loss or duplication.
//!
//! # Protocol
//!
//! ```text
//! ┌──────────┐                                      ┌──────────┐
//! │  Client   │                                      │  Server   │
//! └────┬─────┘                                      └────┬─────┘
//!      │                                                 │
//!      │  GET /?identifier=5:ns_a,ns_b&ncrnd=...          │
//!      │ ──────────────────────────────────────────────►  │
//!      │              ... (blocks up to WAIT) ...         │
//!      │  200 [{"ids":{"ns_a":6},"data":...}]             │
//!      │ ◄──────────────────────────────────────────────  │
//!      │                                                 │
//!      │  GET /?identifier=6:ns_a,ns_b&ncrnd=...          │
//!      │ ──────────────────────────────────────────────►  │
//! ```
//!
//! An empty response body means the server's wait timeout expired without
//! data; the client simply re-polls. A completion arriving much faster than
//! the wait timeout could allow is classified as a *bounce* (an unexpected
//! disconnect), and repeated bounces back the poll delay off progressively.
//!
//! When the joined identifier parameter grows too long for a GET URL, the
//! request switches to POST with the parameter as the body.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                       MuxClient                         │
//! │                                                        │
//! │  subscribe()/set_cursor() ──► SubscriptionTable        │
//! │                                     │                  │
//! │  execute() ──► poll loop:  build request               │
//! │                  ──► HttpTransport ──► decode          │
//! │                  ──► dispatch to callbacks             │
//! │                  ──► bounce/backoff ──► re-arm         │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one request is ever in flight; calling
//! [`execute`](client::MuxClient::execute) aborts the current one and starts
//! a fresh loop immediately.

pub mod client;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod request;
pub mod subscription;
pub mod transport;

pub use client::{MuxClient, MuxOptions};
pub use decode::{Decoded, DeliveryPart};
pub use error::{ConfigError, DecodeError};
pub use request::{Method, RequestDescriptor};
pub use subscription::{Callback, SubscriptionTable};
pub use transport::{HttpTransport, ReqwestTransport, TransportResponse};

/// Default server wait timeout (30 seconds).
///
/// The server holds a poll request open for at most this long before
/// answering with an empty body. Completions arriving in under half this
/// time are classified as bounces.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 30;

/// Default delay between poll requests (10 milliseconds).
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 10;

/// Default number of sequential bounces tolerated before progressive
/// backoff kicks in.
pub const DEFAULT_MAX_BOUNCES: u32 = 10;

/// Default name of the identifier parameter.
pub const DEFAULT_IDENTIFIER_MARKER: &str = "identifier";
