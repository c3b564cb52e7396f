//! Transport abstraction for issuing poll requests.
//!
//! The poll loop only needs one capability: issue a single async HTTP
//! request described by a [`RequestDescriptor`] and observe its completion
//! exactly once. Abstracting this behind [`HttpTransport`] keeps the loop
//! testable against a scripted transport and lets embedders swap in their
//! own HTTP stack.

use std::time::Duration;

use futures::{future::BoxFuture, FutureExt};

use crate::request::{Method, RequestDescriptor};

/// A completed HTTP exchange, as much of it as the poll loop cares about.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,

    /// Response body text.
    pub body: String,
}

/// A minimal async HTTP client for poll requests.
///
/// Implementations must resolve the returned future at most once per
/// `issue` call. Cancellation is dropping the future: a dropped request
/// must abort without any completion being observed, which is how the
/// client guarantees that an explicit re-arm is never misread as a
/// connection failure.
///
/// Transports are `Clone` so the poll task can hold its own handle
/// without keeping the rest of the client state alive.
pub trait HttpTransport: Clone + Send + Sync + 'static {
    /// The error type for transport-level failures.
    type Error: std::error::Error + Send + 'static;

    /// Issue one HTTP request.
    fn issue(
        &self,
        request: &RequestDescriptor,
    ) -> BoxFuture<'_, Result<TransportResponse, Self::Error>>;
}

/// A [`reqwest`]-backed implementation of [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }

    /// Create a transport with a per-request timeout.
    ///
    /// The timeout should exceed the server's wait timeout by a grace
    /// margin, so that a legitimately idle long poll is answered by the
    /// server rather than cut off by the socket.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for ReqwestTransport {
    type Error = reqwest::Error;

    fn issue(
        &self,
        request: &RequestDescriptor,
    ) -> BoxFuture<'_, Result<TransportResponse, Self::Error>> {
        let builder = match request.method {
            Method::Get => self.inner.get(&request.target),
            Method::Post => self
                .inner
                .post(&request.target)
                .body(request.body.clone().unwrap_or_default()),
        };

        async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;

            Ok(TransportResponse { status, body })
        }
        .boxed()
    }
}
