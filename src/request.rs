//! Request-shape selection.
//!
//! Each loop iteration turns the current [`SubscriptionTable`] snapshot
//! into a single [`RequestDescriptor`]: every channel with at least one
//! callback contributes a `cursor:namespacedId` (or bare `namespacedId`)
//! token, and the joined parameter rides either a GET query string or, when
//! too long for a URL, a POST body.

use url::Url;

use crate::{error::ConfigError, subscription::SubscriptionTable};

/// GET is only used while the identifier parameter plus the request path
/// stay under this many characters; longer identifier lists go via POST.
pub(crate) const GET_SIZE_LIMIT: usize = 1700;

/// HTTP method of an outgoing poll request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Identifier parameter in the query string.
    Get,
    /// Identifier parameter as the request body.
    Post,
}

/// One outgoing poll request, recomputed from the subscription table every
/// loop iteration and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Which HTTP method to issue.
    pub method: Method,

    /// Absolute request URL.
    pub target: String,

    /// Request body; present only for [`Method::Post`].
    pub body: Option<String>,
}

/// A validated server endpoint: origin plus normalized path.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    origin: String,
    path: String,
}

impl Endpoint {
    /// Parse and validate a fully-qualified server URL.
    ///
    /// The path is normalized: duplicate slashes collapsed, leading and
    /// trailing slash enforced. Query and fragment are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL does not parse or is not an
    /// `http(s)` URL with a host.
    pub(crate) fn parse(base_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(base_url)?;

        if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
            return Err(ConfigError::NotFullyQualified(base_url.to_owned()));
        }

        let mut path = String::from("/");
        for segment in url.path().split('/').filter(|s| !s.is_empty()) {
            path.push_str(segment);
            path.push('/');
        }

        Ok(Self {
            origin: url.origin().ascii_serialization(),
            path,
        })
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }
}

/// Build the value of the identifier parameter: comma-joined tokens for
/// every channel with at least one live callback.
///
/// Returns an empty string when nothing is pollable, in which case the
/// loop goes idle instead of issuing a request.
pub(crate) fn identifier_value(table: &SubscriptionTable, prefix: &str) -> String {
    let mut tokens = Vec::new();

    for (id, state) in table.channels() {
        if state.callbacks().is_empty() {
            continue;
        }
        match state.cursor() {
            Some(cursor) => tokens.push(format!("{cursor}:{prefix}{id}")),
            None => tokens.push(format!("{prefix}{id}")),
        }
    }

    tokens.join(",")
}

/// Choose the request shape for a non-empty identifier value.
///
/// `nonce` is a cache-busting value appended to GET URLs. POST bodies are
/// terminated with a newline so the server can unambiguously detect the
/// end of the parameter.
pub(crate) fn build_request(
    endpoint: &Endpoint,
    marker: &str,
    value: &str,
    nonce: u64,
) -> RequestDescriptor {
    let param = format!("{marker}={value}");

    if param.len() + endpoint.path.len() < GET_SIZE_LIMIT {
        RequestDescriptor {
            method: Method::Get,
            target: format!("{}{}?{param}&ncrnd={nonce}", endpoint.origin, endpoint.path),
            body: None,
        }
    } else {
        RequestDescriptor {
            method: Method::Post,
            target: format!("{}{}", endpoint.origin, endpoint.path),
            body: Some(format!("{param}\n")),
        }
    }
}
