//! Error types for the long-poll multiplexer.
//!
//! Steady-state polling never surfaces an error to the caller: transport
//! and decode failures fold into the bounce/disconnect classification and
//! the loop self-heals via backoff. Only construction-time configuration
//! problems are returned as `Err`.

use thiserror::Error;

/// Problem with client configuration, detected before any network call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The base URL could not be parsed at all.
    #[error("invalid base URL: {0}")]
    Url(#[from] url::ParseError),

    /// The base URL parsed but is not usable as an HTTP endpoint.
    #[error("base URL must be a fully-qualified http(s) URL, {0:?} given")]
    NotFullyQualified(String),
}

/// Problem decoding a poll response body.
///
/// A decode error never aborts the poll loop; it is logged together with
/// the offending payload and counted toward bounce classification. No
/// cursor is updated from a response that fails to decode.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not valid JSON.
    #[error("response is not complete JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The top-level JSON value is not an array.
    #[error("response is not a JSON array")]
    NotAnArray,

    /// An array element is not an object.
    #[error("response part {index} is not an object")]
    MalformedPart {
        /// Zero-based index of the offending part.
        index: usize,
    },

    /// An array element has no `ids` property.
    #[error("cannot find \"ids\" property within response part {index}")]
    MissingIds {
        /// Zero-based index of the offending part.
        index: usize,
    },

    /// The `ids` property of a part is not an object.
    #[error("\"ids\" property of response part {index} is not an object")]
    MalformedIds {
        /// Zero-based index of the offending part.
        index: usize,
    },

    /// An array element has no `data` property.
    #[error("cannot find \"data\" property within response part {index}")]
    MissingData {
        /// Zero-based index of the offending part.
        index: usize,
    },

    /// A cursor value is not a non-negative integer.
    #[error("cursor for ID {id:?} is not a non-negative integer")]
    InvalidCursor {
        /// The channel identifier whose cursor was malformed, as received
        /// on the wire (namespace prefix intact).
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays() {
        let err = ConfigError::NotFullyQualified("ftp".into());
        assert_eq!(
            format!("{err}"),
            "base URL must be a fully-qualified http(s) URL, \"ftp\" given"
        );
    }

    #[test]
    fn decode_error_displays() {
        let err = DecodeError::MissingIds { index: 2 };
        assert_eq!(
            format!("{err}"),
            "cannot find \"ids\" property within response part 2"
        );

        let err = DecodeError::InvalidCursor { id: "ns_a".into() };
        assert_eq!(
            format!("{err}"),
            "cursor for ID \"ns_a\" is not a non-negative integer"
        );
    }
}
