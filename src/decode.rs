//! Poll-response decoding.
//!
//! A response body is one of three things: a distinguished idle signal
//! (empty or whitespace-only, meaning the server's wait timeout expired
//! with no data), an ordered JSON array of delivery parts, or garbage.
//! The poll loop handles each outcome differently, so the decoder keeps
//! them distinct instead of collapsing idle into an empty part list.

use serde_json::Value;

use crate::error::DecodeError;

/// One unit of a decoded response: updated cursors for one or more
/// channels plus a single opaque payload.
#[derive(Debug, Clone)]
pub struct DeliveryPart {
    /// `(identifier, cursor)` pairs in wire order. Identifiers still carry
    /// their namespace prefix; the dispatcher strips it.
    pub cursors: Vec<(String, u64)>,

    /// The delivered payload, passed to callbacks as-is.
    pub data: Value,
}

/// Outcome of decoding a non-erroneous response body.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// Empty body: the server's wait timeout expired without data.
    Idle,

    /// Delivery parts, in delivery order.
    Parts(Vec<DeliveryPart>),
}

/// Decode a raw response body.
///
/// Leading noise before the first `[` is skipped, to survive transports
/// that prepend diagnostic text to the payload.
///
/// # Errors
///
/// Returns [`DecodeError`] if the body is non-empty but is not a JSON
/// array of `{ "ids": { id: cursor, ... }, "data": ... }` objects, or if
/// any cursor value is not a non-negative integer. No partial result is
/// produced: a single bad part fails the whole response.
pub fn decode_response(body: &str) -> Result<Decoded, DecodeError> {
    if body.trim().is_empty() {
        return Ok(Decoded::Idle);
    }

    let stripped = match body.find('[') {
        Some(start) => &body[start..],
        None => body,
    };

    let top: Value = serde_json::from_str(stripped)?;
    let Value::Array(items) = top else {
        return Err(DecodeError::NotAnArray);
    };

    let mut parts = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(mut fields) = item else {
            return Err(DecodeError::MalformedPart { index });
        };

        let ids = fields
            .remove("ids")
            .ok_or(DecodeError::MissingIds { index })?;
        let data = fields
            .remove("data")
            .ok_or(DecodeError::MissingData { index })?;

        let Value::Object(pairs) = ids else {
            return Err(DecodeError::MalformedIds { index });
        };

        let mut cursors = Vec::with_capacity(pairs.len());
        for (id, value) in pairs {
            let cursor = value
                .as_u64()
                .ok_or_else(|| DecodeError::InvalidCursor { id: id.clone() })?;
            cursors.push((id, cursor));
        }

        parts.push(DeliveryPart { cursors, data });
    }

    Ok(Decoded::Parts(parts))
}
