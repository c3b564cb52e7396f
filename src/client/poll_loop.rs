//! The poll loop and reconnect state machine.
//!
//! One spawned task per generation owns the single in-flight request.
//! Each iteration: build the request from the current subscription table,
//! issue it, decode, dispatch, classify the outcome, then sleep the
//! computed delay and go again. The loop exits when nothing is pollable
//! (idle until the next `execute`), when the client is closed, when every
//! client handle has been dropped, or when a newer generation has taken
//! over.
//!
//! The task holds only a [`Weak`] reference to the shared state and no
//! strong reference across its suspension points, so dropping the last
//! client handle drops the state, whose destructor aborts this task even
//! while a request is in flight.

use std::sync::{atomic::Ordering, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, warn};

use crate::{
    decode::{decode_response, Decoded},
    dispatch::dispatch_part,
    request::{build_request, identifier_value},
    transport::HttpTransport,
};

use super::{Inner, MuxOptions};

/// Upper bound on the progressive backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Classification of a poll that ended without a successful decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disruption {
    /// Completion arrived too fast to be a legitimate server timeout:
    /// the connection really failed.
    Bounce,

    /// Ordinary disconnect after a plausible wait.
    Disconnect,
}

/// A completion faster than half the server's wait timeout cannot be a
/// legitimate timeout.
pub(crate) fn classify(elapsed: Duration, wait_timeout: Duration) -> Disruption {
    if elapsed < wait_timeout / 2 {
        Disruption::Bounce
    } else {
        Disruption::Disconnect
    }
}

/// Delay before the next poll: flat while bounces stay within bounds,
/// then progressively backed off and capped.
pub(crate) fn next_delay(bounce_count: u32, options: &MuxOptions) -> Duration {
    if bounce_count > options.max_bounces {
        let k = u64::from(bounce_count - options.max_bounces).saturating_add(2);
        let millis = 500u64.saturating_mul(k).saturating_mul(k).saturating_add(1000);
        MAX_BACKOFF.min(Duration::from_millis(millis))
    } else {
        options.reconnect_delay
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(super) async fn poll_loop<T: HttpTransport>(
    inner: Weak<Inner<T>>,
    generation: u64,
    prefix: String,
) {
    loop {
        let Some(shared) = inner.upgrade() else {
            break;
        };
        if shared.closed.load(Ordering::SeqCst)
            || shared.generation.load(Ordering::SeqCst) != generation
        {
            break;
        }

        let value = identifier_value(&shared.table.lock(), &prefix);
        if value.is_empty() {
            debug!("no channel has live callbacks, loop going idle");
            break;
        }

        let request = build_request(
            &shared.endpoint,
            &shared.options.identifier_marker,
            &value,
            now_millis(),
        );
        debug!(method = ?request.method, target = %request.target, "issuing poll request");

        let transport = shared.transport.clone();
        drop(shared);

        let issued_at = Instant::now();
        let result = transport.issue(&request).await;
        let elapsed = issued_at.elapsed();

        let Some(shared) = inner.upgrade() else {
            debug!("all client handles dropped, loop exiting");
            break;
        };

        let body = match result {
            Ok(response) if (200..300).contains(&response.status) => response.body,
            Ok(response) => {
                warn!(status = response.status, "poll returned error status");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "poll transport failure");
                String::new()
            }
        };

        match decode_response(&body) {
            Ok(Decoded::Parts(parts)) => {
                debug!(parts = parts.len(), "received push response");

                let mut failures = 0;
                for part in &parts {
                    failures += dispatch_part(&shared.table, &prefix, part);
                }
                if failures > 0 {
                    warn!(failures, "callback failures during dispatch");
                }

                shared.bounce_count.store(0, Ordering::SeqCst);
            }
            Ok(Decoded::Idle) => {
                record_disruption(&shared, elapsed);
            }
            Err(e) => {
                record_disruption(&shared, elapsed);
                if !body.is_empty() {
                    error!(error = %e, payload = %body, "failed to decode poll response");
                }
            }
        }

        let delay = next_delay(shared.bounce_count.load(Ordering::SeqCst), &shared.options);

        // An execute() issued meanwhile (possibly from inside a callback
        // just dispatched) owns the scheduling now.
        if shared.closed.load(Ordering::SeqCst)
            || shared.generation.load(Ordering::SeqCst) != generation
        {
            debug!("newer poll generation took over, leaving scheduling to it");
            break;
        }

        debug!(delay_ms = delay.as_millis() as u64, "next poll scheduled");
        drop(shared);
        tokio::time::sleep(delay).await;
    }
}

fn record_disruption<T>(inner: &Inner<T>, elapsed: Duration) {
    match classify(elapsed, inner.options.wait_timeout) {
        Disruption::Bounce => {
            let bounces = inner.bounce_count.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(bounces, "bounce detected");
        }
        Disruption::Disconnect => {
            debug!("disconnect detected");
        }
    }
}
