//! Integration tests for the poll loop, run against a scripted transport.
//!
//! Exercises the full flow: subscription bookkeeping, request-shape
//! selection, response decode, dispatch, and the bounce/backoff state
//! machine, without touching the network.

#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::{
    collections::VecDeque,
    sync::{Arc, OnceLock},
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use pushmux::{
    HttpTransport, Method, MuxClient, MuxOptions, RequestDescriptor, TransportResponse,
};
use serde_json::json;
use testresult::TestResult;

fn init_tracing() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

// ─── Scripted Transport ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    /// Complete with this status and body after the given delay.
    Reply {
        status: u16,
        body: String,
        after: Duration,
    },
    /// Fail at the transport level.
    Fail,
    /// Never complete; the request stays in flight until aborted.
    Hang,
}

fn reply(body: &str) -> Step {
    Step::Reply {
        status: 200,
        body: body.to_owned(),
        after: Duration::ZERO,
    }
}

fn reply_after(body: &str, after: Duration) -> Step {
    Step::Reply {
        status: 200,
        body: body.to_owned(),
        after,
    }
}

#[derive(Debug, thiserror::Error)]
#[error("scripted transport failure")]
struct ScriptError;

/// Plays back a fixed sequence of completions and records every issued
/// request. Once the script runs out, requests hang until aborted.
#[derive(Clone)]
struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Step>>>,
    seen: Arc<Mutex<Vec<RequestDescriptor>>>,
}

impl ScriptedTransport {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn seen(&self) -> Vec<RequestDescriptor> {
        self.seen.lock().clone()
    }
}

impl HttpTransport for ScriptedTransport {
    type Error = ScriptError;

    fn issue(
        &self,
        request: &RequestDescriptor,
    ) -> BoxFuture<'_, Result<TransportResponse, Self::Error>> {
        self.seen.lock().push(request.clone());
        let step = self.script.lock().pop_front();

        async move {
            match step {
                Some(Step::Reply {
                    status,
                    body,
                    after,
                }) => {
                    tokio::time::sleep(after).await;
                    Ok(TransportResponse { status, body })
                }
                Some(Step::Fail) => Err(ScriptError),
                Some(Step::Hang) | None => std::future::pending().await,
            }
        }
        .boxed()
    }
}

fn client(
    namespace: &str,
    options: MuxOptions,
    transport: ScriptedTransport,
) -> MuxClient<ScriptedTransport> {
    MuxClient::with_transport("http://push.test/mux", namespace, options, transport)
        .expect("valid test URL")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delivers_payload_and_resumes_from_received_cursor() -> TestResult {
    init_tracing();

    let transport = ScriptedTransport::new([reply(r#"[{"ids":{"ns_a":5},"data":"X"}]"#)]);
    let mux = client("ns_", MuxOptions::default(), transport.clone());

    let seen_events = Arc::new(Mutex::new(Vec::new()));
    {
        let seen_events = seen_events.clone();
        mux.subscribe("a", move |data, id, cursor| {
            seen_events.lock().push((data.clone(), id.to_owned(), cursor));
        });
    }
    mux.set_cursor("a", 4);

    mux.execute();
    settle().await;

    assert_eq!(
        seen_events.lock().as_slice(),
        &[(json!("X"), "a".to_owned(), 5)]
    );
    assert_eq!(mux.cursor("a"), Some(5));
    assert_eq!(mux.bounces(), 0, "successful decode resets bounces");

    // First request carries the caller-set cursor on the namespaced ID,
    // the re-poll resumes from the delivered one.
    let seen = transport.seen();
    assert!(seen.len() >= 2, "loop should have re-polled");
    assert!(seen[0].target.contains("identifier=4:ns_a&"));
    assert!(seen[1].target.contains("identifier=5:ns_a&"));

    mux.close();
    Ok(())
}

#[tokio::test]
async fn fast_empty_response_counts_as_bounce() {
    init_tracing();

    // Empty body 0ms after issue, against a 30s wait timeout.
    let transport = ScriptedTransport::new([reply("")]);
    let mux = client("", MuxOptions::default(), transport);

    mux.subscribe("a", |_, _, _| {});
    mux.execute();
    settle().await;

    assert_eq!(mux.bounces(), 1);
    mux.close();
}

#[tokio::test]
async fn slow_empty_response_is_an_ordinary_disconnect() {
    init_tracing();

    let options = MuxOptions {
        wait_timeout: Duration::from_millis(100),
        ..MuxOptions::default()
    };
    // 60ms elapsed is past half the 100ms wait timeout.
    let transport =
        ScriptedTransport::new([reply_after("", Duration::from_millis(60))]);
    let mux = client("", options, transport);

    mux.subscribe("a", |_, _, _| {});
    mux.execute();
    settle().await;

    assert_eq!(mux.bounces(), 0);
    mux.close();
}

#[tokio::test]
async fn transport_failures_bounce_then_decode_recovers() {
    init_tracing();

    let transport = ScriptedTransport::new([
        Step::Fail,
        Step::Fail,
        reply(r#"[{"ids":{"a":1},"data":null}]"#),
    ]);
    let mux = client("", MuxOptions::default(), transport.clone());

    mux.subscribe("a", |_, _, _| {});
    mux.execute();
    settle().await;

    assert_eq!(mux.bounces(), 0, "successful decode resets the count");
    assert_eq!(mux.cursor("a"), Some(1));
    assert_eq!(transport.seen().len(), 4, "two failures, one reply, one re-poll");

    mux.close();
}

#[tokio::test]
async fn malformed_body_counts_as_bounce_without_killing_the_loop() {
    init_tracing();

    let transport = ScriptedTransport::new([
        reply("<html>gateway error</html>"),
        reply(r#"[{"ids":{"a":2},"data":"ok"}]"#),
    ]);
    let mux = client("", MuxOptions::default(), transport);

    mux.subscribe("a", |_, _, _| {});
    mux.execute();
    settle().await;

    assert_eq!(mux.cursor("a"), Some(2), "loop survived the bad body");
    assert_eq!(mux.bounces(), 0);
    mux.close();
}

#[tokio::test]
async fn panicking_callback_does_not_starve_later_subscriber() {
    init_tracing();

    let transport = ScriptedTransport::new([reply(r#"[{"ids":{"a":3},"data":"E"}]"#)]);
    let mux = client("", MuxOptions::default(), transport);

    mux.subscribe("a", |_, _, _| panic!("bad subscriber"));

    let seen_events = Arc::new(Mutex::new(Vec::new()));
    {
        let seen_events = seen_events.clone();
        mux.subscribe("a", move |data, id, cursor| {
            seen_events.lock().push((data.clone(), id.to_owned(), cursor));
        });
    }

    mux.execute();
    settle().await;

    assert_eq!(
        seen_events.lock().as_slice(),
        &[(json!("E"), "a".to_owned(), 3)]
    );
    mux.close();
}

#[tokio::test]
async fn no_request_issued_when_no_channel_has_callbacks() {
    init_tracing();

    let transport = ScriptedTransport::new([]);
    let mux = client("", MuxOptions::default(), transport.clone());

    let handle = mux.subscribe("a", |_, _, _| {});
    mux.set_cursor("a", 10);
    mux.unsubscribe("a", Some(&handle));

    mux.execute();
    settle().await;

    assert!(transport.seen().is_empty(), "loop should idle immediately");
    assert_eq!(mux.cursor("a"), Some(10), "cursor survives unsubscription");
    mux.close();
}

#[tokio::test]
async fn unsubscribed_channel_drops_out_of_next_request() {
    init_tracing();

    let transport = ScriptedTransport::new([
        reply_after("[]", Duration::from_millis(80)),
        reply("[]"),
    ]);
    let mux = client("ns_", MuxOptions::default(), transport.clone());

    mux.subscribe("a", |_, _, _| {});
    mux.subscribe("b", |_, _, _| {});
    mux.execute();

    // Remove "b" while the first request is still in flight.
    tokio::time::sleep(Duration::from_millis(20)).await;
    mux.unsubscribe("b", None);
    settle().await;

    let seen = transport.seen();
    assert!(seen.len() >= 2);
    assert!(seen[0].target.contains("identifier=ns_a,ns_b&"));
    assert!(seen[1].target.contains("identifier=ns_a&"));
    mux.close();
}

#[tokio::test]
async fn execute_inside_a_callback_takes_over_scheduling() {
    init_tracing();

    let transport = ScriptedTransport::new([
        reply(r#"[{"ids":{"a":1},"data":null}]"#),
        reply(r#"[{"ids":{"a":2},"data":null}]"#),
    ]);
    let mux = client("", MuxOptions::default(), transport.clone());

    let rearmed = Arc::new(Mutex::new(false));
    {
        let rearmed = rearmed.clone();
        let rearm_handle: Arc<Mutex<Option<MuxClient<ScriptedTransport>>>> =
            Arc::new(Mutex::new(None));
        *rearm_handle.lock() = Some(mux.clone());

        mux.subscribe("a", move |_, _, cursor| {
            if cursor == 1 {
                *rearmed.lock() = true;
                if let Some(mux) = rearm_handle.lock().as_ref() {
                    mux.execute();
                }
            }
        });
    }

    mux.execute();
    settle().await;

    assert!(*rearmed.lock());
    assert_eq!(mux.cursor("a"), Some(2), "the re-armed loop kept delivering");
    assert_eq!(mux.bounces(), 0, "an aborted in-flight request is not a bounce");
    mux.close();
}

#[tokio::test]
async fn re_execute_aborts_in_flight_request_without_bounce() {
    init_tracing();

    let transport = ScriptedTransport::new([Step::Hang, reply("[]")]);
    let mux = client("", MuxOptions::default(), transport.clone());

    mux.subscribe("a", |_, _, _| {});
    mux.execute();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // First request is stuck in flight; re-arm must cancel it and issue a
    // fresh one immediately.
    mux.execute();
    settle().await;

    assert!(transport.seen().len() >= 2);
    assert_eq!(mux.bounces(), 0);
    mux.close();
}

#[tokio::test]
async fn close_stops_the_loop() {
    init_tracing();

    let transport = ScriptedTransport::new(
        std::iter::repeat_with(|| reply_after("[]", Duration::from_millis(10))).take(100),
    );
    let mux = client("", MuxOptions::default(), transport.clone());

    mux.subscribe("a", |_, _, _| {});
    mux.execute();
    tokio::time::sleep(Duration::from_millis(100)).await;

    mux.close();
    let polled_before = transport.seen().len();
    assert!(polled_before > 0);

    settle().await;
    assert_eq!(transport.seen().len(), polled_before, "no poll after close");
    assert!(mux.is_closed());
}

#[tokio::test]
async fn dropping_the_last_handle_stops_the_loop() {
    init_tracing();

    let transport = ScriptedTransport::new(
        std::iter::repeat_with(|| reply_after("[]", Duration::from_millis(10))).take(100),
    );
    let mux = client("", MuxOptions::default(), transport.clone());

    mux.subscribe("a", |_, _, _| {});
    mux.execute();
    tokio::time::sleep(Duration::from_millis(100)).await;

    drop(mux);

    // Let the abort land before sampling.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let polled_before = transport.seen().len();
    assert!(polled_before > 0);

    settle().await;
    assert_eq!(
        transport.seen().len(),
        polled_before,
        "no poll after the last handle is gone"
    );
}

#[tokio::test]
async fn logon_takes_effect_on_the_next_execute() {
    init_tracing();

    let transport = ScriptedTransport::new([
        reply_after("[]", Duration::from_millis(40)),
        reply_after("[]", Duration::from_millis(40)),
        reply("[]"),
    ]);
    let mux = client("ns_", MuxOptions::default(), transport.clone());

    mux.subscribe("a", |_, _, _| {});
    mux.execute();

    // Change the login while the first request is in flight; the running
    // loop keeps the prefix it was armed with.
    tokio::time::sleep(Duration::from_millis(10)).await;
    mux.logon("alice");
    tokio::time::sleep(Duration::from_millis(90)).await;

    let seen = transport.seen();
    assert!(seen.len() >= 2);
    assert!(seen[0].target.contains("identifier=ns_a&"));
    assert!(seen[1].target.contains("identifier=ns_a&"));

    mux.execute();
    settle().await;

    let seen = transport.seen();
    let last = seen.last().expect("re-arm issued a request");
    assert!(last.target.contains("identifier=alice_ns_a&"));
    mux.close();
}

#[tokio::test]
async fn long_identifier_lists_go_via_post() {
    init_tracing();

    let transport = ScriptedTransport::new([]);
    let mux = client("", MuxOptions::default(), transport.clone());

    for index in 0..40 {
        mux.subscribe(&format!("channel_{index:02}_{}", "x".repeat(48)), |_, _, _| {});
    }

    mux.execute();
    settle().await;

    let seen = transport.seen();
    assert!(!seen.is_empty());
    assert_eq!(seen[0].method, Method::Post);
    let body = seen[0].body.as_deref().expect("post carries a body");
    assert!(body.starts_with("identifier="));
    assert!(body.ends_with('\n'));

    mux.close();
}
