//! End-to-end forwarder/executor tests over a live Unix-socket endpoint.

use std::time::{Duration, Instant};

use tether::test_harness::TestEndpoint;
use tether::{CallError, TaggedValue};

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn boolean_argument_round_trips_to_native_result() {
    let endpoint = TestEndpoint::start();
    let forwarder = endpoint.forwarder();

    let result = forwarder
        .forward("is_admin_active", vec![TaggedValue::Bool(false)])
        .unwrap();

    assert_eq!(result, TaggedValue::Bool(true));
    assert_eq!(result.expect_bool().unwrap(), true);
}

#[test]
fn string_list_round_trips() {
    let endpoint = TestEndpoint::start();
    let forwarder = endpoint.forwarder();

    let result = forwarder
        .forward(
            "concat",
            vec![TaggedValue::StrList(vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
            ])],
        )
        .unwrap();

    assert_eq!(result, TaggedValue::Str("a+b+c".to_string()));
}

#[test]
fn dynamic_json_arguments_are_encoded_before_sending() {
    let endpoint = TestEndpoint::start();
    let forwarder = endpoint.forwarder();

    let result = forwarder
        .forward_values("echo", &[serde_json::json!("hello")])
        .unwrap();
    assert_eq!(result, TaggedValue::Str("hello".to_string()));

    // A float has no tag: the failure happens locally, the endpoint never
    // sees a connection for this call.
    let err = forwarder
        .forward_values("echo", &[serde_json::json!(2.5)])
        .unwrap_err();
    assert!(matches!(err, CallError::Encode(_)));
}

// =============================================================================
// Failure propagation
// =============================================================================

#[test]
fn remote_failure_surfaces_the_logical_cause() {
    let endpoint = TestEndpoint::start();
    let forwarder = endpoint.forwarder();

    let err = forwarder.forward("boom", vec![]).unwrap_err();
    match err {
        CallError::Remote { code, message } => {
            assert_eq!(code, "boom");
            assert_eq!(message, "synthetic failure");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unknown_method_is_a_lookup_failure() {
    let endpoint = TestEndpoint::start();
    let forwarder = endpoint.forwarder();

    let err = forwarder.forward("no_such_method", vec![]).unwrap_err();
    match err {
        CallError::Remote { code, message } => {
            assert_eq!(code, "method_not_found");
            assert!(message.contains("no_such_method"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_reply_is_a_hard_timeout() {
    let endpoint = TestEndpoint::start();
    let forwarder = endpoint.forwarder_with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let err = forwarder
        .forward("sleep_ms", vec![TaggedValue::Long(2_000)])
        .unwrap_err();
    let elapsed = started.elapsed();

    match err {
        CallError::Timeout { method, waited } => {
            assert_eq!(method, "sleep_ms");
            assert_eq!(waited, Duration::from_millis(100));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2), "timed out late: {elapsed:?}");
}

// =============================================================================
// Null-argument overload resolution
// =============================================================================

#[test]
fn null_argument_resolution_is_idempotent_across_calls() {
    let endpoint = TestEndpoint::start();
    let forwarder = endpoint.forwarder();

    // "describe" has a str and a record overload; a null argument matches
    // both. The documented tie-break (lexicographic tag order) must pick the
    // record overload, on every call.
    let mut seen = Vec::new();
    for _ in 0..5 {
        let result = forwarder
            .forward("describe", vec![TaggedValue::Null])
            .unwrap();
        seen.push(result.expect_str().unwrap().to_string());
    }
    assert!(seen.iter().all(|s| s == "record:0"), "drifted: {seen:?}");
}

// =============================================================================
// Concurrency and lifecycle
// =============================================================================

#[test]
fn concurrent_callers_do_not_interfere() {
    let endpoint = TestEndpoint::start();

    let mut handles = Vec::new();
    for i in 0..8 {
        let forwarder = endpoint.forwarder();
        handles.push(std::thread::spawn(move || {
            let text = format!("caller-{i}");
            let result = forwarder
                .forward("echo", vec![TaggedValue::Str(text.clone())])
                .unwrap();
            assert_eq!(result, TaggedValue::Str(text));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn ping_and_graceful_shutdown() {
    let endpoint = TestEndpoint::start();
    let forwarder = endpoint.forwarder();

    forwarder.ping().unwrap();
    let socket = endpoint.socket().to_path_buf();
    endpoint.shutdown();
    assert!(!socket.exists(), "socket file must be removed on shutdown");
}

#[test]
fn forwarded_calls_feed_the_event_stream() {
    let endpoint = TestEndpoint::start();
    let forwarder = endpoint.forwarder();
    let mut stream = endpoint.log().stream_with_poll(Duration::from_millis(10));

    forwarder
        .forward("is_admin_active", vec![TaggedValue::Bool(true)])
        .unwrap();

    let event = stream
        .expect_event(
            |e| e.is_named("is_admin_active"),
            Duration::from_secs(2),
        )
        .unwrap();
    assert_eq!(event.arg("refresh"), Some(&TaggedValue::Bool(true)));

    // No second invocation happened.
    stream
        .not_expect_event(
            |e| e.is_named("is_admin_active"),
            Duration::from_millis(100),
        )
        .unwrap();
}
