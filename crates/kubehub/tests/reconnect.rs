#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use esk_core::EventKind;
use esk_kubehub::scripted::{ScriptedConnector, Step};
use esk_kubehub::{DecodeError, WatchError, WatchOptions, WatchSource};
use tokio::sync::oneshot;

fn frame(kind: &str, name: &str) -> String {
    format!(
        r#"{{"type":"{}","object":{{"apiVersion":"ibawt.ca/v1","kind":"ElasticSearch","metadata":{{"name":"{}"}},"spec":{{"dataNodes":1,"clientNodes":1,"masterNodes":1}}}}}}"#,
        kind, name
    )
}

fn source(script: Vec<Step>) -> (Arc<ScriptedConnector>, WatchSource<Arc<ScriptedConnector>>) {
    let conn = Arc::new(ScriptedConnector::new(script));
    let src = WatchSource::new(Arc::clone(&conn), WatchOptions::default());
    (conn, src)
}

#[tokio::test(start_paused = true)]
async fn resumes_on_next_connection_after_malformed_unit() {
    let (conn, src) = source(vec![
        Step::body([format!("{}{{\"type\":\"ADDED\",\"object\":", frame("ADDED", "es1")), "}garbage".to_string()]),
        Step::body([frame("MODIFIED", "es1"), frame("ADDED", "es2")]),
    ]);
    let (_cancel_tx, cancel_rx) = oneshot::channel();
    let (mut events, mut errors) = src.start(cancel_rx);

    let start = tokio::time::Instant::now();
    let first = events.recv().await.unwrap();
    assert_eq!((first.kind, first.resource.name.as_str()), (EventKind::Added, "es1"));
    let err = errors.recv().await.unwrap();
    assert!(matches!(err, WatchError::Decode(DecodeError::Json(_))), "err={:?}", err);
    let second = events.recv().await.unwrap();
    assert_eq!((second.kind, second.resource.name.as_str()), (EventKind::Modified, "es1"));
    let third = events.recv().await.unwrap();
    assert_eq!(third.resource.name, "es2");

    // decode faults reconnect without the availability backoff
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(conn.attempts() >= 2);
}

#[tokio::test(start_paused = true)]
async fn unavailable_endpoint_emits_one_error_and_retries_after_backoff() {
    let (conn, src) = source(vec![Step::Fail(WatchError::Status(503)), Step::body([frame("ADDED", "es1")])]);
    let (_cancel_tx, cancel_rx) = oneshot::channel();
    let (mut events, mut errors) = src.start(cancel_rx);

    let err = errors.recv().await.unwrap();
    assert!(matches!(err, WatchError::Status(503)));
    assert!(err.is_transient());

    let ev = events.recv().await.unwrap();
    assert_eq!(ev.resource.name, "es1");

    let times = conn.connect_times();
    assert!(times.len() >= 2);
    assert!(times[1] - times[0] >= Duration::from_secs(5), "retried after {:?}", times[1] - times[0]);

    // nothing else went wrong after the single failed attempt
    assert!(errors.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn clean_eof_reconnects_immediately_and_empty_body_is_silent() {
    let (conn, src) = source(vec![
        Step::body(Vec::<String>::new()),
        Step::body([frame("ADDED", "es1")]),
        Step::Open(vec![]),
    ]);
    let (_cancel_tx, cancel_rx) = oneshot::channel();
    let (mut events, mut errors) = src.start(cancel_rx);

    let ev = events.recv().await.unwrap();
    assert_eq!(ev.resource.name, "es1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(conn.attempts(), 3);
    assert!(errors.try_recv().is_err(), "empty body and clean EOF must not surface errors");
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_closes_both_channels() {
    let (_conn, src) = source(vec![Step::Fail(WatchError::Connect("connection refused".into()))]);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let (mut events, mut errors) = src.start(cancel_rx);

    assert!(matches!(errors.recv().await, Some(WatchError::Connect(_))));
    // the source is now sleeping out its backoff
    let t0 = tokio::time::Instant::now();
    cancel_tx.send(()).unwrap();
    assert!(events.recv().await.is_none());
    assert!(errors.recv().await.is_none());
    assert!(t0.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancel_while_connect_hangs_closes_both_channels() {
    let (conn, src) = source(vec![Step::Hang]);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let (mut events, mut errors) = src.start(cancel_rx);

    while conn.attempts() == 0 {
        tokio::task::yield_now().await;
    }
    cancel_tx.send(()).unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.expect("watch source hung past cancel");
    assert!(closed.is_none());
    assert!(errors.recv().await.is_none());
}

#[tokio::test]
async fn dropping_cancel_sender_also_stops_the_source() {
    let (_conn, src) = source(vec![Step::Open(vec![frame("ADDED", "es1").into()])]);
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let (mut events, _errors) = src.start(cancel_rx);

    assert_eq!(events.recv().await.unwrap().resource.name, "es1");
    drop(cancel_tx);
    let closed = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test(start_paused = true)]
async fn invalid_object_is_reported_and_the_connection_is_kept() {
    let bad = r#"{"type":"ADDED","object":{"metadata":{"name":"bad"},"spec":{"dataNodes":-1}}}"#;
    let (conn, src) = source(vec![Step::Open(vec![bad.into(), frame("ADDED", "good").into()])]);
    let (_cancel_tx, cancel_rx) = oneshot::channel();
    let (mut events, mut errors) = src.start(cancel_rx);

    let err = errors.recv().await.unwrap();
    assert!(matches!(err, WatchError::Decode(DecodeError::Object { .. })), "err={:?}", err);
    assert_eq!(events.recv().await.unwrap().resource.name, "good");

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(conn.attempts(), 1);
    assert!(errors.try_recv().is_err());
}
