//! Integration tests for server-side iterators using wiremock.
//!
//! The key property checked here is the release count: exactly one
//! release RPC on every exit path (normal end, error, cancellation, early
//! stop, drop) and none when the server reports the iterator as expired.
//! Mocks carry `.expect(n)`, which wiremock verifies when the server drops.

use std::time::Duration;

use ksc_api::services::{host_group, tasks};
use ksc_api::{
    Auth, Context, ErrorCodes, FetchStyle, IteratorSpec, KscError, RecordIterator, Session, Value,
};
use serde_json::{Value as Json, json};
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_session(server: &MockServer) -> Session {
    Session::builder(server.uri())
        .auth(Auth::basic("admin", "p"))
        .error_codes(ErrorCodes {
            iterator_expired: vec![1183],
            ..ErrorCodes::default()
        })
        .build()
        .unwrap()
}

/// A host-status window as the server sends it.
fn host_window(hosts: &[(&str, &str)]) -> Json {
    let records: Vec<Json> = hosts
        .iter()
        .map(|(host, state)| {
            json!({ "type": "params", "value": { "hostname": host, "state_descr": state } })
        })
        .collect();
    json!({
        "pParHostStatus": {
            "type": "params",
            "value": { "KLCSP_ITERATOR_ARRAY": { "type": "array", "value": records } }
        }
    })
}

/// Generic iterator family used by the lifecycle tests below.
fn svc_spec() -> IteratorSpec {
    IteratorSpec::new(
        "Svc",
        "strIteratorId",
        FetchStyle::range("GetRecordRange"),
        "ReleaseIterator",
    )
    .window(2)
}

async fn mount_release(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.ReleaseIterator"))
        .and(body_json(json!({ "strIteratorId": "it-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(times)
        .mount(server)
        .await;
}

fn hostname(record: &Value) -> &str {
    record
        .as_params()
        .unwrap()
        .require_str("hostname")
        .unwrap()
}

// ── Full lifecycle ─────────────────────────────────────────────────────

#[tokio::test]
async fn host_status_iterator_yields_all_records_then_releases() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Tasks.ResetHostIteratorForTaskStatusEx"))
        .and(body_partial_json(json!({
            "strTask": "task-9",
            "pFields2Return": { "type": "array", "value": ["hostname", "state_descr"] }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "strHostIteratorId": "it-1" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/Tasks.GetHostStatusRecordsCount"))
        .and(body_json(json!({ "strHostIteratorId": "it-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "PxgRetVal": 3 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/Tasks.GetHostStatusRecordRange"))
        .and(body_json(json!({ "strHostIteratorId": "it-1", "nStart": 0, "nEnd": 2 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(host_window(&[("h1", "Completed"), ("h2", "Running")])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/Tasks.GetHostStatusRecordRange"))
        .and(body_json(json!({ "strHostIteratorId": "it-1", "nStart": 2, "nEnd": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(host_window(&[("h3", "Failed")])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/Tasks.ReleaseHostStatusIterator"))
        .and(body_json(json!({ "strHostIteratorId": "it-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = Context::new();
    let mut iter = tasks::reset_host_iterator_for_task_status_ex(
        &ctx,
        &session,
        "task-9",
        &["hostname", "state_descr"],
        tasks::HostStatusQuery {
            window: 2,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(iter.id(), "it-1");

    let mut seen = Vec::new();
    while let Some(record) = iter.next(&ctx).await.unwrap() {
        seen.push(hostname(&record).to_owned());
    }
    assert_eq!(seen, vec!["h1", "h2", "h3"], "server order is preserved");
    assert_eq!(iter.total(), Some(3));
    assert!(iter.is_released());

    // Past the end: no more RPCs.
    assert!(iter.next(&ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn host_status_records_collects_into_bags() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Tasks.ResetHostIteratorForTaskStatusEx"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "strHostIteratorId": "it-1" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/Tasks.GetHostStatusRecordsCount"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "PxgRetVal": 1 })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/Tasks.GetHostStatusRecordRange"))
        .respond_with(ResponseTemplate::new(200).set_body_json(host_window(&[("h1", "Completed")])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/Tasks.ReleaseHostStatusIterator"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let records = tasks::host_status_records(&Context::new(), &session, "task-9", &["hostname"])
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].require_str("state_descr").unwrap(), "Completed");
}

#[tokio::test]
async fn find_hosts_reads_through_chunk_accessor() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/HostGroup.FindHosts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PxgRetVal": 2,
            "strAccessor": "acc-1"
        })))
        .expect(1)
        .mount(&server)
        .await;
    // The count came with FindHosts, so GetItemsCount is never needed.
    Mock::given(method("POST"))
        .and(path("/api/v1.0/ChunkAccessor.GetItemsCount"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "PxgRetVal": 2 })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/ChunkAccessor.GetItemsChunk"))
        .and(body_json(json!({ "strAccessor": "acc-1", "nStart": 0, "nCount": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PxgRetVal": 2,
            "pChunk": {
                "type": "params",
                "value": {
                    "KLCSP_ITERATOR_ARRAY": {
                        "type": "array",
                        "value": [
                            { "type": "params", "value": { "KLHST_WKS_DN": "WKS-01" } },
                            { "type": "params", "value": { "KLHST_WKS_DN": "WKS-02" } }
                        ]
                    }
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/ChunkAccessor.Release"))
        .and(body_json(json!({ "strAccessor": "acc-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = Context::new();
    let iter = host_group::find_hosts(
        &ctx,
        &session,
        r#"(KLHST_WKS_DN = "WKS-*")"#,
        &["KLHST_WKS_DN"],
        Duration::from_secs(100),
    )
    .await
    .unwrap();
    assert_eq!(iter.total(), Some(2));
    assert_eq!(iter.lifetime(), Some(Duration::from_secs(100)));

    let hosts = iter.collect_all(&ctx).await.unwrap();
    assert_eq!(hosts.len(), 2);
}

// ── Boundary behaviors ─────────────────────────────────────────────────

#[tokio::test]
async fn empty_first_window_yields_nothing_and_releases() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.GetRecordRange"))
        .and(body_json(json!({ "strIteratorId": "it-1", "nStart": 0, "nEnd": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PxgRetVal": { "type": "array", "value": [] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_release(&server, 1).await;

    let iter = RecordIterator::new(session, svc_spec(), "it-1");
    let records = iter.collect_all(&Context::new()).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn probing_without_count_stops_at_first_empty_window() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.GetRecordRange"))
        .and(body_partial_json(json!({ "nStart": 0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PxgRetVal": { "type": "array", "value": ["a", "b"] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.GetRecordRange"))
        .and(body_partial_json(json!({ "nStart": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    mount_release(&server, 1).await;

    let mut iter = RecordIterator::new(session, svc_spec(), "it-1");
    let ctx = Context::new();
    let batch = iter.next_batch(&ctx).await.unwrap().unwrap();
    assert_eq!(batch, vec![Value::from("a"), Value::from("b")]);
    assert!(iter.next_batch(&ctx).await.unwrap().is_none());
    assert_eq!(iter.position(), 2);
}

#[tokio::test]
async fn get_next_style_honours_eof_flag() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.GetNext"))
        .and(body_json(json!({ "strIteratorId": "it-1", "nCount": 1000 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PxgRetVal": { "type": "array", "value": [1, 2, 3] },
            "bEof": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_release(&server, 1).await;

    let spec = IteratorSpec::new(
        "Svc",
        "strIteratorId",
        FetchStyle::next("GetNext").with_eof_key("bEof"),
        "ReleaseIterator",
    );
    let records = RecordIterator::new(session, spec, "it-1")
        .collect_all(&Context::new())
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
}

// ── Exit paths ─────────────────────────────────────────────────────────

#[tokio::test]
async fn server_error_mid_iteration_releases_once() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.GetRecordRange"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "PxgError": { "code": 1, "subcode": 0, "message": "Generic error" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_release(&server, 1).await;

    let mut iter = RecordIterator::new(session, svc_spec(), "it-1");
    let ctx = Context::new();
    let err = iter.next(&ctx).await.unwrap_err();
    assert!(matches!(err, KscError::Server(ref e) if e.code == 1));
    assert!(iter.is_released());

    // Explicit release afterwards is a no-op.
    iter.release(&ctx).await.unwrap();
    assert!(iter.next(&ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn unreadable_total_on_open_still_releases_the_accessor() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/HostGroup.FindHosts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PxgRetVal": "not-a-count",
            "strAccessor": "acc-1"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/ChunkAccessor.Release"))
        .and(body_json(json!({ "strAccessor": "acc-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let err = host_group::find_hosts(
        &Context::new(),
        &session,
        r#"(KLHST_WKS_DN = "WKS-*")"#,
        &["KLHST_WKS_DN"],
        Duration::from_secs(100),
    )
    .await
    .unwrap_err();
    match err {
        KscError::Decode(e) => assert_eq!(e.path(), "$.PxgRetVal"),
        other => panic!("expected decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_iterator_is_not_released() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.GetRecordRange"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "PxgError": { "code": 1183, "subcode": 0, "message": "Iterator not found" }
        })))
        .mount(&server)
        .await;
    mount_release(&server, 0).await;

    let mut iter = RecordIterator::new(session, svc_spec(), "it-1");
    let err = iter.next(&Context::new()).await.unwrap_err();
    assert!(matches!(err, KscError::IteratorExpired(_)), "got {err:?}");
    drop(iter);

    // Give a (wrongly) spawned drop-release the chance to show up.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn cancellation_mid_iteration_still_releases() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.GetRecordRange"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PxgRetVal": { "type": "array", "value": ["a", "b"] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_release(&server, 1).await;

    let ctx = Context::new();
    let mut iter = RecordIterator::new(session, svc_spec(), "it-1");
    assert!(iter.next_batch(&ctx).await.unwrap().is_some());

    ctx.cancel();
    let err = iter.next_batch(&ctx).await.unwrap_err();
    assert!(matches!(err, KscError::Cancelled));
    assert!(iter.is_released());
}

#[tokio::test]
async fn early_stop_with_explicit_release_is_idempotent() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.GetRecordRange"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PxgRetVal": { "type": "array", "value": ["a", "b"] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_release(&server, 1).await;

    let ctx = Context::new();
    let mut iter = RecordIterator::new(session, svc_spec(), "it-1");
    assert_eq!(iter.next(&ctx).await.unwrap(), Some(Value::from("a")));
    iter.release(&ctx).await.unwrap();
    iter.release(&ctx).await.unwrap();
    assert!(iter.next(&ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn dropping_an_unfinished_iterator_releases_in_background() {
    let server = MockServer::start().await;
    let session = mock_session(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1.0/Svc.GetRecordRange"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PxgRetVal": { "type": "array", "value": ["a", "b"] }
        })))
        .mount(&server)
        .await;
    mount_release(&server, 1).await;

    {
        let mut iter = RecordIterator::new(session, svc_spec(), "it-1");
        assert!(iter.next(&Context::new()).await.unwrap().is_some());
    }

    // The release runs on a spawned task; wait for it to land.
    for _ in 0..50 {
        let requests = server.received_requests().await.unwrap();
        if requests
            .iter()
            .any(|r| r.url.path() == "/api/v1.0/Svc.ReleaseIterator")
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("dropped iterator was never released");
}
