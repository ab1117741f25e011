//! End to end scenarios driving a real client against a real server over
//! loopback TCP, security policy None.

mod utils;

use std::sync::atomic::Ordering;
use std::time::Duration;

use utils::{connect_session, expect_event, ChaosProxy, TestServer};

use uasc::client::SessionEvent;
use uasc::core::RequestMessage;
use uasc::types::{
    NodeId, ReadRequest, ReadValueId, RequestHeader, StatusCode, TimestampsToReturn, Variant,
};

fn read_ids(count: u32) -> Vec<ReadValueId> {
    (0..count)
        .map(|i| ReadValueId::value_of(NodeId::new(1, 1012 + i)))
        .collect()
}

#[tokio::test]
async fn happy_read() {
    utils::dbglogger::init();
    let server = TestServer::start(|_| {}).await;
    let (session, mut events) = connect_session(&server.url, |_| {});

    let activated = expect_event(
        &mut events,
        |e| matches!(e, SessionEvent::ActivatedSession { .. }),
        "ActivatedSession",
    )
    .await;
    let SessionEvent::ActivatedSession { session_id } = activated else {
        unreachable!();
    };
    assert!(!session_id.is_null());

    let results = session
        .read(&read_ids(1), TimestampsToReturn::Both, 0.0)
        .await
        .expect("read succeeds");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status(), StatusCode::Good);
    assert_eq!(results[0].value, Some(Variant::Int32(1012)));

    session.disconnect().await.expect("disconnect");
    expect_event(
        &mut events,
        |e| matches!(e, SessionEvent::ClosedSession { .. }),
        "ClosedSession",
    )
    .await;
    assert_eq!(server.handle.session_count(), 0);
}

#[tokio::test]
async fn read_results_preserve_request_order() {
    let server = TestServer::start(|_| {}).await;
    let (session, mut events) = connect_session(&server.url, |_| {});
    session
        .wait_for_active(Duration::from_secs(10))
        .await
        .expect("session becomes active");
    let _ = &mut events;

    let n = 50;
    let results = session
        .read(&read_ids(n), TimestampsToReturn::Both, 0.0)
        .await
        .expect("read succeeds");
    assert_eq!(results.len(), n as usize);
    for (i, value) in results.iter().enumerate() {
        assert_eq!(value.value, Some(Variant::Int32(1012 + i as i32)));
    }
}

#[tokio::test]
async fn chunked_read_round_trip() {
    // Small buffers force the 500 node response into multiple chunks
    let server = TestServer::start(|config| {
        config.limits.send_buffer_size = 8192;
        config.limits.receive_buffer_size = 8192;
    })
    .await;
    let (session, _events) = connect_session(&server.url, |config| {
        config.transport_limits.send_buffer_size = 8192;
        config.transport_limits.recv_buffer_size = 8192;
    });
    session
        .wait_for_active(Duration::from_secs(10))
        .await
        .expect("session becomes active");

    let results = session
        .read(&read_ids(500), TimestampsToReturn::Both, 0.0)
        .await
        .expect("chunked read succeeds");
    assert_eq!(results.len(), 500);
    assert_eq!(results[499].value, Some(Variant::Int32(1012 + 499)));
}

#[tokio::test]
async fn request_timeout_produces_synthetic_completion() {
    let server = TestServer::start(|_| {}).await;
    let (session, _events) = connect_session(&server.url, |config| {
        config.request_timeout_ms = 200;
    });
    session
        .wait_for_active(Duration::from_secs(10))
        .await
        .expect("session becomes active");

    server.handler.paused.store(true, Ordering::Relaxed);
    let started = std::time::Instant::now();
    let result = session
        .read(&read_ids(1), TimestampsToReturn::Both, 0.0)
        .await;
    assert_eq!(result.unwrap_err(), StatusCode::BadTimeout);
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(150) && elapsed < Duration::from_secs(5),
        "timeout fired after {elapsed:?}"
    );

    // The channel survives the timeout
    server.handler.paused.store(false, Ordering::Relaxed);
    let results = session
        .read(&read_ids(1), TimestampsToReturn::Both, 0.0)
        .await
        .expect("read after timeout succeeds");
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn channel_loss_reactivates_same_session() {
    let server = TestServer::start(|_| {}).await;
    let target = server
        .handle
        .bound_address()
        .expect("server bound");
    let proxy = ChaosProxy::start(target).await;

    let (session, mut events) = connect_session(&proxy.url, |_| {});
    let activated = expect_event(
        &mut events,
        |e| matches!(e, SessionEvent::ActivatedSession { .. }),
        "ActivatedSession",
    )
    .await;
    let SessionEvent::ActivatedSession {
        session_id: original_id,
    } = activated
    else {
        unreachable!();
    };

    // Cut the TCP connection under the session
    proxy.sever();

    // The session reactivates on a fresh channel without a new create
    let reactivating = expect_event(
        &mut events,
        |e| matches!(e, SessionEvent::SessionReactivating { .. }),
        "SessionReactivating",
    )
    .await;
    let SessionEvent::SessionReactivating { session_id } = reactivating else {
        unreachable!();
    };
    assert_eq!(session_id, original_id);

    let activated = expect_event(
        &mut events,
        |e| matches!(e, SessionEvent::ActivatedSession { .. }),
        "ActivatedSession after reactivation",
    )
    .await;
    let SessionEvent::ActivatedSession { session_id } = activated else {
        unreachable!();
    };
    assert_eq!(session_id, original_id);

    // And it still works
    let results = session
        .read(&read_ids(1), TimestampsToReturn::Both, 0.0)
        .await
        .expect("read after reactivation succeeds");
    assert_eq!(results.len(), 1);
    // Exactly one session on the server, the original one
    assert_eq!(server.handle.session_count(), 1);
}

#[tokio::test]
async fn token_renewal_rotates_token_id() {
    let server = TestServer::start(|config| {
        config.limits.min_token_lifetime_ms = 1_000;
    })
    .await;
    let (session, _events) = connect_session(&server.url, |config| {
        config.channel_lifetime_ms = 2_000;
    });
    session
        .wait_for_active(Duration::from_secs(10))
        .await
        .expect("session becomes active");

    let first_token = session.secure_channel().read().token_id();
    assert_ne!(first_token, 0);

    // Drive the clock past 75% of the 2s lifetime; the next request renews
    tokio::time::sleep(Duration::from_millis(1_700)).await;
    let results = session
        .read(&read_ids(1), TimestampsToReturn::Both, 0.0)
        .await
        .expect("read after renewal succeeds");
    assert_eq!(results.len(), 1);

    let renewed_token = session.secure_channel().read().token_id();
    assert!(
        renewed_token > first_token,
        "token {renewed_token} should have rotated past {first_token}"
    );
}

#[tokio::test]
async fn async_send_to_closed_session_fails_loudly() {
    let server = TestServer::start(|_| {}).await;
    let (session, mut events) = connect_session(&server.url, |_| {});
    session
        .wait_for_active(Duration::from_secs(10))
        .await
        .expect("session becomes active");
    session.disconnect().await.expect("disconnect");
    expect_event(
        &mut events,
        |e| matches!(e, SessionEvent::ClosedSession { .. }),
        "ClosedSession",
    )
    .await;

    // A request posted to the dead session must surface a send failure, not
    // vanish
    let request = ReadRequest {
        request_header: RequestHeader::dummy(),
        max_age: 0.0,
        timestamps_to_return: TimestampsToReturn::Both,
        nodes_to_read: Some(read_ids(1)),
    };
    session.async_send(request, 77);

    let failed = expect_event(
        &mut events,
        |e| matches!(e, SessionEvent::SndRequestFailed { .. }),
        "SndRequestFailed",
    )
    .await;
    let SessionEvent::SndRequestFailed { status, app_ctx } = failed else {
        unreachable!();
    };
    assert_eq!(status, StatusCode::BadSessionIdInvalid);
    assert_eq!(app_ctx, 77);
    drop(server);
}

#[tokio::test]
async fn async_send_round_trip() {
    let server = TestServer::start(|_| {}).await;
    let (session, mut events) = connect_session(&server.url, |_| {});
    session
        .wait_for_active(Duration::from_secs(10))
        .await
        .expect("session becomes active");

    let request = ReadRequest {
        request_header: RequestHeader::dummy(),
        max_age: 0.0,
        timestamps_to_return: TimestampsToReturn::Both,
        nodes_to_read: Some(read_ids(3)),
    };
    session.async_send(request, 42);

    let event = expect_event(
        &mut events,
        |e| matches!(e, SessionEvent::RcvSessionResponse { .. }),
        "RcvSessionResponse",
    )
    .await;
    let SessionEvent::RcvSessionResponse {
        response, app_ctx, ..
    } = event
    else {
        unreachable!();
    };
    assert_eq!(app_ctx, 42);
    match *response {
        uasc::core::ResponseMessage::Read(read) => {
            assert_eq!(read.results.unwrap_or_default().len(), 3)
        }
        other => panic!("expected a read response, got {other:?}"),
    }
    drop(server);
}

#[tokio::test]
async fn local_service_bypasses_channel() {
    let server = TestServer::start(|_| {}).await;

    let request: RequestMessage = ReadRequest {
        request_header: RequestHeader::dummy(),
        max_age: 0.0,
        timestamps_to_return: TimestampsToReturn::Both,
        nodes_to_read: Some(read_ids(2)),
    }
    .into();
    let response = server.handle.local_service(request).await;
    match response {
        uasc::core::ResponseMessage::Read(read) => {
            assert_eq!(read.results.unwrap_or_default().len(), 2)
        }
        other => panic!("expected a read response, got {other:?}"),
    }
}

#[tokio::test]
async fn get_endpoints_without_session() {
    let server = TestServer::start(|_| {}).await;
    let client = uasc::client::Client::new(Default::default());
    let endpoints = client
        .get_server_endpoints(&server.url)
        .await
        .expect("get endpoints succeeds");
    assert_eq!(endpoints.len(), 1);
    assert_eq!(
        endpoints[0].security_mode,
        uasc::types::MessageSecurityMode::None
    );
}

#[tokio::test]
async fn server_shutdown_reports_zero_sessions() {
    let server = TestServer::start(|_| {}).await;
    let (session, _events) = connect_session(&server.url, |_| {});
    session
        .wait_for_active(Duration::from_secs(10))
        .await
        .expect("session becomes active");
    assert_eq!(server.handle.session_count(), 1);

    session.disconnect().await.expect("disconnect");
    // The close session removed the session from the arena
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.handle.session_count() != 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("sessions drain on disconnect");

    server.handle.shutdown();
}
