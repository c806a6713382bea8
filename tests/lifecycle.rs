//! Connection lifecycle: graceful close, manager signals, and fleet drain.

mod support;

use rocketwire::{ControlSignal, ErrorCode, Frame, StreamId};
use support::{connect, request_stream, request_response, setup_frame};
use tokio::time::Duration;

fn assert_connection_error(frame: &Frame, code: ErrorCode, message: &str) {
    match frame {
        Frame::Error(error) => {
            assert_eq!(error.stream_id, StreamId::CONNECTION);
            assert_eq!(error.code, code);
            assert_eq!(error.message, message);
        }
        other => panic!("expected connection-level ERROR, got {other:?}"),
    }
}

#[tokio::test]
async fn peer_disconnect_closes_gracefully() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(request_response(1, "ping")).await;
    let _ = conn.recv().await;

    drop(conn.client);
    assert!(
        tokio::time::timeout(Duration::from_secs(2), conn.task)
            .await
            .expect("task finished")
            .expect("task join")
            .is_ok()
    );
    assert!(conn.fleet.is_empty(), "connection deregistered on close");
}

#[tokio::test]
async fn drop_signal_force_closes_the_connection() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(request_response(1, "ping")).await;
    let _ = conn.recv().await;

    conn.fleet.broadcast(ControlSignal::Drop);

    let error = conn.recv().await;
    assert_connection_error(&error, ErrorCode::ConnectionError, "Dropping connection");
    conn.recv_eof().await;
    assert!(conn.finish().await.is_ok());
}

#[tokio::test]
async fn idle_timeout_closes_an_idle_connection() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(request_response(1, "ping")).await;
    let _ = conn.recv().await;

    conn.fleet.broadcast(ControlSignal::IdleTimeout);

    let error = conn.recv().await;
    assert_connection_error(&error, ErrorCode::ConnectionClose, "Closing idle connection");
    conn.recv_eof().await;
    assert!(conn.finish().await.is_ok());
}

#[tokio::test]
async fn pending_shutdown_is_only_a_marker() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.fleet.broadcast(ControlSignal::PendingShutdown);

    // The connection keeps serving during the drain window.
    conn.send(request_response(1, "ping")).await;
    match conn.recv().await {
        Frame::Payload(payload) => assert_eq!(&payload.payload.data()[..], b"ping"),
        other => panic!("expected response payload, got {other:?}"),
    }
}

#[tokio::test]
async fn force_close_cancels_open_streams() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    // A stream with no demand granted sits open indefinitely.
    conn.send(request_stream(3, 0, "generate:100")).await;
    conn.assert_no_frame().await;

    conn.fleet.broadcast(ControlSignal::Drop);
    let error = conn.recv().await;
    assert_connection_error(&error, ErrorCode::ConnectionError, "Dropping connection");
    conn.recv_eof().await;
    assert!(conn.finish().await.is_ok());
    assert!(conn.fleet.is_empty());
}

#[tokio::test]
async fn fleet_shutdown_drains_idle_connections() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(request_response(1, "ping")).await;
    let _ = conn.recv().await;

    let fleet = std::sync::Arc::clone(&conn.fleet);
    let drain = tokio::spawn(async move { fleet.shutdown(Duration::from_secs(1)).await });

    let error = conn.recv().await;
    assert_connection_error(&error, ErrorCode::ConnectionClose, "Closing idle connection");
    conn.recv_eof().await;
    assert!(conn.finish().await.is_ok());
    drain.await.expect("drain join");
    assert!(conn.fleet.is_empty());
}
