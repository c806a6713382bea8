//! Request/response, fire-and-forget, and framing-rule behaviour observed
//! from the peer's side of the wire.

mod support;

use rocketwire::{
    ConnectionError,
    ErrorCode,
    Flags,
    Frame,
    FrameType,
    Payload,
    StreamId,
    frame::{PayloadFrame, RequestFnfFrame, RequestResponseFrame},
};
use support::{connect, request_response, setup_frame};

fn assert_error(frame: &Frame, stream_id: u32, code: ErrorCode, message: &str) {
    match frame {
        Frame::Error(error) => {
            assert_eq!(error.stream_id, StreamId::new(stream_id));
            assert_eq!(error.code, code);
            assert_eq!(error.message, message);
        }
        other => panic!("expected ERROR frame, got {other:?}"),
    }
}

#[tokio::test]
async fn request_response_echoes_after_setup() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(request_response(1, "ping")).await;

    let response = conn.recv().await;
    match &response {
        Frame::Payload(payload) => {
            assert_eq!(payload.stream_id, StreamId::new(1));
            assert!(payload.flags.next());
            assert!(payload.flags.complete());
            assert_eq!(&payload.payload.data()[..], b"ping");
            assert!(payload.payload.metadata().is_none());
        }
        other => panic!("expected response payload, got {other:?}"),
    }
}

#[tokio::test]
async fn setup_parameters_reach_the_handler() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(request_response(1, "ping")).await;
    let _ = conn.recv().await;

    let setup = conn
        .handler
        .setup
        .lock()
        .expect("setup lock")
        .take()
        .expect("setup frame recorded");
    assert_eq!(setup.version_major, 1);
    assert_eq!(setup.keepalive_interval, 30_000);
    assert_eq!(setup.data_mime_type, "application/octet-stream");
}

#[tokio::test]
async fn data_echo_strips_the_prefix_and_echoes_metadata() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(Frame::RequestResponse(RequestResponseFrame {
        stream_id: StreamId::new(1),
        follows: false,
        payload: Payload::from_parts("meta", "data_echo:XYZ"),
    }))
    .await;

    match conn.recv().await {
        Frame::Payload(payload) => {
            assert_eq!(&payload.payload.data()[..], b"XYZ");
            assert_eq!(payload.payload.metadata().map(|m| &m[..]), Some(&b"meta"[..]));
        }
        other => panic!("expected response payload, got {other:?}"),
    }
}

#[tokio::test]
async fn request_before_setup_closes_with_invalid_setup() {
    let mut conn = connect();
    conn.send(request_response(1, "error:application")).await;

    let error = conn.recv().await;
    assert_error(
        &error,
        0,
        ErrorCode::InvalidSetup,
        "First frame must be SETUP frame",
    );
    conn.recv_eof().await;
    assert!(matches!(
        conn.finish().await,
        Err(ConnectionError::Protocol(_))
    ));
}

#[tokio::test]
async fn a_second_setup_closes_with_invalid_setup() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(setup_frame()).await;

    let error = conn.recv().await;
    assert_error(
        &error,
        0,
        ErrorCode::InvalidSetup,
        "More than one SETUP frame received",
    );
    conn.recv_eof().await;
    assert!(matches!(
        conn.finish().await,
        Err(ConnectionError::Protocol(_))
    ));
}

#[tokio::test]
async fn application_errors_stay_on_their_stream() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(request_response(7, "error:application")).await;

    let error = conn.recv().await;
    assert_error(
        &error,
        7,
        ErrorCode::ApplicationError,
        "Application error occurred",
    );

    // The connection survives the application error.
    conn.send(request_response(9, "still alive")).await;
    match conn.recv().await {
        Frame::Payload(payload) => {
            assert_eq!(payload.stream_id, StreamId::new(9));
            assert_eq!(&payload.payload.data()[..], b"still alive");
        }
        other => panic!("expected response payload, got {other:?}"),
    }
}

#[tokio::test]
async fn unexpected_payload_closes_the_connection() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(Frame::Payload(PayloadFrame::new(
        StreamId::new(9),
        Payload::from_data("orphan"),
        Flags::NEXT,
    )))
    .await;

    let error = conn.recv().await;
    assert_error(
        &error,
        0,
        ErrorCode::Invalid,
        "Unexpected PAYLOAD frame received on stream 9",
    );
    conn.recv_eof().await;
    assert!(matches!(
        conn.finish().await,
        Err(ConnectionError::Protocol(_))
    ));
}

#[tokio::test]
async fn reserved_frame_types_close_with_invalid() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(Frame::Unsupported {
        frame_type: FrameType::Keepalive,
        stream_id: StreamId::CONNECTION,
    })
    .await;

    let error = conn.recv().await;
    assert_error(
        &error,
        0,
        ErrorCode::Invalid,
        "Received unhandleable frame type (KEEPALIVE)",
    );
    conn.recv_eof().await;
}

#[tokio::test]
async fn fragmented_requests_reassemble_before_dispatch() {
    let mut conn = connect();
    conn.send(setup_frame()).await;

    conn.send(Frame::RequestResponse(RequestResponseFrame {
        stream_id: StreamId::new(11),
        follows: true,
        payload: Payload::from_data("data_echo:he"),
    }))
    .await;
    conn.send(Frame::Payload(PayloadFrame::new(
        StreamId::new(11),
        Payload::from_data("llo wo"),
        Flags::NEXT | Flags::FOLLOWS,
    )))
    .await;
    conn.assert_no_frame().await;

    conn.send(Frame::Payload(PayloadFrame::new(
        StreamId::new(11),
        Payload::from_data("rld"),
        Flags::NEXT,
    )))
    .await;

    match conn.recv().await {
        Frame::Payload(payload) => {
            assert_eq!(payload.stream_id, StreamId::new(11));
            assert_eq!(&payload.payload.data()[..], b"hello world");
        }
        other => panic!("expected reassembled echo, got {other:?}"),
    }
}

#[tokio::test]
async fn fire_and_forget_reaches_the_handler_without_a_reply() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(Frame::RequestFnf(RequestFnfFrame {
        stream_id: StreamId::new(3),
        follows: false,
        payload: Payload::from_data("audit line"),
    }))
    .await;

    // Round-trip a request/response to be sure the FNF was dispatched.
    conn.send(request_response(5, "sync")).await;
    let _ = conn.recv().await;

    let recorded = conn.handler.fire_and_forget.lock().expect("fnf lock");
    assert_eq!(recorded.len(), 1);
    assert_eq!(&recorded[0].data()[..], b"audit line");
    drop(recorded);
    conn.assert_no_frame().await;
}

#[tokio::test]
async fn other_error_forms_carry_their_suffix() {
    let mut conn = connect();
    conn.send(setup_frame()).await;
    conn.send(request_response(2, "error:timeout")).await;

    match conn.recv().await {
        Frame::Error(error) => {
            assert_eq!(error.code, ErrorCode::ApplicationError);
            assert_eq!(error.message, "timeout");
        }
        other => panic!("expected ERROR frame, got {other:?}"),
    }
}
