//! Shared harness for connection-level tests: a reference handler plus a
//! frame-level client driven over an in-memory duplex transport.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rocketwire::{
    ConnectionConfig,
    ConnectionCore,
    ConnectionError,
    ConnectionFleet,
    ConnectionManager,
    Flags,
    Frame,
    FrameCodec,
    FrameContext,
    FrameHandler,
    Payload,
    RocketError,
    StreamId,
    StreamProducer,
    frame::{
        RequestFnfFrame,
        RequestNFrame,
        RequestResponseFrame,
        RequestStreamFrame,
        SetupFrame,
    },
};
use tokio::{io::DuplexStream, task::JoinHandle, time::Duration};
use tokio_util::codec::Framed;

/// Reference handler: echoes requests, generates streams, and maps
/// `error:*` data to application errors.
#[derive(Default)]
pub struct EchoHandler {
    pub setup: Mutex<Option<SetupFrame>>,
    pub fire_and_forget: Mutex<Vec<Payload>>,
}

fn strip_prefix<'a>(data: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    data.strip_prefix(prefix)
}

fn error_for(rest: &[u8]) -> RocketError {
    if rest == b"application" {
        RocketError::application("Application error occurred")
    } else {
        RocketError::application(String::from_utf8_lossy(rest))
    }
}

#[async_trait]
impl FrameHandler for EchoHandler {
    async fn handle_setup(&self, frame: SetupFrame, _context: FrameContext) {
        *self.setup.lock().expect("setup lock") = Some(frame);
    }

    async fn handle_request_response(&self, frame: RequestResponseFrame, context: FrameContext) {
        let payload = frame.payload;
        let data = payload.data().clone();

        if let Some(rest) = strip_prefix(&data, b"error:") {
            context.send_error(error_for(rest));
            return;
        }

        let response = if let Some(rest) = strip_prefix(&data, b"data_echo:") {
            Payload::new(
                payload.metadata().cloned(),
                data.slice(data.len() - rest.len()..),
            )
        } else if let Some(rest) = strip_prefix(&data, b"metadata_echo:") {
            Payload::new(Some(data.slice(data.len() - rest.len()..)), data.clone())
        } else {
            payload
        };
        context.send_payload(response, Flags::NEXT | Flags::COMPLETE);
    }

    async fn handle_request_fnf(&self, frame: RequestFnfFrame, _context: FrameContext) {
        self.fire_and_forget
            .lock()
            .expect("fnf lock")
            .push(frame.payload);
    }

    async fn handle_request_stream(&self, frame: RequestStreamFrame, mut producer: StreamProducer) {
        let data = frame.payload.data();
        if let Some(rest) = strip_prefix(data, b"error:") {
            let _ = producer.error(error_for(rest));
            return;
        }

        let count = strip_prefix(data, b"generate:")
            .and_then(|rest| std::str::from_utf8(rest).ok())
            .and_then(|rest| rest.parse::<usize>().ok())
            .unwrap_or(500);

        for i in 0..count {
            if producer.wait_for_demand().await.is_err() {
                return;
            }
            let item = Payload::from_parts(format!("metadata:{i}"), format!("{i}"));
            if producer.send(item).is_err() {
                return;
            }
        }
        let _ = producer.complete();
    }
}

/// A live server connection with a frame-level client on the other end.
pub struct TestConnection {
    pub client: Framed<DuplexStream, FrameCodec>,
    pub fleet: Arc<ConnectionFleet>,
    pub handler: Arc<EchoHandler>,
    pub task: JoinHandle<Result<(), ConnectionError>>,
}

impl TestConnection {
    /// Next frame from the server, or a panic after two seconds.
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(2), self.client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed while waiting for a frame")
            .expect("client-side decode failed")
    }

    /// Assert the server stays quiet for a little while.
    pub async fn assert_no_frame(&mut self) {
        let outcome =
            tokio::time::timeout(Duration::from_millis(100), self.client.next()).await;
        assert!(outcome.is_err(), "unexpected frame: {outcome:?}");
    }

    /// Assert the server closed the transport.
    pub async fn recv_eof(&mut self) {
        let outcome = tokio::time::timeout(Duration::from_secs(2), self.client.next())
            .await
            .expect("timed out waiting for EOF");
        assert!(outcome.is_none(), "expected EOF, got {outcome:?}");
    }

    pub async fn send(&mut self, frame: Frame) {
        self.client.send(frame).await.expect("client send");
    }

    /// Join the connection task and return its outcome.
    pub async fn finish(&mut self) -> Result<(), ConnectionError> {
        tokio::time::timeout(Duration::from_secs(2), &mut self.task)
            .await
            .expect("connection task did not finish")
            .expect("connection task panicked")
    }
}

/// Spawn a server connection over an in-memory duplex transport.
pub fn connect_with(config: ConnectionConfig) -> TestConnection {
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let fleet = ConnectionFleet::new();
    let handler = Arc::new(EchoHandler::default());
    let core = ConnectionCore::new(
        server_io,
        Arc::clone(&handler),
        Arc::clone(&fleet) as Arc<dyn ConnectionManager>,
        config,
    );
    let task = tokio::spawn(core.run());
    TestConnection {
        client: Framed::new(client_io, FrameCodec::new(config.max_frame_length())),
        fleet,
        handler,
        task,
    }
}

/// Spawn a server connection with default configuration.
pub fn connect() -> TestConnection { connect_with(ConnectionConfig::default()) }

/// A minimal, well-formed SETUP frame.
pub fn setup_frame() -> Frame {
    Frame::Setup(SetupFrame {
        stream_id: StreamId::CONNECTION,
        version_major: 1,
        version_minor: 0,
        keepalive_interval: 30_000,
        max_lifetime: 3_600_000,
        resume_token: None,
        metadata_mime_type: "application/octet-stream".to_owned(),
        data_mime_type: "application/octet-stream".to_owned(),
        payload: Payload::empty(),
    })
}

pub fn request_response(stream_id: u32, data: &str) -> Frame {
    Frame::RequestResponse(RequestResponseFrame {
        stream_id: StreamId::new(stream_id),
        follows: false,
        payload: Payload::from_data(data.to_owned()),
    })
}

pub fn request_stream(stream_id: u32, initial_request_n: u32, data: &str) -> Frame {
    Frame::RequestStream(RequestStreamFrame {
        stream_id: StreamId::new(stream_id),
        follows: false,
        initial_request_n,
        payload: Payload::from_data(data.to_owned()),
    })
}

pub fn request_n(stream_id: u32, n: u32) -> Frame {
    Frame::RequestN(RequestNFrame {
        stream_id: StreamId::new(stream_id),
        n,
    })
}

pub fn cancel(stream_id: u32) -> Frame {
    Frame::Cancel(rocketwire::frame::CancelFrame {
        stream_id: StreamId::new(stream_id),
    })
}

/// Assert a frame is `PAYLOAD(NEXT)` on `stream_id` carrying the expected
/// stream item.
pub fn assert_stream_item(frame: &Frame, stream_id: u32, index: usize) {
    match frame {
        Frame::Payload(payload) => {
            assert_eq!(payload.stream_id, StreamId::new(stream_id));
            assert!(payload.flags.next(), "item must carry NEXT: {payload:?}");
            assert!(!payload.flags.complete());
            assert_eq!(
                payload.payload.metadata().map(|m| &m[..]),
                Some(format!("metadata:{index}").as_bytes()),
            );
            assert_eq!(&payload.payload.data()[..], format!("{index}").as_bytes());
        }
        other => panic!("expected stream item, got {other:?}"),
    }
}

/// Assert a frame is the empty terminal `PAYLOAD(COMPLETE)` for
/// `stream_id`.
pub fn assert_stream_complete(frame: &Frame, stream_id: u32) {
    match frame {
        Frame::Payload(payload) => {
            assert_eq!(payload.stream_id, StreamId::new(stream_id));
            assert!(payload.flags.complete(), "terminal must carry COMPLETE");
            assert!(!payload.flags.next());
            assert!(payload.payload.is_empty());
        }
        other => panic!("expected stream completion, got {other:?}"),
    }
}
