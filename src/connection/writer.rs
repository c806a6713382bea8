//! Outbound write batching.
//!
//! Frames enqueued during one loop iteration are serialised into a single
//! staging buffer and flushed with one socket write. Enqueue order is
//! preserved, so per-stream frame order is too. A failed flush reports how
//! many bytes of the batch reached the socket; the connection escalates it
//! to a `CONNECTION_ERROR` close — there is no mid-frame resync.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;

use crate::frame::{Frame, FrameCodec};

/// A batched write that failed partway through.
#[derive(Debug)]
pub(crate) struct WriteFailure {
    /// Bytes of the batch accepted by the socket before the error.
    pub(crate) bytes_written: usize,
    /// Underlying socket error.
    pub(crate) source: io::Error,
}

/// Staging buffer coalescing outbound frames into single writes.
pub(crate) struct WriteBatcher {
    codec: FrameCodec,
    buf: BytesMut,
}

impl WriteBatcher {
    pub(crate) fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::new(),
        }
    }

    /// Serialise a frame onto the pending batch.
    ///
    /// # Errors
    ///
    /// Fails only when the encoded frame would exceed the codec's maximum
    /// frame length.
    pub(crate) fn enqueue(&mut self, frame: &Frame) -> io::Result<()> {
        Encoder::<&Frame>::encode(&mut self.codec, frame, &mut self.buf)
    }

    /// Whether a flush is pending.
    pub(crate) fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Discard any pending bytes without writing them.
    pub(crate) fn discard(&mut self) { self.buf.clear(); }

    /// Write the whole pending batch with one write per readiness, then
    /// flush the transport.
    pub(crate) async fn flush<W>(&mut self, io: &mut W) -> Result<(), WriteFailure>
    where
        W: AsyncWrite + Unpin,
    {
        let pending = self.buf.split();
        let mut written = 0;
        while written < pending.len() {
            match io.write(&pending[written..]).await {
                Ok(0) => {
                    return Err(WriteFailure {
                        bytes_written: written,
                        source: io::ErrorKind::WriteZero.into(),
                    });
                }
                Ok(n) => written += n,
                Err(source) => {
                    return Err(WriteFailure {
                        bytes_written: written,
                        source,
                    });
                }
            }
        }
        io.flush().await.map_err(|source| WriteFailure {
            bytes_written: written,
            source,
        })
    }
}
