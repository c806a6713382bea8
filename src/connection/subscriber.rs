//! Per-stream outbound state machine and its producer handle.
//!
//! A [`StreamSubscriber`] lives in the stream registry and is driven on the
//! connection task; the matching [`StreamProducer`] is handed to the
//! application handler and delivers items by posting events back to the
//! connection. Demand gates emission: a `PAYLOAD(NEXT)` leaves the
//! connection only against credit granted by `REQUEST_N` (or the stream's
//! initial demand). Items delivered without credit are buffered up to a
//! soft limit; overrunning the limit fails the stream with
//! `APPLICATION_ERROR`.
//!
//! Cancellation from either side is a flag check on the next delivery: the
//! subscriber cancels the shared token, and the producer's next `send`
//! observes it.

use std::collections::VecDeque;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::event::ConnectionEvent;
use crate::{
    error::RocketError,
    frame::{ErrorFrame, Flags, Frame, Payload, PayloadFrame, StreamId},
};

/// Lifecycle of a stream's outbound side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SubscriberState {
    /// No credit; emission waits for `REQUEST_N`.
    PendingDemand,
    /// Credit available; items flow as they are delivered.
    Producing,
    /// Producer finished but buffered items still await credit.
    Completing,
    /// Peer or server cancelled the stream.
    Cancelled,
    /// The stream failed; an `ERROR` frame was emitted.
    Erred,
    /// The terminal `PAYLOAD(COMPLETE)` was emitted.
    Terminal,
}

/// Outbound state machine for one stream, owned by the registry.
pub(crate) struct StreamSubscriber {
    stream_id: StreamId,
    state: SubscriberState,
    demand: u32,
    buffered: VecDeque<Payload>,
    buffer_limit: usize,
    cancel: CancellationToken,
    demand_tx: watch::Sender<u32>,
}

impl StreamSubscriber {
    /// Build a subscriber/producer pair for a freshly opened stream.
    pub(crate) fn create(
        stream_id: StreamId,
        initial_request_n: u32,
        buffer_limit: usize,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> (Self, StreamProducer) {
        let cancel = CancellationToken::new();
        let (demand_tx, demand_rx) = watch::channel(initial_request_n);
        let subscriber = Self {
            stream_id,
            state: if initial_request_n > 0 {
                SubscriberState::Producing
            } else {
                SubscriberState::PendingDemand
            },
            demand: initial_request_n,
            buffered: VecDeque::new(),
            buffer_limit,
            cancel: cancel.clone(),
            demand_tx,
        };
        let producer = StreamProducer {
            stream_id,
            events,
            cancel,
            demand_rx,
            finished: false,
        };
        (subscriber, producer)
    }

    /// An item arrived from the producer. Emits it against available credit
    /// or buffers it, failing the stream when the buffer overruns.
    pub(crate) fn on_next(&mut self, payload: Payload) -> Vec<Frame> {
        match self.state {
            SubscriberState::PendingDemand | SubscriberState::Producing => {
                if self.demand > 0 {
                    self.demand -= 1;
                    self.publish_demand();
                    self.state = if self.demand > 0 {
                        SubscriberState::Producing
                    } else {
                        SubscriberState::PendingDemand
                    };
                    vec![self.payload_frame(payload)]
                } else if self.buffered.len() >= self.buffer_limit {
                    self.fail(RocketError::application(format!(
                        "stream {} exceeded the {}-item buffer limit",
                        self.stream_id, self.buffer_limit
                    )))
                } else {
                    self.buffered.push_back(payload);
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// The producer finished. Emits the terminal `PAYLOAD(COMPLETE)` once
    /// buffered items have drained.
    pub(crate) fn on_complete(&mut self) -> Vec<Frame> {
        match self.state {
            SubscriberState::PendingDemand | SubscriberState::Producing => {
                if self.buffered.is_empty() {
                    self.state = SubscriberState::Terminal;
                    vec![self.complete_frame()]
                } else {
                    self.state = SubscriberState::Completing;
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// The producer failed. Emits the stream-level `ERROR` frame.
    pub(crate) fn on_error(&mut self, error: RocketError) -> Vec<Frame> {
        match self.state {
            SubscriberState::Cancelled | SubscriberState::Erred | SubscriberState::Terminal => {
                Vec::new()
            }
            _ => self.fail(error),
        }
    }

    /// Grant `n` credits, saturating at `u32::MAX`, and drain buffered
    /// items against them.
    pub(crate) fn request(&mut self, n: u32) -> Vec<Frame> {
        match self.state {
            SubscriberState::Cancelled | SubscriberState::Erred | SubscriberState::Terminal => {
                return Vec::new();
            }
            _ => {}
        }
        self.demand = self.demand.saturating_add(n);
        let mut out = Vec::new();
        while self.demand > 0 {
            let Some(payload) = self.buffered.pop_front() else {
                break;
            };
            self.demand -= 1;
            out.push(self.payload_frame(payload));
        }
        if self.state == SubscriberState::Completing && self.buffered.is_empty() {
            self.state = SubscriberState::Terminal;
            out.push(self.complete_frame());
        } else if self.state != SubscriberState::Completing {
            self.state = if self.demand > 0 {
                SubscriberState::Producing
            } else {
                SubscriberState::PendingDemand
            };
        }
        self.publish_demand();
        out
    }

    /// Cancel the stream: no outbound frame, buffered items dropped, the
    /// producer observes cancellation on its next delivery.
    pub(crate) fn cancel(&mut self) {
        self.buffered.clear();
        self.state = SubscriberState::Cancelled;
        self.cancel.cancel();
        self.demand_tx.send_replace(0);
    }

    /// Whether the stream reached a terminal state and must leave the
    /// registry.
    pub(crate) fn is_finished(&self) -> bool {
        matches!(
            self.state,
            SubscriberState::Cancelled | SubscriberState::Erred | SubscriberState::Terminal
        )
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SubscriberState { self.state }

    fn fail(&mut self, error: RocketError) -> Vec<Frame> {
        self.buffered.clear();
        self.state = SubscriberState::Erred;
        self.cancel.cancel();
        self.demand_tx.send_replace(0);
        let (code, message) = error.into_parts();
        vec![Frame::Error(ErrorFrame {
            stream_id: self.stream_id,
            code,
            message,
        })]
    }

    fn payload_frame(&self, payload: Payload) -> Frame {
        Frame::Payload(PayloadFrame::new(self.stream_id, payload, Flags::NEXT))
    }

    fn complete_frame(&self) -> Frame {
        Frame::Payload(PayloadFrame::new(
            self.stream_id,
            Payload::empty(),
            Flags::COMPLETE,
        ))
    }

    fn publish_demand(&self) {
        self.demand_tx.send_replace(self.demand);
    }
}

impl Drop for StreamSubscriber {
    fn drop(&mut self) {
        // Retirement for any reason leaves a producer that must observe
        // cancellation rather than deliver into the void.
        self.cancel.cancel();
    }
}

/// The stream is gone: cancelled by the peer, failed, or the connection
/// closed.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("stream closed")]
pub struct StreamClosed;

/// Handle the application uses to produce items for one stream.
///
/// Delivery is ordered and demand-aware: [`send`](Self::send) may outpace
/// granted credit by a bounded amount (the connection buffers up to its
/// soft limit), while [`wait_for_demand`](Self::wait_for_demand) lets a
/// lazy producer pace itself against outstanding credit. Dropping the
/// handle without [`complete`](Self::complete) or [`error`](Self::error)
/// cancels the stream silently.
pub struct StreamProducer {
    stream_id: StreamId,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    cancel: CancellationToken,
    demand_rx: watch::Receiver<u32>,
    finished: bool,
}

impl StreamProducer {
    /// Stream this producer feeds.
    #[must_use]
    pub fn stream_id(&self) -> StreamId { self.stream_id }

    /// Whether the stream has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    /// Wait until the stream is cancelled.
    pub async fn cancelled(&self) { self.cancel.cancelled().await; }

    /// Credit currently available to this stream.
    #[must_use]
    pub fn demand(&self) -> u32 { *self.demand_rx.borrow() }

    /// Wait until at least one credit is available.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClosed`] once the stream is cancelled or the
    /// connection is gone.
    pub async fn wait_for_demand(&mut self) -> Result<u32, StreamClosed> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(StreamClosed);
            }
            let current = *self.demand_rx.borrow_and_update();
            if current > 0 {
                return Ok(current);
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Err(StreamClosed),
                changed = self.demand_rx.changed() => {
                    if changed.is_err() {
                        return Err(StreamClosed);
                    }
                }
            }
        }
    }

    /// Deliver one item.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClosed`] once the stream is cancelled or the
    /// connection is gone.
    pub fn send(&self, payload: Payload) -> Result<(), StreamClosed> {
        if self.cancel.is_cancelled() {
            return Err(StreamClosed);
        }
        self.events
            .send(ConnectionEvent::StreamNext {
                stream_id: self.stream_id,
                payload,
            })
            .map_err(|_| StreamClosed)
    }

    /// Finish the stream cleanly. The connection emits the terminal
    /// `PAYLOAD(COMPLETE)` once buffered items drain.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClosed`] once the stream is cancelled or the
    /// connection is gone.
    pub fn complete(mut self) -> Result<(), StreamClosed> {
        self.finished = true;
        if self.cancel.is_cancelled() {
            return Err(StreamClosed);
        }
        self.events
            .send(ConnectionEvent::StreamComplete {
                stream_id: self.stream_id,
            })
            .map_err(|_| StreamClosed)
    }

    /// Fail the stream. The connection emits a stream-level `ERROR` frame.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClosed`] once the stream is cancelled or the
    /// connection is gone.
    pub fn error(mut self, error: RocketError) -> Result<(), StreamClosed> {
        self.finished = true;
        if self.cancel.is_cancelled() {
            return Err(StreamClosed);
        }
        self.events
            .send(ConnectionEvent::StreamError {
                stream_id: self.stream_id,
                error,
            })
            .map_err(|_| StreamClosed)
    }

    /// Cancel the stream locally: no frame is emitted.
    pub fn cancel(mut self) {
        self.finished = true;
        let _ = self.events.send(ConnectionEvent::StreamCancel {
            stream_id: self.stream_id,
        });
    }
}

impl Drop for StreamProducer {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.events.send(ConnectionEvent::StreamCancel {
                stream_id: self.stream_id,
            });
        }
    }
}
