//! Stream bookkeeping owned by the connection task.
//!
//! [`StreamRegistry`] maps stream ids to active subscribers;
//! [`PartialFrames`] parks request contexts whose initial frame carried
//! `FOLLOWS` until the final fragment arrives. Both are touched only on the
//! connection task, so neither needs locking.

use std::collections::HashMap;

use super::{context::FrameContext, subscriber::StreamSubscriber};
use crate::frame::StreamId;

/// Active outbound streams, keyed by stream id.
///
/// An id is present iff its subscriber has neither completed, erred, nor
/// been cancelled.
#[derive(Default)]
pub(crate) struct StreamRegistry {
    streams: HashMap<StreamId, StreamSubscriber>,
}

impl StreamRegistry {
    pub(crate) fn new() -> Self { Self::default() }

    /// Insert a subscriber for a new stream. Returns `false` when the id is
    /// already active, which the connection treats as a protocol violation.
    pub(crate) fn insert(&mut self, id: StreamId, subscriber: StreamSubscriber) -> bool {
        use std::collections::hash_map::Entry;
        match self.streams.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(subscriber);
                true
            }
        }
    }

    pub(crate) fn get_mut(&mut self, id: StreamId) -> Option<&mut StreamSubscriber> {
        self.streams.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: StreamId) -> Option<StreamSubscriber> {
        self.streams.remove(&id)
    }

    /// Take every remaining stream for the shutdown sweep.
    pub(crate) fn drain(&mut self) -> Vec<(StreamId, StreamSubscriber)> {
        self.streams.drain().collect()
    }

    pub(crate) fn len(&self) -> usize { self.streams.len() }

    pub(crate) fn is_empty(&self) -> bool { self.streams.is_empty() }
}

/// Request contexts awaiting continuation fragments.
#[derive(Default)]
pub(crate) struct PartialFrames {
    contexts: HashMap<StreamId, FrameContext>,
}

impl PartialFrames {
    pub(crate) fn new() -> Self { Self::default() }

    /// Park a context. Returns `false` when a partial request already
    /// exists for the id.
    pub(crate) fn insert(&mut self, id: StreamId, context: FrameContext) -> bool {
        use std::collections::hash_map::Entry;
        match self.contexts.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(context);
                true
            }
        }
    }

    pub(crate) fn contains(&self, id: StreamId) -> bool { self.contexts.contains_key(&id) }

    pub(crate) fn get_mut(&mut self, id: StreamId) -> Option<&mut FrameContext> {
        self.contexts.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: StreamId) -> Option<FrameContext> {
        self.contexts.remove(&id)
    }

    /// Drop every parked context. Their retirement events reach the
    /// connection through the event channel as usual.
    pub(crate) fn clear(&mut self) { self.contexts.clear(); }
}
