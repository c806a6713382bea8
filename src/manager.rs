//! Connection manager contract and the default fleet implementation.
//!
//! The connection core registers itself with an injected
//! [`ConnectionManager`] at construction and deregisters when it reaches
//! `Closed`; the manager talks back through [`ControlSignal`]s on the
//! handle. [`ConnectionFleet`] is a ready-made manager that tracks live
//! handles and orchestrates fleet-wide drain and forced shutdown.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use log::info;
use tokio::{sync::mpsc, time::Duration};

use crate::connection::ControlSignal;

/// Identifier assigned to a connection for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next process-unique id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

/// Signalling handle for one live connection, held by the manager.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    control: mpsc::UnboundedSender<ControlSignal>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: ConnectionId, control: mpsc::UnboundedSender<ControlSignal>) -> Self {
        Self { id, control }
    }

    /// Identifier of the connection behind this handle.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Deliver a control signal. Returns `false` when the connection task
    /// has already exited.
    pub fn signal(&self, signal: ControlSignal) -> bool { self.control.send(signal).is_ok() }
}

/// Contract the connection core consumes from its enclosing manager.
pub trait ConnectionManager: Send + Sync + 'static {
    /// A connection came up and can now be signalled through `handle`.
    fn add_connection(&self, handle: ConnectionHandle);

    /// The connection reached `Closed` and released its resources.
    fn remove_connection(&self, id: ConnectionId);
}

/// Default manager tracking every live connection handle.
#[derive(Default)]
pub struct ConnectionFleet {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionFleet {
    /// Create an empty fleet.
    #[must_use]
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize { self.connections.len() }

    /// Whether no connections are live.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.connections.is_empty() }

    /// Broadcast a control signal to every live connection.
    pub fn broadcast(&self, signal: ControlSignal) {
        for entry in &self.connections {
            entry.value().signal(signal);
        }
    }

    /// Graceful fleet shutdown: announce the drain, give connections the
    /// grace period to go idle, then force-close whatever remains.
    pub async fn shutdown(&self, grace: Duration) {
        info!("fleet drain started: connections={}", self.len());
        self.broadcast(ControlSignal::PendingShutdown);
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            self.broadcast(ControlSignal::IdleTimeout);
            if self.is_empty() || tokio::time::Instant::now() >= deadline {
                break;
            }
            let tick = Duration::from_millis(50).min(grace);
            tokio::time::sleep(tick).await;
        }
        if !self.is_empty() {
            info!("fleet drain expired: dropping {} connections", self.len());
            self.broadcast(ControlSignal::Drop);
        }
    }
}

impl ConnectionManager for ConnectionFleet {
    fn add_connection(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id(), handle);
    }

    fn remove_connection(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64) -> (ConnectionHandle, mpsc::UnboundedReceiver<ControlSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(ConnectionId::from(id), tx), rx)
    }

    #[test]
    fn fleet_tracks_added_and_removed_connections() {
        let fleet = ConnectionFleet::new();
        let (first, _rx1) = handle(1);
        let (second, _rx2) = handle(2);

        fleet.add_connection(first);
        fleet.add_connection(second);
        assert_eq!(fleet.len(), 2);

        fleet.remove_connection(ConnectionId::from(1));
        assert_eq!(fleet.len(), 1);
    }

    #[test]
    fn broadcast_reaches_every_connection() {
        let fleet = ConnectionFleet::new();
        let (first, mut rx1) = handle(1);
        let (second, mut rx2) = handle(2);
        fleet.add_connection(first);
        fleet.add_connection(second);

        fleet.broadcast(ControlSignal::PendingShutdown);
        assert!(matches!(rx1.try_recv(), Ok(ControlSignal::PendingShutdown)));
        assert!(matches!(rx2.try_recv(), Ok(ControlSignal::PendingShutdown)));
    }

    #[test]
    fn signalling_a_dead_connection_reports_failure() {
        let (handle, rx) = handle(1);
        drop(rx);
        assert!(!handle.signal(ControlSignal::Drop));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_connections_that_never_go_idle() {
        let fleet = ConnectionFleet::new();
        let (stuck, mut rx) = handle(1);
        fleet.add_connection(stuck);

        let fleet_clone = Arc::clone(&fleet);
        let shutdown = tokio::spawn(async move {
            fleet_clone.shutdown(Duration::from_millis(200)).await;
        });
        shutdown.await.expect("join");

        let mut signals = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            signals.push(signal);
        }
        assert_eq!(signals.first(), Some(&ControlSignal::PendingShutdown));
        assert!(signals.contains(&ControlSignal::IdleTimeout));
        assert_eq!(signals.last(), Some(&ControlSignal::Drop));
    }
}
