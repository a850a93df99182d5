//! Event bus for the dispatch engine.
//!
//! The event bus is how the dispatcher, health supervisor, and autoscale
//! advisor tell the outside world what happened, without handing out a
//! reference to any mutable state. It supports:
//! - Publishing events with automatic metadata generation
//! - Subscribing to all events
//! - Filtered subscriptions for specific event kinds

use crate::event::{DispatchEvent, EventMetadata};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Event bus for the dispatch engine.
///
/// Backed by a broadcast channel; slow subscribers lag rather than block
/// publishers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(DispatchEvent, EventMetadata)>,
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "dispatcher".to_string(),
        }
    }

    /// Create a new event bus with a name (used in logs).
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            tx: broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event with default metadata (source = "dispatcher").
    pub async fn publish(&self, event: DispatchEvent) -> bool {
        self.publish_with_source(event, "dispatcher").await
    }

    /// Publish an event with a custom source.
    pub async fn publish_with_source(
        &self,
        event: DispatchEvent,
        source: impl Into<String>,
    ) -> bool {
        let metadata = EventMetadata::new(source);
        self.publish_with_metadata(event, metadata).await
    }

    /// Publish an event with custom metadata.
    pub async fn publish_with_metadata(
        &self,
        event: DispatchEvent,
        metadata: EventMetadata,
    ) -> bool {
        self.tx.send((event, metadata)).is_ok()
    }

    /// Subscribe to all events.
    ///
    /// If the subscriber falls behind, older events may be dropped.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a filter.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&DispatchEvent) -> bool + Send + 'static,
    {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, filter)
    }

    /// Create a filtered subscription helper for common patterns.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(DispatchEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event. Returns `None` if the bus is closed.
    pub async fn recv(&mut self) -> Option<(DispatchEvent, EventMetadata)> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => self.rx.try_recv().ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(DispatchEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }

    pub fn into_inner(self) -> broadcast::Receiver<(DispatchEvent, EventMetadata)> {
        self.rx
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&DispatchEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(DispatchEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&DispatchEvent) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<(DispatchEvent, EventMetadata)>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next event matching the filter. Returns `None` if closed.
    pub async fn recv(&mut self) -> Option<(DispatchEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(DispatchEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}

/// Builder for creating filtered subscriptions.
pub struct FilterBuilder {
    tx: broadcast::Sender<(DispatchEvent, EventMetadata)>,
}

impl FilterBuilder {
    /// Subscribe to request lifecycle events only (assigned/chunk/terminal/retry).
    pub fn request_events(&self) -> FilteredReceiver<fn(&DispatchEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, DispatchEvent::is_request_event)
    }

    /// Subscribe to terminal events only (completed/failed/cancelled).
    pub fn terminal_events(&self) -> FilteredReceiver<fn(&DispatchEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, DispatchEvent::is_terminal)
    }

    /// Subscribe to health-supervisor events only.
    pub fn health_events(&self) -> FilteredReceiver<fn(&DispatchEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, DispatchEvent::is_health_event)
    }

    /// Subscribe to autoscale-advisor events only.
    pub fn scale_events(&self) -> FilteredReceiver<fn(&DispatchEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, DispatchEvent::is_scale_event)
    }

    /// Subscribe to registry membership events only (added/removed).
    pub fn registry_events(&self) -> FilteredReceiver<fn(&DispatchEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, DispatchEvent::is_registry_event)
    }

    /// Subscribe to events for one request id only.
    pub fn request_by_id(
        &self,
        request_id: impl Into<String>,
    ) -> FilteredReceiver<impl Fn(&DispatchEvent) -> bool + Send + 'static> {
        let target = request_id.into();
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, move |event| event.request_id() == Some(target.as_str()))
    }

    /// Subscribe with a custom filter function.
    pub fn custom<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&DispatchEvent) -> bool + Send + 'static,
    {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, filter)
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

/// Trait for event persistence (reserved for future use; no implementation
/// is mandated — see the Submitter API's "persisted state" note).
pub trait EventPersistence: Send + Sync {
    fn store(&self, event: &DispatchEvent, metadata: &EventMetadata) -> Result<(), PersistError>;

    fn query(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<(DispatchEvent, EventMetadata)>, PersistError>;
}

/// Error type for event persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// No-op persistence implementation — the default, since no persisted
/// state is mandated.
#[derive(Debug, Clone, Default)]
pub struct NoOpPersistence;

impl EventPersistence for NoOpPersistence {
    fn store(&self, _event: &DispatchEvent, _metadata: &EventMetadata) -> Result<(), PersistError> {
        Ok(())
    }

    fn query(
        &self,
        _start: i64,
        _end: i64,
    ) -> Result<Vec<(DispatchEvent, EventMetadata)>, PersistError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assigned(id: &str) -> DispatchEvent {
        DispatchEvent::RequestAssigned {
            request_id: id.to_string(),
            instance_id: "inst-a".to_string(),
            model: "m1".to_string(),
        }
    }

    fn health_changed(id: &str, healthy: bool) -> DispatchEvent {
        DispatchEvent::InstanceHealthChanged {
            instance_id: id.to_string(),
            healthy,
        }
    }

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(assigned("r1")).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.0.type_name(), "RequestAssigned");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(assigned("r1")).await;

        assert_eq!(rx1.recv().await.unwrap().0.type_name(), "RequestAssigned");
        assert_eq!(rx2.recv().await.unwrap().0.type_name(), "RequestAssigned");
    }

    #[tokio::test]
    async fn request_events_filter_excludes_health_events() {
        let bus = EventBus::new();
        let mut rx = bus.filter().request_events();

        bus.publish(health_changed("inst-a", false)).await;
        bus.publish(assigned("r1")).await;

        let received = rx.recv().await.unwrap();
        assert!(received.0.is_request_event());
        assert_eq!(received.0.type_name(), "RequestAssigned");
    }

    #[tokio::test]
    async fn request_by_id_only_matches_target() {
        let bus = EventBus::new();
        let mut rx = bus.filter().request_by_id("r2");

        bus.publish(assigned("r1")).await;
        bus.publish(assigned("r2")).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.0.request_id(), Some("r2"));
    }

    #[tokio::test]
    async fn publish_with_source_is_recorded() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish_with_source(assigned("r1"), "dispatcher-test")
            .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.1.source, "dispatcher-test");
    }

    #[tokio::test]
    async fn subscriber_count_tracks_live_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
    }

    #[tokio::test]
    async fn no_op_persistence_is_inert() {
        let persistence = NoOpPersistence;
        let metadata = EventMetadata::new("test");

        assert!(persistence.store(&assigned("r1"), &metadata).is_ok());
        assert!(persistence.query(0, 100).unwrap().is_empty());
    }

    #[tokio::test]
    async fn shared_event_bus_across_tasks() {
        let bus: SharedEventBus = Arc::new(EventBus::new());
        let bus_clone = Arc::clone(&bus);
        let mut rx = bus.subscribe();

        tokio::spawn(async move {
            bus_clone.publish(assigned("r1")).await;
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.0.type_name(), "RequestAssigned");
    }

    #[tokio::test]
    async fn try_recv_returns_none_until_published() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        assert!(rx.try_recv().is_none());
        bus.publish(assigned("r1")).await;
        assert!(rx.try_recv().is_some());
    }
}
