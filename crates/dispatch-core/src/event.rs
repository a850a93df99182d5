//! Event types published on the dispatcher's event bus.
//!
//! Every externally visible state change funnels through one of these
//! variants. The dispatcher never hands callers anything richer than an
//! `(event, metadata)` pair — no shared mutable state crosses the boundary.

use serde::{Deserialize, Serialize};

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Component that published the event (e.g. "dispatcher", "health-supervisor").
    pub source: String,
    /// Unix millis when the event was published.
    pub timestamp: i64,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A lifecycle or administrative event raised by the dispatch engine.
///
/// Variants map directly to the event kinds enumerated by the Submitter API:
/// `Assigned`, `Chunk`, `Completed`, `Failed`, `Cancelled`, `HealthChanged`,
/// `ScaleIntent`, `StatisticsUpdated`, plus a handful the registry and
/// selection layer raise for observability (`InstanceAdded`/`Removed`,
/// `AlgorithmChanged`, `ModelSwitched`, `QueueSizeChanged`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
    /// A request was picked off the queue and handed to an instance.
    RequestAssigned {
        request_id: String,
        instance_id: String,
        model: String,
    },
    /// One ordered chunk of a streaming response.
    Chunk {
        request_id: String,
        text: String,
        is_final: bool,
    },
    /// Terminal success. Exactly one per request, never alongside `RequestFailed`.
    RequestCompleted {
        request_id: String,
        content: String,
        model_used: String,
        response_time_ms: f64,
    },
    /// Terminal failure after retries (if any) were exhausted.
    RequestFailed {
        request_id: String,
        error: String,
        retry_count: u32,
    },
    /// A failed attempt is being retried; not a terminal event.
    RequestRetrying { request_id: String, retry_count: u32 },
    /// Terminal cancellation. Never counted as success or failure.
    RequestCancelled { request_id: String },
    /// A backend instance's health verdict flipped.
    InstanceHealthChanged { instance_id: String, healthy: bool },
    /// Autoscale advisor recommends growing the pool. Advisory only.
    ScaleUpIntent { avg_cpu: f64, avg_mem: f64 },
    /// Autoscale advisor recommends shrinking the pool. Advisory only.
    ScaleDownIntent { instance_id: String },
    /// Aggregate dispatcher statistics changed.
    StatisticsUpdated {
        total_instances: usize,
        healthy_instances: usize,
        active_connections: usize,
        queued_requests: usize,
        average_response_time_ms: f64,
        total_requests: u64,
        successful_requests: u64,
        failed_requests: u64,
        requests_per_second: f64,
    },
    /// A backend instance was registered.
    InstanceAdded { instance_id: String },
    /// A backend instance was deregistered.
    InstanceRemoved { instance_id: String },
    /// The active selection policy changed.
    AlgorithmChanged { algorithm: String },
    /// A model repeatedly failed on an instance; dispatcher failed over to another.
    ModelSwitched {
        from: String,
        to: String,
        reason: String,
    },
    /// The pending-queue size changed.
    QueueSizeChanged { size: usize },
}

impl DispatchEvent {
    /// Stable, human-readable name of the variant — used for logging and filters.
    pub fn type_name(&self) -> &'static str {
        match self {
            DispatchEvent::RequestAssigned { .. } => "RequestAssigned",
            DispatchEvent::Chunk { .. } => "Chunk",
            DispatchEvent::RequestCompleted { .. } => "RequestCompleted",
            DispatchEvent::RequestFailed { .. } => "RequestFailed",
            DispatchEvent::RequestRetrying { .. } => "RequestRetrying",
            DispatchEvent::RequestCancelled { .. } => "RequestCancelled",
            DispatchEvent::InstanceHealthChanged { .. } => "InstanceHealthChanged",
            DispatchEvent::ScaleUpIntent { .. } => "ScaleUpIntent",
            DispatchEvent::ScaleDownIntent { .. } => "ScaleDownIntent",
            DispatchEvent::StatisticsUpdated { .. } => "StatisticsUpdated",
            DispatchEvent::InstanceAdded { .. } => "InstanceAdded",
            DispatchEvent::InstanceRemoved { .. } => "InstanceRemoved",
            DispatchEvent::AlgorithmChanged { .. } => "AlgorithmChanged",
            DispatchEvent::ModelSwitched { .. } => "ModelSwitched",
            DispatchEvent::QueueSizeChanged { .. } => "QueueSizeChanged",
        }
    }

    /// True for any of the request lifecycle events (assigned/chunk/terminal/retry).
    pub fn is_request_event(&self) -> bool {
        matches!(
            self,
            DispatchEvent::RequestAssigned { .. }
                | DispatchEvent::Chunk { .. }
                | DispatchEvent::RequestCompleted { .. }
                | DispatchEvent::RequestFailed { .. }
                | DispatchEvent::RequestRetrying { .. }
                | DispatchEvent::RequestCancelled { .. }
        )
    }

    /// True for the three mutually exclusive terminal events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchEvent::RequestCompleted { .. }
                | DispatchEvent::RequestFailed { .. }
                | DispatchEvent::RequestCancelled { .. }
        )
    }

    /// True for health-supervisor events.
    pub fn is_health_event(&self) -> bool {
        matches!(self, DispatchEvent::InstanceHealthChanged { .. })
    }

    /// True for autoscale-advisor events.
    pub fn is_scale_event(&self) -> bool {
        matches!(
            self,
            DispatchEvent::ScaleUpIntent { .. } | DispatchEvent::ScaleDownIntent { .. }
        )
    }

    /// True for registry membership events.
    pub fn is_registry_event(&self) -> bool {
        matches!(
            self,
            DispatchEvent::InstanceAdded { .. } | DispatchEvent::InstanceRemoved { .. }
        )
    }

    /// The request id carried by request-scoped events, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            DispatchEvent::RequestAssigned { request_id, .. }
            | DispatchEvent::Chunk { request_id, .. }
            | DispatchEvent::RequestCompleted { request_id, .. }
            | DispatchEvent::RequestFailed { request_id, .. }
            | DispatchEvent::RequestRetrying { request_id, .. }
            | DispatchEvent::RequestCancelled { request_id } => Some(request_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_matches_variant() {
        let e = DispatchEvent::RequestAssigned {
            request_id: "r1".into(),
            instance_id: "i1".into(),
            model: "m1".into(),
        };
        assert_eq!(e.type_name(), "RequestAssigned");
        assert!(e.is_request_event());
        assert!(!e.is_terminal());
    }

    #[test]
    fn terminal_events_are_flagged() {
        let e = DispatchEvent::RequestCancelled {
            request_id: "r1".into(),
        };
        assert!(e.is_terminal());
        assert_eq!(e.request_id(), Some("r1"));
    }
}
