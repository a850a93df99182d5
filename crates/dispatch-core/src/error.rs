//! The closed set of error kinds the dispatch engine can surface.
//!
//! Retriable errors (`Timeout`, `TransportError`, `BackendTransient`) are
//! handled inside the dispatcher until `maxRetries` is exhausted; everything
//! else surfaces to the caller immediately.

/// Error surfaced by the dispatch engine, either synchronously from
/// `submit`/`cancel` or asynchronously via a `RequestFailed` event.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// Submission rejected before enqueue (e.g. empty prompt and system prompt).
    #[error("invalid request spec: {0}")]
    InvalidSpec(String),

    /// Backpressure: `queueSize >= queueMax`.
    #[error("request queue is full (max {max})")]
    QueueFull { max: usize },

    /// Dispatcher could not assign after retries exhausted.
    #[error("no healthy backend instance available")]
    NoHealthyInstance,

    /// Model Selector found nothing for the requested scenario.
    #[error("no model available for scenario")]
    NoModelAvailable,

    /// Per-request timer expired before a terminal event. Retriable.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Transport-level failure (connection refused, DNS, etc). Retriable.
    #[error("transport error: {0}")]
    TransportError(String),

    /// HTTP 5xx or model-loading. Retriable.
    #[error("backend transient failure: {0}")]
    BackendTransient(String),

    /// HTTP 4xx or malformed response. Not retriable.
    #[error("backend permanent failure: {0}")]
    BackendPermanent(String),

    /// Non-fatal: the stream closed without a final marker. Surfaced
    /// alongside a successful partial result, never alone.
    #[error("stream closed without a final marker")]
    UnterminatedStream,

    /// Terminal; not counted as success or failure. Never produced unless
    /// the caller asked for it.
    #[error("request was cancelled")]
    Cancelled,

    /// Registry operation rejected (e.g. deregister with in-flight requests).
    #[error("registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),
}

impl DispatchError {
    /// Whether the dispatcher is allowed to re-enqueue the request after
    /// this error, subject to `maxRetries` and `autoRetryEnabled`.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DispatchError::Timeout { .. }
                | DispatchError::TransportError(_)
                | DispatchError::BackendTransient(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_kinds_are_exactly_the_documented_three() {
        assert!(DispatchError::Timeout { timeout_ms: 1000 }.is_retriable());
        assert!(DispatchError::TransportError("refused".into()).is_retriable());
        assert!(DispatchError::BackendTransient("503".into()).is_retriable());

        assert!(!DispatchError::BackendPermanent("400".into()).is_retriable());
        assert!(!DispatchError::Cancelled.is_retriable());
        assert!(!DispatchError::NoHealthyInstance.is_retriable());
    }
}
