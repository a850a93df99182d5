//! Concrete `BackendTransport` implementations.
//!
//! `dispatch-core` defines the transport boundary; this crate supplies the
//! HTTP client that actually talks to an inference server.

pub mod backends;

pub use backends::{OllamaConfig, OllamaTransport};
