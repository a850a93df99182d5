//! The injected backend transport boundary.
//!
//! No wire format is mandated by the core; compatibility with an
//! Ollama-style HTTP API is a typical choice (JSON request body with
//! `model`/`prompt`/`system`/`stream`/`options`; JSON-lines stream of
//! `{response, done}` objects) — see the `dispatch-backends` crate for a
//! concrete implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::DispatchError;
use crate::model::{BackendInstance, GenerationOptions, ModelInfo, Response};

/// One raw chunk as produced by the transport: an incremental text slice
/// plus a done flag. The executor stamps a request id onto this to produce
/// the public `StreamChunk` event.
pub type RawChunk = Result<(String, bool), DispatchError>;

/// Parameters for one generation call, independent of which instance or
/// model will serve it.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub system_prompt: String,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: String::new(),
            options: GenerationOptions::new(),
        }
    }
}

/// The interface the Request Executor drives to talk to a backend instance.
///
/// Implementations own the HTTP (or other transport) client; the core
/// never constructs requests or parses responses itself.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Ask the instance for its current model catalog.
    async fn list_models(&self, instance: &BackendInstance) -> Result<Vec<ModelInfo>, DispatchError>;

    /// Drive a non-streaming generation call to completion.
    async fn generate(
        &self,
        instance: &BackendInstance,
        request: &GenerationRequest,
    ) -> Result<Response, DispatchError>;

    /// Drive a streaming generation call. The returned stream yields raw
    /// chunks in the order produced by the backend; the last item is
    /// `Ok((_, true))` unless the stream is aborted or closes early.
    async fn generate_stream(
        &self,
        instance: &BackendInstance,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, RawChunk>, DispatchError>;
}
