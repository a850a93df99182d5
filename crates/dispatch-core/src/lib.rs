//! Core types shared across the dispatch engine: data model, error kinds,
//! the event bus, dispatcher configuration, and the injected backend
//! transport boundary.
//!
//! This crate has no opinions about *how* requests get scheduled — that
//! lives in `dispatch-engine` — only about the vocabulary every other crate
//! speaks.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod model;
pub mod registry;
pub mod transport;

pub use config::DispatcherConfig;
pub use error::DispatchError;
pub use event::{DispatchEvent, EventMetadata};
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, FilterBuilder, FilteredReceiver,
    NoOpPersistence, PersistError, SharedEventBus,
};
pub use model::{
    BackendInstance, GenerationOptions, ModelInfo, ModelSelectionStrategy, RequestSpec,
    RequestState, RequestStatus, Response, ScenarioTag, Statistics, StreamChunk,
};
pub use registry::{Registry, RegistryError};
pub use transport::{BackendTransport, GenerationRequest, RawChunk};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::DispatcherConfig;
    pub use crate::error::DispatchError;
    pub use crate::event::{DispatchEvent, EventMetadata};
    pub use crate::eventbus::{EventBus, SharedEventBus};
    pub use crate::model::{
        BackendInstance, GenerationOptions, ModelInfo, ModelSelectionStrategy, RequestSpec,
        RequestState, RequestStatus, Response, ScenarioTag, StreamChunk,
    };
    pub use crate::registry::{Registry, RegistryError};
    pub use crate::transport::{BackendTransport, GenerationRequest, RawChunk};
}
