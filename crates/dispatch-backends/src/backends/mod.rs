mod ollama;

pub use ollama::{OllamaConfig, OllamaTransport};
