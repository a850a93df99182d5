//! Ollama-compatible backend transport.
//!
//! No wire format is mandated by the core; this implementation targets
//! Ollama's native HTTP API — a JSON body with `model`/`prompt`/`system`/
//! `stream`/`options`, and a JSON-lines stream of `{response, done}` objects
//! for the streaming case.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dispatch_core::error::DispatchError;
use dispatch_core::model::{BackendInstance, ModelInfo, Response};
use dispatch_core::transport::{BackendTransport, GenerationRequest, RawChunk};

fn default_timeout_secs() -> u64 {
    180
}

/// Connection parameters for one Ollama endpoint.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl OllamaConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint.into()),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Ollama uses its native API, not the OpenAI-compatible one — strip a
/// stray `/v1` suffix callers might have copied from elsewhere.
fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string()
}

/// `BackendTransport` implementation speaking Ollama's native HTTP API.
///
/// One `OllamaTransport` is shared across every registered instance that
/// happens to be an Ollama endpoint; the instance's `address` field supplies
/// the per-call endpoint.
pub struct OllamaTransport {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl OllamaTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            default_timeout: Duration::from_secs(default_timeout_secs()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn endpoint_for(&self, instance: &BackendInstance) -> String {
        normalize_endpoint(instance.address.clone())
    }
}

impl Default for OllamaTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    stream: bool,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaTagModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagModel {
    name: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    details: Option<OllamaModelDetails>,
}

#[derive(Debug, Deserialize, Default)]
struct OllamaModelDetails {
    #[serde(default)]
    family: String,
    #[serde(default)]
    parameter_size: String,
    #[serde(default)]
    quantization_level: String,
}

fn build_request(request: &GenerationRequest, stream: bool) -> OllamaGenerateRequest {
    let options = request
        .options
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    OllamaGenerateRequest {
        model: request.model.clone(),
        prompt: request.prompt.clone(),
        system: request.system_prompt.clone(),
        stream,
        options,
    }
}

fn classify_status(status: reqwest::StatusCode) -> DispatchError {
    if status.is_server_error() || status.as_u16() == 503 {
        DispatchError::BackendTransient(format!("ollama returned {}", status))
    } else {
        DispatchError::BackendPermanent(format!("ollama returned {}", status))
    }
}

#[async_trait]
impl BackendTransport for OllamaTransport {
    async fn list_models(&self, instance: &BackendInstance) -> Result<Vec<ModelInfo>, DispatchError> {
        let url = format!("{}/api/tags", self.endpoint_for(instance));

        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| DispatchError::TransportError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(classify_status(resp.status()));
        }

        let parsed: OllamaTagsResponse = resp
            .json()
            .await
            .map_err(|e| DispatchError::BackendPermanent(format!("malformed /api/tags body: {e}")))?;

        Ok(parsed
            .models
            .into_iter()
            .map(|m| {
                let details = m.details.unwrap_or_default();
                ModelInfo {
                    name: m.name,
                    family: details.family,
                    parameter_size: details.parameter_size,
                    quantization: details.quantization_level,
                    digest: m.digest,
                    avg_response_time_ms: 0.0,
                    success_count: 0,
                    error_count: 0,
                    available: true,
                }
            })
            .collect())
    }

    async fn generate(
        &self,
        instance: &BackendInstance,
        request: &GenerationRequest,
    ) -> Result<Response, DispatchError> {
        let url = format!("{}/api/generate", self.endpoint_for(instance));
        let body = build_request(request, false);
        let started = std::time::Instant::now();

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.default_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout {
                        timeout_ms: self.default_timeout.as_millis() as u64,
                    }
                } else {
                    DispatchError::TransportError(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(classify_status(resp.status()));
        }

        let parsed: OllamaGenerateResponse = resp
            .json()
            .await
            .map_err(|e| DispatchError::BackendPermanent(format!("malformed /api/generate body: {e}")))?;

        let mut response = Response::success(
            parsed.response,
            request.model.clone(),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        response.token_count = parsed.eval_count;
        Ok(response)
    }

    async fn generate_stream(
        &self,
        instance: &BackendInstance,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, RawChunk>, DispatchError> {
        let url = format!("{}/api/generate", self.endpoint_for(instance));
        let body = build_request(request, true);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.default_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout {
                        timeout_ms: self.default_timeout.as_millis() as u64,
                    }
                } else {
                    DispatchError::TransportError(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(classify_status(resp.status()));
        }

        let (tx, rx) = mpsc::channel::<RawChunk>(64);

        tokio::spawn(async move {
            let mut byte_stream = resp.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(DispatchError::TransportError(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<OllamaGenerateResponse>(&line) {
                        Ok(parsed) => {
                            if tx.send(Ok((parsed.response, parsed.done))).await.is_err() {
                                return;
                            }
                            if parsed.done {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("failed to parse ollama stream line: {e}");
                        }
                    }
                }
            }

            // Stream closed without a `done: true` line — the caller
            // synthesizes the missing final marker.
            debug!("ollama stream ended without a final marker");
        });

        let out = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });

        Ok(out.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_strips_v1_and_trailing_slash() {
        assert_eq!(
            normalize_endpoint("http://localhost:11434/v1/".to_string()),
            "http://localhost:11434"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:11434/".to_string()),
            "http://localhost:11434"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:11434".to_string()),
            "http://localhost:11434"
        );
    }

    #[test]
    fn build_request_carries_opaque_options_through() {
        let mut req = GenerationRequest::new("qwen3:8b", "hello");
        req.options
            .insert("temperature".to_string(), serde_json::json!(0.2));

        let body = build_request(&req, true);
        assert_eq!(body.model, "qwen3:8b");
        assert!(body.stream);
        assert_eq!(body.options.get("temperature").unwrap(), &serde_json::json!(0.2));
    }

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mock_instance(server: &MockServer) -> BackendInstance {
        BackendInstance::new("mock", "mock", server.uri())
    }

    #[tokio::test]
    async fn list_models_parses_tags_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{
                    "name": "qwen3:8b",
                    "digest": "abc123",
                    "details": {
                        "family": "qwen3",
                        "parameter_size": "8B",
                        "quantization_level": "Q4_0",
                    }
                }]
            })))
            .mount(&server)
            .await;

        let transport = OllamaTransport::new();
        let models = transport.list_models(&mock_instance(&server)).await.unwrap();

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "qwen3:8b");
        assert_eq!(models[0].family, "qwen3");
        assert_eq!(models[0].digest, "abc123");
        assert!(models[0].available);
    }

    #[tokio::test]
    async fn list_models_surfaces_server_error_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = OllamaTransport::new();
        let err = transport.list_models(&mock_instance(&server)).await.unwrap_err();
        assert!(matches!(err, DispatchError::BackendTransient(_)));
    }

    #[tokio::test]
    async fn generate_parses_non_streaming_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "hello world",
                "done": true,
                "eval_count": 4,
            })))
            .mount(&server)
            .await;

        let transport = OllamaTransport::new();
        let request = GenerationRequest::new("qwen3:8b", "hi");
        let response = transport
            .generate(&mock_instance(&server), &request)
            .await
            .unwrap();

        assert!(response.ok);
        assert_eq!(response.content, "hello world");
        assert_eq!(response.token_count, Some(4));
    }

    #[tokio::test]
    async fn generate_maps_client_error_to_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let transport = OllamaTransport::new();
        let request = GenerationRequest::new("qwen3:8b", "hi");
        let err = transport
            .generate(&mock_instance(&server), &request)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::BackendPermanent(_)));
    }

    #[tokio::test]
    async fn generate_stream_parses_jsonlines_chunks_in_order() {
        let server = MockServer::start().await;
        let body = [
            serde_json::json!({"response": "Hel", "done": false}).to_string(),
            serde_json::json!({"response": "lo", "done": false}).to_string(),
            serde_json::json!({"response": " world", "done": true}).to_string(),
        ]
        .join("\n")
            + "\n";

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let transport = OllamaTransport::new();
        let request = GenerationRequest::new("qwen3:8b", "hi");
        let mut stream = transport
            .generate_stream(&mock_instance(&server), &request)
            .await
            .unwrap();

        let mut collected = Vec::new();
        while let Some(item) = stream.next().await {
            collected.push(item.unwrap());
        }

        assert_eq!(
            collected,
            vec![
                ("Hel".to_string(), false),
                ("lo".to_string(), false),
                (" world".to_string(), true),
            ]
        );
    }
}
