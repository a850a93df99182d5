//! Request Executor: drives one generation attempt over the injected
//! transport, parsing streaming chunks and emitting lifecycle events in
//! order.
//!
//! Grounded on spec §4.F. Retry and model-failover decisions live in the
//! dispatcher, which owns the request's lifetime across attempts; this
//! module only knows how to run a single attempt to completion (or
//! timeout).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::warn;

use dispatch_core::error::DispatchError;
use dispatch_core::event::DispatchEvent;
use dispatch_core::eventbus::SharedEventBus;
use dispatch_core::model::{BackendInstance, RequestSpec, Response};
use dispatch_core::transport::{BackendTransport, GenerationRequest};

/// Outcome of one attempt, independent of retry bookkeeping.
pub enum AttemptOutcome {
    Success { response: Response },
    Failure { error: DispatchError, response_time_ms: f64 },
}

fn generation_request(spec: &RequestSpec, model: &str) -> GenerationRequest {
    GenerationRequest {
        model: model.to_string(),
        prompt: spec.prompt.clone(),
        system_prompt: spec.system_prompt.clone(),
        options: spec.options.clone(),
    }
}

/// Run one attempt: non-streaming awaits the full response, streaming reads
/// chunks and publishes a `Chunk` event for each, in order, before the
/// terminal event.
pub async fn run_attempt(
    transport: &Arc<dyn BackendTransport>,
    events: &SharedEventBus,
    instance: &BackendInstance,
    model: &str,
    spec: &RequestSpec,
) -> AttemptOutcome {
    let started = std::time::Instant::now();
    let timeout = Duration::from_millis(spec.timeout_ms);
    let request = generation_request(spec, model);

    if spec.stream {
        run_streaming(transport, events, instance, &request, &spec.id, timeout, started).await
    } else {
        run_non_streaming(transport, instance, &request, timeout, started).await
    }
}

async fn run_non_streaming(
    transport: &Arc<dyn BackendTransport>,
    instance: &BackendInstance,
    request: &GenerationRequest,
    timeout: Duration,
    started: std::time::Instant,
) -> AttemptOutcome {
    match tokio::time::timeout(timeout, transport.generate(instance, request)).await {
        Ok(Ok(response)) => AttemptOutcome::Success { response },
        Ok(Err(error)) => AttemptOutcome::Failure {
            error,
            response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        },
        Err(_) => AttemptOutcome::Failure {
            error: DispatchError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        },
    }
}

async fn run_streaming(
    transport: &Arc<dyn BackendTransport>,
    events: &SharedEventBus,
    instance: &BackendInstance,
    request: &GenerationRequest,
    request_id: &str,
    timeout: Duration,
    started: std::time::Instant,
) -> AttemptOutcome {
    let stream_result = tokio::time::timeout(timeout, transport.generate_stream(instance, request)).await;

    let mut stream = match stream_result {
        Ok(Ok(s)) => s,
        Ok(Err(error)) => {
            return AttemptOutcome::Failure {
                error,
                response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            }
        }
        Err(_) => {
            return AttemptOutcome::Failure {
                error: DispatchError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                },
                response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            }
        }
    };

    let mut content = String::new();
    let mut saw_final = false;

    loop {
        let next = match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) => {
                return AttemptOutcome::Failure {
                    error: DispatchError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    },
                    response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                }
            }
        };

        match next {
            Ok((text, done)) => {
                content.push_str(&text);
                events
                    .publish_with_source(
                        DispatchEvent::Chunk {
                            request_id: request_id.to_string(),
                            text,
                            is_final: done,
                        },
                        "executor",
                    )
                    .await;
                if done {
                    saw_final = true;
                    break;
                }
            }
            Err(error) => {
                return AttemptOutcome::Failure {
                    error,
                    response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                }
            }
        }
    }

    let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    if !saw_final {
        warn!(request_id, "stream ended without a final marker; synthesizing one");
        events
            .publish_with_source(
                DispatchEvent::Chunk {
                    request_id: request_id.to_string(),
                    text: String::new(),
                    is_final: true,
                },
                "executor",
            )
            .await;
        let mut response = Response::success(content, request.model.clone(), response_time_ms);
        response.error_message = Some(DispatchError::UnterminatedStream.to_string());
        return AttemptOutcome::Success { response };
    }

    AttemptOutcome::Success {
        response: Response::success(content, request.model.clone(), response_time_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dispatch_core::model::ModelInfo;
    use futures::stream::{self, BoxStream};

    struct StubTransport {
        chunks: Vec<(String, bool)>,
    }

    #[async_trait]
    impl BackendTransport for StubTransport {
        async fn list_models(&self, _instance: &BackendInstance) -> Result<Vec<ModelInfo>, DispatchError> {
            Ok(vec![])
        }

        async fn generate(&self, _instance: &BackendInstance, _request: &GenerationRequest) -> Result<Response, DispatchError> {
            Ok(Response::success("ok", "m1", 10.0))
        }

        async fn generate_stream(
            &self,
            _instance: &BackendInstance,
            _request: &GenerationRequest,
        ) -> Result<BoxStream<'static, dispatch_core::transport::RawChunk>, DispatchError> {
            let items: Vec<dispatch_core::transport::RawChunk> =
                self.chunks.iter().cloned().map(Ok).collect();
            Ok(stream::iter(items).boxed())
        }
    }

    fn instance() -> BackendInstance {
        BackendInstance::new("i1", "i1", "http://localhost")
    }

    #[tokio::test]
    async fn streaming_emits_chunks_in_order_then_completes() {
        let transport: Arc<dyn BackendTransport> = Arc::new(StubTransport {
            chunks: vec![
                ("Hel".to_string(), false),
                ("lo".to_string(), false),
                (" world".to_string(), true),
            ],
        });
        let events: SharedEventBus = Arc::new(dispatch_core::eventbus::EventBus::new());
        let mut rx = events.subscribe();

        let request = GenerationRequest::new("m1", "hi");
        let outcome = run_streaming(
            &transport,
            &events,
            &instance(),
            &request,
            "r1",
            Duration::from_secs(5),
            std::time::Instant::now(),
        )
        .await;

        let mut finals = vec![];
        for _ in 0..3 {
            let (event, _) = rx.recv().await.unwrap();
            if let DispatchEvent::Chunk { is_final, .. } = event {
                finals.push(is_final);
            }
        }
        assert_eq!(finals, vec![false, false, true]);

        match outcome {
            AttemptOutcome::Success { response } => assert_eq!(response.content, "Hello world"),
            AttemptOutcome::Failure { .. } => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn streaming_without_final_marker_synthesizes_one() {
        let transport: Arc<dyn BackendTransport> = Arc::new(StubTransport {
            chunks: vec![("partial".to_string(), false)],
        });
        let events: SharedEventBus = Arc::new(dispatch_core::eventbus::EventBus::new());
        let mut rx = events.subscribe();

        let request = GenerationRequest::new("m1", "hi");
        let outcome = run_streaming(
            &transport,
            &events,
            &instance(),
            &request,
            "r1",
            Duration::from_secs(5),
            std::time::Instant::now(),
        )
        .await;

        let (_first, _) = rx.recv().await.unwrap();
        let (synthesized, _) = rx.recv().await.unwrap();
        assert!(matches!(synthesized, DispatchEvent::Chunk { is_final: true, .. }));

        match outcome {
            AttemptOutcome::Success { response } => {
                assert!(response.error_message.is_some());
            }
            AttemptOutcome::Failure { .. } => panic!("expected partial success"),
        }
    }
}
