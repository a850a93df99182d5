//! Dispatcher: the single scheduler loop that drains the Request Queue
//! whenever capacity and a healthy instance exist, owns per-request retry
//! counters, and is the facade every caller (CLI, tests) talks to.
//!
//! Grounded on `LoadBalancer.cpp::processRequestQueue`/`submitRequest`/
//! `cancelRequest`/`handleRequestSuccess`/`handleRequestFailure`, reshaped
//! around an explicit event bus instead of Qt signals and a constructor-
//! injected transport instead of a singleton HTTP client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use dispatch_core::config::DispatcherConfig;
use dispatch_core::error::DispatchError;
use dispatch_core::event::DispatchEvent;
use dispatch_core::eventbus::{EventBus, SharedEventBus};
use dispatch_core::model::{BackendInstance, RequestSpec, RequestState, RequestStatus, Statistics};
use dispatch_core::transport::BackendTransport;

use crate::autoscale;
use crate::executor::{self, AttemptOutcome};
use crate::health;
use crate::model_selector;
use crate::policy::{SelectionPolicy, SelectionStrategy};
use crate::queue::RequestQueue;
use crate::registry::BackendRegistry;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct InflightEntry {
    instance_id: String,
    handle: tokio::task::JoinHandle<()>,
}

/// Everything the scheduling loop touches, behind one lock distinct from
/// the registry's — selection reads a registry snapshot cheaply, then
/// mutates this state without holding the registry lock.
struct DispatcherState {
    queue: RequestQueue,
    inflight: HashMap<String, InflightEntry>,
    policy: SelectionPolicy,
    consecutive_errors: HashMap<(String, String), u32>,
}

/// Snapshot returned by [`Dispatcher::queue_status`].
#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub size: usize,
    pub inflight: usize,
    pub selection_counters: HashMap<String, u32>,
}

/// The Submitter API: `submit`/`cancel`/`subscribe`/`queue_status`, plus the
/// registry management and background loops every deployment needs.
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: BackendRegistry,
    events: SharedEventBus,
    transport: Arc<dyn BackendTransport>,
    state: Mutex<DispatcherState>,
    background_started: AtomicBool,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, transport: Arc<dyn BackendTransport>) -> Arc<Self> {
        let strategy = SelectionStrategy::RoundRobin;
        Arc::new(Self {
            state: Mutex::new(DispatcherState {
                queue: RequestQueue::new(),
                inflight: HashMap::new(),
                policy: SelectionPolicy::new(strategy),
                consecutive_errors: HashMap::new(),
            }),
            registry: BackendRegistry::new(),
            events: Arc::new(EventBus::with_name("dispatcher")),
            config,
            transport,
            background_started: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn events(&self) -> SharedEventBus {
        Arc::clone(&self.events)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Register a new backend instance and announce it on the event bus.
    pub async fn register_instance(&self, instance: BackendInstance) -> Result<(), DispatchError> {
        let id = instance.id.clone();
        self.registry.register(instance).await?;
        self.events
            .publish_with_source(DispatchEvent::InstanceAdded { instance_id: id }, "dispatcher")
            .await;
        Ok(())
    }

    pub async fn deregister_instance(&self, id: &str, force: bool) -> Result<(), DispatchError> {
        self.registry.deregister(id, force).await?;
        self.events
            .publish_with_source(
                DispatchEvent::InstanceRemoved {
                    instance_id: id.to_string(),
                },
                "dispatcher",
            )
            .await;
        Ok(())
    }

    /// Switch the active selection strategy. Resets round-robin/weighted
    /// state per the component design.
    pub async fn set_selection_strategy(&self, strategy: SelectionStrategy) {
        {
            let mut state = self.state.lock().await;
            state.policy.set_strategy(strategy);
        }
        self.events
            .publish_with_source(
                DispatchEvent::AlgorithmChanged {
                    algorithm: format!("{strategy:?}"),
                },
                "dispatcher",
            )
            .await;
    }

    /// Ask the transport for each instance's model catalog and merge the
    /// union into the registry.
    pub async fn refresh_models(&self) {
        let instances = self.registry.list().await;
        let mut fetched = Vec::new();
        for instance in &instances {
            match self.transport.list_models(instance).await {
                Ok(models) => fetched.extend(models),
                Err(error) => {
                    tracing::warn!(instance_id = %instance.id, %error, "failed to refresh model catalog");
                }
            }
        }
        self.registry.refresh_models(fetched).await;
    }

    /// Submit a request. Assigns an id if the caller left it blank, rejects
    /// an invalid spec, and fails synchronously with `QueueFull` under
    /// backpressure.
    pub async fn submit(self: &Arc<Self>, mut spec: RequestSpec) -> Result<String, DispatchError> {
        if !spec.is_valid() {
            return Err(DispatchError::InvalidSpec(
                "request must carry a prompt or a system prompt".to_string(),
            ));
        }

        if spec.id.is_empty() {
            spec.id = Uuid::new_v4().to_string();
        }
        spec.submit_ts = now_millis();
        let id = spec.id.clone();

        let size = {
            let mut state = self.state.lock().await;
            if state.queue.size() >= self.config.queue_max {
                return Err(DispatchError::QueueFull {
                    max: self.config.queue_max,
                });
            }
            state.queue.enqueue(RequestState::new(spec));
            state.queue.size()
        };

        self.events
            .publish_with_source(DispatchEvent::QueueSizeChanged { size }, "dispatcher")
            .await;

        self.try_dispatch().await;

        Ok(id)
    }

    /// Cancel a pending or in-flight request. Idempotent: returns `true`
    /// iff the request was alive, `false` for an unknown or already
    /// terminal id.
    pub async fn cancel(self: &Arc<Self>, id: &str) -> bool {
        let found_in_queue = {
            let mut state = self.state.lock().await;
            state.queue.cancel(id)
        };

        if found_in_queue {
            self.events
                .publish_with_source(
                    DispatchEvent::RequestCancelled {
                        request_id: id.to_string(),
                    },
                    "dispatcher",
                )
                .await;
            return true;
        }

        let entry = {
            let mut state = self.state.lock().await;
            state.inflight.remove(id)
        };

        match entry {
            Some(entry) => {
                entry.handle.abort();
                let _ = self.registry.decrement_connections(&entry.instance_id).await;
                self.events
                    .publish_with_source(
                        DispatchEvent::RequestCancelled {
                            request_id: id.to_string(),
                        },
                        "dispatcher",
                    )
                    .await;
                true
            }
            None => false,
        }
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            size: state.queue.size(),
            inflight: state.inflight.len(),
            selection_counters: state.policy.weighted_counters_snapshot(),
        }
    }

    /// Point-in-time aggregate statistics. `requests_per_second` is always
    /// `0.0` here since this call has no window to measure against; the
    /// periodic `StatisticsUpdated` event published by the background stats
    /// loop (see [`Self::spawn_background`]) carries the windowed figure.
    pub async fn statistics(&self) -> Statistics {
        let instances = self.registry.list().await;
        let healthy_instances = instances.iter().filter(|i| i.is_healthy && i.is_active).count();
        let active_connections: usize = instances.iter().map(|i| i.current_connections as usize).sum();
        let total_requests: u64 = instances.iter().map(|i| i.total_requests).sum();
        let successful_requests: u64 = instances.iter().map(|i| i.successful_requests).sum();
        let failed_requests: u64 = instances.iter().map(|i| i.failed_requests).sum();

        let sampled: Vec<&BackendInstance> = instances.iter().filter(|i| i.total_requests > 0).collect();
        let average_response_time_ms = if sampled.is_empty() {
            0.0
        } else {
            sampled.iter().map(|i| i.avg_response_time_ms).sum::<f64>() / sampled.len() as f64
        };

        let queued_requests = self.state.lock().await.queue.size();

        Statistics {
            total_instances: instances.len(),
            healthy_instances,
            active_connections,
            queued_requests,
            average_response_time_ms,
            total_requests,
            successful_requests,
            failed_requests,
            requests_per_second: 0.0,
        }
    }

    /// Drain as much of the queue as current capacity and healthy instances
    /// allow. Safe to call concurrently (from `submit`, the queue-tick
    /// loop, and terminal-event cleanup) — all mutation happens under
    /// `state`'s lock, one dequeue at a time.
    async fn try_dispatch(self: &Arc<Self>) {
        loop {
            let healthy = self.registry.list_healthy().await;
            if healthy.is_empty() {
                break;
            }
            let catalog = self.registry.list_models().await;

            let dispatched = {
                let mut state = self.state.lock().await;
                if state.inflight.len() >= self.config.max_concurrent_requests {
                    break;
                }

                let mut request_state = match state.queue.dequeue_eligible() {
                    Some(r) => r,
                    None => break,
                };

                let model_name = match request_state.spec.model_override.clone() {
                    Some(m) => Some(m),
                    None => model_selector::select_model(
                        request_state.spec.scenario,
                        self.config.model_selection_strategy,
                        &catalog,
                    )
                    .ok(),
                };

                let model_name = match model_name {
                    Some(m) => m,
                    None => {
                        state.queue.enqueue(request_state);
                        break;
                    }
                };

                let instance = match state.policy.select(&healthy) {
                    Some(i) => i.clone(),
                    None => {
                        state.queue.enqueue(request_state);
                        break;
                    }
                };

                request_state.status = RequestStatus::Assigned;
                request_state.assigned_instance_id = Some(instance.id.clone());
                request_state.start_ts = Some(now_millis());

                Some((request_state, instance, model_name))
            };

            let (request_state, instance, model_name) = match dispatched {
                Some(v) => v,
                None => break,
            };

            let request_id = request_state.spec.id.clone();

            let _ = self.registry.increment_connections(&instance.id).await;
            self.events
                .publish_with_source(
                    DispatchEvent::RequestAssigned {
                        request_id: request_id.clone(),
                        instance_id: instance.id.clone(),
                        model: model_name.clone(),
                    },
                    "dispatcher",
                )
                .await;

            let handle = self.spawn_executor(request_state, instance.clone(), model_name);

            let mut state = self.state.lock().await;
            state.inflight.insert(
                request_id,
                InflightEntry {
                    instance_id: instance.id.clone(),
                    handle,
                },
            );
        }
    }

    fn spawn_executor(
        self: &Arc<Self>,
        request_state: RequestState,
        instance: BackendInstance,
        model: String,
    ) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = executor::run_attempt(
                &dispatcher.transport,
                &dispatcher.events,
                &instance,
                &model,
                &request_state.spec,
            )
            .await;
            dispatcher.finish_attempt(request_state, instance, model, outcome).await;
        })
    }

    async fn finish_attempt(
        self: Arc<Self>,
        mut request_state: RequestState,
        instance: BackendInstance,
        model: String,
        outcome: AttemptOutcome,
    ) {
        let request_id = request_state.spec.id.clone();

        {
            let mut state = self.state.lock().await;
            state.inflight.remove(&request_id);
        }

        match outcome {
            AttemptOutcome::Success { response } => {
                let _ = self
                    .registry
                    .record_outcome(&instance.id, true, response.response_time_ms)
                    .await;
                let _ = self.registry.decrement_connections(&instance.id).await;

                {
                    let mut state = self.state.lock().await;
                    state.consecutive_errors.remove(&(instance.id.clone(), model.clone()));
                }

                request_state.status = RequestStatus::Succeeded;
                request_state.finish_ts = Some(now_millis());
                self.events
                    .publish_with_source(
                        DispatchEvent::RequestCompleted {
                            request_id,
                            content: response.content,
                            model_used: response.model_used,
                            response_time_ms: response.response_time_ms,
                        },
                        "dispatcher",
                    )
                    .await;
            }
            AttemptOutcome::Failure { error, response_time_ms } => {
                let _ = self.registry.record_outcome(&instance.id, false, response_time_ms).await;
                let _ = self.registry.decrement_connections(&instance.id).await;

                let consecutive = {
                    let mut state = self.state.lock().await;
                    let counter = state
                        .consecutive_errors
                        .entry((instance.id.clone(), model.clone()))
                        .or_insert(0);
                    *counter += 1;
                    *counter
                };

                if consecutive >= self.config.model_failover_threshold {
                    let catalog = self.registry.list_models().await;
                    if let Some(next_model) =
                        model_selector::next_preference(request_state.spec.scenario, &model, &catalog)
                    {
                        self.events
                            .publish_with_source(
                                DispatchEvent::ModelSwitched {
                                    from: model.clone(),
                                    to: next_model.clone(),
                                    reason: format!("{consecutive} consecutive errors"),
                                },
                                "dispatcher",
                            )
                            .await;
                        request_state.spec.model_override = Some(next_model);
                        let mut state = self.state.lock().await;
                        state.consecutive_errors.remove(&(instance.id.clone(), model.clone()));
                    }
                }

                let retriable = error.is_retriable()
                    && self.config.auto_retry_enabled
                    && request_state.retry_count < request_state.spec.max_retries;

                if retriable {
                    request_state.retry_count += 1;
                    request_state.assigned_instance_id = None;
                    request_state.status = RequestStatus::Retrying;
                    self.events
                        .publish_with_source(
                            DispatchEvent::RequestRetrying {
                                request_id: request_id.clone(),
                                retry_count: request_state.retry_count,
                            },
                            "dispatcher",
                        )
                        .await;

                    let mut state = self.state.lock().await;
                    state.queue.enqueue(request_state);
                } else {
                    request_state.status = RequestStatus::Failed;
                    request_state.finish_ts = Some(now_millis());
                    self.events
                        .publish_with_source(
                            DispatchEvent::RequestFailed {
                                request_id,
                                error: error.to_string(),
                                retry_count: request_state.retry_count,
                            },
                            "dispatcher",
                        )
                        .await;
                }
            }
        }

        self.try_dispatch().await;
    }

    /// Start the health supervisor, autoscale advisor, and queue-tick
    /// loops as detached background tasks. Idempotent: a second call on
    /// the same dispatcher is a no-op, so callers don't have to track
    /// whether background loops are already running.
    pub fn spawn_background(self: &Arc<Self>) {
        if self.background_started.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(health::run_health_loop(
            self.registry.clone(),
            self.events(),
            self.config.health_check_ms,
        ));

        tokio::spawn(autoscale::run_autoscale_loop(
            self.registry.clone(),
            self.events(),
            self.config.clone(),
        ));

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(dispatcher.config.queue_tick_ms));
            loop {
                ticker.tick().await;
                dispatcher.try_dispatch().await;
            }
        });

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(dispatcher.config.health_check_ms));
            let mut last_total_requests = 0u64;
            let mut last_tick_ms = now_millis();
            loop {
                ticker.tick().await;
                let stats = dispatcher.statistics().await;

                let now = now_millis();
                let elapsed_secs = ((now - last_tick_ms).max(1) as f64) / 1000.0;
                let requests_per_second = (stats.total_requests.saturating_sub(last_total_requests) as f64) / elapsed_secs;
                last_total_requests = stats.total_requests;
                last_tick_ms = now;

                dispatcher
                    .events
                    .publish_with_source(
                        DispatchEvent::StatisticsUpdated {
                            total_instances: stats.total_instances,
                            healthy_instances: stats.healthy_instances,
                            active_connections: stats.active_connections,
                            queued_requests: stats.queued_requests,
                            average_response_time_ms: stats.average_response_time_ms,
                            total_requests: stats.total_requests,
                            successful_requests: stats.successful_requests,
                            failed_requests: stats.failed_requests,
                            requests_per_second,
                        },
                        "dispatcher",
                    )
                    .await;
            }
        });
    }
}
