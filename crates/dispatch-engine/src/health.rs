//! Health Supervisor: periodically re-evaluates each instance's health
//! verdict.
//!
//! Grounded on `LoadBalancer.cpp::checkInstanceHealth` and
//! `performHealthCheck`; thresholds confirmed against
//! `PerformanceMonitor.h`'s critical-threshold defaults (95%/95%).

use dispatch_core::config::defaults;
use dispatch_core::event::DispatchEvent;
use dispatch_core::eventbus::SharedEventBus;
use dispatch_core::model::BackendInstance;

use crate::registry::BackendRegistry;

/// Evaluate one instance's health verdict against the documented
/// thresholds. Pure function so it's trivially unit-testable without a
/// registry or event bus.
pub fn evaluate_health(instance: &BackendInstance, now_ms: i64) -> bool {
    if instance.avg_response_time_ms > defaults::UNHEALTHY_RESPONSE_TIME_MS {
        return false;
    }
    if instance.cpu_percent > defaults::UNHEALTHY_RESOURCE_PERCENT
        || instance.mem_percent > defaults::UNHEALTHY_RESOURCE_PERCENT
    {
        return false;
    }
    if instance.current_connections >= instance.max_connections {
        return false;
    }
    if now_ms - instance.last_health_check > defaults::UNHEALTHY_STALE_SECS * 1000 {
        return false;
    }
    true
}

/// Sweep every registered instance once, updating health verdicts and
/// emitting `InstanceHealthChanged` exactly on transitions.
pub async fn run_health_sweep(registry: &BackendRegistry, events: &SharedEventBus, now_ms: i64) {
    for instance in registry.list().await {
        let healthy = evaluate_health(&instance, now_ms);
        match registry.set_healthy(&instance.id, healthy).await {
            Ok(true) => {
                events
                    .publish_with_source(
                        DispatchEvent::InstanceHealthChanged {
                            instance_id: instance.id.clone(),
                            healthy,
                        },
                        "health-supervisor",
                    )
                    .await;
            }
            Ok(false) => {}
            Err(_) => {
                // Instance was deregistered concurrently; nothing to report.
            }
        }
    }
}

/// Run the health sweep on a fixed interval until `events` has no more
/// subscribers with interest (the loop simply runs forever; callers abort
/// the owning task to stop it).
pub async fn run_health_loop(registry: BackendRegistry, events: SharedEventBus, interval_ms: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;
        let now_ms = chrono::Utc::now().timestamp_millis();
        run_health_sweep(&registry, &events, now_ms).await;
    }
}
