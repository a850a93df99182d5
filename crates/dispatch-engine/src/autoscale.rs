//! Autoscale Advisor: recommends growing or shrinking the instance pool.
//!
//! Grounded on `LoadBalancer.cpp::checkAutoScaling`/`canScaleUp`/
//! `canScaleDown`, but unlike the original's `scaleUp`/`scaleDown` (which
//! actually create/remove instances), this advisor only emits intents —
//! actuation is an external collaborator's responsibility.

use dispatch_core::config::DispatcherConfig;
use dispatch_core::event::DispatchEvent;
use dispatch_core::eventbus::SharedEventBus;
use dispatch_core::model::BackendInstance;

use crate::registry::BackendRegistry;

/// Decide whether to recommend scaling, given the healthy+active subset.
/// Returns `None` if neither threshold is crossed.
pub fn evaluate_autoscale(healthy: &[BackendInstance], config: &DispatcherConfig) -> Option<DispatchEvent> {
    if healthy.is_empty() {
        return None;
    }

    let n = healthy.len() as f64;
    let avg_cpu = healthy.iter().map(|i| i.cpu_percent).sum::<f64>() / n;
    let avg_mem = healthy.iter().map(|i| i.mem_percent).sum::<f64>() / n;

    if (avg_cpu > config.scale_up_threshold || avg_mem > config.scale_up_threshold)
        && healthy.len() < config.max_instances
    {
        return Some(DispatchEvent::ScaleUpIntent { avg_cpu, avg_mem });
    }

    if avg_cpu < config.scale_down_threshold
        && avg_mem < config.scale_down_threshold
        && healthy.len() > config.min_instances
    {
        let mut idle: Vec<&BackendInstance> = healthy.iter().filter(|i| i.current_connections == 0).collect();
        idle.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(candidate) = idle.first() {
            return Some(DispatchEvent::ScaleDownIntent {
                instance_id: candidate.id.clone(),
            });
        }
    }

    None
}

/// One evaluation pass: read the registry snapshot, evaluate, publish if
/// warranted. Never mutates the registry.
pub async fn run_autoscale_tick(registry: &BackendRegistry, events: &SharedEventBus, config: &DispatcherConfig) {
    if !config.auto_scaling_enabled {
        return;
    }

    let healthy = registry.list_healthy().await;
    if let Some(event) = evaluate_autoscale(&healthy, config) {
        events.publish_with_source(event, "autoscale-advisor").await;
    }
}

pub async fn run_autoscale_loop(registry: BackendRegistry, events: SharedEventBus, config: DispatcherConfig) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(config.autoscale_tick_ms));
    loop {
        ticker.tick().await;
        run_autoscale_tick(&registry, &events, &config).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, cpu: f64, mem: f64, connections: u32) -> BackendInstance {
        let mut i = BackendInstance::new(id, id, "http://localhost");
        i.cpu_percent = cpu;
        i.mem_percent = mem;
        i.current_connections = connections;
        i
    }

    #[test]
    fn recommends_scale_up_over_threshold() {
        let healthy = vec![instance("a", 90.0, 40.0, 1)];
        let config = DispatcherConfig::default();
        let event = evaluate_autoscale(&healthy, &config).unwrap();
        assert!(matches!(event, DispatchEvent::ScaleUpIntent { .. }));
    }

    #[test]
    fn recommends_scale_down_with_lowest_id_tie_break() {
        let healthy = vec![instance("b", 10.0, 10.0, 0), instance("a", 10.0, 10.0, 0)];
        let mut config = DispatcherConfig::default();
        config.min_instances = 1;
        let event = evaluate_autoscale(&healthy, &config).unwrap();
        match event {
            DispatchEvent::ScaleDownIntent { instance_id } => assert_eq!(instance_id, "a"),
            _ => panic!("expected scale down"),
        }
    }

    #[test]
    fn no_recommendation_within_the_band() {
        let healthy = vec![instance("a", 50.0, 50.0, 1)];
        let config = DispatcherConfig::default();
        assert!(evaluate_autoscale(&healthy, &config).is_none());
    }

    #[test]
    fn does_not_recommend_scale_down_at_min_instances() {
        let healthy = vec![instance("a", 10.0, 10.0, 0)];
        let mut config = DispatcherConfig::default();
        config.min_instances = 1;
        assert!(evaluate_autoscale(&healthy, &config).is_none());
    }
}
