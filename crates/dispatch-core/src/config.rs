//! Dispatcher configuration: defaults and environment-variable overrides.
//!
//! Follows the same "const default + env override" idiom used throughout
//! this codebase rather than a dedicated config-file parser, which is out
//! of scope for the core.

use crate::model::ModelSelectionStrategy;

/// Default values, exposed so callers can reference them without
/// re-reading an environment variable.
pub mod defaults {
    /// Global ceiling on concurrently in-flight requests.
    pub const MAX_CONCURRENT_REQUESTS: usize = 8;
    /// Dispatcher tick interval.
    pub const QUEUE_TICK_MS: u64 = 100;
    /// Health supervisor sweep interval.
    pub const HEALTH_CHECK_MS: u64 = 30_000;
    /// Autoscale advisor evaluation interval.
    pub const AUTOSCALE_TICK_MS: u64 = 60_000;
    /// Backpressure limit on the pending queue.
    pub const QUEUE_MAX: usize = 10_000;
    /// Consecutive errors on one instance/model pair before failover.
    pub const MODEL_FAILOVER_THRESHOLD: u32 = 3;
    /// Autoscale scale-up threshold (CPU%/mem%).
    pub const SCALE_UP_THRESHOLD: f64 = 80.0;
    /// Autoscale scale-down threshold (CPU%/mem%).
    pub const SCALE_DOWN_THRESHOLD: f64 = 30.0;
    pub const MIN_INSTANCES: usize = 1;
    pub const MAX_INSTANCES: usize = 10;
    /// `avgResponseTimeMs` above which the health supervisor marks unhealthy.
    pub const UNHEALTHY_RESPONSE_TIME_MS: f64 = 5000.0;
    /// CPU%/mem% above which the health supervisor marks unhealthy.
    pub const UNHEALTHY_RESOURCE_PERCENT: f64 = 95.0;
    /// Seconds since `lastHealthCheck` before an instance is marked unhealthy.
    pub const UNHEALTHY_STALE_SECS: i64 = 300;
}

/// Environment variable names read by [`DispatcherConfig::from_env`].
pub mod env_vars {
    pub const MAX_CONCURRENT_REQUESTS: &str = "DISPATCH_MAX_CONCURRENT_REQUESTS";
    pub const QUEUE_TICK_MS: &str = "DISPATCH_QUEUE_TICK_MS";
    pub const HEALTH_CHECK_MS: &str = "DISPATCH_HEALTH_CHECK_MS";
    pub const AUTOSCALE_TICK_MS: &str = "DISPATCH_AUTOSCALE_TICK_MS";
    pub const QUEUE_MAX: &str = "DISPATCH_QUEUE_MAX";
    pub const AUTO_RETRY_ENABLED: &str = "DISPATCH_AUTO_RETRY_ENABLED";
    pub const AUTO_SCALING_ENABLED: &str = "DISPATCH_AUTO_SCALING_ENABLED";
    pub const MODEL_SELECTION_STRATEGY: &str = "DISPATCH_MODEL_SELECTION_STRATEGY";
    pub const SCALE_UP_THRESHOLD: &str = "DISPATCH_SCALE_UP_THRESHOLD";
    pub const SCALE_DOWN_THRESHOLD: &str = "DISPATCH_SCALE_DOWN_THRESHOLD";
    pub const MIN_INSTANCES: &str = "DISPATCH_MIN_INSTANCES";
    pub const MAX_INSTANCES: &str = "DISPATCH_MAX_INSTANCES";
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Dispatcher-wide configuration knobs, enumerated in the component design
/// for the Dispatcher. Construct with [`DispatcherConfig::from_env`] to pick
/// up overrides, or [`Default::default`] for the documented defaults.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrent_requests: usize,
    pub auto_retry_enabled: bool,
    pub model_selection_strategy: ModelSelectionStrategy,
    pub queue_tick_ms: u64,
    pub health_check_ms: u64,
    pub autoscale_tick_ms: u64,
    pub queue_max: usize,
    pub model_failover_threshold: u32,
    pub auto_scaling_enabled: bool,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub min_instances: usize,
    pub max_instances: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: defaults::MAX_CONCURRENT_REQUESTS,
            auto_retry_enabled: true,
            model_selection_strategy: ModelSelectionStrategy::default(),
            queue_tick_ms: defaults::QUEUE_TICK_MS,
            health_check_ms: defaults::HEALTH_CHECK_MS,
            autoscale_tick_ms: defaults::AUTOSCALE_TICK_MS,
            queue_max: defaults::QUEUE_MAX,
            model_failover_threshold: defaults::MODEL_FAILOVER_THRESHOLD,
            // Autoscaling is disabled by default; actuation is external anyway.
            auto_scaling_enabled: false,
            scale_up_threshold: defaults::SCALE_UP_THRESHOLD,
            scale_down_threshold: defaults::SCALE_DOWN_THRESHOLD,
            min_instances: defaults::MIN_INSTANCES,
            max_instances: defaults::MAX_INSTANCES,
        }
    }
}

impl DispatcherConfig {
    /// Load from environment variables, falling back to documented defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let default = Self::default();

        let model_selection_strategy = std::env::var(env_vars::MODEL_SELECTION_STRATEGY)
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "performance" => Some(ModelSelectionStrategy::Performance),
                "balanced" => Some(ModelSelectionStrategy::Balanced),
                "accuracy" => Some(ModelSelectionStrategy::Accuracy),
                _ => None,
            })
            .unwrap_or(default.model_selection_strategy);

        Self {
            max_concurrent_requests: env_or(
                env_vars::MAX_CONCURRENT_REQUESTS,
                default.max_concurrent_requests,
            ),
            auto_retry_enabled: env_or(env_vars::AUTO_RETRY_ENABLED, default.auto_retry_enabled),
            model_selection_strategy,
            queue_tick_ms: env_or(env_vars::QUEUE_TICK_MS, default.queue_tick_ms),
            health_check_ms: env_or(env_vars::HEALTH_CHECK_MS, default.health_check_ms),
            autoscale_tick_ms: env_or(env_vars::AUTOSCALE_TICK_MS, default.autoscale_tick_ms),
            queue_max: env_or(env_vars::QUEUE_MAX, default.queue_max),
            model_failover_threshold: default.model_failover_threshold,
            auto_scaling_enabled: env_or(
                env_vars::AUTO_SCALING_ENABLED,
                default.auto_scaling_enabled,
            ),
            scale_up_threshold: env_or(env_vars::SCALE_UP_THRESHOLD, default.scale_up_threshold),
            scale_down_threshold: env_or(
                env_vars::SCALE_DOWN_THRESHOLD,
                default.scale_down_threshold,
            ),
            min_instances: env_or(env_vars::MIN_INSTANCES, default.min_instances),
            max_instances: env_or(env_vars::MAX_INSTANCES, default.max_instances),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_component_design() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.queue_tick_ms, 100);
        assert_eq!(cfg.health_check_ms, 30_000);
        assert_eq!(cfg.autoscale_tick_ms, 60_000);
        assert_eq!(cfg.queue_max, 10_000);
        assert!(!cfg.auto_scaling_enabled);
        assert!(cfg.auto_retry_enabled);
    }

    #[test]
    fn from_env_falls_back_when_unset() {
        std::env::remove_var(env_vars::QUEUE_TICK_MS);
        let cfg = DispatcherConfig::from_env();
        assert_eq!(cfg.queue_tick_ms, defaults::QUEUE_TICK_MS);
    }
}
