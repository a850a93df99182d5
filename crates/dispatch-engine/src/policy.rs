//! Selection Policy: five interchangeable strategies for picking one
//! instance out of the healthy subset.
//!
//! Grounded on `LoadBalancer.cpp`'s `selectInstanceRoundRobin` /
//! `selectInstanceWeightedRoundRobin` / `selectInstanceLeastConnections` /
//! `selectInstanceResponseTime` / `selectInstanceResourceBased`, with the
//! tie-break rules made explicit rather than left to hash-map iteration
//! order.

use std::collections::HashMap;

use dispatch_core::model::BackendInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    ResponseTime,
    ResourceBased,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::RoundRobin
    }
}

/// Holds the strategies' persisted state (round-robin index, weighted
/// counters) across selections. Not `Clone`/`Send`-shared directly; the
/// dispatcher owns one behind its own lock, matching the "dispatcher state
/// is logically single-threaded" concurrency rule.
#[derive(Debug, Default)]
pub struct SelectionPolicy {
    strategy: SelectionStrategy,
    round_robin_index: usize,
    weighted_counters: HashMap<String, u32>,
}

impl SelectionPolicy {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            round_robin_index: 0,
            weighted_counters: HashMap::new(),
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Switch strategies. Resets the round-robin index and weighted
    /// counters, per the component design.
    pub fn set_strategy(&mut self, strategy: SelectionStrategy) {
        self.strategy = strategy;
        self.round_robin_index = 0;
        self.weighted_counters.clear();
    }

    /// Snapshot of the weighted round-robin counters, for status reporting.
    pub fn weighted_counters_snapshot(&self) -> HashMap<String, u32> {
        self.weighted_counters.clone()
    }

    /// Select one instance from `healthy`, which must already be sorted in
    /// a stable order (insertion, then id) by the caller. Returns `None` if
    /// `healthy` is empty.
    pub fn select<'a>(&mut self, healthy: &'a [BackendInstance]) -> Option<&'a BackendInstance> {
        if healthy.is_empty() {
            return None;
        }

        match self.strategy {
            SelectionStrategy::RoundRobin => self.select_round_robin(healthy),
            SelectionStrategy::WeightedRoundRobin => self.select_weighted_round_robin(healthy),
            SelectionStrategy::LeastConnections => Self::select_least_connections(healthy),
            SelectionStrategy::ResponseTime => Self::select_response_time(healthy),
            SelectionStrategy::ResourceBased => Self::select_resource_based(healthy),
        }
    }

    fn select_round_robin<'a>(&mut self, healthy: &'a [BackendInstance]) -> Option<&'a BackendInstance> {
        self.round_robin_index %= healthy.len();
        let chosen = &healthy[self.round_robin_index];
        self.round_robin_index = (self.round_robin_index + 1) % healthy.len();
        Some(chosen)
    }

    fn select_weighted_round_robin<'a>(&mut self, healthy: &'a [BackendInstance]) -> Option<&'a BackendInstance> {
        let mut best: Option<(&BackendInstance, i64)> = None;

        for instance in healthy {
            let cnt = *self.weighted_counters.get(&instance.id).unwrap_or(&0);
            let headroom = instance.weight as i64 - cnt as i64;
            if headroom <= 0 {
                continue;
            }
            match best {
                Some((_, best_headroom)) if headroom <= best_headroom => {}
                _ => best = Some((instance, headroom)),
            }
        }

        let chosen = match best {
            Some((instance, _)) => instance,
            None => {
                // Everyone has hit their weight; reset and serve the first
                // (lowest id) instance this round.
                self.weighted_counters.clear();
                &healthy[0]
            }
        };

        *self.weighted_counters.entry(chosen.id.clone()).or_insert(0) += 1;
        Some(chosen)
    }

    fn select_least_connections(healthy: &[BackendInstance]) -> Option<&BackendInstance> {
        healthy.iter().min_by(|a, b| {
            a.current_connections
                .cmp(&b.current_connections)
                .then_with(|| a.avg_response_time_ms.partial_cmp(&b.avg_response_time_ms).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.id.cmp(&b.id))
        })
    }

    fn select_response_time(healthy: &[BackendInstance]) -> Option<&BackendInstance> {
        healthy.iter().min_by(|a, b| {
            a.avg_response_time_ms
                .partial_cmp(&b.avg_response_time_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.current_connections.cmp(&b.current_connections))
                .then_with(|| a.id.cmp(&b.id))
        })
    }

    fn select_resource_based(healthy: &[BackendInstance]) -> Option<&BackendInstance> {
        healthy.iter().min_by(|a, b| {
            a.resource_usage()
                .partial_cmp(&b.resource_usage())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.current_connections.cmp(&b.current_connections))
                .then_with(|| a.id.cmp(&b.id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, weight: u32) -> BackendInstance {
        BackendInstance::new(id, id, "http://localhost").with_weight(weight)
    }

    #[test]
    fn round_robin_cycles_through_in_order() {
        let healthy = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        let mut policy = SelectionPolicy::new(SelectionStrategy::RoundRobin);

        let picked: Vec<&str> = (0..6).map(|_| policy.select(&healthy).unwrap().id.as_str()).collect();
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn weighted_round_robin_converges_to_weight_ratio() {
        let healthy = vec![instance("a", 1), instance("b", 3)];
        let mut policy = SelectionPolicy::new(SelectionStrategy::WeightedRoundRobin);

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..400 {
            let chosen = policy.select(&healthy).unwrap().id.clone();
            *counts.entry(chosen).or_insert(0) += 1;
        }

        let a = *counts.get("a").unwrap_or(&0) as f64;
        let b = *counts.get("b").unwrap_or(&0) as f64;
        assert!((a - 100.0).abs() < 10.0, "a={a}");
        assert!((b - 300.0).abs() < 10.0, "b={b}");
    }

    #[test]
    fn least_connections_never_picks_a_strictly_higher_count() {
        let mut healthy = vec![instance("a", 1), instance("b", 1)];
        healthy[0].current_connections = 2;
        healthy[1].current_connections = 1;

        let mut policy = SelectionPolicy::new(SelectionStrategy::LeastConnections);
        assert_eq!(policy.select(&healthy).unwrap().id, "b");
    }

    #[test]
    fn response_time_favours_no_sample_instances() {
        let mut healthy = vec![instance("a", 1), instance("b", 1)];
        healthy[0].avg_response_time_ms = 500.0;
        // b has no samples yet -- avg_response_time_ms defaults to 0.0.

        let mut policy = SelectionPolicy::new(SelectionStrategy::ResponseTime);
        assert_eq!(policy.select(&healthy).unwrap().id, "b");
    }

    #[test]
    fn switching_strategy_resets_round_robin_index() {
        let healthy = vec![instance("a", 1), instance("b", 1)];
        let mut policy = SelectionPolicy::new(SelectionStrategy::RoundRobin);
        policy.select(&healthy);
        policy.set_strategy(SelectionStrategy::RoundRobin);
        assert_eq!(policy.select(&healthy).unwrap().id, "a");
    }

    #[test]
    fn empty_subset_returns_none() {
        let mut policy = SelectionPolicy::new(SelectionStrategy::RoundRobin);
        assert!(policy.select(&[]).is_none());
    }
}
