//! Backend Registry: the single source of truth for instance identity,
//! health, and live counters.
//!
//! Grounded on `AIInstance`/`LoadBalancer`'s instance map in the original
//! system (`addAIInstance`/`removeAIInstance`/`updateAIInstance`/
//! `handleRequestSuccess`/`handleRequestFailure`/`updateInstanceMetrics`).
//! Unlike `dispatch_core::registry::Registry` (which takes `&mut self` and
//! suits a single-owner collection), this registry is shared across the
//! dispatcher, health supervisor, and autoscale advisor concurrently, so it
//! wraps its state behind one lock and exposes `&self` methods instead of
//! implementing that trait directly.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use dispatch_core::model::{BackendInstance, ModelInfo};
use dispatch_core::registry::RegistryError;

#[derive(Debug, Default)]
struct Inner {
    instances: HashMap<String, BackendInstance>,
    models: HashMap<String, ModelInfo>,
}

/// Shared, lock-protected table of backend instances and the model catalog.
///
/// Cheap to clone: every clone shares the same underlying state via `Arc`.
#[derive(Clone)]
pub struct BackendRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Register a new instance. Rejects a duplicate id.
    pub async fn register(&self, instance: BackendInstance) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        if inner.instances.contains_key(&instance.id) {
            return Err(RegistryError::AlreadyExists(instance.id));
        }
        inner.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    /// Deregister an instance. Refuses while it has in-flight connections
    /// unless `force` is set, mirroring the original's guard in
    /// `removeAIInstance`.
    pub async fn deregister(&self, id: &str, force: bool) -> Result<BackendInstance, RegistryError> {
        let mut inner = self.inner.lock().await;
        let instance = inner
            .instances
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if instance.current_connections > 0 && !force {
            return Err(RegistryError::InvalidState(format!(
                "instance {id} has {} active connections",
                instance.current_connections
            )));
        }

        Ok(inner.instances.remove(id).expect("checked above"))
    }

    pub async fn get(&self, id: &str) -> Option<BackendInstance> {
        self.inner.lock().await.instances.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<BackendInstance> {
        let inner = self.inner.lock().await;
        let mut items: Vec<_> = inner.instances.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Instances with `is_healthy && is_active`, in stable id order.
    pub async fn list_healthy(&self) -> Vec<BackendInstance> {
        let inner = self.inner.lock().await;
        let mut items: Vec<_> = inner
            .instances
            .values()
            .filter(|i| i.is_healthy && i.is_active)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.instances.len()
    }

    /// Replace mutable fields (name, address, capacity, weight) on an
    /// existing instance. Counters and health are untouched.
    pub async fn update(
        &self,
        id: &str,
        f: impl FnOnce(&mut BackendInstance),
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        f(instance);
        Ok(())
    }

    /// Apply a fresh CPU%/mem% sample, as reported by a health probe.
    pub async fn update_metrics(&self, id: &str, cpu_percent: f64, mem_percent: f64) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        instance.cpu_percent = cpu_percent;
        instance.mem_percent = mem_percent;
        instance.last_health_check = now_millis();
        Ok(())
    }

    /// Set `is_healthy` directly. Returns `true` if this was a transition
    /// (the caller should emit `HealthChanged` exactly when this is `true`).
    pub async fn set_healthy(&self, id: &str, healthy: bool) -> Result<bool, RegistryError> {
        let mut inner = self.inner.lock().await;
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let changed = instance.is_healthy != healthy;
        instance.is_healthy = healthy;
        Ok(changed)
    }

    /// Increment `current_connections` when a request is assigned.
    pub async fn increment_connections(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        instance.current_connections += 1;
        Ok(())
    }

    /// Decrement `current_connections`, flooring at zero. Logs a warning on
    /// underflow rather than panicking — a bookkeeping bug elsewhere
    /// shouldn't take the registry down.
    pub async fn decrement_connections(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if instance.current_connections == 0 {
            warn!(instance_id = %id, "current_connections underflow; clamping to 0");
        } else {
            instance.current_connections -= 1;
        }
        Ok(())
    }

    /// Fold a completed request's outcome into an instance's rolling stats.
    /// `avg_response_time_ms` is the mean over successful requests only;
    /// uses the numerically stable incremental form
    /// `avg <- avg + (sample - avg) / n`, not `total_time / total_count`.
    pub async fn record_outcome(&self, id: &str, success: bool, response_time_ms: f64) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        instance.total_requests += 1;
        if success {
            instance.successful_requests += 1;
            let n = instance.successful_requests as f64;
            instance.avg_response_time_ms += (response_time_ms - instance.avg_response_time_ms) / n;
        } else {
            instance.failed_requests += 1;
        }

        Ok(())
    }

    /// Merge a freshly fetched model catalog: new models are added
    /// (`avg_response_time_ms = 0`, `available = true`), models no longer
    /// reported are flagged unavailable rather than removed.
    pub async fn refresh_models(&self, fetched: Vec<ModelInfo>) {
        let mut inner = self.inner.lock().await;
        let fetched_names: std::collections::HashSet<String> =
            fetched.iter().map(|m| m.name.clone()).collect();

        for model in inner.models.values_mut() {
            if !fetched_names.contains(&model.name) {
                model.available = false;
            }
        }

        for model in fetched {
            inner
                .models
                .entry(model.name.clone())
                .and_modify(|existing| existing.available = true)
                .or_insert(model);
        }
    }

    pub async fn list_models(&self) -> Vec<ModelInfo> {
        let inner = self.inner.lock().await;
        let mut items: Vec<_> = inner.models.values().cloned().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    pub async fn get_model(&self, name: &str) -> Option<ModelInfo> {
        self.inner.lock().await.models.get(name).cloned()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> BackendInstance {
        BackendInstance::new(id, id, "http://localhost:11434")
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let registry = BackendRegistry::new();
        registry.register(instance("a")).await.unwrap();
        let err = registry.register(instance("a")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn deregister_refuses_with_active_connections_unless_forced() {
        let registry = BackendRegistry::new();
        registry.register(instance("a")).await.unwrap();
        registry.increment_connections("a").await.unwrap();

        let err = registry.deregister("a", false).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidState(_)));

        let removed = registry.deregister("a", true).await.unwrap();
        assert_eq!(removed.id, "a");
    }

    #[tokio::test]
    async fn record_outcome_uses_incremental_mean() {
        let registry = BackendRegistry::new();
        registry.register(instance("a")).await.unwrap();

        registry.record_outcome("a", true, 100.0).await.unwrap();
        registry.record_outcome("a", true, 200.0).await.unwrap();

        let got = registry.get("a").await.unwrap();
        assert_eq!(got.avg_response_time_ms, 150.0);
        assert_eq!(got.total_requests, 2);
        assert_eq!(got.successful_requests, 2);
    }

    #[tokio::test]
    async fn record_outcome_failures_do_not_skew_avg_response_time() {
        let registry = BackendRegistry::new();
        registry.register(instance("a")).await.unwrap();

        registry.record_outcome("a", true, 100.0).await.unwrap();
        registry.record_outcome("a", false, 9999.0).await.unwrap();
        registry.record_outcome("a", true, 100.0).await.unwrap();

        let got = registry.get("a").await.unwrap();
        assert_eq!(got.avg_response_time_ms, 100.0);
        assert_eq!(got.total_requests, 3);
        assert_eq!(got.successful_requests, 2);
        assert_eq!(got.failed_requests, 1);
    }

    #[tokio::test]
    async fn decrement_connections_floors_at_zero() {
        let registry = BackendRegistry::new();
        registry.register(instance("a")).await.unwrap();
        registry.decrement_connections("a").await.unwrap();
        let got = registry.get("a").await.unwrap();
        assert_eq!(got.current_connections, 0);
    }

    #[tokio::test]
    async fn list_healthy_filters_and_sorts_by_id() {
        let registry = BackendRegistry::new();
        registry.register(instance("b")).await.unwrap();
        registry.register(instance("a")).await.unwrap();
        registry.set_healthy("b", false).await.unwrap();

        let healthy = registry.list_healthy().await;
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, "a");
    }
}
