//! Data model shared by the registry, the dispatcher, and every selection
//! policy: backend instances, models, requests, and the values that flow
//! back out through the event bus.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque key-value bag passed through to the backend transport unmodified.
pub type GenerationOptions = HashMap<String, Value>;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A coarse tag describing the caller's intent, used to bias model choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioTag {
    GeneralChat,
    CodeGen,
    TechSupport,
    Narrative,
    DataAnalysis,
    Translation,
    Summarization,
    Qa,
    CreativeWriting,
    Debugging,
}

impl Default for ScenarioTag {
    fn default() -> Self {
        ScenarioTag::GeneralChat
    }
}

impl ScenarioTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioTag::GeneralChat => "general-chat",
            ScenarioTag::CodeGen => "code-gen",
            ScenarioTag::TechSupport => "tech-support",
            ScenarioTag::Narrative => "narrative",
            ScenarioTag::DataAnalysis => "data-analysis",
            ScenarioTag::Translation => "translation",
            ScenarioTag::Summarization => "summarization",
            ScenarioTag::Qa => "qa",
            ScenarioTag::CreativeWriting => "creative-writing",
            ScenarioTag::Debugging => "debugging",
        }
    }
}

impl std::fmt::Display for ScenarioTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One addressable LLM inference server.
///
/// Mirrors the original `AIInstance` record: identity, capacity, live
/// counters, and the rolling metrics the health supervisor and selection
/// policies read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInstance {
    pub id: String,
    pub name: String,
    pub address: String,

    pub max_connections: u32,
    pub weight: u32,

    pub current_connections: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,

    /// Numerically stable incremental mean: `avg <- avg + (sample - avg) / n`.
    pub avg_response_time_ms: f64,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub last_health_check: i64,

    pub is_active: bool,
    pub is_healthy: bool,

    pub created_at: i64,
}

impl BackendInstance {
    /// Construct a new, healthy, active instance with the given id/name/address.
    /// `max_connections` defaults to 100 and `weight` to 1, matching the
    /// original system's defaults.
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            max_connections: 100,
            weight: 1,
            current_connections: 0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            avg_response_time_ms: 0.0,
            cpu_percent: 0.0,
            mem_percent: 0.0,
            last_health_check: now,
            is_active: true,
            is_healthy: true,
            created_at: now,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Fraction of capacity currently in use, for resource-based selection
    /// and display; `0.0` when `max_connections == 0`.
    pub fn connection_load(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            self.current_connections as f64 / self.max_connections as f64
        }
    }

    /// Mean of the last CPU% and memory% samples, used by `ResourceBased`.
    pub fn resource_usage(&self) -> f64 {
        (self.cpu_percent + self.mem_percent) / 2.0
    }
}

/// A model served by one or more instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub family: String,
    pub parameter_size: String,
    pub quantization: String,
    pub digest: String,

    pub avg_response_time_ms: f64,
    pub success_count: u64,
    pub error_count: u64,

    pub available: bool,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family: String::new(),
            parameter_size: String::new(),
            quantization: String::new(),
            digest: String::new(),
            avg_response_time_ms: 0.0,
            success_count: 0,
            error_count: 0,
            available: true,
        }
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            0.0
        } else {
            self.error_count as f64 / total as f64
        }
    }
}

/// Input to the dispatcher: a caller's generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    pub id: String,
    pub scenario: ScenarioTag,
    pub model_override: Option<String>,
    pub prompt: String,
    pub system_prompt: String,
    pub options: GenerationOptions,
    pub stream: bool,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub priority: i32,
    pub metadata: GenerationOptions,
    pub submit_ts: i64,
}

impl RequestSpec {
    /// Build a request for `prompt`, filling in the documented defaults:
    /// `general-chat` scenario, 3 retries, 30s timeout, priority 0.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            scenario: ScenarioTag::default(),
            model_override: None,
            prompt: prompt.into(),
            system_prompt: String::new(),
            options: GenerationOptions::new(),
            stream: false,
            max_retries: 3,
            timeout_ms: 30_000,
            priority: 0,
            metadata: GenerationOptions::new(),
            submit_ts: 0,
        }
    }

    pub fn with_scenario(mut self, scenario: ScenarioTag) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// A request must carry at least one of prompt/system_prompt.
    pub fn is_valid(&self) -> bool {
        !self.prompt.is_empty() || !self.system_prompt.is_empty()
    }
}

/// Internal lifecycle status of a request in flight through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Queued,
    Assigned,
    Streaming,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

/// Internal bookkeeping the dispatcher keeps alongside a `RequestSpec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestState {
    pub spec: RequestSpec,
    pub status: RequestStatus,
    pub assigned_instance_id: Option<String>,
    pub retry_count: u32,
    pub submit_ts: i64,
    pub start_ts: Option<i64>,
    pub finish_ts: Option<i64>,
}

impl RequestState {
    pub fn new(spec: RequestSpec) -> Self {
        let submit_ts = spec.submit_ts;
        Self {
            spec,
            status: RequestStatus::Queued,
            assigned_instance_id: None,
            retry_count: 0,
            submit_ts,
            start_ts: None,
            finish_ts: None,
        }
    }
}

/// Terminal value for a non-streaming request, or the final event for a
/// streaming one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub content: String,
    pub model_used: String,
    pub error_message: Option<String>,
    pub raw: Value,
    pub response_time_ms: f64,
    pub token_count: Option<u32>,
    pub timestamp: i64,
}

impl Response {
    pub fn success(content: impl Into<String>, model_used: impl Into<String>, response_time_ms: f64) -> Self {
        Self {
            ok: true,
            content: content.into(),
            model_used: model_used.into(),
            error_message: None,
            raw: Value::Null,
            response_time_ms,
            token_count: None,
            timestamp: now_millis(),
        }
    }

    pub fn failure(error_message: impl Into<String>, model_used: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: String::new(),
            model_used: model_used.into(),
            error_message: Some(error_message.into()),
            raw: Value::Null,
            response_time_ms: 0.0,
            token_count: None,
            timestamp: now_millis(),
        }
    }
}

/// One ordered piece of a streaming response. Chunks for a given request are
/// ordered; `is_final == true` occurs exactly once and is the last chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub request_id: String,
    pub text: String,
    pub is_final: bool,
}

/// Reorders the Model Selector's static preference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSelectionStrategy {
    /// Static domain-expert preference order (the default).
    Accuracy,
    /// Ascending `avgResponseTimeMs`.
    Performance,
    /// Ascending `avgRt * (1 + errorRate)`.
    Balanced,
}

impl Default for ModelSelectionStrategy {
    fn default() -> Self {
        ModelSelectionStrategy::Accuracy
    }
}

/// Snapshot of dispatcher-wide statistics, as emitted by `StatisticsUpdated`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub active_connections: usize,
    pub queued_requests: usize,
    pub average_response_time_ms: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub requests_per_second: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_has_documented_defaults() {
        let instance = BackendInstance::new("i1", "ollama-1", "http://localhost:11434");
        assert_eq!(instance.max_connections, 100);
        assert_eq!(instance.weight, 1);
        assert!(instance.is_active);
        assert!(instance.is_healthy);
        assert_eq!(instance.current_connections, 0);
    }

    #[test]
    fn request_spec_requires_prompt_or_system_prompt() {
        let empty = RequestSpec::new("");
        assert!(!empty.is_valid());

        let with_system = RequestSpec::new("").with_system_prompt("be terse");
        assert!(with_system.is_valid());
    }

    #[test]
    fn request_spec_defaults_match_spec() {
        let spec = RequestSpec::new("hello");
        assert_eq!(spec.max_retries, 3);
        assert_eq!(spec.timeout_ms, 30_000);
        assert_eq!(spec.priority, 0);
        assert_eq!(spec.scenario, ScenarioTag::GeneralChat);
    }

    #[test]
    fn resource_usage_is_mean_of_cpu_and_mem() {
        let mut instance = BackendInstance::new("i1", "n", "a");
        instance.cpu_percent = 40.0;
        instance.mem_percent = 60.0;
        assert_eq!(instance.resource_usage(), 50.0);
    }
}
