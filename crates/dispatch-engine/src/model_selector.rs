//! Model Selector: turns a scenario tag into a concrete model name.
//!
//! The original system hard-codes a scenario-to-model preference table in
//! its request-routing logic; this keeps that shape (a static list per
//! scenario) but makes the fallback and reordering rules explicit.

use dispatch_core::error::DispatchError;
use dispatch_core::model::{ModelInfo, ModelSelectionStrategy, ScenarioTag};

/// Static, hand-curated preference order per scenario. First entry is the
/// domain expert's top choice; later entries are fallbacks.
fn static_preferences(scenario: ScenarioTag) -> &'static [&'static str] {
    match scenario {
        ScenarioTag::GeneralChat => &["qwen3:8b", "llama3:8b", "gemma3:4b"],
        ScenarioTag::CodeGen => &["qwen2.5-coder:7b", "deepseek-coder:6.7b", "qwen3:8b"],
        ScenarioTag::TechSupport => &["qwen3:8b", "llama3:8b"],
        ScenarioTag::Narrative => &["llama3:8b", "qwen3:8b"],
        ScenarioTag::DataAnalysis => &["qwen2.5-coder:7b", "qwen3:8b"],
        ScenarioTag::Translation => &["qwen3:8b", "llama3:8b"],
        ScenarioTag::Summarization => &["qwen3:8b", "gemma3:4b"],
        ScenarioTag::Qa => &["qwen3:8b", "llama3:8b"],
        ScenarioTag::CreativeWriting => &["llama3:8b", "qwen3:8b"],
        ScenarioTag::Debugging => &["qwen2.5-coder:7b", "deepseek-coder:6.7b"],
    }
}

/// Reorder a scenario's static preference list per the active strategy.
fn ordered_candidates(
    scenario: ScenarioTag,
    strategy: ModelSelectionStrategy,
    catalog: &[ModelInfo],
) -> Vec<String> {
    let preferred = static_preferences(scenario);
    let lookup = |name: &str| catalog.iter().find(|m| m.name == name);

    match strategy {
        ModelSelectionStrategy::Accuracy => preferred.iter().map(|s| s.to_string()).collect(),
        ModelSelectionStrategy::Performance => {
            let mut names: Vec<String> = preferred.iter().map(|s| s.to_string()).collect();
            names.sort_by(|a, b| {
                let rt_a = lookup(a).map(|m| m.avg_response_time_ms).unwrap_or(f64::MAX);
                let rt_b = lookup(b).map(|m| m.avg_response_time_ms).unwrap_or(f64::MAX);
                rt_a.partial_cmp(&rt_b).unwrap_or(std::cmp::Ordering::Equal)
            });
            names
        }
        ModelSelectionStrategy::Balanced => {
            let mut names: Vec<String> = preferred.iter().map(|s| s.to_string()).collect();
            let score = |name: &str| {
                lookup(name)
                    .map(|m| m.avg_response_time_ms * (1.0 + m.error_rate()))
                    .unwrap_or(f64::MAX)
            };
            names.sort_by(|a, b| score(a).partial_cmp(&score(b)).unwrap_or(std::cmp::Ordering::Equal));
            names
        }
    }
}

/// Walk the (possibly reordered) preference list and return the first model
/// that is present in the catalog, `available`, and not flagged unhealthy
/// upstream. Falls back to the first lexicographic name in the catalog if
/// none of the preferred names are present; fails if the catalog is empty.
pub fn select_model(
    scenario: ScenarioTag,
    strategy: ModelSelectionStrategy,
    catalog: &[ModelInfo],
) -> Result<String, DispatchError> {
    if catalog.is_empty() {
        return Err(DispatchError::NoModelAvailable);
    }

    for name in ordered_candidates(scenario, strategy, catalog) {
        if let Some(model) = catalog.iter().find(|m| m.name == name) {
            if model.available {
                return Ok(model.name.clone());
            }
        }
    }

    let mut names: Vec<&str> = catalog.iter().filter(|m| m.available).map(|m| m.name.as_str()).collect();
    names.sort();
    names
        .first()
        .map(|s| s.to_string())
        .ok_or(DispatchError::NoModelAvailable)
}

/// Pick the next model in the static preference list after `current`, for
/// failover. Returns `None` if `current` was already the last preference or
/// isn't in the list (the caller falls back to `select_model`).
pub fn next_preference(scenario: ScenarioTag, current: &str, catalog: &[ModelInfo]) -> Option<String> {
    let preferred = static_preferences(scenario);
    let pos = preferred.iter().position(|&n| n == current)?;
    preferred[pos + 1..]
        .iter()
        .find(|&&name| catalog.iter().any(|m| m.name == name && m.available))
        .map(|s| s.to_string())
}
