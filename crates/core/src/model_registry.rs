//! Model registry naming rules and typed training metrics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum length of a model family name or version label.
const MAX_NAME_LEN: usize = 128;

/// Training metrics keyed by metric name (`auc`, `log_loss`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelMetrics(pub BTreeMap<String, f64>);

impl ModelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Every metric name must be non-empty and every value finite.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in &self.0 {
            if name.trim().is_empty() {
                return Err(CoreError::Validation(
                    "Metric names must not be empty".to_string(),
                ));
            }
            if !value.is_finite() {
                return Err(CoreError::Validation(format!(
                    "Metric '{name}' must be a finite number"
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .filter_map(|(k, v)| {
                    serde_json::Number::from_f64(*v).map(|n| (k.clone(), n.into()))
                })
                .collect(),
        )
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::Validation(format!("Malformed model metrics: {e}")))
    }
}

/// Validate a model family name or version label.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_name(kind: &str, name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(format!("Model {kind} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Model {kind} must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(format!(
            "Model {kind} may only contain alphanumeric, hyphen, underscore, or dot characters"
        )));
    }
    Ok(())
}
