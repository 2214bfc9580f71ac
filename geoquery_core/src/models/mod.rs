//! Model configurations and their lifecycle.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod hardware;
pub mod manager;

pub use hardware::{detect_hardware, recommend, Confidence, HardwareProfile, Recommendation};
pub use manager::{CacheState, EvictionSummary, ModelManager, ModelStatus};

pub const DEFAULT_MODEL: &str = "Llama-3.2-1B-Instruct-q4f16_1-MLC";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    #[serde(default = "default_context_window")]
    pub context_window_size: u32,
    /// Approximate download size
    pub size_mb: u32,
    pub description: String,
    #[serde(default)]
    pub recommended_ram_gb: Option<f64>,
}

fn default_context_window() -> u32 {
    2048
}

impl ModelConfig {
    fn builtin(model_id: &str, size_mb: u32, description: &str, ram_gb: f64) -> Self {
        Self {
            model_id: model_id.to_string(),
            context_window_size: default_context_window(),
            size_mb,
            description: description.to_string(),
            recommended_ram_gb: Some(ram_gb),
        }
    }
}

/// The static set of models that can be activated.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelConfig>,
    default_model: String,
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        Self {
            models: vec![
                ModelConfig::builtin(
                    "Llama-3.1-8B-Instruct-q4f16_1-MLC",
                    5100,
                    "Llama-3.1-8B (Most Powerful)",
                    16.0,
                ),
                ModelConfig::builtin(
                    "Llama-3.2-3B-Instruct-q4f16_1-MLC",
                    1800,
                    "Llama-3.2-3B (Balanced)",
                    8.0,
                ),
                ModelConfig::builtin(DEFAULT_MODEL, 650, "Llama-3.2-1B (Fastest)", 2.0),
                ModelConfig::builtin(
                    "Qwen2.5-1.5B-Instruct-q4f16_1-MLC",
                    950,
                    "Qwen2.5-1.5B (Efficient)",
                    4.0,
                ),
            ],
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Builds a catalog from a list; the default is `DEFAULT_MODEL` when listed,
    /// else the first entry.
    pub fn from_configs(models: Vec<ModelConfig>) -> Result<Self, ConfigError> {
        let default_model = models
            .iter()
            .find(|m| m.model_id == DEFAULT_MODEL)
            .or_else(|| models.first())
            .map(|m| m.model_id.clone())
            .ok_or_else(|| ConfigError::ModelsFile {
                path: "<inline>".to_string(),
                reason: "model list is empty".to_string(),
            })?;

        Ok(Self {
            models,
            default_model,
        })
    }

    /// Reads a JSON array of model configs.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let err = |reason: String| ConfigError::ModelsFile {
            path: path.display().to_string(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        let models: Vec<ModelConfig> =
            serde_json::from_str(&content).map_err(|e| err(e.to_string()))?;
        if models.is_empty() {
            return Err(err("model list is empty".to_string()));
        }
        Self::from_configs(models)
    }

    pub fn configs(&self) -> &[ModelConfig] {
        &self.models
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.model_id == model_id)
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
