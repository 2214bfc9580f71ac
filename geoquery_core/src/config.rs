//! Application configuration read from the environment.

use crate::error::ConfigError;
use crate::models::ModelCatalog;
use crate::pipeline::DEFAULT_CACHE_SIZE;
use crate::translator::TranslationMode;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_DATA_PATH: &str = "data/countryData.json";
pub const DEFAULT_CACHE_DIR: &str = ".geoquery/cache";
pub const DEFAULT_LLM_BASE_URL: &str = "http://127.0.0.1:11434/v1";

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub data_path: PathBuf,
    pub cache_dir: PathBuf,
    pub llm_base_url: String,
    /// Model to activate at startup.
    pub initial_model: Option<String>,
    pub models_file: Option<PathBuf>,
    pub query_cache_size: usize,
    pub structured: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            initial_model: None,
            models_file: None,
            query_cache_size: DEFAULT_CACHE_SIZE,
            structured: true,
        }
    }
}

impl AppConfig {
    /// Reads `GEOQUERY_*` variables. Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let query_cache_size = match var("GEOQUERY_QUERY_CACHE_SIZE") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid("GEOQUERY_QUERY_CACHE_SIZE", &raw))?,
            None => defaults.query_cache_size,
        };

        let structured = match var("GEOQUERY_STRUCTURED") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| invalid("GEOQUERY_STRUCTURED", &raw))?,
            None => defaults.structured,
        };

        Ok(Self {
            data_path: var("GEOQUERY_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            cache_dir: var("GEOQUERY_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            llm_base_url: var("GEOQUERY_LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            initial_model: var("GEOQUERY_MODEL"),
            models_file: var("GEOQUERY_MODELS_FILE").map(PathBuf::from),
            query_cache_size,
            structured,
        })
    }

    pub fn translation_mode(&self) -> TranslationMode {
        if self.structured {
            TranslationMode::Structured
        } else {
            TranslationMode::Plain
        }
    }

    /// The configured model list, or the built-in one.
    pub fn model_catalog(&self) -> Result<ModelCatalog, ConfigError> {
        match &self.models_file {
            Some(path) => ModelCatalog::from_json_file(path),
            None => Ok(ModelCatalog::builtin()),
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
