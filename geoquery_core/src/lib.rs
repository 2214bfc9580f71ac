//! Natural-language questions about countries, answered by highlighting them on a map.

/// Module classifying questions before they reach the model.
pub mod analyzer;

/// Module storing model artifact records on disk.
pub mod cache;

/// Module describing the queryable country table.
pub mod catalog;

/// Module reading settings from the environment.
pub mod config;

/// Module loading the country dataset.
pub mod data;

pub mod error;

/// Module responsible for executing queries.
pub mod executor;

/// Module driving region styles on a map surface.
pub mod highlight;

/// Module talking to inference engines.
pub mod inference;

/// Module managing model downloads and activation.
pub mod models;

/// Module tying translation, validation, execution and highlighting together.
pub mod pipeline;

/// Module for SQL parsing and validation.
pub mod sql;

/// Module turning questions into SQL.
pub mod translator;

/// Re-export of the application configuration.
pub use config::AppConfig;

/// Re-export of the country table catalog.
pub use catalog::SchemaCatalog;

/// Re-exports of the dataset types.
pub use data::{CountryDataset, CountryRecord, DatasetLoader};

/// Re-export of the core Executor responsible for running queries.
pub use executor::{Executor, QueryResult};

/// Re-exports of the highlight state machine and the in-memory surface.
pub use highlight::{HeadlessMap, HighlightMap, MapSurface};

/// Re-export of the HTTP inference backend.
pub use inference::LocalServerBackend;

/// Re-exports of the model catalog and lifecycle manager.
pub use models::{ModelCatalog, ModelManager};

/// Re-exports of the request pipeline.
pub use pipeline::{QueryPipeline, ResultsPanel};

/// Re-export of the query validator.
pub use sql::validator::QueryValidator;

/// Re-exports of the translator.
pub use translator::{TranslationMode, Translator};
