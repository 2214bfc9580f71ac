use thiserror::Error;

/// Reasons a candidate query is refused before it reaches the executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no SELECT statement found in: {0}")]
    NoQueryFound(String),

    #[error("statement type not allowed: {0}")]
    DisallowedStatement(String),

    #[error("query rejected as possible injection: {0}")]
    InjectionSuspected(String),
}

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("no model is loaded yet")]
    EngineNotReady,

    #[error("inference call failed: {0}")]
    TranslationFailed(#[source] anyhow::Error),

    #[error("could not extract a query from the model output: {0}")]
    UnintelligibleQuery(String),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to activate model {model_id}: {reason}")]
    ActivationFailed { model_id: String, reason: String },

    #[error("model {0} is currently active and cannot be evicted")]
    ModelInUse(String),
}

/// A validated query that the engine could not run.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("error executing query: {message}")]
pub struct ExecutionError {
    pub message: String,
    pub original_query: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>, original_query: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            original_query: original_query.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read country data: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid country data format: {0}")]
    Format(String),

    #[error("no country data available")]
    Empty,
}

impl From<serde_json::Error> for DatasetError {
    fn from(e: serde_json::Error) -> Self {
        DatasetError::Format(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("persistent storage is unavailable")]
    Unavailable,

    #[error("storage read error: {0}")]
    ReadError(String),

    #[error("storage write error: {0}")]
    WriteError(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::ReadError(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::ReadError(e.to_string())
    }
}

/// Everything that can end a single ask/run cycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("request {0} was superseded by a newer one")]
    Superseded(u64),

    #[error("please enter a question about countries")]
    EmptyQuestion,
}

impl PipelineError {
    /// Text suitable for the results panel.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Translation(TranslationError::EngineNotReady) => {
                "The AI model is still loading. Please wait a moment...".to_string()
            }
            PipelineError::Translation(TranslationError::UnintelligibleQuery(raw)) => format!(
                "I couldn't understand how to create a query for that request. \
                 Could you try rephrasing it?\nModel response: {}",
                raw
            ),
            PipelineError::Validation(e) => format!("The generated query was rejected: {}", e),
            PipelineError::Execution(e) => format!(
                "There was an error executing the SQL query.\nSQL Query: {}\nError details: {}",
                e.original_query, e.message
            ),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("failed to load model list from {path}: {reason}")]
    ModelsFile { path: String, reason: String },
}
