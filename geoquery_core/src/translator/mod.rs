//! Natural language to SQL through the active model.

use crate::analyzer::QueryAnalyzer;
use crate::catalog::SchemaCatalog;
use crate::data::CountryRecord;
use crate::error::TranslationError;
use crate::inference::{CompletionRequest, ResponseFormat};
use crate::models::ModelManager;
use std::sync::Arc;
use tracing::{debug, info};

pub mod prompt;
pub mod response;

pub use prompt::PromptBuilder;
pub use response::{classify, RawOutcome, StructuredReply};

const TEMPERATURE: f32 = 0.3;
const PLAIN_MAX_TOKENS: u32 = 300;
const STRUCTURED_MAX_TOKENS: u32 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslationMode {
    Plain,
    #[default]
    Structured,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranslationOutcome {
    Bare(String),
    Structured {
        sql: String,
        explanation: Option<String>,
        /// In `0.0..=1.0`
        confidence: Option<f64>,
        query_type: Option<String>,
    },
}

impl TranslationOutcome {
    pub fn sql(&self) -> &str {
        match self {
            TranslationOutcome::Bare(sql) => sql,
            TranslationOutcome::Structured { sql, .. } => sql,
        }
    }

    pub fn explanation(&self) -> Option<&str> {
        match self {
            TranslationOutcome::Bare(_) => None,
            TranslationOutcome::Structured { explanation, .. } => explanation.as_deref(),
        }
    }
}

pub struct Translator {
    models: Arc<ModelManager>,
    catalog: SchemaCatalog,
    sample: Option<CountryRecord>,
}

impl Translator {
    pub fn new(models: Arc<ModelManager>, catalog: SchemaCatalog, sample: Option<CountryRecord>) -> Self {
        Self {
            models,
            catalog,
            sample,
        }
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    /// One inference call, no retry.
    pub async fn translate(
        &self,
        user_text: &str,
        mode: TranslationMode,
    ) -> Result<TranslationOutcome, TranslationError> {
        let text = user_text.trim();
        if text.is_empty() {
            return Err(TranslationError::UnintelligibleQuery(String::new()));
        }

        let engine = self
            .models
            .engine()
            .await
            .ok_or(TranslationError::EngineNotReady)?;

        let analysis = match mode {
            TranslationMode::Structured => Some(QueryAnalyzer::analyze(text)),
            TranslationMode::Plain => None,
        };
        let messages = PromptBuilder::new(&self.catalog, self.sample.as_ref()).messages(
            mode,
            text,
            analysis.as_ref(),
        );
        debug!("Prompt being sent to {}: {}", engine.model_id(), messages[0].content);

        let request = CompletionRequest {
            messages,
            temperature: TEMPERATURE,
            max_tokens: match mode {
                TranslationMode::Plain => PLAIN_MAX_TOKENS,
                TranslationMode::Structured => STRUCTURED_MAX_TOKENS,
            },
            response_format: match mode {
                TranslationMode::Plain => None,
                TranslationMode::Structured => Some(ResponseFormat::json_object()),
            },
        };

        let completion = engine
            .complete(request)
            .await
            .map_err(TranslationError::TranslationFailed)?;
        let content = completion.content().unwrap_or_default().trim();
        debug!("Received response: {}", content);

        match classify(content, mode) {
            RawOutcome::Structured(reply) => {
                info!("Generated SQL query: {}", reply.sql);
                Ok(TranslationOutcome::Structured {
                    sql: reply.sql,
                    explanation: reply.explanation,
                    confidence: reply.confidence,
                    query_type: reply.query_type,
                })
            }
            RawOutcome::Plain(sql) => {
                info!("Generated SQL query: {}", sql);
                Ok(TranslationOutcome::Bare(sql))
            }
            RawOutcome::Unparseable(raw) => Err(TranslationError::UnintelligibleQuery(raw)),
        }
    }
}
