//! Question in, highlighted map out.
//!
//! `prepare` only reads shared state and may run concurrently with other
//! requests; `apply` is where the map changes, and it refuses any request that
//! is no longer the latest one.

use crate::data::CountryDataset;
use crate::error::PipelineError;
use crate::executor::{Executor, QueryResult};
use crate::highlight::{HighlightMap, MapSurface, SelectionChange};
use crate::models::ModelManager;
use crate::sql::validator::QueryValidator;
use crate::translator::{TranslationMode, TranslationOutcome, Translator};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_CACHE_SIZE: usize = 50;

/// Hands out monotonically increasing tickets; only the newest is current.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn next(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, ticket: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket
    }
}

/// Translations keyed by lowercased question; evicts the oldest insertion.
#[derive(Debug)]
pub struct TranslationCache {
    capacity: usize,
    entries: VecDeque<(String, TranslationOutcome)>,
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    fn key(question: &str) -> String {
        question.trim().to_lowercase()
    }

    pub fn get(&self, question: &str) -> Option<&TranslationOutcome> {
        let key = Self::key(question);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, outcome)| outcome)
    }

    pub fn insert(&mut self, question: &str, outcome: TranslationOutcome) {
        if self.capacity == 0 {
            return;
        }
        let key = Self::key(question);
        self.entries.retain(|(k, _)| *k != key);
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((key, outcome));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// What the user sees after one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsPanel {
    pub query: String,
    pub row_count: usize,
    pub highlighted_count: usize,
    pub explanation: Option<String>,
    pub result: QueryResult,
    pub from_cache: bool,
    pub elapsed: Duration,
}

impl fmt::Display for ResultsPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SQL Query: {}", self.query)?;
        if let Some(explanation) = &self.explanation {
            writeln!(f, "{}", explanation)?;
        }
        let noun = if self.row_count == 1 { "country" } else { "countries" };
        writeln!(f, "Found {} {}", self.row_count, noun)?;
        match self.highlighted_count {
            0 => write!(f, "No countries highlighted.")?,
            1 => write!(f, "1 country highlighted.")?,
            n => write!(f, "{} countries highlighted.", n)?,
        }
        if self.from_cache {
            write!(f, " (cached)")?;
        }
        Ok(())
    }
}

/// A translated question waiting to be applied.
#[derive(Debug, Clone)]
pub struct PendingAnswer {
    pub ticket: u64,
    pub question: String,
    pub outcome: TranslationOutcome,
    pub from_cache: bool,
    started: Instant,
}

/// Owns the dataset, the translator, the executor and the highlight map.
pub struct QueryPipeline<S: MapSurface> {
    dataset: Arc<CountryDataset>,
    executor: Executor,
    validator: QueryValidator,
    translator: Translator,
    map: HighlightMap<S>,
    sequencer: RequestSequencer,
    cache: Mutex<TranslationCache>,
}

impl<S: MapSurface> QueryPipeline<S> {
    pub fn new(
        dataset: Arc<CountryDataset>,
        models: Arc<ModelManager>,
        map: HighlightMap<S>,
        cache_size: usize,
    ) -> Self {
        let executor = Executor::new(&dataset);
        let catalog = executor.catalog().clone();
        let translator = Translator::new(models, catalog.clone(), dataset.first().cloned());

        Self {
            dataset,
            executor,
            validator: QueryValidator::new(catalog),
            translator,
            map,
            sequencer: RequestSequencer::default(),
            cache: Mutex::new(TranslationCache::new(cache_size)),
        }
    }

    pub fn dataset(&self) -> &Arc<CountryDataset> {
        &self.dataset
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        self.translator.models()
    }

    pub fn map(&self) -> &HighlightMap<S> {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut HighlightMap<S> {
        &mut self.map
    }

    pub fn cached_translations(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Takes a ticket and translates, consulting the cache first.
    pub async fn prepare(
        &self,
        question: &str,
        mode: TranslationMode,
    ) -> Result<PendingAnswer, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }

        let ticket = self.sequencer.next();
        let started = Instant::now();
        debug!(ticket, "Processing query: {}", question);

        let cached = self
            .cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(question).cloned());
        if let Some(outcome) = cached {
            debug!("Using cached translation for query: {}", question);
            return Ok(PendingAnswer {
                ticket,
                question: question.to_string(),
                outcome,
                from_cache: true,
                started,
            });
        }

        let outcome = self.translator.translate(question, mode).await?;
        Ok(PendingAnswer {
            ticket,
            question: question.to_string(),
            outcome,
            from_cache: false,
            started,
        })
    }

    /// Validates, executes and highlights, unless a newer request was made.
    pub fn apply(&mut self, pending: PendingAnswer) -> Result<ResultsPanel, PipelineError> {
        if !self.sequencer.is_current(pending.ticket) {
            info!(ticket = pending.ticket, "Discarding superseded result");
            return Err(PipelineError::Superseded(pending.ticket));
        }

        let mut panel = self.run_validated(pending.outcome.sql(), pending.started)?;
        panel.explanation = pending.outcome.explanation().map(str::to_string);
        panel.from_cache = pending.from_cache;

        if !pending.from_cache {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(&pending.question, pending.outcome);
            }
        }
        Ok(panel)
    }

    pub async fn ask(
        &mut self,
        question: &str,
        mode: TranslationMode,
    ) -> Result<ResultsPanel, PipelineError> {
        let pending = self.prepare(question, mode).await?;
        self.apply(pending)
    }

    /// Runs a SELECT typed by the user, skipping translation.
    pub fn run_sql(&mut self, sql: &str) -> Result<ResultsPanel, PipelineError> {
        self.sequencer.next();
        self.run_validated(sql, Instant::now())
    }

    fn run_validated(&mut self, sql: &str, started: Instant) -> Result<ResultsPanel, PipelineError> {
        let safe = self.validator.validate(sql).map_err(|e| {
            warn!("Rejected query: {}", e);
            e
        })?;
        let result = self.executor.execute(&safe)?;
        let highlighted_count = self.map.apply_highlight(&result, &self.dataset);

        let countries: Vec<&str> = result.codes().collect();
        debug!("Query result countries: {:?}", countries);

        Ok(ResultsPanel {
            query: safe.into_string(),
            row_count: result.len(),
            highlighted_count,
            explanation: None,
            result,
            from_cache: false,
            elapsed: started.elapsed(),
        })
    }

    pub fn select_region(&mut self, code: &str) -> SelectionChange {
        self.map.select_region(code, &self.dataset)
    }

    pub fn focus_region(&mut self, code: &str) -> bool {
        self.map.focus_region(code)
    }

    pub fn reset(&mut self) {
        self.sequencer.next();
        self.map.reset_map();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(sql: &str) -> TranslationOutcome {
        TranslationOutcome::Bare(sql.to_string())
    }

    #[test]
    fn test_sequencer() {
        let sequencer = RequestSequencer::default();
        let first = sequencer.next();
        let second = sequencer.next();
        assert!(second > first);
        assert!(!sequencer.is_current(first));
        assert!(sequencer.is_current(second));
    }

    #[test]
    fn test_cache_is_case_insensitive() {
        let mut cache = TranslationCache::new(4);
        cache.insert("Countries in Europe", bare("SELECT 1"));
        assert_eq!(cache.get("  countries IN europe "), Some(&bare("SELECT 1")));
        assert!(cache.get("Countries in Asia").is_none());
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = TranslationCache::new(2);
        cache.insert("a", bare("SELECT a"));
        cache.insert("b", bare("SELECT b"));
        cache.insert("a", bare("SELECT a2"));
        cache.insert("c", bare("SELECT c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(&bare("SELECT a2")));

        let mut disabled = TranslationCache::new(0);
        disabled.insert("a", bare("SELECT a"));
        assert!(disabled.is_empty());
    }

    #[test]
    fn test_panel_text() {
        let panel = ResultsPanel {
            query: "SELECT name FROM countries".to_string(),
            row_count: 1,
            highlighted_count: 1,
            explanation: Some("One country".to_string()),
            result: QueryResult::default(),
            from_cache: true,
            elapsed: Duration::from_millis(3),
        };
        assert_eq!(
            panel.to_string(),
            "SQL Query: SELECT name FROM countries\nOne country\nFound 1 country\n1 country highlighted. (cached)"
        );
    }
}
