use crate::catalog::{SchemaCatalog, TABLE_NAME};
use crate::data::CountryDataset;
use crate::error::ExecutionError;
use crate::sql::parser::Parser;
use crate::sql::types::{Projection, Value};
use crate::sql::validator::SafeQuery;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

pub mod filter;
use filter::ExpressionEvaluator;

/// One result row. `code` is always the country's ISO_A3, whatever was projected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub code: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.code.as_str())
    }

    /// Value of a projected column in row `row`.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.values.get(idx))
    }
}

/// Runs validated queries against a tabular projection of the dataset.
pub struct Executor {
    catalog: SchemaCatalog,
    table: Vec<Row>,
}

impl Executor {
    pub fn new(dataset: &CountryDataset) -> Self {
        let catalog = dataset
            .first()
            .map(SchemaCatalog::from_record)
            .unwrap_or_default();
        Self::with_catalog(catalog, dataset)
    }

    pub fn with_catalog(catalog: SchemaCatalog, dataset: &CountryDataset) -> Self {
        let mut executor = Self {
            catalog,
            table: Vec::new(),
        };
        executor.reload(dataset);
        executor
    }

    /// Rebuilds the whole projection; never patched row by row.
    pub fn reload(&mut self, dataset: &CountryDataset) {
        let columns = self.catalog.list_columns();
        self.table = dataset
            .records()
            .iter()
            .map(|record| Row {
                code: record.iso_a3.clone(),
                values: columns.iter().map(|c| record.value_of(c)).collect(),
            })
            .collect();
        debug!(rows = self.table.len(), "Table '{}' initialized with data", TABLE_NAME);
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn execute(&self, query: &SafeQuery) -> Result<QueryResult, ExecutionError> {
        let start = Instant::now();
        let sql = query.as_str();
        let fail = |message: String| ExecutionError::new(message, sql);

        debug!("Executing query: {}", sql);
        let select = Parser::parse(sql).map_err(|e| fail(e.to_string()))?;

        if !select.table.eq_ignore_ascii_case(self.catalog.table_name()) {
            return Err(fail(format!("Table {} not found", select.table)));
        }

        let column_names = self.catalog.list_columns();
        let evaluator = ExpressionEvaluator::new(column_names.clone());
        if let Some(where_expr) = &select.where_clause {
            evaluator
                .resolve_columns(where_expr)
                .map_err(|e| fail(e.to_string()))?;
        }

        let mut rows: Vec<&Row> = Vec::with_capacity(self.table.len());
        for row in &self.table {
            let keep = match &select.where_clause {
                Some(where_expr) => evaluator
                    .evaluate(where_expr, &row.values)
                    .map_err(|e| fail(e.to_string()))?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }
        if select.where_clause.is_some() {
            debug!("Filtered {} rows using WHERE clause", rows.len());
        }

        // (output name, source column index)
        let mut outputs: Vec<(String, usize)> = Vec::new();
        for item in &select.projection {
            match item {
                Projection::Wildcard => {
                    outputs.extend(column_names.iter().cloned().enumerate().map(|(i, c)| (c, i)))
                }
                Projection::Column { name, alias } => {
                    let idx = evaluator.column_index(name).map_err(|e| fail(e.to_string()))?;
                    outputs.push((alias.clone().unwrap_or_else(|| column_names[idx].clone()), idx));
                }
            }
        }

        for order_clause in select.order_by.iter().rev() {
            let col_idx = match outputs.iter().find(|(out, _)| *out == order_clause.column) {
                Some((_, idx)) => *idx,
                None => evaluator
                    .column_index(&order_clause.column)
                    .map_err(|e| fail(e.to_string()))?,
            };

            rows.sort_by(|a, b| {
                let ordering = a.values[col_idx].sort_cmp(&b.values[col_idx]);
                if order_clause.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        let mut projected: Vec<Row> = rows
            .into_iter()
            .map(|row| Row {
                code: row.code.clone(),
                values: outputs.iter().map(|(_, idx)| row.values[*idx].clone()).collect(),
            })
            .collect();

        if select.distinct {
            let mut seen: Vec<Vec<Value>> = Vec::new();
            projected.retain(|row| {
                if seen.contains(&row.values) {
                    false
                } else {
                    seen.push(row.values.clone());
                    true
                }
            });
        }

        let limit = select.limit.unwrap_or(usize::MAX);
        let rows: Vec<Row> = projected.into_iter().skip(select.offset).take(limit).collect();

        debug!(rows = rows.len(), elapsed = ?start.elapsed(), "Query executed");

        Ok(QueryResult {
            columns: outputs.into_iter().map(|(name, _)| name).collect(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;
    use crate::data::{CountryRecord, DatasetMetadata};
    use crate::sql::validator::QueryValidator;

    fn dataset() -> CountryDataset {
        let mut usa = CountryRecord::new("USA", "United States");
        usa.region = Some("Americas".into());
        usa.population = Some(331_000_000);

        let mut gbr = CountryRecord::new("GBR", "United Kingdom");
        gbr.region = Some("Europe".into());
        gbr.population = Some(67_000_000);

        let mut irl = CountryRecord::new("IRL", "Ireland");
        irl.region = Some("Europe".into());
        irl.population = Some(5_000_000);

        CountryDataset::from_records(DatasetMetadata::default(), vec![usa, gbr, irl])
    }

    fn run(sql: &str) -> Result<QueryResult, ExecutionError> {
        let executor = Executor::new(&dataset());
        let safe = QueryValidator::new(SchemaCatalog::standard())
            .validate(sql)
            .unwrap();
        executor.execute(&safe)
    }

    #[test]
    fn test_filter_and_order() {
        let result =
            run("SELECT name, ISO_A3 FROM countries WHERE region = 'Europe' ORDER BY name").unwrap();
        assert_eq!(result.columns, vec!["name", "ISO_A3"]);
        assert_eq!(result.codes().collect::<Vec<_>>(), vec!["IRL", "GBR"]);
    }

    #[test]
    fn test_order_desc_limit_offset() {
        let result =
            run("SELECT name FROM countries ORDER BY population DESC LIMIT 1 OFFSET 1").unwrap();
        assert_eq!(result.codes().collect::<Vec<_>>(), vec!["GBR"]);
    }

    #[test]
    fn test_code_kept_when_not_projected() {
        let result = run("SELECT name AS country FROM countries WHERE population < 10000000").unwrap();
        assert_eq!(result.columns, vec!["country"]);
        assert_eq!(result.rows[0].code, "IRL");
        assert_eq!(
            result.value(0, "country"),
            Some(&Value::Text("Ireland".to_string()))
        );
    }

    #[test]
    fn test_order_by_alias() {
        let result = run("SELECT population AS pop FROM countries ORDER BY pop").unwrap();
        assert_eq!(result.codes().collect::<Vec<_>>(), vec!["IRL", "GBR", "USA"]);
    }

    #[test]
    fn test_distinct_projection() {
        let result = run("SELECT DISTINCT region FROM countries ORDER BY region").unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_empty_match_is_ok() {
        let result = run("SELECT name FROM countries WHERE region = 'Antarctica'").unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_unknown_column_reports_error_with_query() {
        let sql = "SELECT name FROM countries WHERE gdp > 5";
        let err = run(sql).unwrap_err();
        assert_eq!(err.original_query, sql);
        assert!(err.message.contains("gdp"));
    }

    #[test]
    fn test_unknown_column_behind_false_condition_is_error() {
        let sql = "SELECT name FROM countries WHERE region = 'Nowhere' AND gdp > 5";
        let err = run(sql).unwrap_err();
        assert_eq!(err.original_query, sql);
        assert!(err.message.contains("gdp"));

        assert!(run("SELECT name FROM countries WHERE region = 'Europe' OR gdp > 5").is_err());
    }

    #[test]
    fn test_unknown_column_on_empty_dataset_is_error() {
        let executor = Executor::new(&CountryDataset::from_records(
            DatasetMetadata::default(),
            Vec::new(),
        ));
        let safe = QueryValidator::new(SchemaCatalog::standard())
            .validate("SELECT name FROM countries WHERE gdp > 5")
            .unwrap();
        assert!(executor.execute(&safe).is_err());
    }

    #[test]
    fn test_double_quoted_value_compares_as_text() {
        let result = run(r#"SELECT name FROM countries WHERE region = "Europe" ORDER BY name"#).unwrap();
        assert_eq!(result.codes().collect::<Vec<_>>(), vec!["IRL", "GBR"]);
    }

    #[test]
    fn test_negated_condition_skips_missing_values() {
        let mut unknown = CountryRecord::new("ATA", "Antarctica");
        unknown.region = Some("Antarctic".into());
        let mut records = dataset().records().to_vec();
        records.push(unknown);
        let executor = Executor::new(&CountryDataset::from_records(
            DatasetMetadata::default(),
            records,
        ));
        let safe = QueryValidator::new(SchemaCatalog::standard())
            .validate("SELECT name FROM countries WHERE NOT (population > 10000000)")
            .unwrap();
        let result = executor.execute(&safe).unwrap();
        assert_eq!(result.codes().collect::<Vec<_>>(), vec!["IRL"]);
    }

    #[test]
    fn test_unknown_table_is_error() {
        let err = run("SELECT name FROM cities").unwrap_err();
        assert!(err.message.contains("cities"));
    }

    #[test]
    fn test_case_insensitive_column_fallback() {
        let result = run("SELECT NAME FROM countries WHERE Region = 'Americas'").unwrap();
        assert_eq!(result.codes().collect::<Vec<_>>(), vec!["USA"]);
        assert_eq!(result.columns, vec!["name"]);
    }

    #[test]
    fn test_reload_replaces_rows() {
        let mut executor = Executor::new(&dataset());
        let smaller = CountryDataset::from_records(
            DatasetMetadata::default(),
            vec![CountryRecord::new("FRA", "France")],
        );
        executor.reload(&smaller);

        let safe = QueryValidator::new(SchemaCatalog::standard())
            .validate("SELECT * FROM countries")
            .unwrap();
        let result = executor.execute(&safe).unwrap();
        assert_eq!(result.codes().collect::<Vec<_>>(), vec!["FRA"]);
    }
}
