//! Static checks on model-produced SQL before it is executed.
//!
//! Extraction of the first `SELECT` from free text is a heuristic; it does not
//! tokenize SQL beyond tracking quoted literals.

use super::parser::Parser;
use crate::catalog::SchemaCatalog;
use crate::error::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{Expr, SelectItem, SetExpr, Statement as SqlStatement};
use std::fmt;
use tracing::{debug, warn};

const DISALLOWED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "MERGE",
    "GRANT", "REVOKE", "ATTACH", "DETACH", "PRAGMA",
];

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[A-Za-z]*\s*").unwrap());
static CHATTER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(here's the sql query you need:|here is the sql query:|sql query:|query:|sql:)\s*")
        .unwrap()
});
static SELECT_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bselect\b").unwrap());
static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());
static PROSE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\b(this will find|this query|the above query)\b").unwrap());
static LEADING_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([A-Za-z]+)").unwrap());

/// A query that passed validation, ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct SafeQuery {
    sql: String,
    unknown_identifiers: Vec<String>,
}

impl SafeQuery {
    pub fn as_str(&self) -> &str {
        &self.sql
    }

    /// Identifiers the soft column check did not recognize.
    pub fn unknown_identifiers(&self) -> &[String] {
        &self.unknown_identifiers
    }

    pub fn into_string(self) -> String {
        self.sql
    }
}

impl fmt::Display for SafeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

fn strip_wrappers(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(m) = CODE_FENCE.find(text) {
        text = &text[m.end()..];
    }
    if let Some(m) = CHATTER_PREFIX.find(text) {
        text = &text[m.end()..];
    }
    text
}

fn leading_keyword(text: &str) -> Option<String> {
    LEADING_WORD
        .captures(text)
        .map(|caps| caps[1].to_ascii_uppercase())
}

/// First `SELECT ...` in `raw`, cut at a blank line, a code fence or the end.
///
/// Trailing explanations such as "This query finds ..." are dropped.
pub fn extract_select(raw: &str) -> Option<String> {
    extract_with_rest(raw).map(|(sql, _)| sql)
}

fn extract_with_rest(raw: &str) -> Option<(String, &str)> {
    let text = strip_wrappers(raw);
    let start = SELECT_START.find(text)?.start();
    let tail = &text[start..];

    let mut end = tail.len();
    if let Some(m) = BLANK_LINE.find(tail) {
        end = end.min(m.start());
    }
    if let Some(pos) = tail.find("```") {
        end = end.min(pos);
    }

    let candidate = &tail[..prose_start(&tail[..end])];
    let sql = candidate.trim().to_string();
    if sql.is_empty() {
        None
    } else {
        Some((sql, &tail[end..]))
    }
}

/// Offset of the first explanatory sentence that starts outside a quoted literal.
fn prose_start(text: &str) -> usize {
    for m in PROSE_MARKER.find_iter(text) {
        if !inside_quotes(&text[..m.start()]) {
            return m.start();
        }
    }
    text.len()
}

fn inside_quotes(prefix: &str) -> bool {
    let mut quote: Option<u8> = None;
    for &b in prefix.as_bytes() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if matches!(b, b'\'' | b'"' | b'`') => quote = Some(b),
            None => {}
        }
    }
    quote.is_some()
}

/// Rejects comments and chained statements outside quoted literals and trims
/// one trailing terminator.
fn check_structure(sql: &str) -> Result<&str, ValidationError> {
    let bytes = sql.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    return Err(ValidationError::InjectionSuspected(
                        "inline comment marker '--'".to_string(),
                    ));
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    return Err(ValidationError::InjectionSuspected(
                        "comment marker '/*'".to_string(),
                    ));
                }
                b';' => {
                    let rest = sql[i + 1..].trim();
                    if !rest.is_empty() {
                        return Err(ValidationError::InjectionSuspected(format!(
                            "statement separator followed by: {}",
                            rest
                        )));
                    }
                    return Ok(sql[..i].trim_end());
                }
                _ => {}
            },
        }
        i += 1;
    }

    Ok(sql)
}

/// Stateless gate between the translator and the executor.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    catalog: SchemaCatalog,
}

impl QueryValidator {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn validate(&self, candidate: &str) -> Result<SafeQuery, ValidationError> {
        let stripped = strip_wrappers(candidate);
        if let Some(keyword) = leading_keyword(stripped) {
            if DISALLOWED_KEYWORDS.contains(&keyword.as_str()) {
                return Err(ValidationError::DisallowedStatement(keyword));
            }
        }

        let (extracted, rest) = extract_with_rest(candidate)
            .ok_or_else(|| ValidationError::NoQueryFound(candidate.trim().to_string()))?;

        // Mutating statements hiding after the extracted query.
        for line in rest.lines() {
            if let Some(keyword) = leading_keyword(line) {
                if DISALLOWED_KEYWORDS.contains(&keyword.as_str()) {
                    return Err(ValidationError::InjectionSuspected(format!(
                        "{} statement follows the query",
                        keyword
                    )));
                }
            }
        }

        let sql = check_structure(&extracted)?.to_string();

        let unknown_identifiers = match Parser::parse_statements(&sql) {
            Ok(statements) => self.inspect_statements(&statements)?,
            Err(e) => {
                // Left for the executor to report with the query attached.
                debug!("Validator could not parse query ({}): {}", e, sql);
                Vec::new()
            }
        };

        for identifier in &unknown_identifiers {
            warn!(identifier = %identifier, query = %sql, "Query references an unknown column");
        }

        Ok(SafeQuery {
            sql,
            unknown_identifiers,
        })
    }

    fn inspect_statements(&self, statements: &[SqlStatement]) -> Result<Vec<String>, ValidationError> {
        let query = match statements {
            [SqlStatement::Query(query)] => query,
            [other] => {
                return Err(ValidationError::DisallowedStatement(
                    other.to_string().split_whitespace().next().unwrap_or("").to_uppercase(),
                ))
            }
            [] => return Ok(Vec::new()),
            _ => {
                return Err(ValidationError::InjectionSuspected(format!(
                    "{} statements chained",
                    statements.len()
                )))
            }
        };

        let mut identifiers = Vec::new();
        let mut aliases = Vec::new();

        if let SetExpr::Select(select) = &*query.body {
            for item in &select.projection {
                match item {
                    SelectItem::UnnamedExpr(expr) => collect_identifiers(expr, &mut identifiers),
                    SelectItem::ExprWithAlias { expr, alias } => {
                        collect_identifiers(expr, &mut identifiers);
                        aliases.push(alias.value.clone());
                    }
                    _ => {}
                }
            }
            for table in &select.from {
                if let sqlparser::ast::TableFactor::Table { name, .. } = &table.relation {
                    identifiers.push(name.to_string());
                }
            }
            if let Some(selection) = &select.selection {
                collect_identifiers(selection, &mut identifiers);
            }
        }
        for item in &query.order_by {
            collect_identifiers(&item.expr, &mut identifiers);
        }

        let mut unknown: Vec<String> = identifiers
            .into_iter()
            .filter(|id| !self.catalog.is_known_identifier(id) && !aliases.contains(id))
            .collect();
        unknown.dedup();
        Ok(unknown)
    }
}

/// Column names referenced by `expr`. Double-quoted names are left out, since
/// they may be string literals written with the wrong quotes.
pub(crate) fn collect_identifiers(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Identifier(ident) if ident.quote_style == Some('"') => {}
        Expr::Identifier(ident) => out.push(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => {
            if let Some(last) = parts.last() {
                out.push(last.value.clone());
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_identifiers(left, out);
            collect_identifiers(right, out);
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr) => collect_identifiers(expr, out),
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            collect_identifiers(expr, out);
            collect_identifiers(pattern, out);
        }
        Expr::InList { expr, list, .. } => {
            collect_identifiers(expr, out);
            for item in list {
                collect_identifiers(item, out);
            }
        }
        Expr::Between { expr, low, high, .. } => {
            collect_identifiers(expr, out);
            collect_identifiers(low, out);
            collect_identifiers(high, out);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> QueryValidator {
        QueryValidator::new(SchemaCatalog::standard())
    }

    #[test]
    fn test_clean_query_passes_unchanged() {
        let sql = "SELECT name FROM countries WHERE region='Europe'";
        let safe = validator().validate(sql).unwrap();
        assert_eq!(safe.as_str(), sql);
        assert!(safe.unknown_identifiers().is_empty());
    }

    #[test]
    fn test_chained_drop_is_injection() {
        let err = validator()
            .validate("SELECT name FROM countries; DROP TABLE countries;")
            .unwrap_err();
        assert!(matches!(err, ValidationError::InjectionSuspected(_)));
    }

    #[test]
    fn test_comment_markers_rejected() {
        let v = validator();
        assert!(matches!(
            v.validate("SELECT name FROM countries -- WHERE 1=1").unwrap_err(),
            ValidationError::InjectionSuspected(_)
        ));
        assert!(matches!(
            v.validate("SELECT name /* hidden */ FROM countries").unwrap_err(),
            ValidationError::InjectionSuspected(_)
        ));
    }

    #[test]
    fn test_markers_inside_literals_are_fine() {
        let sql = "SELECT name FROM countries WHERE flagDescription LIKE '%-- ; /*%'";
        assert_eq!(validator().validate(sql).unwrap().as_str(), sql);
    }

    #[test]
    fn test_trailing_terminator_trimmed() {
        let safe = validator().validate("SELECT name FROM countries;  ").unwrap();
        assert_eq!(safe.as_str(), "SELECT name FROM countries");
    }

    #[test]
    fn test_mutating_statements_disallowed() {
        let v = validator();
        for sql in [
            "DROP TABLE countries",
            "delete from countries where 1=1",
            "UPDATE countries SET name = 'x'",
            "INSERT INTO countries (name) VALUES ('x')",
            "CREATE TABLE t (id INTEGER)",
        ] {
            assert!(
                matches!(v.validate(sql), Err(ValidationError::DisallowedStatement(_))),
                "{} should be disallowed",
                sql
            );
        }
    }

    #[test]
    fn test_no_select_found() {
        let err = validator().validate("I am not sure what you mean.").unwrap_err();
        assert!(matches!(err, ValidationError::NoQueryFound(_)));
    }

    #[test]
    fn test_extracts_from_prose() {
        let raw = "Here's the SQL query you need:\n\
                   SELECT name, ISO_A3 FROM countries WHERE region = 'Asia' ORDER BY name\n\n\
                   This will find all Asian countries.";
        let safe = validator().validate(raw).unwrap();
        assert_eq!(
            safe.as_str(),
            "SELECT name, ISO_A3 FROM countries WHERE region = 'Asia' ORDER BY name"
        );
    }

    #[test]
    fn test_extracts_from_code_fence_with_trailing_prose() {
        let raw = "```sql\nSELECT name FROM countries\nWHERE area > 1000000\n```\nThat lists big countries.";
        assert_eq!(
            extract_select(raw).as_deref(),
            Some("SELECT name FROM countries\nWHERE area > 1000000")
        );
    }

    #[test]
    fn test_same_line_prose_suffix_removed() {
        let raw = "SELECT name FROM countries WHERE population > 100 This query lists countries.";
        assert_eq!(
            extract_select(raw).as_deref(),
            Some("SELECT name FROM countries WHERE population > 100")
        );
    }

    #[test]
    fn test_prose_words_inside_literal_are_kept() {
        let sql = "SELECT name FROM countries WHERE flagDescription LIKE '%this query%'";
        assert_eq!(extract_select(sql).as_deref(), Some(sql));

        let raw = format!("{} This query finds flags.", sql);
        assert_eq!(extract_select(&raw).as_deref(), Some(sql));
        assert_eq!(validator().validate(&raw).unwrap().as_str(), sql);
    }

    #[test]
    fn test_drop_after_blank_line_is_injection() {
        let raw = "SELECT name FROM countries;\n\nDROP TABLE countries;";
        assert!(matches!(
            validator().validate(raw).unwrap_err(),
            ValidationError::InjectionSuspected(_)
        ));
    }

    #[test]
    fn test_unknown_columns_are_soft() {
        let safe = validator()
            .validate("SELECT name AS n, gdp FROM countries WHERE Region = 'Europe' ORDER BY n")
            .unwrap();
        assert_eq!(safe.unknown_identifiers(), &["gdp".to_string(), "Region".to_string()]);
    }

    #[test]
    fn test_double_quoted_value_is_not_flagged() {
        let safe = validator()
            .validate(r#"SELECT name FROM countries WHERE region = "Europe""#)
            .unwrap();
        assert!(safe.unknown_identifiers().is_empty());
    }
}
