use crate::sql::types::Value;
use crate::sql::validator::collect_identifiers;
use anyhow::{anyhow, Result};
use sqlparser::ast::{BinaryOperator, Expr, Ident, UnaryOperator, Value as SqlValue};
use std::cmp::Ordering;

/// Evaluates WHERE clauses with SQL three-valued logic: `None` is UNKNOWN,
/// and only rows whose condition is TRUE are kept.
pub struct ExpressionEvaluator {
    column_names: Vec<String>,
}

impl ExpressionEvaluator {
    pub fn new(column_names: Vec<String>) -> Self {
        Self { column_names }
    }

    /// Index of a column, exact name first, then ignoring ASCII case.
    pub fn column_index(&self, col_name: &str) -> Result<usize> {
        self.column_names
            .iter()
            .position(|name| name == col_name)
            .or_else(|| {
                self.column_names
                    .iter()
                    .position(|name| name.eq_ignore_ascii_case(col_name))
            })
            .ok_or_else(|| anyhow!("Column {} not found", col_name))
    }

    /// Fails on the first column of `expr` that does not resolve, whatever the rows hold.
    pub fn resolve_columns(&self, expr: &Expr) -> Result<()> {
        let mut identifiers = Vec::new();
        collect_identifiers(expr, &mut identifiers);
        for identifier in &identifiers {
            self.column_index(identifier)?;
        }
        Ok(())
    }

    pub fn evaluate(&self, expr: &Expr, row_values: &[Value]) -> Result<bool> {
        Ok(self.truth(expr, row_values)? == Some(true))
    }

    fn truth(&self, expr: &Expr, row_values: &[Value]) -> Result<Option<bool>> {
        match expr {
            Expr::BinaryOp { left, op, right } => {
                self.evaluate_binary_op(left, op, right, row_values)
            }
            Expr::Nested(inner) => self.truth(inner, row_values),
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => Ok(self.truth(expr, row_values)?.map(|b| !b)),
            Expr::Like {
                negated,
                expr,
                pattern,
                ..
            }
            | Expr::ILike {
                negated,
                expr,
                pattern,
                ..
            } => self.evaluate_like(expr, pattern, *negated, row_values),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let value = self.extract_value(expr, row_values)?;
                if value.is_null() {
                    return Ok(None);
                }
                let mut found = false;
                for item in list {
                    let candidate = self.extract_value(item, row_values)?;
                    if self.compare_values(&value, &BinaryOperator::Eq, &candidate)? == Some(true) {
                        found = true;
                        break;
                    }
                }
                Ok(Some(found != *negated))
            }
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let value = self.extract_value(expr, row_values)?;
                let low = self.extract_value(low, row_values)?;
                let high = self.extract_value(high, row_values)?;
                let above = self.compare_values(&value, &BinaryOperator::GtEq, &low)?;
                let below = self.compare_values(&value, &BinaryOperator::LtEq, &high)?;
                Ok(and(above, below).map(|inside| inside != *negated))
            }
            Expr::IsNull(inner) => Ok(Some(self.extract_value(inner, row_values)?.is_null())),
            Expr::IsNotNull(inner) => Ok(Some(!self.extract_value(inner, row_values)?.is_null())),
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                match self.extract_value(expr, row_values)? {
                    Value::Boolean(b) => Ok(Some(b)),
                    Value::Null => Ok(None),
                    _ => Err(anyhow!("Expected boolean value for identifier")),
                }
            }
            Expr::Value(SqlValue::Boolean(b)) => Ok(Some(*b)),
            Expr::Value(SqlValue::Null) => Ok(None),
            _ => Err(anyhow!("Unsupported expression type: {}", expr)),
        }
    }

    fn evaluate_binary_op(
        &self,
        left: &Expr,
        op: &BinaryOperator,
        right: &Expr,
        row_values: &[Value],
    ) -> Result<Option<bool>> {
        match op {
            BinaryOperator::And => {
                let left = self.truth(left, row_values)?;
                if left == Some(false) {
                    return Ok(left);
                }
                Ok(and(left, self.truth(right, row_values)?))
            }
            BinaryOperator::Or => {
                let left = self.truth(left, row_values)?;
                if left == Some(true) {
                    return Ok(left);
                }
                Ok(or(left, self.truth(right, row_values)?))
            }
            BinaryOperator::Gt
            | BinaryOperator::Lt
            | BinaryOperator::GtEq
            | BinaryOperator::LtEq
            | BinaryOperator::Eq
            | BinaryOperator::NotEq => {
                let left_val = self.extract_value(left, row_values)?;
                let right_val = self.extract_value(right, row_values)?;
                self.compare_values(&left_val, op, &right_val)
            }
            _ => Err(anyhow!("Unsupported operator: {}", op)),
        }
    }

    fn evaluate_like(
        &self,
        expr: &Expr,
        pattern: &Expr,
        negated: bool,
        row_values: &[Value],
    ) -> Result<Option<bool>> {
        let value = self.extract_value(expr, row_values)?;
        let pattern = match self.extract_value(pattern, row_values)? {
            Value::Text(p) => p,
            Value::Null => return Ok(None),
            other => return Err(anyhow!("LIKE pattern must be text, got {:?}", other)),
        };

        let text = match value {
            Value::Null => return Ok(None),
            Value::Text(t) => t,
            other => other.to_string(),
        };

        Ok(Some(like_match(&text, &pattern) != negated))
    }

    pub fn extract_value(&self, expr: &Expr, row_values: &[Value]) -> Result<Value> {
        match expr {
            Expr::Identifier(ident) => self.identifier_value(ident, row_values),
            Expr::CompoundIdentifier(parts) => {
                let last = parts
                    .last()
                    .ok_or_else(|| anyhow!("Empty compound identifier"))?;
                let idx = self.column_index(&last.value)?;
                Ok(row_values[idx].clone())
            }
            Expr::Nested(inner) => self.extract_value(inner, row_values),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => match self.extract_value(expr, row_values)? {
                Value::Integer(i) => Ok(Value::Integer(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(anyhow!("Cannot negate {:?}", other)),
            },
            Expr::Value(sql_val) => self.convert_sql_value(sql_val),
            _ => Err(anyhow!("Cannot extract value from expression: {}", expr)),
        }
    }

    /// A double-quoted name that is not a column reads as a string literal.
    fn identifier_value(&self, ident: &Ident, row_values: &[Value]) -> Result<Value> {
        match self.column_index(&ident.value) {
            Ok(idx) => Ok(row_values[idx].clone()),
            Err(_) if ident.quote_style == Some('"') => Ok(Value::Text(ident.value.clone())),
            Err(e) => Err(e),
        }
    }

    fn convert_sql_value(&self, sql_val: &SqlValue) -> Result<Value> {
        match sql_val {
            SqlValue::Number(n, _) => {
                if n.contains('.') || n.contains('e') || n.contains('E') {
                    Ok(Value::Float(n.parse()?))
                } else {
                    Ok(Value::Integer(n.parse()?))
                }
            }
            SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
                Ok(Value::Text(s.clone()))
            }
            SqlValue::Boolean(b) => Ok(Value::Boolean(*b)),
            SqlValue::Null => Ok(Value::Null),
            _ => Err(anyhow!("Unsupported SQL value: {}", sql_val)),
        }
    }

    /// UNKNOWN when either side is NULL.
    fn compare_values(
        &self,
        left: &Value,
        op: &BinaryOperator,
        right: &Value,
    ) -> Result<Option<bool>> {
        let ordering = match (left, right) {
            (Value::Null, _) | (_, Value::Null) => return Ok(None),
            (Value::Integer(l), Value::Integer(r)) => l.cmp(r),
            (Value::Text(l), Value::Text(r)) => l.cmp(r),
            (Value::Boolean(l), Value::Boolean(r)) => {
                return match op {
                    BinaryOperator::Eq => Ok(Some(l == r)),
                    BinaryOperator::NotEq => Ok(Some(l != r)),
                    _ => Err(anyhow!("Invalid operator for booleans")),
                };
            }
            // Mixed numerics, and numbers written as strings ('1000000').
            (l, r) => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => {
                    return Err(anyhow!(
                        "Type mismatch in comparison: {:?} vs {:?}",
                        left,
                        right
                    ))
                }
            },
        };

        Ok(Some(match op {
            BinaryOperator::Eq => ordering == Ordering::Equal,
            BinaryOperator::NotEq => ordering != Ordering::Equal,
            BinaryOperator::Gt => ordering == Ordering::Greater,
            BinaryOperator::Lt => ordering == Ordering::Less,
            BinaryOperator::GtEq => ordering != Ordering::Less,
            BinaryOperator::LtEq => ordering != Ordering::Greater,
            _ => return Err(anyhow!("Invalid comparison operator: {}", op)),
        }))
    }
}

fn and(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

/// Case-insensitive SQL LIKE with `%` and `_` wildcards.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    let (mut t, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '%')
}
