use super::types::{OrderKey, Projection, SelectQuery};
use anyhow::{anyhow, Result};
use sqlparser::ast::{self, Expr, SelectItem, SetExpr, Statement as SqlStatement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

pub struct Parser;

impl Parser {
    /// Raw sqlparser statements, used by the validator for shape checks.
    pub fn parse_statements(sql: &str) -> Result<Vec<SqlStatement>> {
        let dialect = GenericDialect {};
        Ok(SqlParser::parse_sql(&dialect, sql)?)
    }

    pub fn parse(sql: &str) -> Result<SelectQuery> {
        let statements = Self::parse_statements(sql)?;

        match statements.as_slice() {
            [] => Err(anyhow!("No statements found")),
            [stmt] => Self::convert_statement(stmt),
            _ => Err(anyhow!("Expected a single statement, found {}", statements.len())),
        }
    }

    fn convert_statement(stmt: &SqlStatement) -> Result<SelectQuery> {
        let query = match stmt {
            SqlStatement::Query(query) => query,
            _ => return Err(anyhow!("Unsupported statement type")),
        };

        let select = match &*query.body {
            SetExpr::Select(select) => select,
            _ => return Err(anyhow!("Unsupported query type")),
        };

        let table = match select.from.as_slice() {
            [ast::TableWithJoins { relation, joins }] => {
                if !joins.is_empty() {
                    return Err(anyhow!("JOIN is not supported"));
                }
                if let ast::TableFactor::Table { name, .. } = relation {
                    name.to_string()
                } else {
                    return Err(anyhow!("Unsupported table reference"));
                }
            }
            [] => return Err(anyhow!("No table specified")),
            _ => return Err(anyhow!("Only one table may be queried")),
        };

        let projection = select
            .projection
            .iter()
            .map(Self::convert_projection)
            .collect::<Result<Vec<_>>>()?;

        let order_by = query
            .order_by
            .iter()
            .map(|item| {
                Ok(OrderKey {
                    column: Self::column_name(&item.expr)
                        .ok_or_else(|| anyhow!("Unsupported ORDER BY expression: {}", item.expr))?,
                    ascending: item.asc.unwrap_or(true),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let limit = query.limit.as_ref().map(Self::convert_count).transpose()?;
        let offset = query
            .offset
            .as_ref()
            .map(|o| Self::convert_count(&o.value))
            .transpose()?
            .unwrap_or(0);

        if select.having.is_some() {
            return Err(anyhow!("HAVING is not supported"));
        }

        Ok(SelectQuery {
            table,
            projection,
            where_clause: select.selection.as_ref().map(|expr| Box::new(expr.clone())),
            order_by,
            limit,
            offset,
            distinct: select.distinct.is_some(),
        })
    }

    fn convert_projection(item: &SelectItem) -> Result<Projection> {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => Ok(Projection::Wildcard),
            SelectItem::UnnamedExpr(expr) => Ok(Projection::Column {
                name: Self::column_name(expr)
                    .ok_or_else(|| anyhow!("Unsupported projection: {}", expr))?,
                alias: None,
            }),
            SelectItem::ExprWithAlias { expr, alias } => Ok(Projection::Column {
                name: Self::column_name(expr)
                    .ok_or_else(|| anyhow!("Unsupported projection: {}", expr))?,
                alias: Some(alias.value.clone()),
            }),
        }
    }

    /// Column referenced by a bare or table-qualified identifier.
    pub fn column_name(expr: &Expr) -> Option<String> {
        match expr {
            Expr::Identifier(ident) => Some(ident.value.clone()),
            Expr::CompoundIdentifier(parts) => parts.last().map(|p| p.value.clone()),
            Expr::Nested(inner) => Self::column_name(inner),
            _ => None,
        }
    }

    fn convert_count(expr: &Expr) -> Result<usize> {
        match expr {
            Expr::Value(ast::Value::Number(n, _)) => Ok(n.parse()?),
            _ => Err(anyhow!("Unsupported LIMIT/OFFSET expression: {}", expr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select() {
        let query = Parser::parse("SELECT name, ISO_A3 FROM countries").unwrap();
        assert_eq!(query.table, "countries");
        assert_eq!(query.projection.len(), 2);
        assert!(query.where_clause.is_none());
    }

    #[test]
    fn test_parse_order_limit_offset() {
        let query = Parser::parse(
            "SELECT name AS n FROM countries ORDER BY population DESC, name LIMIT 10 OFFSET 5",
        )
        .unwrap();

        assert_eq!(query.order_by.len(), 2);
        assert!(!query.order_by[0].ascending);
        assert!(query.order_by[1].ascending);
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, 5);
        match &query.projection[0] {
            Projection::Column { name, alias } => {
                assert_eq!(name, "name");
                assert_eq!(alias.as_deref(), Some("n"));
            }
            _ => panic!("Expected column projection"),
        }
    }

    #[test]
    fn test_parse_distinct_and_wildcard() {
        let query = Parser::parse("SELECT DISTINCT * FROM countries").unwrap();
        assert!(query.distinct);
        assert_eq!(query.projection, vec![Projection::Wildcard]);
    }

    #[test]
    fn test_rejects_non_query() {
        assert!(Parser::parse("DELETE FROM countries").is_err());
        assert!(Parser::parse("SELECT COUNT(*) FROM countries").is_err());
    }
}
