//! Catalog and discovery
//!
//! Read-only queries against the engine's `information_schema`. Nothing here
//! materializes a file.

use crate::engine::{value_as_u64, QueryRunner};
use crate::error::{Error, Result};
use crate::sql::{quote_ident, quote_literal};
use crate::types::{Column, Row};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Schemas hidden from listings and search.
const SYSTEM_SCHEMAS: &str = "('information_schema', 'pg_catalog')";

/// Upper bound on search hits returned.
pub const MAX_SEARCH_HITS: usize = 100;

/// One table or view in the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub table_type: String,
    pub column_count: u64,
}

/// Columns (and optionally row count) of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescription {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

/// A table or column whose name matched a search term.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub schema: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// Discovery over the configured database.
#[derive(Debug, Clone)]
pub struct Catalog {
    runner: QueryRunner,
}

impl Catalog {
    pub fn new(runner: QueryRunner) -> Self {
        Self { runner }
    }

    pub fn list_tables(
        &self,
        schema: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableInfo>> {
        let schema_filter = schema
            .map(|s| format!(" AND t.table_schema = {}", quote_literal(s)))
            .unwrap_or_default();
        let sql = format!(
            "SELECT t.table_schema, t.table_name AS name, t.table_type AS table_type, \
             (SELECT COUNT(*) FROM information_schema.columns c \
              WHERE c.table_schema = t.table_schema AND c.table_name = t.table_name) AS column_count \
             FROM information_schema.tables t \
             WHERE t.table_schema NOT IN {}{} \
             ORDER BY 1, 2",
            SYSTEM_SCHEMAS, schema_filter
        );

        let tabular = self.runner.run_query(&sql, cancel)?;
        Ok(tabular
            .rows
            .iter()
            .map(|row| TableInfo {
                schema: text(row, "table_schema"),
                name: text(row, "name"),
                table_type: text(row, "table_type"),
                column_count: row.get("column_count").and_then(value_as_u64).unwrap_or(0),
            })
            .collect())
    }

    /// Describe a table; NotFound when it has no visible columns.
    pub fn describe_table(
        &self,
        table: &str,
        schema: Option<&str>,
        with_row_count: bool,
        cancel: &CancellationToken,
    ) -> Result<TableDescription> {
        let schema_filter = schema
            .map(|s| format!(" AND table_schema = {}", quote_literal(s)))
            .unwrap_or_default();
        let sql = format!(
            "SELECT table_schema, column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_name = {}{} \
             ORDER BY table_schema, ordinal_position",
            quote_literal(table),
            schema_filter
        );

        let tabular = self.runner.run_query(&sql, cancel)?;
        let first = tabular
            .rows
            .first()
            .ok_or_else(|| Error::not_found("table", table))?;
        let table_schema = text(first, "table_schema");

        // The same table name may exist in several schemas; keep the first.
        let columns = tabular
            .rows
            .iter()
            .filter(|row| text(row, "table_schema") == table_schema)
            .map(|row| Column {
                name: text(row, "column_name"),
                data_type: text(row, "data_type"),
                nullable: text(row, "is_nullable") != "NO",
            })
            .collect();

        let row_count = if with_row_count {
            let count_sql = format!(
                "SELECT COUNT(*) AS row_count FROM {}.{}",
                quote_ident(&table_schema),
                quote_ident(table)
            );
            self.runner
                .run_query(&count_sql, cancel)?
                .scalar()
                .and_then(value_as_u64)
        } else {
            None
        };

        Ok(TableDescription {
            schema: table_schema,
            name: table.to_string(),
            columns,
            row_count,
        })
    }

    /// Case-insensitive substring search over table and column names.
    pub fn search(
        &self,
        term: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        let term = term.trim();
        if term.is_empty() {
            return Err(Error::Validation("search term must not be empty".to_string()));
        }
        let pattern = quote_literal(&format!("%{}%", term));
        let limit = limit.clamp(1, MAX_SEARCH_HITS);
        let sql = format!(
            "SELECT table_schema, tbl, col, data_type FROM ( \
               SELECT table_schema, table_name AS tbl, NULL AS col, NULL AS data_type, 0 AS hit_rank \
               FROM information_schema.tables \
               WHERE table_schema NOT IN {sys} AND table_name ILIKE {pat} \
               UNION ALL \
               SELECT table_schema, table_name, column_name, data_type, 1 \
               FROM information_schema.columns \
               WHERE table_schema NOT IN {sys} AND column_name ILIKE {pat} \
             ) hits ORDER BY hit_rank, table_schema, tbl, col LIMIT {limit}",
            sys = SYSTEM_SCHEMAS,
            pat = pattern,
            limit = limit
        );

        let tabular = self.runner.run_query(&sql, cancel)?;
        Ok(tabular
            .rows
            .iter()
            .map(|row| SearchHit {
                schema: text(row, "table_schema"),
                table: text(row, "tbl"),
                column: optional_text(row, "col"),
                data_type: optional_text(row, "data_type"),
            })
            .collect())
    }
}

fn text(row: &Row, key: &str) -> String {
    optional_text(row, key).unwrap_or_default()
}

fn optional_text(row: &Row, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}
