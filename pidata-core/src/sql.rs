//! SQL text helpers
//!
//! Validation here is pattern-based: statements are inspected by their
//! leading keyword and quote-aware scanning, never parsed.

use crate::error::{Error, Result};
use std::path::Path;

/// Leading keywords accepted as read-only queries.
const READ_ONLY_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "FROM", "VALUES", "TABLE", "DESCRIBE", "SHOW", "SUMMARIZE", "EXPLAIN",
    "PIVOT", "UNPIVOT",
];

/// Leading keywords whose output can be wrapped in a subquery.
const WRAPPABLE_KEYWORDS: &[&str] = &["SELECT", "WITH", "FROM", "VALUES", "TABLE"];

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `read_parquet('<path>')` table function over a materialized file.
pub fn read_parquet(path: &Path) -> String {
    format!("read_parquet({})", quote_literal(&path.to_string_lossy()))
}

/// Trim whitespace and trailing semicolons; reject empty or multi-statement text.
pub fn normalize(sql: &str) -> Result<String> {
    let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if strip_leading_comments(trimmed).is_empty() {
        return Err(Error::Validation("SQL must not be empty".to_string()));
    }
    if has_top_level_semicolon(trimmed) {
        return Err(Error::Validation(
            "only a single SQL statement is allowed".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// First keyword of the statement, uppercased, ignoring leading comments and parentheses.
pub fn leading_keyword(sql: &str) -> String {
    strip_leading_comments(sql)
        .trim_start_matches('(')
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

/// Reject statements that are not read-only queries.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let keyword = leading_keyword(sql);
    if READ_ONLY_KEYWORDS.contains(&keyword.as_str()) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "only read-only queries are allowed (statement starts with {})",
            if keyword.is_empty() { "nothing" } else { keyword.as_str() }
        )))
    }
}

/// Apply the automatic row bound to a query that has no trailing LIMIT.
///
/// Statements that cannot be used as a subquery (DESCRIBE, SHOW, ...) are
/// returned unchanged.
pub fn bound(sql: &str, max_rows: usize) -> String {
    let keyword = leading_keyword(sql);
    if !WRAPPABLE_KEYWORDS.contains(&keyword.as_str()) || has_trailing_limit(sql) {
        return sql.to_string();
    }
    format!("SELECT * FROM (\n{}\n) AS bounded LIMIT {}", sql, max_rows)
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("").trim_start();
        } else {
            return rest;
        }
    }
}

fn has_top_level_semicolon(sql: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    for c in sql.chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ';' if !in_single && !in_double => return true,
            _ => {}
        }
    }
    false
}

/// True when the statement ends with `LIMIT <n>` or `LIMIT <n> OFFSET <m>`.
fn has_trailing_limit(sql: &str) -> bool {
    let tokens: Vec<String> = sql
        .split_whitespace()
        .rev()
        .take(4)
        .map(|t| t.to_ascii_uppercase())
        .collect();
    let is_number = |t: &str| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit());

    match tokens.as_slice() {
        [n, limit, ..] if limit == "LIMIT" && is_number(n.as_str()) => true,
        [m, offset, n, limit] => {
            offset == "OFFSET"
                && is_number(m.as_str())
                && limit == "LIMIT"
                && is_number(n.as_str())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("amount"), "\"amount\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_ident("order by"), "\"order by\"");
    }

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("/tmp/o'brien.parquet"), "'/tmp/o''brien.parquet'");
    }

    #[test]
    fn test_normalize_strips_trailing_semicolons() {
        assert_eq!(normalize("  SELECT 1 ;; ").unwrap(), "SELECT 1");
    }

    #[test]
    fn test_normalize_rejects_multiple_statements() {
        let err = normalize("SELECT 1; DROP TABLE t").unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(normalize("SELECT 'a;b' AS x").is_ok());
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(normalize("  ; ").is_err());
        assert!(normalize("-- just a comment").is_err());
    }

    #[test]
    fn test_ensure_read_only() {
        assert!(ensure_read_only("select * from t").is_ok());
        assert!(ensure_read_only("-- note\nWITH x AS (SELECT 1) SELECT * FROM x").is_ok());
        assert!(ensure_read_only("(SELECT 1) UNION (SELECT 2)").is_ok());
        assert!(ensure_read_only("DELETE FROM t").is_err());
        assert!(ensure_read_only("COPY t TO 'x.csv'").is_err());
    }

    #[test]
    fn test_bound_wraps_unbounded_queries() {
        assert_eq!(
            bound("SELECT * FROM customers", 100),
            "SELECT * FROM (\nSELECT * FROM customers\n) AS bounded LIMIT 100"
        );
    }

    #[test]
    fn test_bound_survives_trailing_line_comment() {
        let statement = normalize("SELECT * FROM customers -- first pass").unwrap();
        let bounded = bound(&statement, 10000);
        assert_eq!(
            bounded.lines().last(),
            Some(") AS bounded LIMIT 10000")
        );
        assert!(bounded.contains("-- first pass\n"));
    }

    #[test]
    fn test_bound_keeps_existing_limit() {
        assert_eq!(bound("SELECT * FROM t LIMIT 5", 100), "SELECT * FROM t LIMIT 5");
        assert_eq!(
            bound("SELECT * FROM t limit 5 offset 10", 100),
            "SELECT * FROM t limit 5 offset 10"
        );
    }

    #[test]
    fn test_bound_leaves_describe_alone() {
        assert_eq!(bound("DESCRIBE customers", 10), "DESCRIBE customers");
    }
}
