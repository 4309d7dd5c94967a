//! Sanitization of validated scripts before execution.
//!
//! The cleaner rewrites the AST, never the raw text: stray gateway
//! redefinitions are dropped, every SQL literal is authorized against the
//! registered table set, frame literals that restate a registered dataset
//! collapse to the `dfs` binding, chart paths are canonicalized, and
//! display-only calls are stripped. Output is the canonical printed form,
//! so cleaning is idempotent.

use crate::dataset::Dataset;
use crate::error::{AgentError, Result};
use crate::executor::SQL_GATEWAY_NAME;
use crate::script::{ast, parse, to_source, Expr, Stmt, Target};
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::visit_relations;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::ops::ControlFlow;
use tracing::{debug, warn};

lazy_static! {
    /// Fallback table scan for SQL that the parser rejects.
    static ref TABLE_REF: Regex =
        Regex::new(r#"(?i)\b(?:from|join)\s+("[^"]+"|[A-Za-z_][A-Za-z0-9_.]*)"#)
            .unwrap_or_else(|e| panic!("invalid table regex: {e}"));
}

/// Variable names whose string assignments are treated as SQL.
const SQL_VARIABLE_NAMES: [&str; 2] = ["sql_query", "query"];

pub struct CodeCleaner<'a> {
    datasets: &'a [Dataset],
    chart_path: String,
}

impl<'a> CodeCleaner<'a> {
    pub fn new(datasets: &'a [Dataset], chart_path: &str) -> Self {
        Self {
            datasets,
            chart_path: chart_path.to_string(),
        }
    }

    pub fn clean(&self, code: &str) -> Result<String> {
        let program = parse(code).map_err(|e| AgentError::CodeCleaning(e.to_string()))?;
        let mut out: Vec<Stmt> = Vec::with_capacity(program.len());

        for mut stmt in program {
            // stray redefinitions of the gateway never survive
            if let Stmt::FunctionDef { name, .. } = &stmt {
                if name == SQL_GATEWAY_NAME {
                    debug!("dropped gateway redefinition");
                    continue;
                }
            }

            self.authorize_sql(&mut stmt)?;
            self.collapse_frame_literal(&mut stmt);
            self.canonicalize_chart_paths(&mut stmt);

            if is_bare_charts_show(&stmt) {
                continue;
            }
            out.push(stmt);
        }

        Ok(to_source(&out))
    }

    /// Authorize and rewrite SQL literals in the statement's recognized
    /// positions: `sql_query = "…"`, `query = "…"`, and gateway calls as an
    /// assignment value or a bare expression.
    fn authorize_sql(&self, stmt: &mut Stmt) -> Result<()> {
        match stmt {
            Stmt::Assign { target, value } => {
                if let (Target::Name(name), Expr::Str(sql)) = (&*target, &mut *value) {
                    if SQL_VARIABLE_NAMES.contains(&name.as_str()) {
                        let sanitized = self.sanitize_sql(sql)?;
                        *sql = sanitized;
                        return Ok(());
                    }
                }
                self.authorize_gateway_call(value)
            }
            Stmt::Expr(e) => self.authorize_gateway_call(e),
            _ => Ok(()),
        }
    }

    fn authorize_gateway_call(&self, expr: &mut Expr) -> Result<()> {
        if let Expr::Call { func, args, .. } = expr {
            if Expr::call_name(func).as_deref() == Some(SQL_GATEWAY_NAME) {
                if let Some(Expr::Str(sql)) = args.first_mut() {
                    let sanitized = self.sanitize_sql(sql)?;
                    *sql = sanitized;
                }
            }
        }
        Ok(())
    }

    /// Trim a trailing `;`, extract referenced tables, check each against
    /// the registered set, and rewrite references to the stored casing.
    fn sanitize_sql(&self, sql: &str) -> Result<String> {
        let mut sql = sql.trim().trim_end_matches(';').to_string();
        let allowed = self.allowed_tables();
        for table in extract_table_names(&sql) {
            let bare = table.trim_matches('"').to_lowercase();
            match allowed.get(bare.as_str()) {
                Some(stored) => {
                    sql = rewrite_table_casing(&sql, &table, stored);
                }
                None => {
                    warn!(table = %table, "unauthorized table in generated SQL");
                    return Err(AgentError::MaliciousQuery(format!(
                        "query references the unauthorized table `{}`",
                        table
                    )));
                }
            }
        }
        Ok(sql)
    }

    /// Lowercased registered table names mapped to the stored casing.
    /// Lookups strip identifier quoting before matching.
    fn allowed_tables(&self) -> HashMap<String, &str> {
        let mut allowed = HashMap::new();
        for dataset in self.datasets {
            allowed.insert(dataset.name().to_lowercase(), dataset.name());
        }
        allowed
    }

    /// Collapse `X = tab.frame({...})` into `X = dfs[i]` when the literal's
    /// column list exactly matches dataset `i`. Detection is syntactic; any
    /// mismatch or non-literal shape leaves the statement untouched.
    fn collapse_frame_literal(&self, stmt: &mut Stmt) {
        let Stmt::Assign { value, .. } = stmt else {
            return;
        };
        let Some(columns) = frame_literal_columns(value) else {
            return;
        };
        let mut wanted: Vec<&str> = columns.iter().map(|s| s.as_str()).collect();
        wanted.sort_unstable();
        for (idx, dataset) in self.datasets.iter().enumerate() {
            let mut have: Vec<&str> = dataset.head().get_column_names();
            have.sort_unstable();
            if have == wanted {
                debug!(dataset = dataset.name(), "collapsed frame literal to dfs binding");
                *value = Expr::Subscript {
                    value: Box::new(Expr::Name("dfs".to_string())),
                    index: Box::new(Expr::Int(idx as i64)),
                };
                return;
            }
        }
    }

    fn canonicalize_chart_paths(&self, stmt: &mut Stmt) {
        ast::visit_strings_mut(stmt, &mut |s| {
            if s.ends_with(".png") {
                *s = self.chart_path.clone();
            }
        });
    }
}

/// Column names of a `tab.frame({...})` literal whose keys are all string
/// literals and whose values are lists of equal length. `None` when the
/// expression is anything else.
fn frame_literal_columns(expr: &Expr) -> Option<Vec<String>> {
    let Expr::Call { func, args, kwargs } = expr else {
        return None;
    };
    if Expr::call_name(func).as_deref() != Some("tab.frame") || !kwargs.is_empty() {
        return None;
    }
    let [Expr::Dict(pairs)] = args.as_slice() else {
        return None;
    };
    let mut columns = Vec::with_capacity(pairs.len());
    let mut row_count: Option<usize> = None;
    for (key, value) in pairs {
        let Expr::Str(name) = key else {
            return None;
        };
        let Expr::List(items) = value else {
            return None;
        };
        match row_count {
            None => row_count = Some(items.len()),
            Some(n) if n != items.len() => return None,
            Some(_) => {}
        }
        columns.push(name.clone());
    }
    if columns.is_empty() {
        return None;
    }
    Some(columns)
}

fn is_bare_charts_show(stmt: &Stmt) -> bool {
    if let Stmt::Expr(Expr::Call { func, .. }) = stmt {
        return Expr::call_name(func).as_deref() == Some("charts.show");
    }
    false
}

/// Referenced table names, parser first, word-bounded scan as fallback.
fn extract_table_names(sql: &str) -> Vec<String> {
    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => {
            let mut tables = Vec::new();
            let _: ControlFlow<()> = visit_relations(&statements, |relation| {
                tables.push(relation.to_string());
                ControlFlow::Continue(())
            });
            tables.sort();
            tables.dedup();
            tables
        }
        Err(_) => {
            let mut tables: Vec<String> = TABLE_REF
                .captures_iter(sql)
                .map(|c| c[1].to_string())
                .collect();
            tables.sort();
            tables.dedup();
            tables
        }
    }
}

/// Replace word-bounded occurrences of `table` with the stored casing.
fn rewrite_table_casing(sql: &str, table: &str, stored: &str) -> String {
    let bare = table.trim_matches('"');
    let pattern = format!(r#"(?i)(")?\b{}\b(")?"#, regex::escape(bare));
    match Regex::new(&pattern) {
        Ok(re) => re
            .replace_all(sql, |caps: &regex::Captures| {
                let quoted = caps.get(1).is_some() && caps.get(2).is_some();
                if quoted {
                    format!("\"{}\"", stored)
                } else {
                    stored.to_string()
                }
            })
            .to_string(),
        Err(_) => sql.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn datasets() -> Vec<Dataset> {
        vec![
            Dataset::from_dataframe(
                "Employees",
                df!("name" => &["ada"], "salary" => &[120i64]).unwrap(),
            )
            .unwrap(),
            Dataset::from_dataframe("depts", df!("dept" => &["eng"]).unwrap()).unwrap(),
        ]
    }

    fn clean(code: &str) -> Result<String> {
        let datasets = datasets();
        CodeCleaner::new(&datasets, "/proj/exports/charts/temp_chart.png").clean(code)
    }

    #[test]
    fn gateway_redefinition_is_dropped() {
        let code = concat!(
            "def execute_sql_query(sql):\n",
            "    return None\n",
            "df = execute_sql_query(\"SELECT * FROM employees\")\n",
        );
        let out = clean(code).unwrap();
        assert!(!out.contains("def execute_sql_query"));
        assert!(out.contains("execute_sql_query("));
    }

    #[test]
    fn authorized_table_is_recased_and_semicolon_trimmed() {
        let out = clean("df = execute_sql_query(\"SELECT * FROM employees;\")").unwrap();
        assert!(out.contains("FROM Employees"));
        assert!(!out.contains(';'));
    }

    #[test]
    fn sql_variable_assignments_are_sanitized() {
        let out = clean("sql_query = \"SELECT name FROM EMPLOYEES\"").unwrap();
        assert!(out.contains("FROM Employees"));
    }

    #[test]
    fn quoted_table_references_are_authorized_and_recased() {
        let datasets = datasets();
        let cleaner = CodeCleaner::new(&datasets, "/proj/exports/charts/temp_chart.png");
        let out = cleaner.sanitize_sql("SELECT name FROM \"EMPLOYEES\"").unwrap();
        assert_eq!(out, "SELECT name FROM \"Employees\"");
    }

    #[test]
    fn unauthorized_table_is_malicious() {
        let err = clean("df = execute_sql_query(\"SELECT * FROM secrets\")").unwrap_err();
        assert!(matches!(err, AgentError::MaliciousQuery(_)));
    }

    #[test]
    fn join_against_unauthorized_table_is_malicious() {
        let err = clean(
            "df = execute_sql_query(\"SELECT * FROM employees e JOIN passwords p ON e.name = p.name\")",
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::MaliciousQuery(_)));
    }

    #[test]
    fn frame_literal_collapses_to_dfs_binding() {
        let out = clean("df = tab.frame({\"name\": [\"ada\"], \"salary\": [120]})").unwrap();
        assert_eq!(out.trim(), "df = dfs[0]");
    }

    #[test]
    fn unknown_frame_literal_is_left_alone() {
        let code = "df = tab.frame({\"other\": [1]})";
        let out = clean(code).unwrap();
        assert!(out.contains("tab.frame"));
    }

    #[test]
    fn ragged_frame_literal_is_left_alone() {
        let code = "df = tab.frame({\"name\": [\"ada\"], \"salary\": [1, 2]})";
        let out = clean(code).unwrap();
        assert!(out.contains("tab.frame"));
    }

    #[test]
    fn png_literals_are_canonicalized() {
        let out = clean("charts.save(\"out/my_plot.png\")").unwrap();
        assert!(out.contains("/proj/exports/charts/temp_chart.png"));
        assert!(!out.contains("my_plot.png"));
    }

    #[test]
    fn bare_show_calls_are_stripped() {
        let code = concat!(
            "df = execute_sql_query(\"SELECT * FROM depts\")\n",
            "charts.show()\n",
            "result = {\"type\": \"string\", \"value\": \"done\"}\n",
        );
        let out = clean(code).unwrap();
        assert!(!out.contains("charts.show"));
        assert!(out.contains("result"));
    }

    #[test]
    fn cleaning_is_idempotent() {
        let code = concat!(
            "sql_query = \"SELECT * FROM employees;\"\n",
            "df = execute_sql_query(sql_query)\n",
            "charts.save(\"plot.png\")\n",
            "charts.show()\n",
            "result = {\"type\": \"plot\", \"value\": \"plot.png\"}\n",
        );
        let once = clean(code).unwrap();
        let twice = clean(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unparsable_code_is_a_cleaning_error() {
        let err = clean("def broken(:").unwrap_err();
        assert!(matches!(err, AgentError::CodeCleaning(_)));
    }
}
