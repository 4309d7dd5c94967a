//! Dataset connectors.
//!
//! A connector owns the physical access to one tabular source. Local
//! connectors hold an in-memory frame and are queried through the in-process
//! SQL engine; remote connectors (SQLite here) push SQL down to the source.

use crate::error::{AgentError, Result};
use base64::Engine as _;
use polars::prelude::*;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub const DEFAULT_HEAD_ROWS: usize = 5;

/// Tag the SQL gateway dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceType {
    /// In-memory frame, queried through the in-process SQL engine.
    Local,
    /// Remote-resident data, identified by its SQL dialect.
    Remote(String),
}

impl SourceType {
    pub fn is_local(&self) -> bool {
        matches!(self, SourceType::Local)
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceType::Local => "local",
            SourceType::Remote(dialect) => dialect,
        }
    }
}

pub trait Connector: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Sample of the first `n` rows.
    fn head(&self, n: usize) -> Result<DataFrame>;

    /// The full table.
    fn execute(&self) -> Result<DataFrame>;

    /// Push a SQL query down to the source. Only meaningful for
    /// remote-resident data; local connectors are served by the gateway.
    fn execute_sql_query(&self, sql: &str) -> Result<DataFrame>;
}

/// Connector over an in-memory polars frame.
pub struct LocalConnector {
    frame: DataFrame,
}

impl LocalConnector {
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }
}

impl Connector for LocalConnector {
    fn source_type(&self) -> SourceType {
        SourceType::Local
    }

    fn head(&self, n: usize) -> Result<DataFrame> {
        Ok(self.frame.head(Some(n)))
    }

    fn execute(&self) -> Result<DataFrame> {
        Ok(self.frame.clone())
    }

    fn execute_sql_query(&self, _sql: &str) -> Result<DataFrame> {
        Err(AgentError::SqlExecution(
            "local connectors are queried through the in-process SQL engine".to_string(),
        ))
    }
}

/// Connector over a table in a SQLite database file. A connection is opened
/// per call; the connector itself stays `Send + Sync`.
pub struct SqliteConnector {
    path: PathBuf,
    table: String,
}

impl SqliteConnector {
    pub fn new<P: AsRef<Path>>(path: P, table: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            table: table.to_string(),
        }
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .map_err(|e| AgentError::SqlExecution(format!("cannot open sqlite db: {}", e)))
    }

    fn query(&self, sql: &str) -> Result<DataFrame> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AgentError::SqlExecution(e.to_string()))?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let column_count = column_names.len();

        let mut columns: Vec<Vec<rusqlite::types::Value>> = vec![Vec::new(); column_count];
        let mut rows = stmt
            .query([])
            .map_err(|e| AgentError::SqlExecution(e.to_string()))?;
        while let Some(row) = rows
            .next()
            .map_err(|e| AgentError::SqlExecution(e.to_string()))?
        {
            for (idx, column) in columns.iter_mut().enumerate() {
                let value: rusqlite::types::Value = row
                    .get(idx)
                    .map_err(|e| AgentError::SqlExecution(e.to_string()))?;
                column.push(value);
            }
        }

        let series: Vec<Series> = column_names
            .iter()
            .zip(columns.into_iter())
            .map(|(name, values)| sqlite_column_to_series(name, values))
            .collect();
        Ok(DataFrame::new(series)?)
    }
}

impl Connector for SqliteConnector {
    fn source_type(&self) -> SourceType {
        SourceType::Remote("sqlite".to_string())
    }

    fn head(&self, n: usize) -> Result<DataFrame> {
        self.query(&format!("SELECT * FROM {} LIMIT {}", self.table, n))
    }

    fn execute(&self) -> Result<DataFrame> {
        self.query(&format!("SELECT * FROM {}", self.table))
    }

    fn execute_sql_query(&self, sql: &str) -> Result<DataFrame> {
        self.query(sql)
    }
}

/// Build a series from a sqlite column, picking the widest type seen.
fn sqlite_column_to_series(name: &str, values: Vec<rusqlite::types::Value>) -> Series {
    use rusqlite::types::Value as Sv;

    let mut has_real = false;
    let mut has_text = false;
    let mut has_blob = false;
    for v in &values {
        match v {
            Sv::Real(_) => has_real = true,
            Sv::Text(_) => has_text = true,
            Sv::Blob(_) => has_blob = true,
            _ => {}
        }
    }

    if has_text || has_blob {
        let out: Vec<Option<String>> = values
            .into_iter()
            .map(|v| match v {
                Sv::Null => None,
                Sv::Integer(i) => Some(i.to_string()),
                Sv::Real(f) => Some(f.to_string()),
                Sv::Text(s) => Some(s),
                Sv::Blob(b) => Some(base64::engine::general_purpose::STANDARD.encode(b)),
            })
            .collect();
        Series::new(name, out)
    } else if has_real {
        let out: Vec<Option<f64>> = values
            .into_iter()
            .map(|v| match v {
                Sv::Null => None,
                Sv::Integer(i) => Some(i as f64),
                Sv::Real(f) => Some(f),
                _ => None,
            })
            .collect();
        Series::new(name, out)
    } else {
        let out: Vec<Option<i64>> = values
            .into_iter()
            .map(|v| match v {
                Sv::Integer(i) => Some(i),
                _ => None,
            })
            .collect();
        Series::new(name, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_connector_head_and_execute() {
        let frame = df!("a" => &[1i64, 2, 3], "b" => &["x", "y", "z"]).unwrap();
        let connector = LocalConnector::new(frame.clone());
        assert!(connector.source_type().is_local());
        assert_eq!(connector.head(2).unwrap().height(), 2);
        assert!(connector.execute().unwrap().equals(&frame));
        assert!(connector.execute_sql_query("SELECT 1").is_err());
    }

    #[test]
    fn sqlite_connector_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE people (name TEXT, age INTEGER, score REAL);
             INSERT INTO people VALUES ('ada', 36, 9.5), ('alan', 41, 8.25);",
        )
        .unwrap();
        drop(conn);

        let connector = SqliteConnector::new(&db_path, "people");
        assert_eq!(connector.source_type().as_str(), "sqlite");

        let head = connector.head(1).unwrap();
        assert_eq!(head.height(), 1);
        assert_eq!(head.width(), 3);

        let counted = connector
            .execute_sql_query("SELECT COUNT(*) AS n FROM people")
            .unwrap();
        let n = counted.column("n").unwrap().i64().unwrap().get(0).unwrap();
        assert_eq!(n, 2);
    }
}
