//! Dataset handles.
//!
//! A `Dataset` is the agent-facing view of one registered tabular source:
//! a stable table name, a head sample, optional descriptions, a column hash
//! stable over the column set, and the connector doing the physical access.

use crate::config::FileManager;
use crate::connector::{Connector, SourceType, DEFAULT_HEAD_ROWS};
use crate::error::Result;
use crate::executor::value::dataframe_to_rows_json;
use polars::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct Dataset {
    name: String,
    description: Option<String>,
    column_descriptions: HashMap<String, String>,
    connector: Arc<dyn Connector>,
    head: DataFrame,
}

impl Dataset {
    pub fn new(name: &str, connector: Arc<dyn Connector>) -> Result<Self> {
        let head = connector.head(DEFAULT_HEAD_ROWS)?;
        Ok(Self {
            name: name.to_string(),
            description: None,
            column_descriptions: HashMap::new(),
            connector,
            head,
        })
    }

    /// Convenience constructor for an in-memory frame.
    pub fn from_dataframe(name: &str, frame: DataFrame) -> Result<Self> {
        Self::new(name, Arc::new(crate::connector::LocalConnector::new(frame)))
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_column_description(mut self, column: &str, description: &str) -> Self {
        self.column_descriptions
            .insert(column.to_string(), description.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn head(&self) -> &DataFrame {
        &self.head
    }

    pub fn source_type(&self) -> SourceType {
        self.connector.source_type()
    }

    pub fn execute(&self) -> Result<DataFrame> {
        self.connector.execute()
    }

    pub fn execute_sql_query(&self, sql: &str) -> Result<DataFrame> {
        self.connector.execute_sql_query(sql)
    }

    /// Stable hex digest over the column set. Equal iff the column sets of
    /// two handles are equal, independent of column order.
    pub fn column_hash(&self) -> String {
        let mut names: Vec<String> = self
            .head
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        names.sort();
        let mut hasher = Sha256::new();
        for name in &names {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn equals(&self, other: &Dataset) -> bool {
        self.name == other.name && self.column_hash() == other.column_hash()
    }

    /// Structured form used by prompt assembly: name, description, columns
    /// with optional per-column descriptions, and the head sample rows.
    pub fn to_json(&self) -> serde_json::Value {
        let columns: Vec<serde_json::Value> = self
            .head
            .get_column_names()
            .iter()
            .map(|c| {
                let dtype = self
                    .head
                    .column(c)
                    .map(|s| s.dtype().to_string())
                    .unwrap_or_default();
                let mut col = serde_json::json!({ "name": c, "dtype": dtype });
                if let Some(desc) = self.column_descriptions.get(*c) {
                    col["description"] = serde_json::Value::String(desc.clone());
                }
                col
            })
            .collect();
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "source_type": self.source_type().as_str(),
            "columns": columns,
            "head": dataframe_to_rows_json(&self.head),
        })
    }

    /// Persist the head sample as `<project>/cache/<column-hash>.parquet`.
    pub fn cache_head(&self, file_manager: &FileManager) -> Result<()> {
        let path = file_manager.head_cache_path(&self.column_hash());
        let mut file = std::fs::File::create(&path)?;
        let mut head = self.head.clone();
        ParquetWriter::new(&mut file).finish(&mut head)?;
        debug!(dataset = %self.name, path = %path.display(), "cached dataset head");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, cols: DataFrame) -> Dataset {
        Dataset::from_dataframe(name, cols).unwrap()
    }

    #[test]
    fn column_hash_ignores_column_order() {
        let a = sample("a", df!("x" => &[1i64], "y" => &[2i64]).unwrap());
        let b = sample("b", df!("y" => &[9i64], "x" => &[7i64]).unwrap());
        assert_eq!(a.column_hash(), b.column_hash());
    }

    #[test]
    fn column_hash_differs_for_different_column_sets() {
        let a = sample("a", df!("x" => &[1i64]).unwrap());
        let b = sample("b", df!("z" => &[1i64]).unwrap());
        assert_ne!(a.column_hash(), b.column_hash());
    }

    #[test]
    fn to_json_carries_name_and_head() {
        let ds = sample("employees", df!("id" => &[1i64, 2]).unwrap())
            .with_description("employee roster");
        let json = ds.to_json();
        assert_eq!(json["name"], "employees");
        assert_eq!(json["description"], "employee roster");
        assert_eq!(json["head"]["headers"][0], "id");
        assert_eq!(json["head"]["rows"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn cache_head_writes_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path());
        fm.ensure_layout().unwrap();
        let ds = sample("t", df!("x" => &[1i64, 2, 3]).unwrap());
        ds.cache_head(&fm).unwrap();
        assert!(fm.head_cache_path(&ds.column_hash()).exists());
    }
}
