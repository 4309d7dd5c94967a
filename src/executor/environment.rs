//! The capability bundle handed to generated code.
//!
//! Scripts see exactly: the SQL gateway binding, the `dfs` dataset list,
//! six whitelisted namespaces, and a safe builtin subset. There is no
//! import facility; the forbidden module names are poisoned at lookup.

use crate::error::{AgentError, Result};
use crate::executor::value::Value;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Module names generated code must never reach.
pub const FORBIDDEN_MODULES: [&str; 5] = ["os", "io", "subprocess", "sys", "importlib"];

/// Namespaces exposed to generated code.
pub const WHITELISTED_MODULES: [&str; 6] = ["tab", "num", "charts", "dates", "b64", "json"];

/// Safe builtin subset.
pub const BUILTINS: [&str; 10] = [
    "len", "str", "int", "float", "round", "abs", "min", "max", "sum", "range",
];

pub const SQL_GATEWAY_NAME: &str = "execute_sql_query";

pub type SqlRunner = Box<dyn Fn(&str) -> Result<DataFrame> + Send>;

/// Figure description accumulated by the `charts` namespace. Rendering is
/// delegated; the engine guarantees the save path and the byte plumbing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Figure {
    pub kind: Option<String>,
    pub title: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
    pub data: Option<serde_json::Value>,
}

pub struct Environment {
    pub vars: HashMap<String, Value>,
    pub functions: HashMap<String, (Vec<String>, Vec<crate::script::Stmt>)>,
    pub sql: SqlRunner,
    pub chart_path: PathBuf,
    pub figure: Figure,
}

impl Environment {
    pub fn new(sql: SqlRunner, datasets: Vec<DataFrame>, chart_path: PathBuf) -> Self {
        let mut vars = HashMap::new();
        vars.insert(
            "dfs".to_string(),
            Value::List(datasets.into_iter().map(Value::Frame).collect()),
        );
        Self {
            vars,
            functions: HashMap::new(),
            sql,
            chart_path,
            figure: Figure::default(),
        }
    }

    pub fn is_forbidden(name: &str) -> bool {
        FORBIDDEN_MODULES.contains(&name)
    }

    pub fn is_module(name: &str) -> bool {
        WHITELISTED_MODULES.contains(&name)
    }

    pub fn is_builtin(name: &str) -> bool {
        BUILTINS.contains(&name)
    }

    /// Reject module-like strings handed to wrapped functions.
    pub fn guard_module_string(s: &str) -> Result<()> {
        let trimmed = s.trim();
        for module in FORBIDDEN_MODULES {
            if trimmed == module || trimmed.starts_with(&format!("{}.", module)) {
                return Err(AgentError::Security(format!(
                    "restricted module `{}` is not available",
                    module
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_strings_are_rejected() {
        assert!(Environment::guard_module_string("os").is_err());
        assert!(Environment::guard_module_string("os.path").is_err());
        assert!(Environment::guard_module_string(" subprocess ").is_err());
        assert!(Environment::guard_module_string("SELECT * FROM t").is_ok());
        assert!(Environment::guard_module_string("osmosis").is_ok());
    }
}
