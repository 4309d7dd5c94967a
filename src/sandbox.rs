//! Worker-process isolation for script execution.
//!
//! `ProcessSandbox` runs the interpreter in a separate `tabletalk-sandbox`
//! process with no access to the registered connectors: every SQL literal
//! in the script is pre-executed through the gateway in the parent and
//! transferred into the scratch directory as a CSV keyed by UUID, along
//! with each registered frame. The worker answers with a JSON envelope on
//! stdout; chart bytes come back base64-encoded and are decoded into the
//! canonical chart path.

use crate::dataset::Dataset;
use crate::error::{AgentError, Result};
use crate::executor::{CodeExecutor, Environment, Value};
use crate::gateway;
use crate::script::{ast, parse, Expr, Stmt, Target};
use base64::Engine as _;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

const WORKER_BIN: &str = "tabletalk-sandbox";
const CHART_FILE: &str = "chart.png";

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub code: String,
    /// SQL literal text mapped to the CSV file holding its result.
    pub sql_files: HashMap<String, String>,
    /// CSV files for the `dfs` binding, in registration order.
    pub dataset_files: Vec<String>,
    pub chart_file: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerError {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_b64: Option<String>,
}

pub struct ProcessSandbox {
    scratch: Option<TempDir>,
    worker: PathBuf,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSandbox {
    pub fn new() -> Self {
        Self {
            scratch: None,
            worker: default_worker_path(),
        }
    }

    /// Override the worker binary location.
    pub fn with_worker<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.worker = path.as_ref().to_path_buf();
        self
    }

    pub fn is_started(&self) -> bool {
        self.scratch.is_some()
    }

    /// Create the scratch directory. Called lazily by `execute`.
    pub fn start(&mut self) -> Result<()> {
        if self.scratch.is_none() {
            self.scratch = Some(tempfile::tempdir()?);
            info!("sandbox scratch directory created");
        }
        Ok(())
    }

    /// Drop the scratch directory and everything transferred into it.
    pub fn stop(&mut self) {
        self.scratch = None;
    }

    /// Same surface as direct execution: cleaned code in, `result` value
    /// out. `chart_path` is where recovered chart bytes land.
    pub async fn execute(
        &mut self,
        code: &str,
        datasets: &[Dataset],
        chart_path: &Path,
    ) -> Result<Value> {
        self.start()?;
        let scratch = self
            .scratch
            .as_ref()
            .ok_or_else(|| AgentError::Sandbox("scratch directory unavailable".to_string()))?
            .path()
            .to_path_buf();

        let mut sql_files = HashMap::new();
        for sql in extract_sql_literals(code)? {
            let file = format!("{}.csv", Uuid::new_v4());
            let frame = gateway::execute_sql_query(datasets, &sql)?;
            write_csv(&scratch.join(&file), frame)?;
            sql_files.insert(sql, file);
        }

        let mut dataset_files = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            let file = format!("{}.csv", Uuid::new_v4());
            write_csv(&scratch.join(&file), dataset.execute()?)?;
            dataset_files.push(file);
        }
        debug!(
            sql = sql_files.len(),
            datasets = dataset_files.len(),
            "transferred data into sandbox"
        );

        let request = WorkerRequest {
            code: code.to_string(),
            sql_files,
            dataset_files,
            chart_file: CHART_FILE.to_string(),
        };
        let response = self.run_worker(&scratch, &request).await?;
        self.unpack(response, chart_path)
    }

    async fn run_worker(&self, scratch: &Path, request: &WorkerRequest) -> Result<WorkerResponse> {
        let payload = serde_json::to_vec(request)?;
        let mut child = Command::new(&self.worker)
            .current_dir(scratch)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AgentError::Sandbox(format!("cannot launch worker: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| AgentError::Sandbox(format!("cannot write to worker: {}", e)))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AgentError::Sandbox(format!("worker failed: {}", e)))?;
        if !output.status.success() {
            return Err(AgentError::Sandbox(format!(
                "worker exited with {}",
                output.status
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| AgentError::Sandbox(format!("malformed worker envelope: {}", e)))
    }

    fn unpack(&self, response: WorkerResponse, chart_path: &Path) -> Result<Value> {
        if let Some(error) = response.error {
            return Err(match error.kind.as_str() {
                "security" => AgentError::Security(error.message),
                "no_result" => AgentError::NoResultFound,
                _ => AgentError::CodeExecution {
                    code: error.code,
                    trace: error.message,
                },
            });
        }
        if let Some(encoded) = response.chart_b64 {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| AgentError::Sandbox(format!("bad chart payload: {}", e)))?;
            if let Some(parent) = chart_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(chart_path, bytes)?;
        }
        let result = response
            .result
            .ok_or_else(|| AgentError::Sandbox("worker envelope missing result".to_string()))?;
        let mut value = Value::from_wire_json(&result)?;
        rewrite_plot_path(&mut value, chart_path);
        Ok(value)
    }
}

/// Entry point of the worker process: run the script against the
/// transferred files and shape the envelope. Never touches the network or
/// the registered connectors.
pub fn run_worker_request(request: WorkerRequest) -> WorkerResponse {
    let sql_files = request.sql_files.clone();
    let runner: crate::executor::SqlRunner = Box::new(move |sql: &str| {
        let file = sql_files
            .get(sql.trim())
            .ok_or_else(|| AgentError::SqlExecution(format!("query was not transferred: {}", sql)))?;
        read_csv(Path::new(file))
    });

    let mut frames = Vec::with_capacity(request.dataset_files.len());
    for file in &request.dataset_files {
        match read_csv(Path::new(file)) {
            Ok(df) => frames.push(df),
            Err(e) => return failure("code_execution", &e.to_string(), &request.code),
        }
    }

    let chart_path = PathBuf::from(&request.chart_file);
    let env = Environment::new(runner, frames, chart_path.clone());
    match CodeExecutor::execute(&request.code, env) {
        Ok(value) => {
            let result = match value.to_wire_json() {
                Ok(json) => json,
                Err(e) => return failure("code_execution", &e.to_string(), &request.code),
            };
            let chart_b64 = std::fs::read(&chart_path)
                .ok()
                .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes));
            WorkerResponse {
                ok: true,
                result: Some(result),
                error: None,
                chart_b64,
            }
        }
        Err(AgentError::Security(message)) => failure("security", &message, &request.code),
        Err(AgentError::NoResultFound) => failure("no_result", "no result binding", &request.code),
        Err(AgentError::CodeExecution { code, trace }) => failure("code_execution", &trace, &code),
        Err(other) => failure("code_execution", &other.to_string(), &request.code),
    }
}

fn failure(kind: &str, message: &str, code: &str) -> WorkerResponse {
    WorkerResponse {
        ok: false,
        result: None,
        error: Some(WorkerError {
            kind: kind.to_string(),
            message: message.to_string(),
            code: code.to_string(),
        }),
        chart_b64: None,
    }
}

/// SQL literals the parent must pre-execute: gateway calls with a literal
/// argument, plus literal assignments to the recognized SQL variables.
fn extract_sql_literals(code: &str) -> Result<Vec<String>> {
    let program = parse(code)?;
    let mut literals = Vec::new();
    for stmt in &program {
        if let Stmt::Assign {
            target: Target::Name(name),
            value: Expr::Str(sql),
        } = stmt
        {
            if name == "sql_query" || name == "query" {
                literals.push(sql.clone());
            }
        }
        ast::visit_exprs(stmt, &mut |expr| {
            if let Expr::Call { func, args, .. } = expr {
                if Expr::call_name(func).as_deref() == Some(crate::executor::SQL_GATEWAY_NAME) {
                    if let Some(Expr::Str(sql)) = args.first() {
                        literals.push(sql.clone());
                    }
                }
            }
        });
    }
    literals.sort();
    literals.dedup();
    Ok(literals)
}

fn rewrite_plot_path(value: &mut Value, chart_path: &Path) {
    if let Value::Dict(pairs) = value {
        let is_plot = pairs
            .iter()
            .any(|(k, v)| k == "type" && matches!(v, Value::Str(s) if s == "plot"));
        if !is_plot {
            return;
        }
        for (key, slot) in pairs {
            if key == "value" {
                if let Value::Str(_) = slot {
                    *slot = Value::Str(chart_path.to_string_lossy().to_string());
                }
            }
        }
    }
}

fn write_csv(path: &Path, mut frame: DataFrame) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    CsvWriter::new(&mut file).finish(&mut frame)?;
    Ok(())
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    Ok(LazyCsvReader::new(path)
        .with_infer_schema_length(Some(1000))
        .finish()?
        .collect()?)
}

fn default_worker_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BIN)))
        .unwrap_or_else(|| PathBuf::from(WORKER_BIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_literals_are_collected_once() {
        let code = concat!(
            "sql_query = \"SELECT * FROM a\"\n",
            "df = execute_sql_query(sql_query)\n",
            "df2 = execute_sql_query(\"SELECT * FROM a\")\n",
            "df3 = execute_sql_query(\"SELECT * FROM b\")\n",
        );
        let literals = extract_sql_literals(code).unwrap();
        assert_eq!(literals, vec!["SELECT * FROM a", "SELECT * FROM b"]);
    }

    #[test]
    fn worker_runs_a_script_against_transferred_files() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("q.csv");
        let mut frame = df!("x" => &[1i64, 2, 3]).unwrap();
        let mut file = std::fs::File::create(&csv).unwrap();
        CsvWriter::new(&mut file).finish(&mut frame).unwrap();

        let mut sql_files = HashMap::new();
        sql_files.insert(
            "SELECT * FROM t".to_string(),
            csv.to_string_lossy().to_string(),
        );
        let request = WorkerRequest {
            code: concat!(
                "df = execute_sql_query(\"SELECT * FROM t\")\n",
                "result = {\"type\": \"number\", \"value\": df[\"x\"].sum()}\n",
            )
            .to_string(),
            sql_files,
            dataset_files: vec![],
            chart_file: dir.path().join("chart.png").to_string_lossy().to_string(),
        };
        let response = run_worker_request(request);

        assert!(response.ok, "worker failed: {:?}", response.error);
        assert_eq!(response.result.unwrap()["value"], 6);
    }

    #[test]
    fn worker_reports_security_violations() {
        let request = WorkerRequest {
            code: "result = os.getcwd()".to_string(),
            sql_files: HashMap::new(),
            dataset_files: vec![],
            chart_file: "chart.png".to_string(),
        };
        let response = run_worker_request(request);
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().kind, "security");
    }

    #[test]
    fn plot_paths_are_rewritten_to_the_canonical_location() {
        let mut value = Value::Dict(vec![
            ("type".into(), Value::Str("plot".into())),
            ("value".into(), Value::Str("chart.png".into())),
        ]);
        rewrite_plot_path(&mut value, Path::new("/proj/exports/charts/temp_chart.png"));
        assert_eq!(
            value.get_key("value"),
            Some(&Value::Str("/proj/exports/charts/temp_chart.png".into()))
        );
    }
}
