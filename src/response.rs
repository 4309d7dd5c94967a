//! Result envelope validation and the typed responses handed to callers.
//!
//! A script finishes by binding `result = {"type": ..., "value": ...}`.
//! The parser checks the envelope shape, checks the value against the
//! declared type, and boxes it into a typed response carrying the cleaned
//! code that produced it.

use crate::error::{AgentError, Result};
use crate::executor::value::dataframe_to_rows_json;
use crate::executor::Value;
use base64::Engine as _;
use lazy_static::lazy_static;
use polars::prelude::DataFrame;
use regex::Regex;
use std::path::Path;
use tracing::debug;

pub const ERROR_APOLOGY: &str =
    "Unfortunately, I was not able to get your answers, because of the following error:";

lazy_static! {
    /// Accepted plot path shapes: absolute or relative slash-separated
    /// word-ish segments.
    static ref PLOT_PATH: Regex =
        Regex::new(r"^(/[\w.-]+)+(/[\w.-]+)*$|^[^\s/]+(/[\w.-]+)*$")
            .unwrap_or_else(|e| panic!("invalid plot path regex: {e}"));
}

#[derive(Debug, Clone)]
pub enum Response {
    Number(NumberResponse),
    String(StringResponse),
    DataFrame(DataFrameResponse),
    Chart(ChartResponse),
    Error(ErrorResponse),
}

impl Response {
    pub fn type_name(&self) -> &'static str {
        match self {
            Response::Number(_) => "number",
            Response::String(_) => "string",
            Response::DataFrame(_) => "dataframe",
            Response::Chart(_) => "plot",
            Response::Error(_) => "error",
        }
    }

    pub fn last_code_executed(&self) -> &str {
        match self {
            Response::Number(r) => &r.last_code_executed,
            Response::String(r) => &r.last_code_executed,
            Response::DataFrame(r) => &r.last_code_executed,
            Response::Chart(r) => &r.last_code_executed,
            Response::Error(r) => &r.last_code_executed,
        }
    }

    /// Plain text form: what a caller would print, and what the
    /// conversation memory records as the assistant turn.
    pub fn to_display_string(&self) -> String {
        match self {
            Response::Number(r) => r.value.to_string(),
            Response::String(r) => r.value.clone(),
            Response::DataFrame(r) => r.value.to_string(),
            Response::Chart(r) => r.value.clone(),
            Response::Error(r) => r.value.clone(),
        }
    }

    /// Wire form: `{type, value}` with dataframes as `{headers, rows}` and
    /// charts as a base64 data URL when the bytes are loadable.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Response::Number(r) => serde_json::json!({"type": "number", "value": r.value}),
            Response::String(r) => serde_json::json!({"type": "string", "value": r.value}),
            Response::DataFrame(r) => {
                serde_json::json!({"type": "dataframe", "value": dataframe_to_rows_json(&r.value)})
            }
            Response::Chart(r) => {
                let value = r.as_base64().unwrap_or_else(|_| r.value.clone());
                serde_json::json!({"type": "plot", "value": value})
            }
            Response::Error(r) => serde_json::json!({"type": "error", "value": r.value}),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NumberResponse {
    pub value: f64,
    pub last_code_executed: String,
}

#[derive(Debug, Clone)]
pub struct StringResponse {
    pub value: String,
    pub last_code_executed: String,
}

#[derive(Debug, Clone)]
pub struct DataFrameResponse {
    pub value: DataFrame,
    pub last_code_executed: String,
}

#[derive(Debug, Clone)]
pub struct ChartResponse {
    /// Path to the chart file, or a base64 data URL.
    pub value: String,
    pub last_code_executed: String,
}

impl ChartResponse {
    pub fn is_data_url(&self) -> bool {
        self.value.starts_with("data:image/")
    }

    /// The chart bytes as a base64 data URL, loading the file when the
    /// value is a path.
    pub fn as_base64(&self) -> Result<String> {
        if self.is_data_url() {
            return Ok(self.value.clone());
        }
        let bytes = std::fs::read(&self.value)?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ))
    }

    /// Copy the chart to `path`, decoding data URLs, creating parents.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.is_data_url() {
            let encoded = self.value.splitn(2, ",").nth(1).unwrap_or_default();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| {
                    AgentError::InvalidOutputValueMismatch(format!("bad chart payload: {}", e))
                })?;
            std::fs::write(path, bytes)?;
        } else {
            std::fs::copy(&self.value, path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ErrorResponse {
    /// Apology text with the formatted error appended.
    pub value: String,
    pub error: String,
    pub last_code_executed: String,
}

impl ErrorResponse {
    pub fn new(error: &str, last_code_executed: &str) -> Self {
        Self {
            value: format!("{}\n\n{}\n", ERROR_APOLOGY, error),
            error: error.to_string(),
            last_code_executed: last_code_executed.to_string(),
        }
    }
}

pub struct ResponseParser;

impl ResponseParser {
    /// Validate the envelope and box it. `expected` is the output type the
    /// caller declared, when any; a well-formed envelope of a different
    /// type is the retryable mismatch.
    pub fn parse(envelope: &Value, last_code: &str, expected: Option<&str>) -> Result<Response> {
        let declared = match envelope.get_key("type") {
            Some(Value::Str(t)) => t.clone(),
            _ => {
                return Err(AgentError::InvalidOutputValueMismatch(
                    "result must be a dict with string `type` and `value` keys".to_string(),
                ))
            }
        };
        let value = envelope.get_key("value").ok_or_else(|| {
            AgentError::InvalidOutputValueMismatch("result is missing the `value` key".to_string())
        })?;

        if let Some(expected) = expected {
            if !expected.is_empty() && expected != declared {
                return Err(AgentError::InvalidLlmOutputType(format!(
                    "expected output type `{}`, got `{}`",
                    expected, declared
                )));
            }
        }
        debug!(declared = %declared, "parsing result envelope");

        match declared.as_str() {
            "number" => {
                let number = value.as_number().ok_or_else(|| {
                    AgentError::InvalidOutputValueMismatch(format!(
                        "number result must hold a numeric value, got {}",
                        value.type_label()
                    ))
                })?;
                Ok(Response::Number(NumberResponse {
                    value: number,
                    last_code_executed: last_code.to_string(),
                }))
            }
            "string" => match value {
                Value::Str(s) => Ok(Response::String(StringResponse {
                    value: s.clone(),
                    last_code_executed: last_code.to_string(),
                })),
                other => Err(AgentError::InvalidOutputValueMismatch(format!(
                    "string result must hold a string value, got {}",
                    other.type_label()
                ))),
            },
            "dataframe" => match value {
                Value::Frame(df) => Ok(Response::DataFrame(DataFrameResponse {
                    value: df.clone(),
                    last_code_executed: last_code.to_string(),
                })),
                Value::Series(s) => Ok(Response::DataFrame(DataFrameResponse {
                    value: s.clone().into_frame(),
                    last_code_executed: last_code.to_string(),
                })),
                other => Err(AgentError::InvalidOutputValueMismatch(format!(
                    "dataframe result must hold a dataframe, got {}",
                    other.type_label()
                ))),
            },
            "plot" => match value {
                Value::Str(s) if s.starts_with("data:image/") || PLOT_PATH.is_match(s) => {
                    Ok(Response::Chart(ChartResponse {
                        value: s.clone(),
                        last_code_executed: last_code.to_string(),
                    }))
                }
                Value::Str(s) => Err(AgentError::InvalidOutputValueMismatch(format!(
                    "plot result must be a path or data URL, got `{}`",
                    s
                ))),
                other => Err(AgentError::InvalidOutputValueMismatch(format!(
                    "plot result must hold a string, got {}",
                    other.type_label()
                ))),
            },
            other => Err(AgentError::InvalidOutputValueMismatch(format!(
                "unknown result type `{}`",
                other
            ))),
        }
    }
}
