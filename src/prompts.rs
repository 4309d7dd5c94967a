//! Prompt templates and their rendering.
//!
//! Three prompts drive the pipeline: the chat prompt (first attempt), the
//! error-correction prompt (after an execution failure), and the
//! output-type-correction prompt (after a declared-type mismatch). Each
//! renders `{{variable}}` placeholders against its bound state; an unbound
//! placeholder is a fatal render error.

use crate::dataset::Dataset;
use crate::error::{AgentError, Result};
use crate::memory::Memory;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use uuid::Uuid;

pub const CHAT_PROMPT_TEMPLATE: &str = r#"You are a data analyst writing a short analysis script.

## Available tables
{{datasets}}

## Conversation so far
{{conversation}}
{{context}}
## Script rules

1. Write a standalone script in the analysis dialect: assignments,
   expressions, `def`/`return`, `if`/`for`, list/dict literals, calls.
   No imports of any kind.
2. Read data ONLY through `execute_sql_query(sql)`, which returns a
   dataframe. Reference tables exactly as listed above.{{sql_mode}}
3. Available helpers: `tab`, `num`, `charts`, `dates`, `b64`, `json`,
   plus len/str/int/float/round/abs/min/max/sum/range.
4. If a chart is asked for, build it with the `{{viz_library}}` helpers and
   save it with `charts.save("{{chart_path}}")`.
5. Finish by assigning:
   result = {"type": {{output_type}}, "value": ...}
   where type is one of "number", "string", "dataframe", "plot" and the
   value matches it (a plot's value is the saved chart path).

Answer the last query in the conversation with one script. Return only the
script."#;

pub const ERROR_CORRECTION_TEMPLATE: &str = r#"The script you wrote for the query below failed.

## Available tables
{{datasets}}

## Query
{{query}}

## Failing script
{{code}}

## Error
{{error}}

Rewrite the full script so it runs without this error. Keep reading data
only through `execute_sql_query(sql)` and keep the final
`result = {"type": ..., "value": ...}` assignment. Return only the script."#;

pub const OUTPUT_TYPE_CORRECTION_TEMPLATE: &str = r#"The script you wrote answered with the wrong result type.

## Query
{{query}}

## Script
{{code}}

## Problem
{{error}}

Rewrite the full script so that `result` is a dict with
"type": "{{output_type}}" and a matching "value". Return only the script."#;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{([a-z_]+)\}\}").unwrap_or_else(|e| panic!("invalid placeholder regex: {e}"));
    static ref EXCESS_NEWLINES: Regex =
        Regex::new(r"\n{3,}").unwrap_or_else(|e| panic!("invalid newline regex: {e}"));
}

/// Replace every `{{key}}`; any placeholder without a binding is fatal.
/// Runs of three or more newlines collapse to two.
fn render(template: &str, vars: &HashMap<&str, String>) -> Result<String> {
    let mut unbound: Option<String> = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match vars.get(key) {
            Some(value) => value.clone(),
            None => {
                unbound.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });
    if let Some(key) = unbound {
        return Err(AgentError::PromptRender(format!(
            "unbound template variable `{}`",
            key
        )));
    }
    Ok(EXCESS_NEWLINES.replace_all(&rendered, "\n\n").to_string())
}

fn render_datasets(datasets: &[Dataset]) -> String {
    datasets.iter().map(|d| d.to_json().to_string()).join("\n")
}

/// Few-shot context injected when a vector store produced matches.
#[derive(Debug, Clone, Default)]
pub struct TrainingContext {
    pub exemplars: Vec<String>,
    pub docs: Vec<String>,
}

impl TrainingContext {
    fn render(&self) -> String {
        let mut out = String::new();
        if !self.exemplars.is_empty() {
            out.push_str("\n## Examples of similar answered queries\n");
            out.push_str(&self.exemplars.join("\n\n"));
            out.push('\n');
        }
        if !self.docs.is_empty() {
            out.push_str("\n## Reference notes\n");
            out.push_str(&self.docs.join("\n"));
            out.push('\n');
        }
        out
    }
}

pub struct ChatPrompt<'a> {
    pub id: Uuid,
    pub datasets: &'a [Dataset],
    pub memory: &'a Memory,
    pub viz_library: String,
    pub chart_path: String,
    pub output_type: String,
    pub direct_sql: bool,
    pub context: TrainingContext,
}

impl<'a> ChatPrompt<'a> {
    pub fn new(datasets: &'a [Dataset], memory: &'a Memory) -> Self {
        Self {
            id: Uuid::new_v4(),
            datasets,
            memory,
            viz_library: crate::config::DEFAULT_VIZ_LIBRARY.to_string(),
            chart_path: String::new(),
            output_type: String::new(),
            direct_sql: false,
            context: TrainingContext::default(),
        }
    }

    fn vars(&self) -> HashMap<&'static str, String> {
        let mut conversation = self.memory.get_conversation();
        if let Some(description) = self.memory.agent_description() {
            conversation = format!("{}\n{}", description, conversation);
        }
        let mut vars = HashMap::new();
        vars.insert("datasets", render_datasets(self.datasets));
        vars.insert("conversation", conversation);
        vars.insert("context", self.context.render());
        vars.insert("viz_library", self.viz_library.clone());
        vars.insert("chart_path", self.chart_path.clone());
        vars.insert(
            "sql_mode",
            if self.direct_sql {
                concat!(
                    "\n   Push the whole computation into SQL: build one query and call\n",
                    "   `execute_sql_query` exactly once."
                )
                .to_string()
            } else {
                String::new()
            },
        );
        // no declared type: leave the choice open instead of steering
        vars.insert(
            "output_type",
            if self.output_type.is_empty() {
                "\"number\" | \"string\" | \"dataframe\" | \"plot\"".to_string()
            } else {
                format!("\"{}\"", self.output_type)
            },
        );
        vars
    }

    pub fn to_prompt_string(&self) -> Result<String> {
        render(CHAT_PROMPT_TEMPLATE, &self.vars())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "kind": "chat",
            "datasets": self.datasets.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
            "conversation": self.memory.to_json(),
            "output_type": self.output_type,
            "viz_library": self.viz_library,
            "direct_sql": self.direct_sql,
        })
    }
}

pub struct ErrorCorrectionPrompt<'a> {
    pub id: Uuid,
    pub datasets: &'a [Dataset],
    pub query: String,
    pub code: String,
    pub error: String,
}

impl<'a> ErrorCorrectionPrompt<'a> {
    pub fn new(datasets: &'a [Dataset], query: &str, code: &str, error: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            datasets,
            query: query.to_string(),
            code: code.to_string(),
            error: error.to_string(),
        }
    }

    pub fn to_prompt_string(&self) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert("datasets", render_datasets(self.datasets));
        vars.insert("query", self.query.clone());
        vars.insert("code", self.code.clone());
        vars.insert("error", self.error.clone());
        render(ERROR_CORRECTION_TEMPLATE, &vars)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "kind": "error_correction",
            "query": self.query,
            "code": self.code,
            "error": self.error,
        })
    }
}

pub struct OutputTypeCorrectionPrompt {
    pub id: Uuid,
    pub query: String,
    pub code: String,
    pub error: String,
    pub output_type: String,
}

impl OutputTypeCorrectionPrompt {
    pub fn new(query: &str, code: &str, error: &str, output_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.to_string(),
            code: code.to_string(),
            error: error.to_string(),
            output_type: output_type.to_string(),
        }
    }

    pub fn to_prompt_string(&self) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert("query", self.query.clone());
        vars.insert("code", self.code.clone());
        vars.insert("error", self.error.clone());
        vars.insert("output_type", self.output_type.clone());
        render(OUTPUT_TYPE_CORRECTION_TEMPLATE, &vars)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "kind": "output_type_correction",
            "query": self.query,
            "code": self.code,
            "error": self.error,
            "output_type": self.output_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn fixtures() -> (Vec<Dataset>, Memory) {
        let datasets = vec![Dataset::from_dataframe(
            "employees",
            df!("name" => &["ada"], "salary" => &[120i64]).unwrap(),
        )
        .unwrap()];
        let mut memory = Memory::new(10, None);
        memory.add("what is the top salary?", true);
        (datasets, memory)
    }

    #[test]
    fn chat_prompt_binds_everything() {
        let (datasets, memory) = fixtures();
        let mut prompt = ChatPrompt::new(&datasets, &memory);
        prompt.output_type = "number".into();
        prompt.chart_path = "/proj/exports/charts/temp_chart.png".into();
        let rendered = prompt.to_prompt_string().unwrap();
        assert!(rendered.contains("employees"));
        assert!(rendered.contains("what is the top salary?"));
        assert!(rendered.contains("execute_sql_query"));
        assert!(rendered.contains("\"type\": \"number\""));
        assert!(!rendered.contains("{{"));
        assert!(!rendered.contains("\n\n\n"));
    }

    #[test]
    fn undeclared_output_type_offers_the_full_choice() {
        let (datasets, memory) = fixtures();
        let mut prompt = ChatPrompt::new(&datasets, &memory);
        prompt.chart_path = "/p/exports/charts/temp_chart.png".into();
        let rendered = prompt.to_prompt_string().unwrap();
        assert!(rendered.contains("\"type\": \"number\" | \"string\" | \"dataframe\" | \"plot\""));
        assert!(!rendered.contains("\"type\": \"number\","));
    }

    #[test]
    fn direct_sql_asks_for_a_single_query() {
        let (datasets, memory) = fixtures();
        let mut prompt = ChatPrompt::new(&datasets, &memory);
        prompt.chart_path = "/p/exports/charts/temp_chart.png".into();
        assert!(!prompt.to_prompt_string().unwrap().contains("exactly once"));
        prompt.direct_sql = true;
        assert!(prompt.to_prompt_string().unwrap().contains("exactly once"));
    }

    #[test]
    fn unbound_variable_is_fatal() {
        let vars = HashMap::new();
        let err = render("hello {{missing}}", &vars).unwrap_err();
        assert!(matches!(err, AgentError::PromptRender(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn training_context_is_injected() {
        let (datasets, memory) = fixtures();
        let mut prompt = ChatPrompt::new(&datasets, &memory);
        prompt.chart_path = "/p/exports/charts/temp_chart.png".into();
        prompt.context = TrainingContext {
            exemplars: vec!["Q: top salary\n A: code".into()],
            docs: vec!["salaries are monthly".into()],
        };
        let rendered = prompt.to_prompt_string().unwrap();
        assert!(rendered.contains("similar answered queries"));
        assert!(rendered.contains("salaries are monthly"));
    }

    #[test]
    fn correction_prompts_carry_the_failure() {
        let (datasets, _) = fixtures();
        let prompt = ErrorCorrectionPrompt::new(&datasets, "q", "bad code", "boom");
        let rendered = prompt.to_prompt_string().unwrap();
        assert!(rendered.contains("bad code"));
        assert!(rendered.contains("boom"));

        let prompt = OutputTypeCorrectionPrompt::new("q", "code", "wrong type", "plot");
        let rendered = prompt.to_prompt_string().unwrap();
        assert!(rendered.contains("\"type\": \"plot\""));
    }
}
