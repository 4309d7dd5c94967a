//! Restricted execution of cleaned analysis scripts.

pub mod environment;
pub mod interpreter;
pub mod value;

pub use environment::{Environment, Figure, SqlRunner, BUILTINS, FORBIDDEN_MODULES, SQL_GATEWAY_NAME, WHITELISTED_MODULES};
pub use interpreter::Interpreter;
pub use value::Value;

use crate::error::{AgentError, Result};
use crate::script::parse;
use tracing::debug;

/// Runs a cleaned script in a fresh environment and returns the `result`
/// binding it left behind.
pub struct CodeExecutor;

impl CodeExecutor {
    pub fn execute(code: &str, env: Environment) -> Result<Value> {
        debug!(bytes = code.len(), "executing analysis script");
        let program = match parse(code) {
            Ok(p) => p,
            Err(e) => return Err(wrap(code, e)),
        };
        let mut interp = Interpreter::new(env);
        if let Err(e) = interp.run(&program) {
            return Err(wrap(code, e));
        }
        match interp.result() {
            Some(v) => Ok(v.clone()),
            None => Err(AgentError::NoResultFound),
        }
    }
}

/// Script failures become recoverable execution errors carrying the code
/// and the trace; security violations keep their own class.
fn wrap(code: &str, err: AgentError) -> AgentError {
    match err {
        AgentError::Security(_) | AgentError::NoResultFound | AgentError::CodeExecution { .. } => {
            err
        }
        other => AgentError::CodeExecution {
            code: code.to_string(),
            trace: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use std::path::PathBuf;

    fn env_with(df: DataFrame) -> Environment {
        let gateway_df = df.clone();
        Environment::new(
            Box::new(move |_sql| Ok(gateway_df.clone())),
            vec![df],
            PathBuf::from("/tmp/tabletalk-test/exports/charts/temp_chart.png"),
        )
    }

    fn people() -> DataFrame {
        df!(
            "name" => &["ada", "alan", "grace"],
            "salary" => &[120i64, 90, 150]
        )
        .unwrap()
    }

    #[test]
    fn arithmetic_and_result_binding() {
        let code = "x = 2 + 3 * 4\nresult = {\"type\": \"number\", \"value\": x}";
        let out = CodeExecutor::execute(code, env_with(people())).unwrap();
        assert_eq!(out.get_key("value"), Some(&Value::Int(14)));
    }

    #[test]
    fn sql_gateway_and_series_methods() {
        let code = concat!(
            "df = execute_sql_query(\"SELECT * FROM people\")\n",
            "result = {\"type\": \"number\", \"value\": df[\"salary\"].max()}\n",
        );
        let out = CodeExecutor::execute(code, env_with(people())).unwrap();
        assert_eq!(out.get_key("value"), Some(&Value::Int(150)));
    }

    #[test]
    fn missing_result_is_its_own_error() {
        let err = CodeExecutor::execute("x = 1", env_with(people())).unwrap_err();
        assert!(matches!(err, AgentError::NoResultFound));
    }

    #[test]
    fn forbidden_module_reference_is_a_security_error() {
        let err = CodeExecutor::execute(
            "result = os.getcwd()",
            env_with(people()),
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::Security(_)));
    }

    #[test]
    fn forbidden_module_string_argument_is_a_security_error() {
        let err = CodeExecutor::execute(
            "result = str(\"os.path\")",
            env_with(people()),
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::Security(_)));
    }

    #[test]
    fn runtime_errors_carry_code_and_trace() {
        let err = CodeExecutor::execute(
            "result = 1 / 0",
            env_with(people()),
        )
        .unwrap_err();
        match err {
            AgentError::CodeExecution { code, trace } => {
                assert!(code.contains("1 / 0"));
                assert!(trace.contains("division by zero"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn user_functions_and_control_flow() {
        let code = concat!(
            "def double(x):\n",
            "    return x * 2\n",
            "total = 0\n",
            "for i in range(4):\n",
            "    if i % 2 == 0:\n",
            "        total = total + double(i)\n",
            "result = {\"type\": \"number\", \"value\": total}\n",
        );
        let out = CodeExecutor::execute(code, env_with(people())).unwrap();
        assert_eq!(out.get_key("value"), Some(&Value::Int(4)));
    }

    #[test]
    fn dfs_binding_exposes_registered_frames() {
        let code = concat!(
            "df = dfs[0]\n",
            "result = {\"type\": \"dataframe\", \"value\": df.head(2)}\n",
        );
        let out = CodeExecutor::execute(code, env_with(people())).unwrap();
        match out.get_key("value") {
            Some(Value::Frame(df)) => assert_eq!(df.height(), 2),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn tab_frame_builds_a_dataframe() {
        let code = concat!(
            "df = tab.frame({\"a\": [1, 2], \"b\": [\"x\", \"y\"]})\n",
            "result = {\"type\": \"number\", \"value\": len(df)}\n",
        );
        let out = CodeExecutor::execute(code, env_with(people())).unwrap();
        assert_eq!(out.get_key("value"), Some(&Value::Int(2)));
    }

    #[test]
    fn charts_save_writes_the_figure() {
        let dir = tempfile::tempdir().unwrap();
        let chart = dir.path().join("exports/charts/temp_chart.png");
        let env = Environment::new(
            Box::new(|_| Ok(df!("a" => &[1i64]).unwrap())),
            vec![],
            chart.clone(),
        );
        let code = concat!(
            "charts.bar(execute_sql_query(\"SELECT 1\"), x=\"a\", y=\"a\")\n",
            "path = charts.save()\n",
            "result = {\"type\": \"plot\", \"value\": path}\n",
        );
        let out = CodeExecutor::execute(code, env).unwrap();
        assert!(chart.exists());
        match out.get_key("value") {
            Some(Value::Str(p)) => assert!(p.ends_with("temp_chart.png")),
            other => panic!("expected path, got {other:?}"),
        }
    }
}
