//! Post-generation validation of candidate scripts.
//!
//! The only rule: the script must read data through the SQL gateway. Every
//! called name is collected at any nesting depth, with attribute calls
//! flattened to dotted names, before the check.

use crate::error::{AgentError, Result};
use crate::executor::SQL_GATEWAY_NAME;
use crate::script::{ast, parse};
use tracing::debug;

pub struct CodeRequirementValidator;

impl CodeRequirementValidator {
    /// Parse the candidate and check the gateway is called somewhere.
    pub fn validate(code: &str) -> Result<()> {
        let program = parse(code)?;
        let called = ast::collect_call_names(&program);
        debug!(calls = called.len(), "validated candidate script");
        if called.iter().any(|name| {
            name == SQL_GATEWAY_NAME || name.ends_with(&format!(".{}", SQL_GATEWAY_NAME))
        }) {
            Ok(())
        } else {
            Err(AgentError::ExecuteSqlQueryNotUsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_call_passes() {
        let code = "df = execute_sql_query(\"SELECT 1\")\nresult = {\"type\": \"number\", \"value\": 1}";
        assert!(CodeRequirementValidator::validate(code).is_ok());
    }

    #[test]
    fn nested_call_passes() {
        let code = concat!(
            "def fetch():\n",
            "    if True:\n",
            "        return execute_sql_query(\"SELECT 1\")\n",
            "result = fetch()\n",
        );
        assert!(CodeRequirementValidator::validate(code).is_ok());
    }

    #[test]
    fn missing_gateway_call_fails() {
        let code = "result = {\"type\": \"number\", \"value\": 1}";
        let err = CodeRequirementValidator::validate(code).unwrap_err();
        assert!(matches!(err, AgentError::ExecuteSqlQueryNotUsed));
    }

    #[test]
    fn unparsable_code_is_a_syntax_error() {
        assert!(CodeRequirementValidator::validate("def broken(:").is_err());
    }
}
