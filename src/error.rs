use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Prompt render error: {0}")]
    PromptRender(String),

    #[error("The code must read data through the `execute_sql_query` function, which is already provided")]
    ExecuteSqlQueryNotUsed,

    #[error("Malicious query: {0}")]
    MaliciousQuery(String),

    #[error("Security violation: {0}")]
    Security(String),

    #[error("Code cleaning error: {0}")]
    CodeCleaning(String),

    #[error("Code execution error: {trace}")]
    CodeExecution { code: String, trace: String },

    #[error("Invalid LLM output type: {0}")]
    InvalidLlmOutputType(String),

    #[error("Invalid output value: {0}")]
    InvalidOutputValueMismatch(String),

    #[error("No result returned")]
    NoResultFound,

    #[error("No vector store configured for training")]
    MissingVectorStore,

    #[error("SQL execution failed: {0}")]
    SqlExecution(String),

    #[error("No datasets registered")]
    NoDatasets,

    #[error("Invalid agent configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Polars error: {0}")]
    Polars(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<polars::prelude::PolarsError> for AgentError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        AgentError::Polars(e.to_string())
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Cache(e.to_string())
    }
}

impl AgentError {
    /// Recoverable errors are retried by the agent loop; everything else
    /// unwinds the turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::CodeExecution { .. } | AgentError::InvalidLlmOutputType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
