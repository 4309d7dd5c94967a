//! Conversational analytics over tabular datasets.
//!
//! An [`Agent`] answers natural-language questions over registered
//! [`Dataset`]s: an LLM writes a short analysis script, the script is
//! validated and sanitized against the registered table set, executed in a
//! restricted interpreter (optionally in a worker process), and the result
//! comes back as a typed [`Response`].

pub mod agent;
pub mod cache;
pub mod cleaner;
pub mod config;
pub mod connector;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod prompts;
pub mod response;
pub mod sandbox;
pub mod script;
pub mod validator;
pub mod vector_store;

pub use agent::Agent;
pub use cache::Cache;
pub use cleaner::CodeCleaner;
pub use config::{Config, ConfigManager, FileManager};
pub use connector::{Connector, LocalConnector, SourceType, SqliteConnector};
pub use dataset::Dataset;
pub use error::{AgentError, Result};
pub use executor::{CodeExecutor, Environment, Value};
pub use llm::{FakeLlm, Llm, OpenAiLlm};
pub use memory::Memory;
pub use response::{ChartResponse, ErrorResponse, Response, ResponseParser};
pub use sandbox::ProcessSandbox;
pub use validator::CodeRequirementValidator;
pub use vector_store::{InMemoryVectorStore, RetrievalResult, VectorStore};
