//! The conversational agent: the pipeline orchestrator.
//!
//! One turn runs prompt assembly, generation, validation, cleaning,
//! execution, and response parsing, with a bounded retry loop around the
//! recoverable failures. Cleaned code for a turn is cached under the
//! conversation fingerprint, so repeating a conversation skips the LLM.

use crate::cache::{fingerprint, Cache};
use crate::cleaner::CodeCleaner;
use crate::config::{Config, ConfigManager};
use crate::dataset::Dataset;
use crate::error::{AgentError, Result};
use crate::executor::{CodeExecutor, Environment, Value};
use crate::gateway;
use crate::llm::{Llm, OpenAiLlm};
use crate::memory::{Memory, DEFAULT_MEMORY_SIZE};
use crate::prompts::{ChatPrompt, ErrorCorrectionPrompt, OutputTypeCorrectionPrompt, TrainingContext};
use crate::response::{ErrorResponse, Response, ResponseParser};
use crate::sandbox::ProcessSandbox;
use crate::validator::CodeRequirementValidator;
use crate::vector_store::VectorStore;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Exemplars and docs pulled into the chat prompt per turn.
const RETRIEVAL_TOP_K: usize = 3;

pub struct Agent {
    datasets: Arc<Vec<Dataset>>,
    config: Config,
    llm: Arc<dyn Llm>,
    memory: Memory,
    cache: Option<Cache>,
    vector_store: Option<Box<dyn VectorStore>>,
    sandbox: Option<ProcessSandbox>,

    pub conversation_id: Uuid,
    pub last_query: Option<String>,
    pub last_prompt: Option<String>,
    pub last_prompt_id: Option<Uuid>,
    pub last_code_generated: Option<String>,
    pub last_code_executed: Option<String>,
    pub last_error: Option<String>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("conversation_id", &self.conversation_id)
            .field("last_query", &self.last_query)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Build an agent over the registered datasets. The configuration comes
    /// from the argument or the process-wide singleton; the LLM from the
    /// configuration or the environment.
    pub fn new(datasets: Vec<Dataset>, config: Option<Config>) -> Result<Self> {
        if datasets.is_empty() {
            return Err(AgentError::NoDatasets);
        }
        let config = config.unwrap_or_else(ConfigManager::get);

        let local = datasets.iter().filter(|d| d.source_type().is_local()).count();
        if local != 0 && local != datasets.len() {
            return Err(AgentError::InvalidConfiguration(
                "datasets mix local and remote sources; register one backend per agent".to_string(),
            ));
        }

        let llm: Arc<dyn Llm> = match &config.llm {
            Some(llm) => Arc::clone(llm),
            None => Arc::new(OpenAiLlm::from_env()?),
        };
        info!(llm = llm.type_name(), datasets = datasets.len(), "agent ready");

        config.file_manager.ensure_layout()?;
        let cache = if config.enable_cache {
            Some(Cache::open(&config.file_manager)?)
        } else {
            None
        };
        for dataset in &datasets {
            dataset.cache_head(&config.file_manager)?;
        }

        Ok(Self {
            datasets: Arc::new(datasets),
            config,
            llm,
            memory: Memory::new(DEFAULT_MEMORY_SIZE, None),
            cache,
            vector_store: None,
            sandbox: None,
            conversation_id: Uuid::new_v4(),
            last_query: None,
            last_prompt: None,
            last_prompt_id: None,
            last_code_generated: None,
            last_code_executed: None,
            last_error: None,
        })
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.memory = Memory::new(DEFAULT_MEMORY_SIZE, Some(description.to_string()));
        self
    }

    pub fn with_vector_store(mut self, store: Box<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn with_sandbox(mut self, sandbox: ProcessSandbox) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    /// Answer a query in a fresh conversation.
    pub async fn chat(&mut self, query: &str, output_type: Option<&str>) -> Response {
        self.start_new_conversation();
        self.follow_up(query, output_type).await
    }

    /// Answer a query in the running conversation.
    pub async fn follow_up(&mut self, query: &str, output_type: Option<&str>) -> Response {
        let response = match self.process(query, output_type).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "turn failed");
                let error = e.to_string();
                self.last_error = Some(error.clone());
                Response::Error(ErrorResponse::new(
                    &error,
                    self.last_code_executed.as_deref().unwrap_or(""),
                ))
            }
        };
        if self.config.save_logs {
            self.append_log(query, &response);
        }
        response
    }

    async fn process(&mut self, query: &str, output_type: Option<&str>) -> Result<Response> {
        self.memory.add(query, true);
        self.last_query = Some(query.to_string());
        let output_type = output_type.unwrap_or("").to_string();

        let code = self.generate_code(query, &output_type).await?;
        let response = self
            .execute_with_retries_inner(&code, query, &output_type)
            .await?;

        // a correction round produced better code than the cached generation
        if let Some(cache) = &self.cache {
            if let Some(executed) = &self.last_code_executed {
                if *executed != code {
                    cache.set(&fingerprint(&self.memory, &self.datasets), executed)?;
                }
            }
        }

        self.memory.add(&response.to_display_string(), false);
        Ok(response)
    }

    /// Produce runnable code for the current conversation: replay the
    /// cached code when the fingerprint matches, otherwise render the chat
    /// prompt, call the LLM, validate and clean the reply, and cache it.
    pub async fn generate_code(&mut self, query: &str, output_type: &str) -> Result<String> {
        let key = fingerprint(&self.memory, &self.datasets);
        if let Some(cache) = &self.cache {
            if let Some(code) = cache.get(&key)? {
                info!("cache hit, skipping generation");
                self.last_code_generated = Some(code.clone());
                return Ok(code);
            }
        }

        let mut prompt = ChatPrompt::new(&self.datasets, &self.memory);
        prompt.viz_library = self.config.data_viz_library.clone();
        prompt.chart_path = self.chart_path_string();
        prompt.output_type = output_type.to_string();
        prompt.direct_sql = self.config.direct_sql;
        prompt.context = self.retrieve_context(query);

        let rendered = prompt.to_prompt_string()?;
        self.last_prompt_id = Some(prompt.id);
        self.last_prompt = Some(rendered.clone());
        if self.config.verbose {
            info!(prompt = %rendered, "chat prompt");
        }
        debug!(llm = self.llm.type_name(), prompt_id = %prompt.id, "generating code");

        let code = self.llm.generate_code(&rendered).await?;
        self.last_code_generated = Some(code.clone());
        let cleaned = self.validate_and_clean(&code)?;
        if let Some(cache) = &self.cache {
            cache.set(&key, &cleaned)?;
        }
        Ok(cleaned)
    }

    fn validate_and_clean(&self, code: &str) -> Result<String> {
        CodeRequirementValidator::validate(code)?;
        let chart_path = self.chart_path_string();
        CodeCleaner::new(&self.datasets, &chart_path).clean(code)
    }

    fn retrieve_context(&self, query: &str) -> TrainingContext {
        let Some(store) = &self.vector_store else {
            return TrainingContext::default();
        };
        let exemplars = store
            .get_relevant_question_answers(query, RETRIEVAL_TOP_K)
            .map(|r| r.documents)
            .unwrap_or_default();
        let docs = store
            .get_relevant_docs(query, RETRIEVAL_TOP_K)
            .map(|r| r.documents)
            .unwrap_or_default();
        TrainingContext { exemplars, docs }
    }

    /// Run one cleaned script, in the sandbox when one is attached.
    pub async fn execute_code(&mut self, code: &str) -> Result<Value> {
        self.last_code_executed = Some(code.to_string());
        if let Some(sandbox) = self.sandbox.as_mut() {
            let chart_path = self.config.file_manager.chart_path();
            return sandbox.execute(code, &self.datasets, &chart_path).await;
        }
        let mut frames = Vec::with_capacity(self.datasets.len());
        for dataset in self.datasets.iter() {
            frames.push(dataset.execute()?);
        }
        let datasets = Arc::clone(&self.datasets);
        let env = Environment::new(
            Box::new(move |sql| gateway::execute_sql_query(&datasets, sql)),
            frames,
            self.config.file_manager.chart_path(),
        );
        CodeExecutor::execute(code, env)
    }

    /// Execute and parse with the bounded correction loop.
    pub async fn execute_with_retries(&mut self, code: &str) -> Result<Response> {
        let query = self.last_query.clone().unwrap_or_default();
        self.execute_with_retries_inner(code, &query, "").await
    }

    async fn execute_with_retries_inner(
        &mut self,
        code: &str,
        query: &str,
        output_type: &str,
    ) -> Result<Response> {
        let mut code = code.to_string();
        let mut attempts = 0usize;
        loop {
            let outcome = match self.execute_code(&code).await {
                Ok(value) => ResponseParser::parse(&value, &code, Some(output_type)),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(response) => {
                    if attempts > 0 {
                        info!(attempts, "recovered after correction");
                    }
                    self.last_error = None;
                    return Ok(response);
                }
                Err(e) if e.is_recoverable() && attempts < self.config.max_retries => {
                    attempts += 1;
                    warn!(attempt = attempts, error = %e, "retrying with a correction prompt");
                    self.last_error = Some(e.to_string());
                    code = self.correct(&e, &code, query, output_type).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn correct(
        &mut self,
        error: &AgentError,
        code: &str,
        query: &str,
        output_type: &str,
    ) -> Result<String> {
        let rendered = match error {
            AgentError::InvalidLlmOutputType(message) => {
                let prompt =
                    OutputTypeCorrectionPrompt::new(query, code, message, output_type);
                self.last_prompt_id = Some(prompt.id);
                prompt.to_prompt_string()?
            }
            other => {
                let message = other.to_string();
                let prompt = ErrorCorrectionPrompt::new(&self.datasets, query, code, &message);
                self.last_prompt_id = Some(prompt.id);
                prompt.to_prompt_string()?
            }
        };
        self.last_prompt = Some(rendered.clone());
        let reply = self.llm.generate_code(&rendered).await?;
        self.last_code_generated = Some(reply.clone());
        self.validate_and_clean(&reply)
    }

    /// Store question-answer exemplars and reference docs for retrieval.
    /// Queries and codes come together or not at all.
    pub fn train(
        &mut self,
        queries: Option<Vec<String>>,
        codes: Option<Vec<String>>,
        docs: Option<Vec<String>>,
    ) -> Result<()> {
        let store = self
            .vector_store
            .as_mut()
            .ok_or(AgentError::MissingVectorStore)?;
        match (&queries, &codes) {
            (Some(q), Some(c)) if q.len() == c.len() => {}
            (None, None) => {}
            _ => {
                return Err(AgentError::Training(
                    "queries and codes must be provided together, one code per query".to_string(),
                ))
            }
        }
        if let (Some(queries), Some(codes)) = (queries, codes) {
            store.add_question_answer(&queries, &codes)?;
        }
        if let Some(docs) = docs {
            store.add_docs(&docs)?;
        }
        Ok(())
    }

    pub fn add_message(&mut self, text: &str, is_user: bool) {
        self.memory.add(text, is_user);
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    pub fn start_new_conversation(&mut self) {
        self.clear_memory();
        self.conversation_id = Uuid::new_v4();
        debug!(conversation = %self.conversation_id, "new conversation");
    }

    /// One line per turn in the project log. A logging failure is not a
    /// turn failure.
    fn append_log(&self, query: &str, response: &Response) {
        let entry = format!(
            "{} conversation={} query={:?} response={}\n",
            chrono::Utc::now().to_rfc3339(),
            self.conversation_id,
            query,
            response.type_name()
        );
        let written = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.config.file_manager.log_path())
            .and_then(|mut file| std::io::Write::write_all(&mut file, entry.as_bytes()));
        if let Err(e) = written {
            warn!(error = %e, "could not append to the agent log");
        }
    }

    fn chart_path_string(&self) -> String {
        self.config
            .file_manager
            .chart_path()
            .to_string_lossy()
            .to_string()
    }
}
