//! End-to-end pipeline tests over a scripted LLM adapter.

use polars::prelude::*;
use std::sync::Arc;
use tabletalk::{
    Agent, AgentError, Config, Dataset, FakeLlm, FileManager, InMemoryVectorStore, Response,
};

fn employees() -> Dataset {
    Dataset::from_dataframe(
        "employees",
        df!(
            "name" => &["ada", "alan", "grace"],
            "dept" => &["eng", "eng", "research"],
            "salary" => &[120i64, 90, 150]
        )
        .unwrap(),
    )
    .unwrap()
    .with_description("employee roster")
}

fn config_with(llm: &Arc<FakeLlm>, dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.llm = Some(Arc::clone(llm) as Arc<dyn tabletalk::Llm>);
    config.file_manager = FileManager::new(dir.path());
    config
}

const GOOD_REPLY: &str = r#"```python
df = execute_sql_query("SELECT MAX(salary) AS top FROM employees")
result = {"type": "number", "value": df["top"][0]}
```"#;

#[tokio::test]
async fn happy_path_returns_a_number() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();

    let response = agent.chat("what is the top salary?", Some("number")).await;
    match response {
        Response::Number(r) => assert_eq!(r.value, 150.0),
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(llm.call_count(), 1);
    assert!(agent.last_code_executed.is_some());
    assert!(agent.last_prompt.as_deref().unwrap().contains("employees"));
}

#[tokio::test]
async fn runtime_failure_retries_with_an_error_correction_prompt() {
    let bad = r#"df = execute_sql_query("SELECT MAX(salary) AS top FROM employees")
result = {"type": "number", "value": df["missing"][0]}"#;
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![bad, GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();

    let response = agent.chat("top salary?", Some("number")).await;
    assert!(matches!(response, Response::Number(_)));
    assert_eq!(llm.call_count(), 2);
    let correction = &llm.prompts()[1];
    assert!(correction.contains("failed"));
    assert!(correction.contains("df[\"missing\"]"));
}

#[tokio::test]
async fn wrong_output_type_retries_with_a_type_correction_prompt() {
    let wrong_type = r#"df = execute_sql_query("SELECT name FROM employees")
result = {"type": "string", "value": "lots"}"#;
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![wrong_type, GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();

    let response = agent.chat("top salary?", Some("number")).await;
    assert!(matches!(response, Response::Number(_)));
    assert_eq!(llm.call_count(), 2);
    assert!(llm.prompts()[1].contains("wrong result type"));
}

#[tokio::test]
async fn unauthorized_table_becomes_an_error_response() {
    let malicious = r#"df = execute_sql_query("SELECT * FROM secrets")
result = {"type": "number", "value": 1}"#;
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![malicious]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();

    let response = agent.chat("dump the secrets table", None).await;
    match response {
        Response::Error(r) => {
            assert!(r.value.contains("Unfortunately"));
            assert!(r.value.contains("Malicious query"));
        }
        other => panic!("unexpected response: {other:?}"),
    }
    // not recoverable: one generation, no correction round
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn repeated_conversation_hits_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();

    let first = agent.chat("top salary?", Some("number")).await;
    assert!(matches!(first, Response::Number(_)));

    // same single-message conversation, same datasets: same fingerprint
    let second = agent.chat("top salary?", Some("number")).await;
    assert!(matches!(second, Response::Number(_)));
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn generate_code_replays_the_cached_generation() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();

    agent.add_message("top salary?", true);
    let first = agent.generate_code("top salary?", "number").await.unwrap();
    let second = agent.generate_code("top salary?", "number").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn turns_are_written_to_the_project_log() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();

    let _ = agent.chat("what is the top salary?", Some("number")).await;
    let log = std::fs::read_to_string(FileManager::new(dir.path()).log_path()).unwrap();
    assert!(log.contains("what is the top salary?"));
    assert!(log.contains("response=number"));
}

#[tokio::test]
async fn direct_sql_reaches_the_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY]));
    let mut config = config_with(&llm, &dir);
    config.direct_sql = true;
    let mut agent = Agent::new(vec![employees()], Some(config)).unwrap();

    let _ = agent.chat("top salary?", Some("number")).await;
    assert!(llm.prompts()[0].contains("exactly once"));
}

#[tokio::test]
async fn string_answers_enter_memory_unquoted() {
    let reply = r#"df = execute_sql_query("SELECT name FROM employees")
result = {"type": "string", "value": "lots"}"#;
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![reply]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();

    let _ = agent.chat("how many names?", Some("string")).await;
    let conversation = agent.memory().get_conversation();
    assert!(conversation.contains("lots"));
    assert!(!conversation.contains("\"lots\""));
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let always_bad = r#"df = execute_sql_query("SELECT 1 AS one FROM employees")
result = {"type": "number", "value": 1 / 0}"#;
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![always_bad, always_bad, always_bad, always_bad]));
    let mut config = config_with(&llm, &dir);
    config.max_retries = 2;
    let mut agent = Agent::new(vec![employees()], Some(config)).unwrap();

    let response = agent.chat("break please", None).await;
    assert!(matches!(response, Response::Error(_)));
    // initial generation plus two corrections
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn trained_exemplars_reach_the_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir)))
        .unwrap()
        .with_vector_store(Box::new(InMemoryVectorStore::new()));

    agent
        .train(
            Some(vec!["top salary overall".to_string()]),
            Some(vec!["df = execute_sql_query(\"SELECT MAX(salary) FROM employees\")".to_string()]),
            None,
        )
        .unwrap();

    let _ = agent.chat("top salary?", Some("number")).await;
    let prompt = &llm.prompts()[0];
    assert!(prompt.contains("Q: top salary overall"));
}

#[tokio::test]
async fn training_without_a_store_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();
    let err = agent.train(None, None, Some(vec!["doc".into()])).unwrap_err();
    assert!(matches!(err, AgentError::MissingVectorStore));
}

#[tokio::test]
async fn one_sided_training_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir)))
        .unwrap()
        .with_vector_store(Box::new(InMemoryVectorStore::new()));
    let err = agent
        .train(Some(vec!["q".into()]), None, None)
        .unwrap_err();
    assert!(matches!(err, AgentError::Training(_)));
}

#[test]
fn empty_dataset_registry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY]));
    let err = Agent::new(vec![], Some(config_with(&llm, &dir))).unwrap_err();
    assert!(matches!(err, AgentError::NoDatasets));
}

#[tokio::test]
async fn follow_up_keeps_the_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(vec![GOOD_REPLY, GOOD_REPLY]));
    let mut agent = Agent::new(vec![employees()], Some(config_with(&llm, &dir))).unwrap();

    let _ = agent.chat("top salary?", Some("number")).await;
    let id = agent.conversation_id;
    let _ = agent.follow_up("and for engineering only?", Some("number")).await;
    assert_eq!(agent.conversation_id, id);
    assert!(llm.prompts()[1].contains("top salary?"));
    assert!(llm.prompts()[1].contains("and for engineering only?"));
}
