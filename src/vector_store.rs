//! Training stores.
//!
//! A `VectorStore` holds question-answer exemplars and reference docs and
//! returns the closest matches for a query. The in-memory store embeds text
//! with a deterministic hashed bag-of-words and scores by cosine
//! similarity over a linear scan.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

pub type Embedding = Vec<f32>;

const EMBEDDING_DIMENSION: usize = 256;

/// One retrieval: parallel lists, closest first. Distances are
/// `1 - cosine similarity`.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub documents: Vec<String>,
    pub distances: Vec<f32>,
    pub metadatas: Vec<HashMap<String, String>>,
    pub ids: Vec<String>,
}

pub trait VectorStore: Send + Sync {
    fn add_question_answer(&mut self, queries: &[String], codes: &[String]) -> Result<Vec<String>>;
    fn add_docs(&mut self, docs: &[String]) -> Result<Vec<String>>;
    fn update_question_answer(&mut self, ids: &[String], queries: &[String], codes: &[String]) -> Result<()>;
    fn update_docs(&mut self, ids: &[String], docs: &[String]) -> Result<()>;
    fn delete_question_answer(&mut self, ids: &[String]) -> Result<()>;
    fn delete_docs(&mut self, ids: &[String]) -> Result<()>;
    fn get_relevant_question_answers(&self, query: &str, k: usize) -> Result<RetrievalResult>;
    fn get_relevant_docs(&self, query: &str, k: usize) -> Result<RetrievalResult>;
}

/// Stored exemplar format: the rendered Q/A pair retrieval returns.
pub fn format_question_answer(query: &str, code: &str) -> String {
    format!("Q: {}\n A: {}", query, code)
}

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    text: String,
    metadata: HashMap<String, String>,
    embedding: Embedding,
}

/// Linear-scan store; fine for the exemplar counts training produces.
#[derive(Default)]
pub struct InMemoryVectorStore {
    qa: Vec<StoredDocument>,
    docs: Vec<StoredDocument>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn qa_count(&self) -> usize {
        self.qa.len()
    }

    pub fn docs_count(&self) -> usize {
        self.docs.len()
    }

    fn insert(bucket: &mut Vec<StoredDocument>, text: &str, metadata: HashMap<String, String>) -> String {
        let id = Uuid::new_v4().to_string();
        bucket.push(StoredDocument {
            id: id.clone(),
            text: text.to_string(),
            metadata,
            embedding: embed(text),
        });
        id
    }

    fn search(bucket: &[StoredDocument], query: &str, k: usize) -> RetrievalResult {
        let query_embedding = embed(query);
        let mut scored: Vec<(&StoredDocument, f32)> = bucket
            .iter()
            .map(|doc| (doc, cosine_similarity(&query_embedding, &doc.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut out = RetrievalResult::default();
        for (doc, score) in scored {
            out.documents.push(doc.text.clone());
            out.distances.push(1.0 - score);
            out.metadatas.push(doc.metadata.clone());
            out.ids.push(doc.id.clone());
        }
        out
    }
}

impl VectorStore for InMemoryVectorStore {
    fn add_question_answer(&mut self, queries: &[String], codes: &[String]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(queries.len());
        for (query, code) in queries.iter().zip(codes) {
            let mut metadata = HashMap::new();
            metadata.insert("query".to_string(), query.clone());
            ids.push(Self::insert(
                &mut self.qa,
                &format_question_answer(query, code),
                metadata,
            ));
        }
        Ok(ids)
    }

    fn add_docs(&mut self, docs: &[String]) -> Result<Vec<String>> {
        Ok(docs
            .iter()
            .map(|doc| Self::insert(&mut self.docs, doc, HashMap::new()))
            .collect())
    }

    fn update_question_answer(&mut self, ids: &[String], queries: &[String], codes: &[String]) -> Result<()> {
        for ((id, query), code) in ids.iter().zip(queries).zip(codes) {
            if let Some(doc) = self.qa.iter_mut().find(|d| &d.id == id) {
                doc.text = format_question_answer(query, code);
                doc.embedding = embed(&doc.text);
                doc.metadata.insert("query".to_string(), query.clone());
            }
        }
        Ok(())
    }

    fn update_docs(&mut self, ids: &[String], docs: &[String]) -> Result<()> {
        for (id, text) in ids.iter().zip(docs) {
            if let Some(doc) = self.docs.iter_mut().find(|d| &d.id == id) {
                doc.text = text.clone();
                doc.embedding = embed(text);
            }
        }
        Ok(())
    }

    fn delete_question_answer(&mut self, ids: &[String]) -> Result<()> {
        self.qa.retain(|d| !ids.contains(&d.id));
        Ok(())
    }

    fn delete_docs(&mut self, ids: &[String]) -> Result<()> {
        self.docs.retain(|d| !ids.contains(&d.id));
        Ok(())
    }

    fn get_relevant_question_answers(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        Ok(Self::search(&self.qa, query, k))
    }

    fn get_relevant_docs(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        Ok(Self::search(&self.docs, query, k))
    }
}

/// Deterministic hashed bag-of-words embedding: each lowercased token adds
/// weight to the bucket its digest selects.
fn embed(text: &str) -> Embedding {
    let mut out = vec![0.0f32; EMBEDDING_DIMENSION];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let bucket = u16::from_be_bytes([digest[0], digest[1]]) as usize % EMBEDDING_DIMENSION;
        out[bucket] += 1.0;
    }
    out
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn qa_retrieval_prefers_matching_exemplars() {
        let mut store = InMemoryVectorStore::new();
        store
            .add_question_answer(
                &strings(&["average salary by department", "total revenue per month"]),
                &strings(&["code_a", "code_b"]),
            )
            .unwrap();

        let hits = store
            .get_relevant_question_answers("what is the average salary", 1)
            .unwrap();
        assert_eq!(hits.documents.len(), 1);
        assert!(hits.documents[0].contains("average salary by department"));
        assert!(hits.documents[0].starts_with("Q: "));
        assert!(hits.documents[0].contains("\n A: code_a"));
    }

    #[test]
    fn docs_update_and_delete() {
        let mut store = InMemoryVectorStore::new();
        let ids = store
            .add_docs(&strings(&["salary figures are monthly gross"]))
            .unwrap();
        store
            .update_docs(&ids, &strings(&["salary figures are annual gross"]))
            .unwrap();
        let hits = store.get_relevant_docs("salary", 5).unwrap();
        assert!(hits.documents[0].contains("annual"));

        store.delete_docs(&ids).unwrap();
        assert_eq!(store.docs_count(), 0);
    }

    #[test]
    fn retrieval_is_bounded_by_k() {
        let mut store = InMemoryVectorStore::new();
        store
            .add_docs(&strings(&["one", "two", "three", "four"]))
            .unwrap();
        let hits = store.get_relevant_docs("three", 2).unwrap();
        assert_eq!(hits.documents.len(), 2);
        assert_eq!(hits.distances.len(), 2);
        assert!(hits.distances[0] <= hits.distances[1]);
    }
}
