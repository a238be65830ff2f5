//! Semantic index boundary and an in-memory implementation.
//!
//! [`SemanticIndex`] is what the retrieval cascade talks to. [`InMemoryIndex`]
//! does brute-force cosine similarity over embedded documents and applies
//! the same [`WhereFilter`] semantics a remote index would.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use apteka_core::error::AptekaError;
use apteka_core::types::CandidateRecord;
use async_trait::async_trait;

use crate::embedding::EmbeddingService;
use crate::filter::WhereFilter;

/// One semantic query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub query_text: String,
    pub n_results: usize,
    pub filter: Option<WhereFilter>,
}

/// A document to store in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    pub document: String,
    pub metadata: HashMap<String, String>,
}

/// Results grouped per query text, best match first within each group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub groups: Vec<Vec<CandidateRecord>>,
}

impl QueryResult {
    pub fn single(candidates: Vec<CandidateRecord>) -> Self {
        Self {
            groups: vec![candidates],
        }
    }

    /// All candidates across groups, in order.
    pub fn into_candidates(self) -> Vec<CandidateRecord> {
        self.groups.into_iter().flatten().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(Vec::is_empty)
    }
}

/// External semantic search service.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn query(&self, query: &IndexQuery) -> Result<QueryResult, AptekaError>;

    /// Store documents, overwriting any with the same id.
    async fn add(&self, documents: Vec<IndexDocument>) -> Result<(), AptekaError>;
}

// ---------------------------------------------------------------------------
// InMemoryIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    embedding: Vec<f32>,
    document: String,
    metadata: HashMap<String, String>,
}

/// In-memory semantic index using brute-force cosine similarity.
///
/// Thread-safe via interior RwLock.
#[derive(Debug, Clone)]
pub struct InMemoryIndex<E> {
    embedder: Arc<E>,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl<E: EmbeddingService> InMemoryIndex<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder: Arc::new(embedder),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return the number of documents currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<E: EmbeddingService + 'static> SemanticIndex for InMemoryIndex<E> {
    async fn query(&self, query: &IndexQuery) -> Result<QueryResult, AptekaError> {
        let vector = self.embedder.embed(&query.query_text).await?;

        let entries = self
            .entries
            .read()
            .map_err(|e| AptekaError::Index(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<(f64, CandidateRecord)> = entries
            .values()
            .filter(|entry| {
                query
                    .filter
                    .as_ref()
                    .map_or(true, |f| f.matches(&entry.metadata))
            })
            .map(|entry| {
                (
                    cosine_similarity(&vector, &entry.embedding),
                    CandidateRecord {
                        document: entry.document.clone(),
                        metadata: entry.metadata.clone(),
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.n_results);

        Ok(QueryResult::single(
            scored.into_iter().map(|(_, c)| c).collect(),
        ))
    }

    async fn add(&self, documents: Vec<IndexDocument>) -> Result<(), AptekaError> {
        let mut embedded = Vec::with_capacity(documents.len());
        for doc in documents {
            let embedding = self.embedder.embed(&doc.document).await?;
            embedded.push((doc, embedding));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|e| AptekaError::Index(format!("Lock poisoned: {}", e)))?;
        for (doc, embedding) in embedded {
            entries.insert(
                doc.id,
                Entry {
                    embedding,
                    document: doc.document,
                    metadata: doc.metadata,
                },
            );
        }
        Ok(())
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
