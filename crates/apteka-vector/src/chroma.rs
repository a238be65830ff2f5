//! Chroma v2 REST client.
//!
//! Embeddings are computed locally through an [`EmbeddingService`] and sent
//! as `query_embeddings`, so the server needs no embedding function of its
//! own. The collection id is resolved once with `get_or_create` and cached.

use std::collections::HashMap;
use std::time::Duration;

use apteka_core::config::IndexConfig;
use apteka_core::error::AptekaError;
use apteka_core::types::CandidateRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::embedding::EmbeddingService;
use crate::index::{IndexDocument, IndexQuery, QueryResult, SemanticIndex};

pub struct ChromaIndex<E> {
    client: reqwest::Client,
    base_url: String,
    tenant: String,
    database: String,
    collection: String,
    collection_id: OnceCell<String>,
    embedder: E,
}

impl<E> std::fmt::Debug for ChromaIndex<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromaIndex")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
}

impl<E: EmbeddingService> ChromaIndex<E> {
    pub fn new(config: &IndexConfig, embedder: E) -> Result<Self, AptekaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AptekaError::Index(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tenant: config.tenant.clone(),
            database: config.database.clone(),
            collection: config.collection.clone(),
            collection_id: OnceCell::new(),
            embedder,
        })
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            self.base_url, self.tenant, self.database
        )
    }

    async fn collection_id(&self) -> Result<&str, AptekaError> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let body = json!({ "name": self.collection, "get_or_create": true });
                let info: CollectionInfo = self.post(&self.collections_url(), &body).await?;
                info!(collection = %self.collection, id = %info.id, "Chroma collection resolved");
                Ok::<_, AptekaError>(info.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<T, AptekaError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AptekaError::Index(format!("Chroma request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AptekaError::Index(format!("failed to read Chroma response: {}", e)))?;
        if !status.is_success() {
            return Err(AptekaError::Index(format!(
                "Chroma returned HTTP {}: {}",
                status.as_u16(),
                text
            )));
        }

        // `add` answers with an empty body on some server versions.
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text)
            .map_err(|e| AptekaError::Index(format!("invalid Chroma response: {}", e)))
    }
}

/// Chroma returns typed metadata values; the cascade compares strings.
fn stringify_metadata(raw: Map<String, Value>) -> HashMap<String, String> {
    raw.into_iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, s)
        })
        .collect()
}

fn into_groups(response: QueryResponse) -> QueryResult {
    let documents = response.documents.unwrap_or_default();
    let mut metadatas = response.metadatas.unwrap_or_default().into_iter();

    let groups = documents
        .into_iter()
        .map(|docs| {
            let mut metas = metadatas.next().unwrap_or_default().into_iter();
            docs.into_iter()
                .map(|doc| CandidateRecord {
                    document: doc.unwrap_or_default(),
                    metadata: metas
                        .next()
                        .flatten()
                        .map(stringify_metadata)
                        .unwrap_or_default(),
                })
                .collect()
        })
        .collect();

    QueryResult { groups }
}

#[async_trait]
impl<E: EmbeddingService> SemanticIndex for ChromaIndex<E> {
    async fn query(&self, query: &IndexQuery) -> Result<QueryResult, AptekaError> {
        let embedding = self.embedder.embed(&query.query_text).await?;
        let id = self.collection_id().await?;

        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": query.n_results,
            "include": ["documents", "metadatas"],
        });
        if let Some(filter) = &query.filter {
            body["where"] = filter.to_chroma();
        }

        let url = format!("{}/{}/query", self.collections_url(), id);
        let response: QueryResponse = self.post(&url, &body).await?;
        let result = into_groups(response);

        debug!(
            query = %query.query_text,
            filtered = query.filter.is_some(),
            hits = result.groups.iter().map(Vec::len).sum::<usize>(),
            "Chroma query complete"
        );
        Ok(result)
    }

    async fn add(&self, documents: Vec<IndexDocument>) -> Result<(), AptekaError> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut embeddings = Vec::with_capacity(documents.len());
        for doc in &documents {
            embeddings.push(self.embedder.embed(&doc.document).await?);
        }
        let id = self.collection_id().await?;

        let body = json!({
            "ids": documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            "embeddings": embeddings,
            "documents": documents.iter().map(|d| d.document.as_str()).collect::<Vec<_>>(),
            "metadatas": documents.iter().map(|d| &d.metadata).collect::<Vec<_>>(),
        });

        let url = format!("{}/{}/add", self.collections_url(), id);
        let _: Value = self.post(&url, &body).await?;
        info!(count = documents.len(), "Documents added to Chroma");
        Ok(())
    }
}
