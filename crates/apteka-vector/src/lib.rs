//! Apteka Vector crate - semantic index boundary, Chroma client, and embeddings.
//!
//! Provides the [`SemanticIndex`] trait the retrieval cascade queries, a
//! Chroma REST implementation, an in-memory cosine-similarity index for
//! tests and offline runs, and the structured `where` filters both accept.

pub mod chroma;
pub mod embedding;
pub mod filter;
pub mod index;

pub use chroma::ChromaIndex;
pub use embedding::{EmbeddingService, GeminiEmbedding, MockEmbedding};
pub use filter::WhereFilter;
pub use index::{InMemoryIndex, IndexDocument, IndexQuery, QueryResult, SemanticIndex};
