//! Conversational memory for Switchyard.
//!
//! - [`EmbeddingCache`]: TTL cache of text embeddings with disk snapshots
//! - [`RetrievalContextBuilder`]: ranks, filters and deduplicates past
//!   exchanges for a new query
//! - Vector stores: [`InMemoryVectorStore`] and the JSONL-backed
//!   [`FileVectorStore`]
//! - Embedders: the offline [`HashEmbedder`] and [`HttpEmbedder`] for
//!   OpenAI-compatible `/embeddings` endpoints

pub mod embedder;
pub mod embedding_cache;
pub mod file_backend;
pub mod in_memory;
pub mod retrieval;
pub mod vector;

pub use embedder::{HashEmbedder, HttpEmbedder};
pub use embedding_cache::{CacheStats, EmbeddingCache};
pub use file_backend::FileVectorStore;
pub use in_memory::InMemoryVectorStore;
pub use retrieval::{RetrievalContextBuilder, RetrievalQuery, RetrievalSettings, token_overlap};
pub use vector::{cosine_distance, cosine_similarity, rank_by_distance};
