//! # docrag
//!
//! Retrieval core for asking questions about a single uploaded document.
//!
//! ```text
//! text ──> chunker ──> embedder ──> FlatIndex::build ──> IndexStore::save
//!
//! question ──> embedder ──> IndexStore::load (or cached bundle)
//!                 └──> FlatIndex::search ──> chunk texts
//! ```
//!
//! A document's chunks and its vectors share positions: chunk `i` is the
//! text behind row `i` of the index, in memory and on disk.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod recommender;
pub mod retriever;
pub mod store;
pub mod vector_ops;

pub use chunker::{split, Chunk, ChunkingOptions};
pub use embedder::{CommandEmbedder, Embedder, EmbedderAdapter, HashEmbedder};
pub use error::{Result, RetrievalError};
pub use index::{FlatIndex, Neighbor};
pub use pipeline::{DocumentSummary, Pipeline};
pub use recommender::QuestionRecommender;
pub use retriever::{retrieve, Retrieval, RetrievedChunk, Retriever};
pub use store::{Bundle, IndexStore};
