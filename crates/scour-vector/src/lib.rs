//! # scour-vector
//!
//! The content/vector subsystem: recursive text chunking, embedding
//! generation against a local model endpoint, and a persistent vector table
//! (SQLite with FTS5 and embedding BLOBs) with hybrid keyword+vector search
//! scoped by group id.

pub mod chunker;
pub mod embedding;
pub mod store;

pub use chunker::chunk_text;
pub use embedding::{EmbeddingProvider, LocalEmbedding, MockEmbedding};
pub use store::{VectorSearchRow, VectorStore};
