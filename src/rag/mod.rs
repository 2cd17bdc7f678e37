//! Retrieval over ingested repositories.

pub mod retriever;
pub mod store;

pub use retriever::{Retriever, ScoredChunk};
pub use store::ChunkStore;
