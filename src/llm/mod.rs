//! Clients for the configured LLM provider.

pub mod chat;
pub mod embeddings;
pub mod retry;

pub use chat::{complete_chat, stream_chat, ChatStream};
pub use embeddings::EmbeddingClient;
