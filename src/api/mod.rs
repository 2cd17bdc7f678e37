//! HTTP surface: repository ingestion and chat.

pub mod chat;
pub mod repos;
