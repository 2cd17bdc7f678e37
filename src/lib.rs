//! # repo-mentor
//!
//! A Rust web service for ingesting git repositories and answering
//! questions about them with retrieval-augmented generation: submit a
//! repository URL, poll the ingestion job, then chat over the indexed
//! content with streaming answers.
//!
//! ## Architecture
//!
//! Ingestion runs in the background, one job per submitted repository:
//!
//! ```text
//!   POST /repository ──▶ validate URL ──▶ persist job (pending)
//!                                              │ dispatch
//!                                              ▼
//!        ┌─────────┐   ┌────────────┐   ┌───────────┐   ┌───────┐
//!        │  clone  │──▶│ walk files │──▶│   chunk   │──▶│ embed │
//!        └─────────┘   │ commit log │   └───────────┘   └───┬───┘
//!             │        └────────────┘                       │
//!             ▼                                             ▼
//!        job: failed ◀── any step fails          publish, job: completed
//! ```
//!
//! Chat always retrieves before generating:
//!
//! ```text
//!   POST /chat/stream ──▶ readiness gate ──▶ embed question
//!                                                 │
//!                                                 ▼
//!                          cosine top-k over the published chunks
//!                                                 │
//!                                                 ▼
//!                 SSE: chunks event ──▶ content deltas ──▶ done | error
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for the server, data dirs, and LLM settings
//! - [`models`] - Shared data types: `Job`, `Chunk`, `SourceRef`, stream events
//! - [`storage`] - Namespaced object store with filesystem and in-memory backends
//! - [`jobs`] - Job lifecycle: URL validation, persistence, monotonic status transitions
//! - [`git`] - Clone, file walking, and commit-history extraction via libgit2
//! - [`chunking`] - Line-based text chunking with overlap between neighbors
//! - [`llm`] - Embedding and chat clients for Ollama or OpenAI-compatible APIs
//! - [`ingest`] - Background pipeline turning a cloned repository into embedded chunks
//! - [`rag`] - Published chunk store and cosine-similarity retriever
//! - [`api`] - Axum HTTP handlers for ingestion and chat, streaming included
//! - [`state`] - Shared application state wiring the service graph
//! - [`error`] - Crate-wide error type with stable, caller-visible kinds

pub mod api;
pub mod chunking;
pub mod config;
pub mod error;
pub mod git;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod models;
pub mod rag;
pub mod state;
pub mod storage;
