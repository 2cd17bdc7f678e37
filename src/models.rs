use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A tracked unit of asynchronous ingestion work for one repository submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub repo_url: String,
    /// `owner_repo` slug derived from the URL, for workspaces and logs
    pub repo_name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(repo_url: String, repo_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo_url,
            repo_name,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses are final; the job store refuses to leave them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Provenance pointer attached to a chunk for citation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    Commit {
        hash: String,
        committed_at: DateTime<Utc>,
    },
    File {
        path: String,
        start_line: usize,
        end_line: usize,
    },
}

impl SourceRef {
    /// Stable string form used for chunk-id derivation.
    pub fn key(&self) -> String {
        match self {
            SourceRef::Commit { hash, .. } => format!("commit:{hash}"),
            SourceRef::File {
                path,
                start_line,
                end_line,
            } => format!("file:{path}:{start_line}-{end_line}"),
        }
    }
}

/// A bounded segment of repository text plus its embedding and provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub source_ref: SourceRef,
    pub text: String,
    pub embedding: Vec<f32>,
    pub token_count: usize,
}

/// Four characters of source text per token is close enough for budgeting.
const CHARS_PER_TOKEN: usize = 4;

impl Chunk {
    /// Builds a chunk with a deterministic id and no embedding yet.
    pub fn new(repo_id: Uuid, source_ref: SourceRef, text: String) -> Self {
        let id = Self::derive_id(repo_id, &source_ref, &text);
        let token_count = Self::estimate_tokens(&text);
        Self {
            id,
            repo_id,
            source_ref,
            text,
            embedding: Vec::new(),
            token_count,
        }
    }

    /// Deterministic id over `(repo_id, source_ref, content hash)`, so
    /// re-running ingestion over unchanged content reproduces the same ids.
    pub fn derive_id(repo_id: Uuid, source_ref: &SourceRef, text: &str) -> Uuid {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let content_hash = format!("{:x}", hasher.finalize());
        let material = format!("{repo_id}/{}/{content_hash}", source_ref.key());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes())
    }

    pub fn estimate_tokens(text: &str) -> usize {
        (text.chars().count() / CHARS_PER_TOKEN).max(1)
    }
}

/// One ranked retrieval hit, ephemeral per query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: Uuid,
    pub similarity: f32,
}

/// A single chat turn (user or assistant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Retrieved-chunk metadata sent back with answers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub id: Uuid,
    pub similarity: f32,
    pub source_ref: SourceRef,
    /// Truncated excerpt of the chunk text
    pub text: String,
}

/// One event on the streaming answer protocol.
///
/// The wire shapes are fixed: a single `chunks` event with retrieval
/// metadata, any number of `chunk` content increments, then exactly one
/// terminal event, either `{"done":true}` or `{"error":...}`. An event
/// never carries both content and an error.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunks(Vec<RetrievedChunk>),
    Content(String),
    Done,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }

    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            StreamEvent::Chunks(retrieved) => {
                json!({"type": "chunks", "retrieved_chunks": retrieved})
            }
            StreamEvent::Content(delta) => json!({"type": "chunk", "content": delta}),
            StreamEvent::Done => json!({"done": true}),
            StreamEvent::Error(message) => json!({"error": message}),
        }
    }
}
