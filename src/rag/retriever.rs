use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::EmbeddingClient;
use crate::models::{Chunk, RetrievalResult, SourceRef};
use crate::rag::store::ChunkStore;

/// Weight given to commit recency when a query asks about recent work.
const RECENCY_WEIGHT: f32 = 0.3;

/// Recency re-ranking considers this many times `top_k` candidates.
const RECENCY_POOL_FACTOR: usize = 3;

static COMMIT_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-f]{7,40}\b").unwrap());

static RECENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(recent|recently|latest|newest|last)\b").unwrap());

/// A chunk with its relevance score for one query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// Scores a repository's chunks against a query.
#[derive(Clone)]
pub struct Retriever {
    chunks: ChunkStore,
    embedder: EmbeddingClient,
}

impl Retriever {
    pub fn new(chunks: ChunkStore, embedder: EmbeddingClient) -> Self {
        Self { chunks, embedder }
    }

    /// Top `top_k` chunks for `query`, sorted by descending similarity
    /// with ties broken by ascending chunk id.
    pub async fn retrieve_scored(
        &self,
        repo_id: Uuid,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Err(Error::InvalidInput("top_k must be at least 1".into()));
        }

        let chunks = self.chunks.get_chunks(repo_id).await?;
        if chunks.is_empty() {
            return Err(Error::RepositoryNotReady(repo_id));
        }

        // Queries naming a commit hash skip the embedding round-trip.
        if let Some(mut hits) = lookup_commit_hash(&chunks, query) {
            tracing::debug!("Commit hash lookup matched {} chunks", hits.len());
            hits.truncate(top_k);
            return Ok(hits);
        }

        let query_embedding = self.embedder.embed_single(query).await?;
        let mut scored: Vec<ScoredChunk> = chunks
            .into_iter()
            .map(|chunk| {
                let similarity = cosine_similarity(&query_embedding, &chunk.embedding);
                ScoredChunk { chunk, similarity }
            })
            .collect();

        if wants_recency(query) {
            scored = rerank_by_recency(scored, top_k);
        } else {
            sort_scored(&mut scored);
        }
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Like [`retrieve_scored`](Self::retrieve_scored), reduced to
    /// `(chunk_id, similarity)` pairs.
    pub async fn retrieve(
        &self,
        repo_id: Uuid,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        Ok(self
            .retrieve_scored(repo_id, query, top_k)
            .await?
            .into_iter()
            .map(|s| RetrievalResult {
                chunk_id: s.chunk.id,
                similarity: s.similarity,
            })
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn sort_scored(scored: &mut [ScoredChunk]) {
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

/// Exact lookup for queries that name a commit. Any hex token of 7 to 40
/// chars that prefixes a known commit hash pins that commit's chunks at
/// full similarity. Returns `None` when no token matches, so ordinary
/// hex-looking words fall back to semantic search.
fn lookup_commit_hash(chunks: &[Chunk], query: &str) -> Option<Vec<ScoredChunk>> {
    let query = query.to_lowercase();
    let mut hits: Vec<ScoredChunk> = Vec::new();
    for token in COMMIT_HASH_RE.find_iter(&query) {
        for chunk in chunks {
            if let SourceRef::Commit { hash, .. } = &chunk.source_ref {
                if hash.starts_with(token.as_str())
                    && !hits.iter().any(|h| h.chunk.id == chunk.id)
                {
                    hits.push(ScoredChunk {
                        chunk: chunk.clone(),
                        similarity: 1.0,
                    });
                }
            }
        }
    }

    if hits.is_empty() {
        return None;
    }
    hits.sort_by(|a, b| a.chunk.id.cmp(&b.chunk.id));
    Some(hits)
}

fn wants_recency(query: &str) -> bool {
    RECENCY_RE.is_match(query)
}

/// Blend similarity with commit recency over a pool of the best matches.
/// File chunks carry no timestamp and score zero recency.
fn rerank_by_recency(mut scored: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    sort_scored(&mut scored);
    scored.truncate(top_k.saturating_mul(RECENCY_POOL_FACTOR));

    let times: Vec<i64> = scored
        .iter()
        .filter_map(|s| match &s.chunk.source_ref {
            SourceRef::Commit { committed_at, .. } => Some(committed_at.timestamp()),
            SourceRef::File { .. } => None,
        })
        .collect();
    let (Some(&oldest), Some(&newest)) = (times.iter().min(), times.iter().max()) else {
        return scored;
    };

    let span = (newest - oldest).max(1) as f32;
    for s in &mut scored {
        let recency = match &s.chunk.source_ref {
            SourceRef::Commit { .. } if newest == oldest => 1.0,
            SourceRef::Commit { committed_at, .. } => {
                (committed_at.timestamp() - oldest) as f32 / span
            }
            SourceRef::File { .. } => 0.0,
        };
        s.similarity = (1.0 - RECENCY_WEIGHT) * s.similarity + RECENCY_WEIGHT * recency;
    }
    sort_scored(&mut scored);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::jobs::JobStore;
    use crate::models::{Job, JobStatus};
    use crate::storage::{MemoryObjectStore, ObjectStore};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn unreachable_embedder() -> EmbeddingClient {
        // Points nowhere; tests that reach the network are a bug.
        EmbeddingClient::new(
            reqwest::Client::new(),
            LlmConfig {
                base_url: "http://127.0.0.1:9".into(),
                ..Default::default()
            },
        )
    }

    fn file_chunk(repo_id: Uuid, path: &str, embedding: Vec<f32>) -> Chunk {
        let mut chunk = Chunk::new(
            repo_id,
            SourceRef::File {
                path: path.to_string(),
                start_line: 1,
                end_line: 5,
            },
            format!("text of {path}"),
        );
        chunk.embedding = embedding;
        chunk
    }

    fn commit_chunk(repo_id: Uuid, hash: &str, age_minutes: i64) -> Chunk {
        Chunk::new(
            repo_id,
            SourceRef::Commit {
                hash: hash.to_string(),
                committed_at: Utc::now() - Duration::minutes(age_minutes),
            },
            format!("commit {hash}"),
        )
    }

    // ─── Scoring ─────────────────────────────────────────

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_sort_breaks_ties_by_ascending_id() {
        let repo_id = Uuid::new_v4();
        let mut scored: Vec<ScoredChunk> = ["b.rs", "a.rs", "c.rs"]
            .iter()
            .map(|p| ScoredChunk {
                chunk: file_chunk(repo_id, p, vec![]),
                similarity: 0.5,
            })
            .collect();
        scored[2].similarity = 0.9;

        sort_scored(&mut scored);
        assert_eq!(scored[0].similarity, 0.9);
        // Equal scores fall back to id order.
        assert!(scored[1].chunk.id < scored[2].chunk.id);
    }

    // ─── Gating ──────────────────────────────────────────

    #[tokio::test]
    async fn test_top_k_zero_is_invalid() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let jobs = JobStore::new(store.clone());
        let retriever = Retriever::new(ChunkStore::new(store, jobs), unreachable_embedder());

        let err = retriever
            .retrieve(Uuid::new_v4(), "anything", 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[tokio::test]
    async fn test_unready_and_empty_repos_are_rejected() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let jobs = JobStore::new(store.clone());
        let retriever =
            Retriever::new(ChunkStore::new(store, jobs.clone()), unreachable_embedder());

        // Unknown repo: no chunks at all.
        let err = retriever.retrieve(Uuid::new_v4(), "q", 3).await.unwrap_err();
        assert_eq!(err.kind(), "RepositoryNotReady");

        // Known but still processing.
        let job = Job::new("https://x.test/a/b.git".into(), "a/b".into());
        jobs.insert(&job).await.unwrap();
        jobs.transition(job.id, JobStatus::Processing, None).await.unwrap();
        let err = retriever.retrieve(job.id, "q", 3).await.unwrap_err();
        assert_eq!(err.kind(), "RepositoryNotReady");

        // Completed but with an empty chunk set.
        jobs.transition(job.id, JobStatus::Completed, None).await.unwrap();
        let err = retriever.retrieve(job.id, "q", 3).await.unwrap_err();
        assert_eq!(err.kind(), "RepositoryNotReady");
    }

    // ─── Query routing ───────────────────────────────────

    #[test]
    fn test_commit_hash_lookup_matches_prefix() {
        let repo_id = Uuid::new_v4();
        let chunks = vec![
            commit_chunk(repo_id, "a1b2c3d4e5f60718293a4b5c6d7e8f9012345678", 10),
            commit_chunk(repo_id, "ffeeddccbbaa99887766554433221100aabbccdd", 20),
            file_chunk(repo_id, "src/lib.rs", vec![1.0]),
        ];

        let hits = lookup_commit_hash(&chunks, "What changed in a1b2c3d4e5f6?").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].similarity, 1.0);
        assert!(hits[0].chunk.source_ref.key().starts_with("commit:a1b2c3"));
    }

    #[test]
    fn test_commit_hash_lookup_falls_through() {
        let repo_id = Uuid::new_v4();
        let chunks = vec![commit_chunk(repo_id, "a1b2c3d4e5f60718", 10)];
        // Hex-looking token that matches no commit.
        assert!(lookup_commit_hash(&chunks, "what is 0123456 doing").is_none());
        // No hex token at all.
        assert!(lookup_commit_hash(&chunks, "what does foo do").is_none());
        // Short tokens are not treated as hashes.
        assert!(lookup_commit_hash(&chunks, "fix a1b2c3").is_none());
    }

    #[test]
    fn test_recency_keywords() {
        assert!(wants_recency("What changed recently?"));
        assert!(wants_recency("show the latest commits"));
        assert!(wants_recency("What was the LAST change?"));
        assert!(!wants_recency("how does parsing work"));
    }

    #[test]
    fn test_recency_rerank_prefers_new_commits() {
        let repo_id = Uuid::new_v4();
        let new = commit_chunk(repo_id, "aaaa111122223333", 5);
        let old = commit_chunk(repo_id, "bbbb444455556666", 60 * 24 * 300);
        let scored = vec![
            ScoredChunk {
                chunk: old.clone(),
                similarity: 0.62,
            },
            ScoredChunk {
                chunk: new.clone(),
                similarity: 0.60,
            },
        ];

        let ranked = rerank_by_recency(scored, 2);
        // Near-equal similarity resolves in favour of the newer commit.
        assert_eq!(ranked[0].chunk.id, new.id);
        assert_eq!(ranked[1].chunk.id, old.id);
    }

    #[test]
    fn test_recency_rerank_keeps_strong_matches_on_top() {
        let repo_id = Uuid::new_v4();
        let relevant_old = commit_chunk(repo_id, "aaaa111122223333", 60 * 24 * 300);
        let unrelated_new = commit_chunk(repo_id, "bbbb444455556666", 5);
        let scored = vec![
            ScoredChunk {
                chunk: relevant_old.clone(),
                similarity: 0.95,
            },
            ScoredChunk {
                chunk: unrelated_new,
                similarity: 0.05,
            },
        ];

        let ranked = rerank_by_recency(scored, 2);
        assert_eq!(ranked[0].chunk.id, relevant_old.id);
    }
}
