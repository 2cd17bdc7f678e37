use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::jobs::JobStore;
use crate::models::{Chunk, JobStatus};
use crate::storage::ObjectStore;

const CHUNKS_NAMESPACE: &str = "chunks";

/// Persisted chunk sets, one object per repository.
///
/// Reads are gated on the repository's job: chunks only become visible
/// once ingestion has completed, so a half-ingested repo can never serve
/// retrieval.
#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn ObjectStore>,
    jobs: JobStore,
}

impl ChunkStore {
    pub fn new(store: Arc<dyn ObjectStore>, jobs: JobStore) -> Self {
        Self { store, jobs }
    }

    fn key(repo_id: Uuid) -> String {
        format!("{repo_id}.json")
    }

    /// Replace the chunk set for `repo_id` in a single write.
    pub async fn put_chunks(&self, repo_id: Uuid, chunks: &[Chunk]) -> Result<()> {
        let bytes = serde_json::to_vec(chunks)?;
        self.store.put(CHUNKS_NAMESPACE, &Self::key(repo_id), bytes).await?;
        tracing::info!("Published {} chunks for repo {repo_id}", chunks.len());
        Ok(())
    }

    /// Chunks for `repo_id`. Fails with `RepositoryNotReady` while the
    /// repo's job has not completed; an unknown repo id yields an empty
    /// set.
    pub async fn get_chunks(&self, repo_id: Uuid) -> Result<Vec<Chunk>> {
        match self.jobs.find(repo_id).await? {
            Some(job) if job.status == JobStatus::Completed => {}
            Some(_) => return Err(Error::RepositoryNotReady(repo_id)),
            None => return Ok(Vec::new()),
        }

        match self.store.get(CHUNKS_NAMESPACE, &Self::key(repo_id)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, SourceRef};
    use crate::storage::MemoryObjectStore;

    fn fixture() -> (ChunkStore, JobStore) {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let jobs = JobStore::new(store.clone());
        (ChunkStore::new(store, jobs.clone()), jobs)
    }

    fn chunk(repo_id: Uuid, path: &str) -> Chunk {
        Chunk::new(
            repo_id,
            SourceRef::File {
                path: path.to_string(),
                start_line: 1,
                end_line: 10,
            },
            format!("contents of {path}"),
        )
    }

    async fn completed_job(jobs: &JobStore) -> Uuid {
        let job = Job::new("https://x.test/a/b.git".into(), "a/b".into());
        jobs.insert(&job).await.unwrap();
        jobs.transition(job.id, JobStatus::Completed, None).await.unwrap();
        job.id
    }

    #[tokio::test]
    async fn test_round_trip_for_completed_repo() {
        let (chunks, jobs) = fixture();
        let repo_id = completed_job(&jobs).await;

        chunks
            .put_chunks(repo_id, &[chunk(repo_id, "src/lib.rs")])
            .await
            .unwrap();
        let got = chunks.get_chunks(repo_id).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].repo_id, repo_id);
    }

    #[tokio::test]
    async fn test_put_overwrites_previous_set() {
        let (chunks, jobs) = fixture();
        let repo_id = completed_job(&jobs).await;

        chunks
            .put_chunks(
                repo_id,
                &[chunk(repo_id, "src/old_a.rs"), chunk(repo_id, "src/old_b.rs")],
            )
            .await
            .unwrap();
        chunks
            .put_chunks(repo_id, &[chunk(repo_id, "src/new.rs")])
            .await
            .unwrap();

        let got = chunks.get_chunks(repo_id).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source_ref.key(), "file:src/new.rs:1-10");
    }

    #[tokio::test]
    async fn test_incomplete_job_is_not_ready() {
        let (chunks, jobs) = fixture();
        let job = Job::new("https://x.test/a/b.git".into(), "a/b".into());
        jobs.insert(&job).await.unwrap();

        let err = chunks.get_chunks(job.id).await.unwrap_err();
        assert_eq!(err.kind(), "RepositoryNotReady");

        jobs.transition(job.id, JobStatus::Processing, None).await.unwrap();
        let err = chunks.get_chunks(job.id).await.unwrap_err();
        assert_eq!(err.kind(), "RepositoryNotReady");
    }

    #[tokio::test]
    async fn test_unknown_repo_is_empty() {
        let (chunks, _jobs) = fixture();
        let got = chunks.get_chunks(Uuid::new_v4()).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_completed_repo_without_chunks_is_empty() {
        let (chunks, jobs) = fixture();
        let repo_id = completed_job(&jobs).await;
        let got = chunks.get_chunks(repo_id).await.unwrap();
        assert!(got.is_empty());
    }
}
