//! Ingest job lifecycle: URL validation, persistence, and status
//! transitions.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Job, JobStatus};
use crate::storage::ObjectStore;

const JOBS_NAMESPACE: &str = "jobs";

/// Hands an accepted job to whatever runs ingestion in the background.
pub trait IngestInvoker: Send + Sync {
    fn dispatch(&self, job: Job) -> anyhow::Result<()>;
}

/// Persistent record of ingest jobs, one object per job.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn ObjectStore>,
    // Serializes read-modify-write transitions; the orchestrator and a
    // worker may race on the same job.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl JobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn key(id: Uuid) -> String {
        format!("{id}.json")
    }

    pub async fn insert(&self, job: &Job) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(job)?;
        self.store.put(JOBS_NAMESPACE, &Self::key(job.id), bytes).await?;
        Ok(())
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Job>> {
        match self.store.get(JOBS_NAMESPACE, &Self::key(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`find`](Self::find) but an unknown id is an error.
    pub async fn get(&self, id: Uuid) -> Result<Job> {
        self.find(id).await?.ok_or(Error::RepositoryNotFound(id))
    }

    /// All known jobs, newest first.
    pub async fn list(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for key in self.store.list(JOBS_NAMESPACE).await? {
            let id = match key.strip_suffix(".json").and_then(|s| Uuid::parse_str(s).ok()) {
                Some(id) => id,
                None => continue,
            };
            if let Some(job) = self.find(id).await? {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    /// Move a job to `status`. Terminal jobs never change again; a
    /// transition against one is a no-op that returns `false`.
    pub async fn transition(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut job = self.get(id).await?;
        if job.status.is_terminal() {
            tracing::debug!("Job {id} is already {:?}, ignoring transition", job.status);
            return Ok(false);
        }
        job.status = status;
        job.error_message = error_message;
        self.insert(&job).await?;
        Ok(true)
    }
}

/// Accepts repository submissions and exposes job status.
pub struct JobOrchestrator {
    jobs: JobStore,
    invoker: Arc<dyn IngestInvoker>,
}

impl JobOrchestrator {
    pub fn new(jobs: JobStore, invoker: Arc<dyn IngestInvoker>) -> Self {
        Self { jobs, invoker }
    }

    /// Validate the URL, persist a pending job, and hand it off for
    /// background ingestion. Returns the pending snapshot.
    pub async fn create_job(&self, repo_url: &str) -> Result<Job> {
        let repo_name = validate_repo_url(repo_url)?;
        let job = Job::new(repo_url.to_string(), repo_name);
        self.jobs.insert(&job).await?;
        tracing::info!("Accepted ingest job {} for {}", job.id, job.repo_url);

        if let Err(e) = self.invoker.dispatch(job.clone()) {
            let msg = format!("dispatch failed: {e}");
            tracing::error!("Job {}: {msg}", job.id);
            self.jobs
                .transition(job.id, JobStatus::Failed, Some(msg.clone()))
                .await?;
            return Err(Error::Internal(anyhow::anyhow!(msg)));
        }

        // A fast worker may already have finished; transition() leaves
        // terminal states alone.
        self.jobs
            .transition(job.id, JobStatus::Processing, None)
            .await?;

        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        self.jobs.get(id).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.jobs.list().await
    }
}

/// Check that `raw` is a cloneable `http(s)://host/owner/name.git` URL and
/// return the `owner/name` slug.
pub fn validate_repo_url(raw: &str) -> Result<String> {
    let url = url::Url::parse(raw)
        .map_err(|e| Error::InvalidRepoUrl(format!("not a valid URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::InvalidRepoUrl(format!(
                "unsupported scheme '{other}', expected http or https"
            )))
        }
    }

    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(Error::InvalidRepoUrl("missing host".into()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::InvalidRepoUrl(
            "query strings and fragments are not allowed".into(),
        ));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    let [owner, repo] = segments.as_slice() else {
        return Err(Error::InvalidRepoUrl(
            "expected a path of the form /owner/name.git".into(),
        ));
    };

    let stem = match repo.strip_suffix(".git") {
        Some(stem) if !stem.is_empty() => stem,
        _ => {
            return Err(Error::InvalidRepoUrl(
                "repository path must end in .git".into(),
            ))
        }
    };

    Ok(format!("{owner}/{stem}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use parking_lot::Mutex;

    struct RecordingInvoker {
        dispatched: Mutex<Vec<Uuid>>,
    }

    impl RecordingInvoker {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                dispatched: Mutex::new(Vec::new()),
            })
        }
    }

    impl IngestInvoker for RecordingInvoker {
        fn dispatch(&self, job: Job) -> anyhow::Result<()> {
            self.dispatched.lock().push(job.id);
            Ok(())
        }
    }

    struct FailingInvoker;

    impl IngestInvoker for FailingInvoker {
        fn dispatch(&self, _job: Job) -> anyhow::Result<()> {
            anyhow::bail!("queue full")
        }
    }

    fn store() -> JobStore {
        JobStore::new(Arc::new(MemoryObjectStore::new()))
    }

    // ─── URL validation ──────────────────────────────────

    #[test]
    fn test_valid_urls() {
        assert_eq!(
            validate_repo_url("https://github.com/rust-lang/cargo.git").unwrap(),
            "rust-lang/cargo"
        );
        assert_eq!(
            validate_repo_url("http://git.internal/devtools/api.git").unwrap(),
            "devtools/api"
        );
    }

    #[test]
    fn test_rejected_urls() {
        let cases = [
            "not a url",
            "git://github.com/a/b.git",
            "ssh://git@github.com/a/b.git",
            "file:///tmp/repo.git",
            "https://github.com/a/b",
            "https://github.com/b.git",
            "https://github.com/a/b/c.git",
            "https://github.com/a/.git",
            "https://github.com/a/b.git?ref=main",
            "https://github.com/a/b.git#readme",
            "https:///a/b.git",
        ];
        for case in cases {
            let err = validate_repo_url(case).unwrap_err();
            assert_eq!(err.kind(), "InvalidRepoUrl", "expected rejection for {case}");
        }
    }

    // ─── Store and orchestrator ──────────────────────────

    #[tokio::test]
    async fn test_create_job_persists_and_dispatches() {
        let jobs = store();
        let invoker = RecordingInvoker::new();
        let orchestrator = JobOrchestrator::new(jobs.clone(), invoker.clone());

        let job = orchestrator
            .create_job("https://github.com/rust-lang/cargo.git")
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.repo_name, "rust-lang/cargo");
        assert_eq!(*invoker.dispatched.lock(), vec![job.id]);

        // Dispatch succeeded, so the stored job has moved on.
        let stored = jobs.get(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_invalid_url_creates_nothing() {
        let jobs = store();
        let orchestrator = JobOrchestrator::new(jobs.clone(), RecordingInvoker::new());

        let err = orchestrator.create_job("https://github.com/a/b").await.unwrap_err();
        assert_eq!(err.kind(), "InvalidRepoUrl");
        assert!(jobs.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_marks_job_failed() {
        let jobs = store();
        let orchestrator = JobOrchestrator::new(jobs.clone(), Arc::new(FailingInvoker));

        let err = orchestrator
            .create_job("https://github.com/rust-lang/cargo.git")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InternalError");

        let listed = jobs.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, JobStatus::Failed);
        assert!(listed[0].error_message.as_deref().unwrap().contains("queue full"));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let err = store().get(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "RepositoryNotFound");
    }

    #[tokio::test]
    async fn test_transitions_stop_at_terminal() {
        let jobs = store();
        let job = Job::new("https://x.test/a/b.git".into(), "a/b".into());
        jobs.insert(&job).await.unwrap();

        assert!(jobs.transition(job.id, JobStatus::Processing, None).await.unwrap());
        assert!(jobs.transition(job.id, JobStatus::Completed, None).await.unwrap());

        // Terminal state never moves again.
        assert!(!jobs
            .transition(job.id, JobStatus::Processing, None)
            .await
            .unwrap());
        assert!(!jobs
            .transition(job.id, JobStatus::Failed, Some("late".into()))
            .await
            .unwrap());

        let stored = jobs.get(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let jobs = store();
        let mut first = Job::new("https://x.test/a/one.git".into(), "a/one".into());
        let mut second = Job::new("https://x.test/a/two.git".into(), "a/two".into());
        first.created_at = chrono::Utc::now() - chrono::Duration::minutes(5);
        second.created_at = chrono::Utc::now();
        jobs.insert(&first).await.unwrap();
        jobs.insert(&second).await.unwrap();

        let listed = jobs.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }
}
