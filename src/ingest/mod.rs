//! Background ingestion: clone, extract, chunk, embed, publish.
//!
//! One ingestion runs per accepted job. Every run ends by moving its job
//! to a terminal status, and the clone workspace is removed no matter how
//! the run ends.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::chunking::chunk_text;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::git::{self, CommitInfo, RepoFile};
use crate::jobs::{IngestInvoker, JobStore};
use crate::llm::{complete_chat, EmbeddingClient};
use crate::models::{ChatTurn, Chunk, Job, JobStatus, SourceRef};
use crate::rag::ChunkStore;

/// Subject keywords that mark bookkeeping commits.
const NOISE_SUBJECTS: &[&str] = &[
    "typo", "fmt", "format", "lint", "clippy", "whitespace", "bump", "merge",
];

/// A noise commit touches at most this many lines.
const NOISE_MAX_LINES: usize = 20;

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "go", "java", "c", "cpp", "h", "rb", "cs",
];

/// Runs accepted jobs on the tokio runtime.
pub struct TokioInvoker {
    ingestor: Arc<Ingestor>,
}

impl TokioInvoker {
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self { ingestor }
    }
}

impl IngestInvoker for TokioInvoker {
    fn dispatch(&self, job: Job) -> anyhow::Result<()> {
        let ingestor = self.ingestor.clone();
        tokio::spawn(async move { ingestor.run(job).await });
        Ok(())
    }
}

/// Turns one repository submission into a published chunk set.
pub struct Ingestor {
    config: Config,
    jobs: JobStore,
    chunks: ChunkStore,
    embedder: EmbeddingClient,
    http: reqwest::Client,
}

impl Ingestor {
    pub fn new(
        config: Config,
        jobs: JobStore,
        chunks: ChunkStore,
        embedder: EmbeddingClient,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            jobs,
            chunks,
            embedder,
            http,
        }
    }

    /// Entry point for dispatched jobs. Delivery may repeat, so a job
    /// that already reached a terminal status is left untouched.
    pub async fn run(&self, job: Job) {
        match self.jobs.find(job.id).await {
            Ok(Some(current)) if current.status.is_terminal() => {
                tracing::debug!("Job {} is already {:?}, skipping", job.id, current.status);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Job {}: could not load state: {e}", job.id);
                return;
            }
        }

        let recorded = match self.ingest(&job).await {
            Ok(chunk_count) => {
                tracing::info!("Job {} completed with {chunk_count} chunks", job.id);
                self.jobs.transition(job.id, JobStatus::Completed, None).await
            }
            Err(e) => {
                tracing::error!("Job {} failed: {e}", job.id);
                self.jobs
                    .transition(job.id, JobStatus::Failed, Some(e.to_string()))
                    .await
            }
        };
        if let Err(e) = recorded {
            tracing::error!("Job {}: could not record outcome: {e}", job.id);
        }
    }

    /// The pipeline itself. Returns the number of published chunks.
    pub async fn ingest(&self, job: &Job) -> Result<usize> {
        // ─── Clone ───────────────────────────────────────
        let workspaces = self.config.workspaces_dir();
        tokio::fs::create_dir_all(&workspaces).await?;
        let workspace = Workspace::create(&workspaces, job.id)?;
        self.clone_repo(&job.repo_url, workspace.path()).await?;

        // ─── Extract ─────────────────────────────────────
        let repo_dir = workspace.path().to_path_buf();
        let max_bytes = self.config.max_repo_size_bytes();
        let max_commits = self.config.max_commits;
        let (files, commits) =
            tokio::task::spawn_blocking(move || -> Result<(Vec<RepoFile>, Vec<CommitInfo>)> {
                let size = git::dir_size_bytes(&repo_dir);
                if size > max_bytes {
                    return Err(Error::CloneFailure(format!(
                        "repository is {} MB, over the {} MB limit",
                        size / (1024 * 1024),
                        max_bytes / (1024 * 1024)
                    )));
                }
                let files = git::walk_repo_files(&repo_dir);
                let commits = git::read_commit_log(&repo_dir, max_commits)
                    .map_err(|e| Error::CloneFailure(format!("could not read history: {e:#}")))?;
                Ok((files, commits))
            })
            .await
            .map_err(|e| Error::Internal(anyhow::anyhow!("extract task panicked: {e}")))??;

        if commits.is_empty() {
            return Err(Error::CloneFailure("repository has no commits".into()));
        }
        tracing::info!(
            "Job {}: extracted {} files and {} commits",
            job.id,
            files.len(),
            commits.len()
        );

        // ─── Chunk ───────────────────────────────────────
        let mut chunks = self.chunk_files(job.id, &files);
        chunks.extend(self.chunk_commits(job.id, &commits).await?);
        if chunks.is_empty() {
            return Err(Error::CloneFailure("no indexable content found".into()));
        }
        chunks.sort_by_key(|c| c.id);
        chunks.dedup_by_key(|c| c.id);

        // ─── Embed ───────────────────────────────────────
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }

        // ─── Publish ─────────────────────────────────────
        self.chunks.put_chunks(job.id, &chunks).await?;
        Ok(chunks.len())
    }

    async fn clone_repo(&self, url: &str, target: &Path) -> Result<()> {
        let url = url.to_string();
        let target = target.to_path_buf();
        let limit = Duration::from_secs(self.config.clone_timeout_secs);

        let cloned = tokio::time::timeout(
            limit,
            tokio::task::spawn_blocking(move || git::clone_repo(&url, &target)),
        )
        .await;

        match cloned {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(Error::CloneFailure(format!("{e:#}"))),
            Ok(Err(join_err)) => Err(Error::Internal(anyhow::anyhow!(
                "clone task panicked: {join_err}"
            ))),
            Err(_) => Err(Error::Timeout(format!(
                "clone did not finish within {}s",
                limit.as_secs()
            ))),
        }
    }

    fn chunk_files(&self, repo_id: Uuid, files: &[RepoFile]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for file in files {
            for piece in chunk_text(
                &file.content,
                self.config.chunk_char_budget,
                self.config.chunk_overlap,
            ) {
                chunks.push(Chunk::new(
                    repo_id,
                    SourceRef::File {
                        path: file.path.clone(),
                        start_line: piece.start_line,
                        end_line: piece.end_line,
                    },
                    piece.text,
                ));
            }
        }
        chunks
    }

    async fn chunk_commits(&self, repo_id: Uuid, commits: &[CommitInfo]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for commit in commits {
            let body = if self.config.summarize_commits && !is_noise_commit(commit) {
                match self.summarize_commit(commit).await {
                    Ok(summary) if !summary.trim().is_empty() => summary,
                    Ok(_) => fallback_commit_body(commit),
                    Err(e) => {
                        tracing::warn!(
                            "Summary for commit {} failed, using raw message: {e}",
                            short_hash(&commit.hash)
                        );
                        fallback_commit_body(commit)
                    }
                }
            } else {
                fallback_commit_body(commit)
            };

            let document = commit_document(commit, &body);
            let source_ref = SourceRef::Commit {
                hash: commit.hash.clone(),
                committed_at: commit.committed_at,
            };
            for piece in chunk_text(
                &document,
                self.config.chunk_char_budget,
                self.config.chunk_overlap,
            ) {
                chunks.push(Chunk::new(repo_id, source_ref.clone(), piece.text));
            }
        }
        Ok(chunks)
    }

    async fn summarize_commit(&self, commit: &CommitInfo) -> Result<String> {
        let prompt = format!(
            "Summarize this commit in two or three sentences for a developer \
             asking what changed and why.\n\n{}",
            fallback_commit_body(commit)
        );
        complete_chat(
            &self.http,
            &self.config.llm,
            vec![ChatTurn {
                role: "user".into(),
                content: prompt,
            }],
        )
        .await
    }
}

/// The full text indexed for one commit.
fn commit_document(commit: &CommitInfo, body: &str) -> String {
    format!(
        "Commit {} on {}\nAuthor: {} <{}>\n\n{}",
        commit.hash,
        commit.committed_at.format("%Y-%m-%d %H:%M"),
        commit.author_name,
        commit.author_email,
        body
    )
}

/// Commit message plus a per-file change list, used verbatim when no
/// summary is generated.
fn fallback_commit_body(commit: &CommitInfo) -> String {
    let mut body = commit.message.trim().to_string();
    if !commit.files.is_empty() {
        body.push_str("\n\nFiles changed:\n");
        for file in &commit.files {
            let _ = writeln!(
                body,
                "- {} ({}, +{} -{})",
                file.path, file.change, file.lines_added, file.lines_removed
            );
        }
    }
    body
}

/// Bookkeeping commits (typo fixes, format runs, version bumps) with a
/// tiny non-code footprint are indexed from the raw message only.
fn is_noise_commit(commit: &CommitInfo) -> bool {
    let subject = first_line(&commit.message).to_lowercase();
    if !NOISE_SUBJECTS.iter().any(|k| subject.contains(k)) {
        return false;
    }
    if commit.total_line_changes() > NOISE_MAX_LINES {
        return false;
    }
    !commit.files.iter().any(|f| is_code_path(&f.path))
}

fn is_code_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .map(|ext| CODE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("").trim()
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// Scoped clone directory, removed when the ingestion run ends.
struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn create(root: &Path, job_id: Uuid) -> Result<Self> {
        let dir = root.join(job_id.to_string());
        if dir.exists() {
            // Leftover from an interrupted run for the same job.
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                tracing::warn!("Could not clean workspace {}: {e}", self.dir.display());
            }
        }
    }
}
