//! Git access: cloning, working-tree extraction, and commit history.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

/// Files above this size are skipped during extraction.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// Directories that never contain indexable sources.
const SKIP_DIRS: &[&str] = &[
    ".git", "node_modules", "target", "dist", "build", "__pycache__", "vendor", "venv", ".venv",
    "env",
];

/// Extension-less files that are still worth indexing.
const EXTRA_FILES: &[&str] = &[
    "makefile", "dockerfile", "rakefile", "gemfile", "cmakelists.txt", "readme", "license",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "c", "cpp", "cc", "h", "hpp", "cs", "rb",
    "php", "swift", "kt", "scala", "lua", "sh", "bash", "sql", "html", "css", "scss", "xml",
    "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "md", "rst", "txt", "proto", "graphql",
    "vue", "svelte", "ex", "exs", "erl", "hs", "ml", "clj", "tf", "hcl", "nix", "zig", "dart",
    "nim", "jl",
];

/// A file extracted from a repo working tree.
#[derive(Debug, Clone)]
pub struct RepoFile {
    pub path: String,
    pub content: String,
}

/// One commit from the history, with per-file change stats.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub committed_at: DateTime<Utc>,
    pub message: String,
    pub files: Vec<CommitFileChange>,
}

#[derive(Debug, Clone)]
pub struct CommitFileChange {
    pub path: String,
    pub change: String,
    pub lines_added: usize,
    pub lines_removed: usize,
}

impl CommitInfo {
    pub fn total_line_changes(&self) -> usize {
        self.files
            .iter()
            .map(|f| f.lines_added + f.lines_removed)
            .sum()
    }
}

/// Clone a git repository to the target directory.
pub fn clone_repo(url: &str, target: &Path) -> Result<()> {
    tracing::info!("Cloning {} into {}", url, target.display());
    git2::Repository::clone(url, target).with_context(|| format!("Failed to clone {url}"))?;
    tracing::info!("Clone complete: {}", target.display());
    Ok(())
}

/// Total on-disk size of a directory, including the `.git` store.
pub fn dir_size_bytes(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Walk all text files in a cloned repo and return their contents.
/// Binary files, oversized files, and files that are not valid UTF-8
/// are skipped silently.
pub fn walk_repo_files(repo_dir: &Path) -> Vec<RepoFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(repo_dir)
        .into_iter()
        .filter_entry(|e| !is_skipped_name(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_indexable_file(path) {
            continue;
        }
        if let Ok(meta) = std::fs::metadata(path) {
            if meta.len() > MAX_FILE_BYTES {
                continue;
            }
        }

        let relative = path
            .strip_prefix(repo_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        // read_to_string fails on non-UTF-8 content, which is exactly
        // the set of files we want to drop here.
        if let Ok(content) = std::fs::read_to_string(path) {
            files.push(RepoFile {
                path: relative,
                content,
            });
        }
    }

    files
}

/// Read up to `max_commits` commits from HEAD, newest first, with
/// first-parent diff stats for each.
pub fn read_commit_log(repo_dir: &Path, max_commits: usize) -> Result<Vec<CommitInfo>> {
    let repo = git2::Repository::open(repo_dir)
        .with_context(|| format!("Failed to open repo at {}", repo_dir.display()))?;

    let mut revwalk = repo.revwalk().context("Failed to start revwalk")?;
    revwalk.push_head().context("Repository has no HEAD")?;
    revwalk.set_sorting(git2::Sort::TIME)?;

    let mut commits = Vec::new();
    for oid in revwalk.take(max_commits) {
        let oid = oid?;
        let commit = repo.find_commit(oid)?;
        let author = commit.author();

        commits.push(CommitInfo {
            hash: oid.to_string(),
            author_name: author.name().unwrap_or("unknown").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            committed_at: DateTime::from_timestamp(commit.time().seconds(), 0)
                .unwrap_or_default(),
            message: commit.message().unwrap_or("").trim().to_string(),
            files: diff_stats(&repo, &commit)?,
        });
    }

    Ok(commits)
}

/// Per-file stats against the first parent (or the empty tree for the
/// initial commit).
fn diff_stats(repo: &git2::Repository, commit: &git2::Commit) -> Result<Vec<CommitFileChange>> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent_count() {
        0 => None,
        _ => Some(commit.parent(0)?.tree()?),
    };

    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

    let mut changes = Vec::new();
    for (idx, delta) in diff.deltas().enumerate() {
        let path = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        let change = match delta.status() {
            git2::Delta::Added => "added",
            git2::Delta::Deleted => "deleted",
            git2::Delta::Modified => "modified",
            git2::Delta::Renamed => "renamed",
            _ => "changed",
        };

        let (lines_added, lines_removed) = match git2::Patch::from_diff(&diff, idx)? {
            Some(patch) => {
                let (_context, adds, dels) = patch.line_stats()?;
                (adds, dels)
            }
            None => (0, 0),
        };

        changes.push(CommitFileChange {
            path,
            change: change.to_string(),
            lines_added,
            lines_removed,
        });
    }

    Ok(changes)
}

fn is_skipped_name(name: &str) -> bool {
    name.starts_with('.') || SKIP_DIRS.contains(&name)
}

fn is_indexable_file(path: &Path) -> bool {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if EXTRA_FILES.contains(&filename.as_str()) {
        return true;
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    TEXT_EXTENSIONS.contains(&ext.as_str())
}
