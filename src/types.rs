/// Shared data types for commit records, chunks, retrieval results, and jobs
///
/// Every optional field on the commit side carries `#[serde(default)]`: commit
/// records come from an external extractor and the chunk pipeline must never
/// fail on a missing field.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable description of one git commit, as written by the commit source
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommitRecord {
    /// Committer timestamp, ISO-8601
    #[serde(default)]
    pub committer_date: String,
    /// Full 40-character commit SHA
    #[serde(default)]
    pub hash: String,
    /// Commit message
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub author: CommitAuthor,
    #[serde(default)]
    pub meta: CommitMeta,
    #[serde(default)]
    pub stats: CommitStats,
    /// Ordered list of file changes in this commit
    #[serde(default)]
    pub files: Vec<FileChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommitAuthor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommitMeta {
    /// Branches this commit is visible on
    #[serde(default)]
    pub branches: Vec<String>,
    /// True if the commit has more than one parent
    #[serde(default)]
    pub merge: bool,
}

/// Change statistics across the whole commit
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommitStats {
    #[serde(default)]
    pub files: usize,
    #[serde(default)]
    pub insertions: usize,
    #[serde(default)]
    pub deletions: usize,
}

/// One file modified by a commit
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileChange {
    #[serde(default)]
    pub old_path: Option<String>,
    #[serde(default)]
    pub new_path: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    /// ADD / DELETE / MODIFY / RENAME / COPY
    #[serde(default)]
    pub change_type: Option<String>,
    #[serde(default)]
    pub added_lines: usize,
    #[serde(default)]
    pub deleted_lines: usize,
    #[serde(default)]
    pub diff_parsed: ParsedDiff,
}

impl FileChange {
    /// Best-available path for this change: new path, then old, then filename
    pub fn path(&self) -> Option<&str> {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .or(self.filename.as_deref())
            .filter(|p| !p.is_empty())
    }
}

/// Added and deleted diff lines, each tagged with its line number
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParsedDiff {
    #[serde(default)]
    pub added: Vec<(u32, String)>,
    #[serde(default)]
    pub deleted: Vec<(u32, String)>,
}

/// The retrievable unit: one generated summary per commit
///
/// `id` is `"<YYYYMMDDHHmmss>_<40-hex-hash>"`; the date prefix makes the id
/// ordering chronological, which the recency re-ranker depends on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
}

/// A single retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: String,
    pub text: String,
    /// Inner product of normalized vectors, or exactly 1.0 for hash matches
    pub similarity: f32,
}

/// Lifecycle of an ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Accepted,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Accepted => "accepted",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Persistent record of one ingestion run
///
/// `job_id`, `repo_id`, `repo_url`, and `created_at` are fixed at creation;
/// only `status` and `error` are mutated, and only by the task running the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: String,
    pub repo_id: String,
    pub repo_url: String,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
