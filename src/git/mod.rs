//! Commit extraction: turning a git repository into per-commit JSON records
//!
//! Extraction is incremental. Records already present in storage are never
//! rewritten, so re-ingesting a repository only touches commits that appeared
//! since the last run.

use crate::error::{PipelineError, ValidationError};
use crate::storage::{keys, write_json, ObjectStore};
use crate::types::{
    CommitAuthor, CommitMeta, CommitRecord, CommitStats, FileChange, ParsedDiff,
};
use chrono::{FixedOffset, TimeZone};
use git2::{Delta, DiffOptions, Repository, Sort};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parsed diff lines stored per side of a file change; counters keep the
/// true totals even when the stored lines are capped
const MAX_PARSED_LINES_PER_SIDE: usize = 400;

/// Derive the storage identifier for a repository URL: `<owner>_<name>`
///
/// Accepts https URLs, scp-style ssh remotes, and local paths; a trailing
/// `.git` suffix and trailing slashes are stripped first.
pub fn repo_id_from_url(repo_url: &str) -> Result<String, ValidationError> {
    let cleaned = repo_url.trim().trim_end_matches('/');
    let cleaned = cleaned.strip_suffix(".git").unwrap_or(cleaned);
    let cleaned = cleaned.replace(':', "/");

    let segments: Vec<&str> = cleaned.split('/').filter(|p| !p.is_empty()).collect();
    match segments.as_slice() {
        [.., owner, repo] => Ok(format!("{}_{}", owner, repo)),
        _ => Err(ValidationError::InvalidRepoUrl(repo_url.to_string())),
    }
}

/// A git repository opened for commit extraction
///
/// Local paths are opened in place; remote URLs are cloned into a temporary
/// directory that is removed when the source is dropped.
pub struct CommitSource {
    repo: Repository,
    _clone: Option<TempClone>,
}

struct TempClone {
    path: PathBuf,
}

impl Drop for TempClone {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

impl CommitSource {
    /// Open a local repository or clone a remote one
    pub fn open(repo_url: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        if Path::new(repo_url).exists() {
            let repo = Repository::discover(repo_url)
                .with_context(|| format!("Failed to open local repository at '{}'", repo_url))?;
            tracing::info!("Opened local repository at '{}'", repo_url);
            return Ok(Self { repo, _clone: None });
        }

        let path = std::env::temp_dir().join(format!("repo-mentor-{}", uuid::Uuid::new_v4()));
        tracing::info!("Cloning '{}' into {}", repo_url, path.display());
        let clone = TempClone { path };
        let repo = Repository::clone(repo_url, &clone.path)
            .with_context(|| format!("Failed to clone '{}'", repo_url))?;

        Ok(Self {
            repo,
            _clone: Some(clone),
        })
    }

    /// Walk every commit reachable from HEAD, oldest first, skipping ids in
    /// `existing`; returns `(commit_id, record)` pairs for the rest
    pub fn extract_records(
        &self,
        existing: &HashSet<String>,
    ) -> anyhow::Result<Vec<(String, CommitRecord)>> {
        let head_branch = self
            .repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(|s| s.to_string()));

        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL | Sort::REVERSE)?;
        revwalk.push_head()?;

        let mut records = Vec::new();
        for oid in revwalk {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            let commit_id = commit_id_for(&commit);
            if existing.contains(&commit_id) {
                continue;
            }

            let record = self.build_record(&commit, head_branch.as_deref())?;
            records.push((commit_id, record));

            if records.len() % 50 == 0 {
                tracing::debug!("Extracted {} commits", records.len());
            }
        }

        tracing::info!("Extracted {} new commits", records.len());
        Ok(records)
    }

    fn build_record(
        &self,
        commit: &git2::Commit,
        head_branch: Option<&str>,
    ) -> anyhow::Result<CommitRecord> {
        let author = commit.author();
        let (files, stats) = self.extract_files(commit)?;

        Ok(CommitRecord {
            committer_date: commit_timestamp(commit).to_rfc3339(),
            hash: commit.id().to_string(),
            msg: commit.message().unwrap_or("").to_string(),
            author: CommitAuthor {
                name: author.name().unwrap_or("").to_string(),
                email: author.email().unwrap_or("").to_string(),
            },
            meta: CommitMeta {
                branches: head_branch.map(|b| vec![b.to_string()]).unwrap_or_default(),
                merge: commit.parent_count() > 1,
            },
            stats,
            files,
        })
    }

    /// Diff against the first parent (or the empty tree for a root commit)
    /// and collect one [`FileChange`] per delta
    fn extract_files(
        &self,
        commit: &git2::Commit,
    ) -> anyhow::Result<(Vec<FileChange>, CommitStats)> {
        let tree = commit.tree()?;
        let parent_tree = if commit.parent_count() > 0 {
            Some(commit.parent(0)?.tree()?)
        } else {
            None
        };

        let mut diff_opts = DiffOptions::new();
        diff_opts.context_lines(0).interhunk_lines(0);
        let diff = self.repo.diff_tree_to_tree(
            parent_tree.as_ref(),
            Some(&tree),
            Some(&mut diff_opts),
        )?;

        let changes: RefCell<Vec<FileChange>> = RefCell::new(Vec::new());

        diff.foreach(
            &mut |delta, _progress| {
                let old_path = delta.old_file().path().map(|p| p.display().to_string());
                let new_path = delta.new_file().path().map(|p| p.display().to_string());
                let filename = new_path
                    .as_deref()
                    .or(old_path.as_deref())
                    .and_then(|p| p.rsplit('/').next())
                    .map(|f| f.to_string());

                changes.borrow_mut().push(FileChange {
                    old_path: old_path.filter(|_| delta.status() != Delta::Added),
                    new_path: new_path.filter(|_| delta.status() != Delta::Deleted),
                    filename,
                    change_type: Some(change_type_name(delta.status()).to_string()),
                    added_lines: 0,
                    deleted_lines: 0,
                    diff_parsed: ParsedDiff::default(),
                });
                true
            },
            None,
            None,
            Some(&mut |_delta, _hunk, line| {
                let mut changes = changes.borrow_mut();
                let Some(change) = changes.last_mut() else {
                    return true;
                };

                match line.origin() {
                    '+' => {
                        change.added_lines += 1;
                        if change.diff_parsed.added.len() < MAX_PARSED_LINES_PER_SIDE {
                            if let (Some(no), Ok(content)) =
                                (line.new_lineno(), std::str::from_utf8(line.content()))
                            {
                                change
                                    .diff_parsed
                                    .added
                                    .push((no, content.trim_end_matches('\n').to_string()));
                            }
                        }
                    }
                    '-' => {
                        change.deleted_lines += 1;
                        if change.diff_parsed.deleted.len() < MAX_PARSED_LINES_PER_SIDE {
                            if let (Some(no), Ok(content)) =
                                (line.old_lineno(), std::str::from_utf8(line.content()))
                            {
                                change
                                    .diff_parsed
                                    .deleted
                                    .push((no, content.trim_end_matches('\n').to_string()));
                            }
                        }
                    }
                    _ => {}
                }
                true
            }),
        )?;

        let changes = changes.into_inner();
        let stats = CommitStats {
            files: changes.len(),
            insertions: changes.iter().map(|c| c.added_lines).sum(),
            deletions: changes.iter().map(|c| c.deleted_lines).sum(),
        };
        Ok((changes, stats))
    }
}

/// `<YYYYMMDDHHmmss>_<40-hex-hash>` in the commit's own timezone
fn commit_id_for(commit: &git2::Commit) -> String {
    format!(
        "{}_{}",
        commit_timestamp(commit).format("%Y%m%d%H%M%S"),
        commit.id()
    )
}

fn commit_timestamp(commit: &git2::Commit) -> chrono::DateTime<FixedOffset> {
    let time = commit.time();
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
    offset
        .timestamp_opt(time.seconds(), 0)
        .single()
        .unwrap_or_else(|| {
            offset
                .timestamp_opt(0, 0)
                .single()
                .expect("epoch is representable")
        })
}

fn change_type_name(status: Delta) -> &'static str {
    match status {
        Delta::Added => "ADD",
        Delta::Deleted => "DELETE",
        Delta::Modified => "MODIFY",
        Delta::Renamed => "RENAME",
        Delta::Copied => "COPY",
        _ => "UNKNOWN",
    }
}

/// Extract all new commits of `repo_url` into per-commit records under
/// `repos/<repo_id>/commits/`; returns the number of records written
pub async fn extract_commits(
    store: Arc<dyn ObjectStore>,
    repo_url: &str,
    repo_id: &str,
) -> Result<usize, PipelineError> {
    let stage_error = |e: &dyn std::fmt::Display| PipelineError::ExtractFailed {
        repo: repo_id.to_string(),
        reason: e.to_string(),
    };

    let stems = store
        .list_stems(&keys::commits_prefix(repo_id))
        .await
        .map_err(|e| stage_error(&e))?;
    let existing: HashSet<String> = stems.into_iter().collect();

    // git2 is synchronous; keep the walk off the async runtime
    let url = repo_url.to_string();
    let records = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let source = CommitSource::open(&url)?;
        source.extract_records(&existing)
    })
    .await
    .map_err(|e| stage_error(&e))?
    .map_err(|e| stage_error(&format!("{:#}", e)))?;

    let written = records.len();
    for (commit_id, record) in records {
        write_json(store.as_ref(), &keys::commit(repo_id, &commit_id), &record)
            .await
            .map_err(|e| stage_error(&e))?;
    }

    tracing::info!("Stored {} new commit records for '{}'", written, repo_id);
    Ok(written)
}
