//! Chunk text generation for a single commit
//!
//! Pure rendering plus at most one summarizer call. Noise commits (pure
//! formatting, docs, config) get a templated body instead of an LLM summary,
//! and a summarizer failure degrades to a deterministic fallback body rather
//! than propagating.

use crate::llm::CommitSummarizer;
use crate::types::{CommitRecord, FileChange};

/// Message keywords that mark a commit as likely noise when the change is small
const NOISE_KEYWORDS: [&str; 10] = [
    "format", "fmt", "prettier", "black", "lint", "typo", "docs", "doc", "readme", "chore",
];

/// A keyword-matched commit is only noise below this many changed lines
const NOISE_MAX_CHANGED_LINES: usize = 20;

/// Extensions treated as code for noise classification and snippet extraction
const CODE_EXTENSIONS: [&str; 31] = [
    "py", "js", "ts", "jsx", "tsx", "html", "htm", "css", "scss", "java", "kt", "kts", "c", "h",
    "cpp", "cc", "hpp", "go", "rs", "sql", "sh", "bash", "zsh", "rb", "php", "cs", "swift", "m",
    "mm", "ini", "cfg",
];

/// Cap on files sent to the summarizer
const MAX_FILES_FOR_LLM: usize = 20;

/// Cap on added/deleted diff lines attached per code file
const MAX_LINES_PER_SNIPPET: usize = 40;

/// Cap on files listed in the fallback body
const FALLBACK_MAX_FILES: usize = 5;

/// Generate the chunk text for one commit
pub async fn generate_chunk_text(
    commit: &CommitRecord,
    summarizer: &dyn CommitSummarizer,
) -> String {
    let header = build_header(commit);

    let body = if is_noise_commit(commit) {
        build_noise_summary(commit)
    } else {
        let payload = build_summary_payload(commit);
        match summarizer.summarize(&payload).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => build_fallback_body(commit),
            Err(e) => {
                tracing::debug!("Summarizer failed for commit {}: {}", commit.hash, e);
                build_fallback_body(commit)
            }
        }
    };

    if body.is_empty() {
        header
    } else {
        format!("{}\n\n{}", header, body)
    }
}

/// Header: date + hash, then message and author/branches lines when present
pub fn build_header(commit: &CommitRecord) -> String {
    let mut lines = vec![format!("{} {}", commit.committer_date, commit.hash)];

    if !commit.msg.is_empty() {
        lines.push(format!("Message: {}", commit.msg));
    }

    let author = commit.author.name.as_str();
    let branches = &commit.meta.branches;
    if !author.is_empty() || !branches.is_empty() {
        let mut parts = Vec::new();
        if !author.is_empty() {
            parts.push(format!("author={}", author));
        }
        if !branches.is_empty() {
            parts.push(format!("branches={}", branches.join(",")));
        }
        lines.push(parts.join(" "));
    }

    lines.join("\n")
}

/// Noise: small keyword-matched change, no code files, or no files at all
pub fn is_noise_commit(commit: &CommitRecord) -> bool {
    let message = commit.msg.to_lowercase();
    let total_changes = commit.stats.insertions + commit.stats.deletions;

    if NOISE_KEYWORDS.iter().any(|k| message.contains(k)) && total_changes <= NOISE_MAX_CHANGED_LINES
    {
        return true;
    }

    let has_code_file = commit
        .files
        .iter()
        .any(|f| f.path().is_some_and(is_code_file));
    if !has_code_file {
        return true;
    }

    commit.files.is_empty()
}

/// Templated body for noise commits
fn build_noise_summary(commit: &CommitRecord) -> String {
    let mut lines = vec![
        "Summary:".to_string(),
        "- Updated configuration / documentation / non-code assets.".to_string(),
        String::new(),
        "Files:".to_string(),
    ];
    for f in &commit.files {
        lines.push(file_line(f));
    }
    lines.join("\n")
}

/// Deterministic body used when the summarizer fails or returns nothing
fn build_fallback_body(commit: &CommitRecord) -> String {
    let mut lines = vec![
        "Summary:".to_string(),
        "- Commit details could not be fully summarized by the LLM.".to_string(),
        String::new(),
        "Files:".to_string(),
    ];
    for f in commit.files.iter().take(FALLBACK_MAX_FILES) {
        lines.push(file_line(f));
    }
    if commit.files.len() > FALLBACK_MAX_FILES {
        lines.push(format!(
            "- ... (+{} more files)",
            commit.files.len() - FALLBACK_MAX_FILES
        ));
    }
    lines.join("\n")
}

fn file_line(f: &FileChange) -> String {
    let path = f.path().unwrap_or("unknown");
    let change_type = f.change_type.as_deref().unwrap_or("MODIFY");
    format!("- {} ({})", path, change_type)
}

/// Summarization payload: commit metadata plus a code-files-first file list
/// capped at [`MAX_FILES_FOR_LLM`] entries, with diff snippets only for code
/// files
pub fn build_summary_payload(commit: &CommitRecord) -> serde_json::Value {
    let commit_part = serde_json::json!({
        "committer_date": commit.committer_date,
        "hash": commit.hash,
        "msg": commit.msg,
        "author": commit.author.name,
        "branches": commit.meta.branches,
        "is_merge": commit.meta.merge,
        "stats": {
            "files": commit.stats.files,
            "insertions": commit.stats.insertions,
            "deletions": commit.stats.deletions,
        },
    });

    let mut code_files = Vec::new();
    let mut other_files = Vec::new();

    for f in &commit.files {
        let path = f.path().unwrap_or("");
        let is_code = is_code_file(path);

        let (added, deleted): (Vec<&str>, Vec<&str>) = if is_code {
            (
                f.diff_parsed
                    .added
                    .iter()
                    .take(MAX_LINES_PER_SNIPPET)
                    .map(|(_, text)| text.as_str())
                    .collect(),
                f.diff_parsed
                    .deleted
                    .iter()
                    .take(MAX_LINES_PER_SNIPPET)
                    .map(|(_, text)| text.as_str())
                    .collect(),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        let entry = serde_json::json!({
            "path": path,
            "change_type": f.change_type.as_deref().unwrap_or("MODIFY"),
            "added_lines": f.added_lines,
            "deleted_lines": f.deleted_lines,
            "added_snippet": added,
            "deleted_snippet": deleted,
        });

        if is_code {
            code_files.push(entry);
        } else {
            other_files.push(entry);
        }
    }

    code_files.extend(other_files);
    code_files.truncate(MAX_FILES_FOR_LLM);

    serde_json::json!({
        "commit": commit_part,
        "files": code_files,
    })
}

fn is_code_file(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| CODE_EXTENSIONS.contains(&e.as_str()))
}
