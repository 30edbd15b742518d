//! Ingestion jobs: the three-stage pipeline behind an async job record
//!
//! Starting a job validates the URL, persists an `accepted` record, and
//! returns immediately; the pipeline itself runs on a detached task. Progress
//! is observed by polling the latest job for the repository.

use crate::config::Config;
use crate::error::{RagError, ValidationError};
use crate::git::{extract_commits, repo_id_from_url};
use crate::llm::{CommitSummarizer, EmbeddingProvider};
use crate::rag::{ChunkBuilder, IndexBuilder};
use crate::storage::{keys, read_json, write_json, ObjectStore};
use crate::types::{IngestionJob, JobStatus};
use chrono::Utc;
use std::sync::Arc;

pub struct IngestionService {
    store: Arc<dyn ObjectStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    summarizer: Arc<dyn CommitSummarizer>,
    chunk_workers: usize,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        summarizer: Arc<dyn CommitSummarizer>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            embeddings,
            summarizer,
            chunk_workers: config.ingest.chunk_workers,
        }
    }

    /// Accept an ingestion request and spawn the pipeline
    ///
    /// The returned job is in `accepted` state and already persisted, so a
    /// status poll immediately after this call always finds it.
    pub async fn start_job(&self, repo_url: &str) -> Result<IngestionJob, RagError> {
        let repo_url = repo_url.trim();
        if repo_url.is_empty() {
            return Err(ValidationError::Empty("repo_url").into());
        }
        let repo_id = repo_id_from_url(repo_url)?;

        let job = IngestionJob {
            job_id: uuid::Uuid::new_v4().to_string(),
            repo_id: repo_id.clone(),
            repo_url: repo_url.to_string(),
            created_at: Utc::now(),
            status: JobStatus::Accepted,
            error: None,
        };
        self.persist_job(&job).await?;
        tracing::info!("Accepted ingestion job {} for '{}'", job.job_id, repo_id);

        let runner = PipelineRunner {
            store: Arc::clone(&self.store),
            embeddings: Arc::clone(&self.embeddings),
            summarizer: Arc::clone(&self.summarizer),
            chunk_workers: self.chunk_workers,
        };
        let spawned = job.clone();
        tokio::spawn(async move {
            runner.run(spawned).await;
        });

        Ok(job)
    }

    /// Most recent job for a repository, by creation time
    pub async fn latest_job(&self, repo_id: &str) -> Result<Option<IngestionJob>, RagError> {
        let prefix = keys::jobs_prefix(repo_id);
        let stems = self.store.list_stems(&prefix).await.map_err(RagError::Storage)?;

        let mut latest: Option<IngestionJob> = None;
        for stem in stems {
            let key = keys::job(repo_id, &stem);
            let job: Option<IngestionJob> = match read_json(self.store.as_ref(), &key).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!("Skipping unreadable job record '{}': {}", key, e);
                    None
                }
            };
            if let Some(job) = job {
                let newer = latest
                    .as_ref()
                    .map(|l| job.created_at > l.created_at)
                    .unwrap_or(true);
                if newer {
                    latest = Some(job);
                }
            }
        }
        Ok(latest)
    }

    async fn persist_job(&self, job: &IngestionJob) -> Result<(), RagError> {
        write_json(self.store.as_ref(), &keys::job(&job.repo_id, &job.job_id), job)
            .await
            .map_err(RagError::Storage)
    }
}

/// Owns the detached pipeline run; every failure ends up on the job record
struct PipelineRunner {
    store: Arc<dyn ObjectStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    summarizer: Arc<dyn CommitSummarizer>,
    chunk_workers: usize,
}

impl PipelineRunner {
    async fn run(&self, mut job: IngestionJob) {
        job.status = JobStatus::Running;
        if let Err(e) = self.persist(&job).await {
            tracing::error!("Failed to mark job {} running: {}", job.job_id, e);
            return;
        }

        match self.run_stages(&job).await {
            Ok(()) => {
                job.status = JobStatus::Completed;
                tracing::info!("Job {} completed for '{}'", job.job_id, job.repo_id);
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                tracing::error!("Job {} failed for '{}': {}", job.job_id, job.repo_id, e);
            }
        }

        if let Err(e) = self.persist(&job).await {
            tracing::error!("Failed to persist final state of job {}: {}", job.job_id, e);
        }
    }

    async fn run_stages(&self, job: &IngestionJob) -> Result<(), RagError> {
        extract_commits(Arc::clone(&self.store), &job.repo_url, &job.repo_id).await?;

        let chunks = ChunkBuilder::new(
            Arc::clone(&self.store),
            Arc::clone(&self.summarizer),
            self.chunk_workers,
        );
        chunks.build(&job.repo_id).await?;

        let index = IndexBuilder::new(Arc::clone(&self.store), Arc::clone(&self.embeddings));
        index.build(&job.repo_id).await?;

        Ok(())
    }

    async fn persist(&self, job: &IngestionJob) -> Result<(), RagError> {
        write_json(self.store.as_ref(), &keys::job(&job.repo_id, &job.job_id), job)
            .await
            .map_err(RagError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChatError, EmbeddingError};
    use crate::storage::LocalStore;
    use std::time::Duration;
    use tempfile::tempdir;

    struct StubEmbeddings;

    #[async_trait::async_trait]
    impl EmbeddingProvider for StubEmbeddings {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct StubSummarizer;

    #[async_trait::async_trait]
    impl CommitSummarizer for StubSummarizer {
        async fn summarize(&self, _payload: &serde_json::Value) -> Result<String, ChatError> {
            Ok("summary".to_string())
        }
    }

    fn service(store: Arc<LocalStore>) -> IngestionService {
        IngestionService::new(
            store,
            Arc::new(StubEmbeddings),
            Arc::new(StubSummarizer),
            &Config::default(),
        )
    }

    async fn wait_for_terminal(
        svc: &IngestionService,
        repo_id: &str,
    ) -> IngestionJob {
        for _ in 0..200 {
            if let Some(job) = svc.latest_job(repo_id).await.unwrap() {
                if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job for '{}' never reached a terminal state", repo_id);
    }

    #[tokio::test]
    async fn test_start_job_rejects_blank_url() {
        let dir = tempdir().unwrap();
        let svc = service(Arc::new(LocalStore::new(dir.path())));
        let err = svc.start_job("   ").await.unwrap_err();
        assert!(matches!(
            err,
            RagError::Validation(ValidationError::Empty("repo_url"))
        ));
    }

    #[tokio::test]
    async fn test_start_job_rejects_bad_url() {
        let dir = tempdir().unwrap();
        let svc = service(Arc::new(LocalStore::new(dir.path())));
        let err = svc.start_job("widgets").await.unwrap_err();
        assert!(matches!(
            err,
            RagError::Validation(ValidationError::InvalidRepoUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_accepted_job_is_persisted_before_return() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        let svc = service(store.clone());

        let job = svc.start_job("https://example.com/acme/widgets").await.unwrap();
        assert_eq!(job.repo_id, "acme_widgets");
        assert!(job.error.is_none());

        // Already visible to a poll, whatever state the pipeline is in
        let seen = svc.latest_job("acme_widgets").await.unwrap().unwrap();
        assert_eq!(seen.job_id, job.job_id);
    }

    #[tokio::test]
    async fn test_pipeline_failure_lands_on_job_record() {
        let dir = tempdir().unwrap();
        let svc = service(Arc::new(LocalStore::new(dir.path())));

        // Unreachable URL: extraction fails, the job must record it
        let job = svc
            .start_job("https://invalid.invalid/acme/widgets")
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Accepted);

        let done = wait_for_terminal(&svc, "acme_widgets").await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error.is_some());
    }

    #[tokio::test]
    async fn test_latest_job_picks_newest() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        let svc = service(store.clone());

        let older = IngestionJob {
            job_id: "j-old".to_string(),
            repo_id: "r".to_string(),
            repo_url: "u".to_string(),
            created_at: Utc::now() - chrono::Duration::hours(1),
            status: JobStatus::Completed,
            error: None,
        };
        let newer = IngestionJob {
            job_id: "j-new".to_string(),
            created_at: Utc::now(),
            ..older.clone()
        };
        write_json(store.as_ref(), &keys::job("r", "j-old"), &older).await.unwrap();
        write_json(store.as_ref(), &keys::job("r", "j-new"), &newer).await.unwrap();

        let latest = svc.latest_job("r").await.unwrap().unwrap();
        assert_eq!(latest.job_id, "j-new");
    }

    #[tokio::test]
    async fn test_latest_job_none_for_unknown_repo() {
        let dir = tempdir().unwrap();
        let svc = service(Arc::new(LocalStore::new(dir.path())));
        assert!(svc.latest_job("nobody").await.unwrap().is_none());
    }
}
