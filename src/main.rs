use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use repo_mentor::chat::ChatService;
use repo_mentor::config::Config;
use repo_mentor::ingest::IngestionService;
use repo_mentor::llm::OpenAiClient;
use repo_mentor::rag::prompt::LlmSummarizer;
use repo_mentor::rag::Retriever;
use repo_mentor::storage::LocalStore;
use repo_mentor::types::JobStatus;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "repo-mentor", about = "Ask questions about a git repository's commit history")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "REPO_MENTOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a repository: extract commits, build chunks and the index
    Ingest {
        /// Repository URL or local path
        repo_url: String,
        /// Return after accepting the job instead of waiting for completion
        #[arg(long)]
        no_wait: bool,
    },
    /// Show the latest ingestion job for a repository
    Status {
        /// Repository identifier, e.g. "acme_widgets"
        repo_id: String,
    },
    /// Retrieve the most relevant commit chunks for a query
    Query {
        repo_id: String,
        query: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Ask a question and get an LLM answer grounded in commit history
    Chat {
        repo_id: String,
        message: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Stream the answer token by token
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::new(),
    };

    let store = Arc::new(LocalStore::new(&config.storage.root));
    let client = Arc::new(OpenAiClient::from_config(&config.llm)?);

    match cli.command {
        Command::Ingest { repo_url, no_wait } => {
            let summarizer = Arc::new(LlmSummarizer::new(
                client.clone(),
                &config.llm.summary_model,
            ));
            let service = IngestionService::new(store, client, summarizer, &config);

            let job = service.start_job(&repo_url).await?;
            println!("job {} accepted for '{}'", job.job_id, job.repo_id);
            if no_wait {
                return Ok(());
            }

            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let Some(current) = service.latest_job(&job.repo_id).await? else {
                    continue;
                };
                match current.status {
                    JobStatus::Completed => {
                        println!("job {} completed", current.job_id);
                        return Ok(());
                    }
                    JobStatus::Failed => {
                        anyhow::bail!(
                            "job {} failed: {}",
                            current.job_id,
                            current.error.unwrap_or_else(|| "unknown error".to_string())
                        );
                    }
                    _ => {}
                }
            }
        }

        Command::Status { repo_id } => {
            let summarizer = Arc::new(LlmSummarizer::new(
                client.clone(),
                &config.llm.summary_model,
            ));
            let service = IngestionService::new(store, client, summarizer, &config);
            match service.latest_job(&repo_id).await? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => println!("no ingestion job found for '{}'", repo_id),
            }
        }

        Command::Query {
            repo_id,
            query,
            top_k,
        } => {
            let retriever = Retriever::new(store, client);
            let hits = retriever.retrieve(&repo_id, &query, top_k).await?;
            if hits.is_empty() {
                println!("no results");
            }
            for hit in hits {
                println!("{:.3}  {}", hit.similarity, hit.id);
                println!("{}\n", hit.text);
            }
        }

        Command::Chat {
            repo_id,
            message,
            top_k,
            stream,
        } => {
            let retriever = Arc::new(Retriever::new(store, client.clone()));
            let service = ChatService::new(retriever, client, &config.llm.chat_model);

            if stream {
                let (chunks, mut tokens) = service
                    .chat_with_repo_stream(&repo_id, &message, top_k)
                    .await?;
                while let Some(token) = tokens.next().await {
                    print!("{}", token?);
                    std::io::stdout().flush()?;
                }
                println!();
                eprintln!("({} context chunks)", chunks.len());
            } else {
                let reply = service.chat_with_repo(&repo_id, &message, top_k).await?;
                println!("{}", reply.message);
                eprintln!("({} context chunks)", reply.retrieved_chunks.len());
            }
        }
    }

    Ok(())
}
