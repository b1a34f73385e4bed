use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use resume_screener_core::{
    chunk_text, cleanup_old_uploads, delete_resume, discover_pdf_files, extract_resume_text,
    reconcile_stale_processing, spawn_periodic_cleanup, stage_upload, verify_api_key,
    CharacterNgramEmbedder, ChunkingConfig, Embedder, FallbackExtractor, OpenAiEmbedder,
    OpenAiFieldExtractor, OpenSearchDocumentStore, PipelineOptions, QdrantStore, ResumeStatus,
    SearchQuery, Services, TaskQueue, TaskState, CLEANUP_INTERVAL, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_PARSING_MODEL, OPENAI_EMBEDDING_DIMENSIONS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "resume-screener", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenAI API key; without one, embeddings are computed locally and fields
    /// are extracted by pattern matching.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    #[arg(long, env = "OPENAI_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    #[arg(long, env = "OPENAI_PARSING_MODEL", default_value = DEFAULT_PARSING_MODEL)]
    parsing_model: String,

    /// Vector size of the embedding model
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = OPENAI_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "resumes")]
    qdrant_collection: String,

    /// OpenSearch base URL
    #[arg(long, env = "OPENSEARCH_URL", default_value = "http://localhost:9200")]
    opensearch_url: String,

    /// OpenSearch index holding resume rows
    #[arg(long, env = "OPENSEARCH_INDEX", default_value = "resumes")]
    opensearch_index: String,

    /// Directory for staged uploads
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Resumes processed concurrently
    #[arg(long, env = "WORKERS", default_value_t = 2)]
    workers: usize,

    /// Shared credential required for commands that modify data
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Credential presented by the caller
    #[arg(long, env = "X_API_KEY", hide_env_values = true)]
    client_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Upload resume PDFs and run the processing pipeline on each.
    Ingest {
        /// A PDF file, or a folder searched recursively for PDFs.
        #[arg(long)]
        path: PathBuf,
    },
    /// Rank processed resumes against a job description.
    Search {
        #[arg(long)]
        job_description: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        #[arg(long, default_value_t = 0.5)]
        min_similarity: f64,
    },
    /// Print one resume row as JSON.
    Show {
        #[arg(long)]
        id: String,
    },
    /// List resume rows, newest first.
    List {
        /// processing, processed or failed
        #[arg(long)]
        status: Option<ResumeStatus>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Delete a resume and its vector.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Remove staged uploads older than the retention period.
    Cleanup {
        /// Keep running and sweep once a day.
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
    /// Mark resumes stuck in processing as failed.
    Reconcile {
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },
    /// Check the document store and the vector index.
    Health,
    /// Print the text chunks extracted from a local PDF.
    Inspect {
        #[arg(long)]
        path: PathBuf,
    },
}

impl Command {
    fn modifies_data(&self) -> bool {
        matches!(
            self,
            Command::Ingest { .. }
                | Command::Delete { .. }
                | Command::Cleanup { .. }
                | Command::Reconcile { .. }
        )
    }
}

fn build_services(cli: &Cli, options: PipelineOptions) -> Services {
    let api_key = cli.openai_api_key.clone().unwrap_or_default();

    let embedder: Arc<dyn Embedder> = if api_key.is_empty() {
        warn!("OPENAI_API_KEY not set, using local n-gram embeddings");
        Arc::new(CharacterNgramEmbedder::default())
    } else {
        Arc::new(OpenAiEmbedder::new(
            api_key.clone(),
            cli.embedding_model.clone(),
            cli.openai_base_url.clone(),
            cli.embedding_dimensions,
        ))
    };

    let vectors = QdrantStore::new(&cli.qdrant_url, &cli.qdrant_collection, embedder.dimensions());
    let documents = OpenSearchDocumentStore::new(&cli.opensearch_url, &cli.opensearch_index);
    let fields = OpenAiFieldExtractor::new(
        api_key,
        cli.parsing_model.clone(),
        cli.openai_base_url.clone(),
    );

    Services::new(
        Arc::new(FallbackExtractor::default()),
        Arc::new(fields),
        embedder,
        Arc::new(vectors),
        Arc::new(documents),
        options,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "resume-screener boot"
    );

    if cli.command.modifies_data()
        && !verify_api_key(cli.api_key.as_deref(), cli.client_key.as_deref())
    {
        bail!("invalid or missing API key");
    }

    let options = PipelineOptions::default();

    match &cli.command {
        Command::Inspect { path } => {
            let extracted = extract_resume_text(path)?;
            println!("pages: {}", extracted.page_count);
            for (index, chunk) in chunk_text(&extracted.text, ChunkingConfig::from(&options))
                .iter()
                .enumerate()
            {
                println!("[chunk {index}] {} chars\n{chunk}\n", chunk.chars().count());
            }
            return Ok(());
        }
        Command::Cleanup { watch } => {
            if *watch {
                spawn_periodic_cleanup(
                    cli.upload_dir.clone(),
                    options.upload_retention,
                    CLEANUP_INTERVAL,
                )
                .await
                .context("cleanup loop stopped")?;
            } else {
                let report = cleanup_old_uploads(&cli.upload_dir, options.upload_retention);
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            return Ok(());
        }
        _ => {}
    }

    let services = build_services(&cli, options.clone());
    services
        .connect()
        .await
        .context("failed to connect to backing services")?;

    let outcome = run(&cli, &services, &options).await;
    services.disconnect().await;
    outcome
}

async fn run(cli: &Cli, services: &Services, options: &PipelineOptions) -> anyhow::Result<()> {
    match &cli.command {
        Command::Ingest { path } => ingest(cli, services, options, path).await?,
        Command::Search {
            job_description,
            top_k,
            min_similarity,
        } => {
            let query = SearchQuery {
                job_description: job_description.clone(),
                top_k: *top_k,
                min_similarity: *min_similarity,
            };
            let result = services.search()?.search(&query).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Show { id } => match services.documents.get(id).await? {
            Some(resume) => println!("{}", serde_json::to_string_pretty(&resume)?),
            None => bail!("resume {id} not found"),
        },
        Command::List {
            status,
            skip,
            limit,
        } => {
            let rows = match status {
                Some(status) => services.documents.list_by_status(*status, *limit).await?,
                None => services.documents.list_all(*skip, *limit).await?,
            };
            for row in rows {
                println!(
                    "{}\t{}\t{}\t{}",
                    row.id,
                    row.status,
                    row.upload_date.to_rfc3339(),
                    row.filename
                );
            }
        }
        Command::Delete { id } => {
            if !delete_resume(services.documents.as_ref(), services.vectors.as_ref(), id).await? {
                bail!("resume {id} not found");
            }
            println!("deleted {id}");
        }
        Command::Reconcile { limit } => {
            let changed = reconcile_stale_processing(
                services.documents.as_ref(),
                options.stale_processing_after,
                *limit,
            )
            .await?;
            println!("{changed} stale resume(s) marked failed");
        }
        Command::Health => {
            let report = services.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.healthy {
                bail!("one or more dependencies are unhealthy");
            }
        }
        Command::Inspect { .. } | Command::Cleanup { .. } => {}
    }

    Ok(())
}

async fn ingest(
    cli: &Cli,
    services: &Services,
    options: &PipelineOptions,
    path: &Path,
) -> anyhow::Result<()> {
    let files = if path.is_dir() {
        discover_pdf_files(path)
    } else {
        vec![path.to_path_buf()]
    };
    if files.is_empty() {
        println!("no PDF files found under {}", path.display());
        return Ok(());
    }

    let queue = TaskQueue::new(cli.workers, options.task_soft_limit, options.task_hard_limit);
    let mut submitted = Vec::new();

    for file in &files {
        let job = match stage_upload(
            file,
            &cli.upload_dir,
            services.documents.as_ref(),
            options.max_upload_bytes,
        )
        .await
        {
            Ok(job) => job,
            Err(error) => {
                warn!(path = %file.display(), %error, "skipped pdf");
                continue;
            }
        };

        let processor = services.processor()?;
        let task_id = queue.submit("process_resume", move |progress| async move {
            processor.process(&job, &progress).await
        });
        info!(%task_id, path = %file.display(), "queued resume");
        submitted.push((file, task_id));
    }

    let skipped = files.len() - submitted.len();
    let mut failed = 0usize;
    let mut succeeded = 0usize;
    for (file, task_id) in submitted {
        let state = queue
            .wait_for(task_id, Duration::from_millis(250))
            .await
            .with_context(|| format!("task {task_id} vanished"))?;
        queue.forget(task_id);
        if matches!(state, TaskState::Success { .. }) {
            succeeded += 1;
        } else {
            failed += 1;
        }
        println!("{}\t{}", file.display(), serde_json::to_string(&state)?);
    }

    println!(
        "{succeeded} resume(s) ingested, {failed} failed, {skipped} skipped, at {}",
        Utc::now().to_rfc3339()
    );
    Ok(())
}
