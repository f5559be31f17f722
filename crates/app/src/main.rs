use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_line_search_core::context::REGISTRY_FILE;
use pdf_line_search_core::{
    delete_all_documents, delete_document, document_lines, get_document,
    ingest_folder_best_effort, ingest_path, list_documents, AppContext, EngineConfig,
    LocalRegistry, QdrantStore, SearchCoordinator, SearchQuery,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-line-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the local line index and document registry.
    #[arg(long, env = "PDF_SEARCH_DATA_DIR", default_value = ".pdf-line-search")]
    data_dir: PathBuf,

    /// Qdrant base URL. Lines are kept in the local index when unset.
    #[arg(long, env = "PDF_SEARCH_QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, env = "PDF_SEARCH_QDRANT_COLLECTION", default_value = "pdf_lines")]
    qdrant_collection: String,

    /// Embedding model; `char-ngram` is built in, others need an endpoint.
    #[arg(long, env = "PDF_SEARCH_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    #[arg(long, env = "PDF_SEARCH_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    /// OpenAI-compatible embeddings base URL.
    #[arg(long, env = "PDF_SEARCH_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    #[arg(long, env = "PDF_SEARCH_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Non-table lines shorter than this are not indexed.
    #[arg(long, env = "PDF_SEARCH_MIN_LINE_CHARS")]
    min_line_chars: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one PDF, or every PDF under a folder.
    Ingest {
        /// PDF file or folder searched recursively.
        path: PathBuf,
    },
    /// Rank indexed lines against a query.
    Search {
        query: String,
        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,
        /// Results scoring below this are dropped.
        #[arg(long)]
        min_similarity: Option<f64>,
        /// Print the response as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List ingested documents, newest first.
    Documents {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show one document and optionally its indexed lines.
    Show {
        document_id: String,
        #[arg(long, default_value_t = false)]
        lines: bool,
    },
    /// Delete a document and its lines.
    Delete { document_id: String },
    /// Delete every document.
    Purge {
        /// Required, purging cannot be undone.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

impl Cli {
    fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = EngineConfig::from_env().context("invalid PDF_SEARCH_* environment")?;

        if let Some(model) = &self.embedding_model {
            config.embedding.model = model.clone();
        }
        if let Some(dimensions) = self.embedding_dimensions {
            config.embedding.dimensions = dimensions;
        }
        if let Some(endpoint) = &self.embedding_endpoint {
            config.embedding.endpoint = Some(endpoint.clone());
        }
        if let Some(api_key) = &self.embedding_api_key {
            config.embedding.api_key = Some(api_key.clone());
        }
        if let Some(min_line_chars) = self.min_line_chars {
            config.ingestion.min_line_chars = min_line_chars;
        }

        config.validate()?;
        Ok(config)
    }

    async fn app_context(&self) -> anyhow::Result<AppContext> {
        let config = self.engine_config()?;

        match &self.qdrant_url {
            Some(url) => {
                let store = QdrantStore::new(url, &self.qdrant_collection, config.embedding.dimensions)?;
                store
                    .ensure_collection()
                    .await
                    .with_context(|| format!("qdrant collection {} unavailable", self.qdrant_collection))?;
                let registry = LocalRegistry::open(self.data_dir.join(REGISTRY_FILE)).await?;
                Ok(AppContext::new(config, Arc::new(store), Arc::new(registry))?)
            }
            None => Ok(AppContext::local(config, Some(&self.data_dir)).await?),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let context = cli.app_context().await?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        data_dir = %cli.data_dir.display(),
        backend = if cli.qdrant_url.is_some() { "qdrant" } else { "local" },
        "pdf-line-search boot"
    );

    match cli.command {
        Command::Ingest { path } => {
            if path.is_dir() {
                let report = ingest_folder_best_effort(&context, &path).await?;

                if !report.skipped_files.is_empty() {
                    warn!(
                        "skipped_files={} for folder={}",
                        report.skipped_files.len(),
                        path.display()
                    );
                    for skipped in &report.skipped_files {
                        println!("skipped {}: {}", skipped.path.display(), skipped.reason);
                    }
                }
                for uploaded in &report.ingested {
                    println!(
                        "{} {} lines={}",
                        uploaded.document_id, uploaded.filename, uploaded.lines_processed
                    );
                }
                println!(
                    "{} document(s) ingested, {} skipped",
                    report.ingested.len(),
                    report.skipped_files.len()
                );
            } else {
                let uploaded = ingest_path(&context, &path).await?;
                println!(
                    "{} {} lines={}",
                    uploaded.document_id, uploaded.filename, uploaded.lines_processed
                );
            }
        }
        Command::Search {
            query,
            limit,
            min_similarity,
            json,
        } => {
            let coordinator = SearchCoordinator::new(context);
            let mut search_query = coordinator.query(query);
            if let Some(limit) = limit {
                search_query.limit = limit;
            }
            if let Some(min_similarity) = min_similarity {
                search_query.min_similarity = min_similarity;
            }

            let response = coordinator.search(&search_query).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!(
                    "query: {} ({} result(s) in {:.2} ms)",
                    response.query, response.number_of_results, response.response_time_ms
                );
                for result in response.results {
                    println!(
                        "[{:.4}] {} page={} line={} document_id={}",
                        result.similarity_score,
                        result.filename,
                        result.page_number,
                        result.line_number,
                        result.document_id
                    );
                    println!("  {}", result.text_fragment);
                }
            }
        }
        Command::Documents { json } => {
            let documents = list_documents(&context).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&documents)?);
            } else {
                for document in documents {
                    println!(
                        "{} {} lines={} pages={}-{} created_at={}",
                        document.document_id,
                        document.filename,
                        document.line_count,
                        document.first_page,
                        document.last_page,
                        document.created_at.to_rfc3339()
                    );
                }
            }
        }
        Command::Show { document_id, lines } => {
            let document = get_document(&context, &document_id).await?;
            println!("{}", serde_json::to_string_pretty(&document)?);

            if lines {
                for line in document_lines(&context, &document_id).await? {
                    let marker = if line.is_table_row { " [table]" } else { "" };
                    println!(
                        "p{} l{}{}: {}",
                        line.page_number, line.line_number, marker, line.text
                    );
                }
            }
        }
        Command::Delete { document_id } => {
            let deleted = delete_document(&context, &document_id).await?;
            println!(
                "{} deleted, {} line(s) removed",
                deleted.document_id, deleted.rows_removed
            );
        }
        Command::Purge { yes } => {
            if !yes {
                bail!("refusing to delete every document without --yes");
            }
            let purged = delete_all_documents(&context).await?;
            println!(
                "{} document(s) and {} line(s) removed",
                purged.documents_removed, purged.rows_removed
            );
        }
    }

    Ok(())
}
