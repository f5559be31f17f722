use crate::context::AppContext;
use crate::error::{EmbeddingError, IngestError};
use crate::models::{Document, ExtractedLine, NewLine, UploadResult};
use crate::normalizer::filter_lines;
use crate::retry::with_retry;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn validate_filename(filename: &str) -> Result<(), IngestError> {
    let is_pdf = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        Ok(())
    } else {
        Err(IngestError::InvalidArgument(format!(
            "only .pdf files are accepted, got {filename:?}"
        )))
    }
}

/// Extracts, filters, embeds and commits one PDF. The document becomes
/// searchable only once every line is stored and the registry entry is
/// written; on any failure it stays invisible.
pub async fn ingest_pdf(
    context: &AppContext,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<UploadResult, IngestError> {
    validate_filename(filename)?;

    let checksum = digest_bytes(&bytes);
    let extractor = context.extractor.clone();
    let extracted = tokio::task::spawn_blocking(move || extractor.extract_lines(&bytes)).await??;
    let extracted_count = extracted.len();

    let lines = filter_lines(extracted, &context.config.ingestion);
    debug!(
        filename,
        extracted = extracted_count,
        kept = lines.len(),
        "lines filtered"
    );

    let rows = embed_lines(context, lines).await?;

    let document = Document {
        document_id: Uuid::new_v4().to_string(),
        filename: filename.to_string(),
        created_at: Utc::now(),
        line_count: rows.len() as u64,
        first_page: rows.iter().map(|row| row.page_number).min().unwrap_or(0),
        last_page: rows.iter().map(|row| row.page_number).max().unwrap_or(0),
        checksum,
    };
    let result = UploadResult {
        document_id: document.document_id.clone(),
        filename: document.filename.clone(),
        lines_processed: document.line_count,
    };

    // Detached so that dropping this future cannot stop a commit halfway.
    let commit_context = context.clone();
    tokio::spawn(async move { commit(&commit_context, document, rows).await }).await??;

    info!(
        document_id = %result.document_id,
        filename = %result.filename,
        lines = result.lines_processed,
        "document ingested"
    );
    Ok(result)
}

pub async fn ingest_path(context: &AppContext, path: &Path) -> Result<UploadResult, IngestError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();
    validate_filename(&filename)?;

    let bytes = tokio::fs::read(path).await?;
    ingest_pdf(context, &filename, bytes).await
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub ingested: Vec<UploadResult>,
    pub skipped_files: Vec<SkippedPdf>,
}

pub async fn ingest_folder_best_effort(
    context: &AppContext,
    folder: &Path,
) -> Result<IngestionReport, IngestError> {
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut ingested = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        match ingest_path(context, &path).await {
            Ok(result) => ingested.push(result),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipped pdf");
                skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                })
            }
        }
    }

    Ok(IngestionReport {
        ingested,
        skipped_files,
    })
}

async fn embed_lines(
    context: &AppContext,
    lines: Vec<ExtractedLine>,
) -> Result<Vec<NewLine>, IngestError> {
    let dimensions = context.embedder.dimensions();
    let batch_size = context.config.ingestion.embed_batch_size.max(1);
    let mut rows = Vec::with_capacity(lines.len());

    for batch in lines.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|line| line.text.clone()).collect();
        let vectors = context.embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(EmbeddingError::Backend {
                status: 200,
                details: format!("expected {} embeddings, received {}", batch.len(), vectors.len()),
            }
            .into());
        }

        for (line, embedding) in batch.iter().zip(vectors) {
            if embedding.len() != dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimensions,
                    actual: embedding.len(),
                }
                .into());
            }
            rows.push(NewLine {
                page_number: line.page_number,
                line_number: line.line_number,
                text: line.text.clone(),
                embedding,
                is_table_row: line.is_table_row,
            });
        }
    }

    Ok(rows)
}

async fn commit(
    context: &AppContext,
    document: Document,
    rows: Vec<NewLine>,
) -> Result<(), IngestError> {
    let document_id = document.document_id.clone();
    let _guard = context.locks.acquire(&document_id).await;
    let policy = &context.config.retry;

    if !rows.is_empty() {
        with_retry(policy, "insert", || context.index.insert(&document_id, &rows)).await?;
    }

    let registered =
        with_retry(policy, "register", || context.registry.register(document.clone())).await;

    if let Err(register_error) = registered {
        match context.index.delete(&document_id).await {
            Ok(removed) => {
                warn!(%document_id, removed, error = %register_error, "registry write failed, lines rolled back");
            }
            Err(delete_error) => {
                error!(
                    %document_id,
                    error = %register_error,
                    rollback_error = %delete_error,
                    "registry write failed and lines could not be rolled back"
                );
            }
        }
        return Err(register_error.into());
    }

    Ok(())
}
