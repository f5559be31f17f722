use crate::context::AppContext;
use crate::error::DocumentError;
use crate::models::{DeleteResult, Document, LineRecord, PurgeResult};
use crate::retry::with_retry;
use tracing::{info, warn};

pub async fn list_documents(context: &AppContext) -> Result<Vec<Document>, DocumentError> {
    Ok(context.registry.list().await?)
}

pub async fn get_document(context: &AppContext, document_id: &str) -> Result<Document, DocumentError> {
    context
        .registry
        .get(document_id)
        .await?
        .ok_or_else(|| DocumentError::NotFound(document_id.to_string()))
}

pub async fn document_lines(
    context: &AppContext,
    document_id: &str,
) -> Result<Vec<LineRecord>, DocumentError> {
    Ok(context.index.list(document_id).await?)
}

/// Removes the document's lines first and drops the registry entry only
/// once the index reports none left. Deleting an unknown id removes
/// nothing and is not an error; repeating a half-failed delete finishes it.
pub async fn delete_document(
    context: &AppContext,
    document_id: &str,
) -> Result<DeleteResult, DocumentError> {
    let _guard = context.locks.acquire(document_id).await;
    let policy = &context.config.retry;

    let rows_removed = with_retry(policy, "delete", || context.index.delete(document_id)).await?;
    let remaining = with_retry(policy, "count", || context.index.count(document_id)).await?;
    if remaining > 0 {
        warn!(document_id, rows_removed, remaining, "lines left behind after delete");
        return Err(DocumentError::Inconsistent {
            document_id: document_id.to_string(),
            remaining,
        });
    }

    let was_registered =
        with_retry(policy, "unregister", || context.registry.remove(document_id)).await?;

    info!(document_id, rows_removed, was_registered, "document deleted");
    Ok(DeleteResult {
        document_id: document_id.to_string(),
        rows_removed,
    })
}

pub async fn delete_all_documents(context: &AppContext) -> Result<PurgeResult, DocumentError> {
    let documents = context.registry.list().await?;
    let mut purged = PurgeResult::default();

    for document in documents {
        let deleted = delete_document(context, &document.document_id).await?;
        purged.documents_removed += 1;
        purged.rows_removed += deleted.rows_removed;
    }

    info!(
        documents = purged.documents_removed,
        rows = purged.rows_removed,
        "all documents deleted"
    );
    Ok(purged)
}
