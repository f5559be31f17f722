use crate::error::StoreError;
use crate::models::{Document, IndexHit, LineRecord, NewLine};
use async_trait::async_trait;

/// Vector index of line records, keyed by document id. Each call is atomic
/// with respect to other calls: readers see a document's rows either all
/// present or all absent.
#[async_trait]
pub trait LineIndex: Send + Sync {
    /// Writes every row under `document_id`, or none of them.
    async fn insert(&self, document_id: &str, rows: &[NewLine]) -> Result<(), StoreError>;

    /// Up to `k` rows ordered by ascending squared Euclidean distance.
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<IndexHit>, StoreError>;

    /// Removes all rows of the document and returns how many were removed.
    /// Unknown ids remove nothing.
    async fn delete(&self, document_id: &str) -> Result<u64, StoreError>;

    async fn list(&self, document_id: &str) -> Result<Vec<LineRecord>, StoreError>;

    async fn count(&self, document_id: &str) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    async fn register(&self, document: Document) -> Result<(), StoreError>;

    async fn get(&self, document_id: &str) -> Result<Option<Document>, StoreError>;

    async fn list(&self) -> Result<Vec<Document>, StoreError>;

    async fn remove(&self, document_id: &str) -> Result<bool, StoreError>;
}

pub fn squared_l2(left: &[f32], right: &[f32]) -> f64 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = f64::from(*a) - f64::from(*b);
            delta * delta
        })
        .sum()
}
