use crate::error::StoreError;
use crate::models::{Document, IndexHit, LineRecord, NewLine};
use crate::traits::{squared_l2, DocumentRegistry, LineIndex};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    ordinal: u64,
    record: LineRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexSnapshot {
    next_ordinal: u64,
    rows: Vec<StoredRow>,
}

/// Brute-force line index held in memory. With a snapshot path, every
/// mutation is written to disk before it becomes visible; a failed write
/// leaves the index unchanged. Readers never wait on a snapshot write.
pub struct LocalLineIndex {
    dimensions: usize,
    path: Option<PathBuf>,
    state: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl LocalLineIndex {
    pub fn in_memory(dimensions: usize) -> Self {
        Self {
            dimensions,
            path: None,
            state: RwLock::new(Arc::default()),
            writer: Mutex::new(()),
        }
    }

    pub async fn open(path: impl Into<PathBuf>, dimensions: usize) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot: IndexSnapshot = read_snapshot(&path).await?.unwrap_or_default();

        if let Some(row) = snapshot.rows.first() {
            if row.record.embedding.len() != dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: dimensions,
                    actual: row.record.embedding.len(),
                });
            }
        }

        debug!(path = %path.display(), rows = snapshot.rows.len(), "line index opened");
        Ok(Self {
            dimensions,
            path: Some(path),
            state: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    async fn current(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&*self.state.read().await)
    }

    async fn commit(&self, next: IndexSnapshot) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            write_snapshot(path, &next).await?;
        }
        *self.state.write().await = Arc::new(next);
        Ok(())
    }
}

#[async_trait]
impl LineIndex for LocalLineIndex {
    async fn insert(&self, document_id: &str, rows: &[NewLine]) -> Result<(), StoreError> {
        for row in rows {
            self.check_dimensions(&row.embedding)?;
        }
        if rows.is_empty() {
            return Ok(());
        }

        let _writer = self.writer.lock().await;
        let mut next = IndexSnapshot::clone(&*self.current().await);
        for row in rows {
            let ordinal = next.next_ordinal;
            next.next_ordinal += 1;
            next.rows.push(StoredRow {
                ordinal,
                record: LineRecord::from_new(document_id, row.clone()),
            });
        }
        self.commit(next).await
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<IndexHit>, StoreError> {
        self.check_dimensions(query_vector)?;
        let state = self.current().await;

        let mut scored: Vec<(f64, &StoredRow)> = state
            .rows
            .iter()
            .map(|row| (squared_l2(query_vector, &row.record.embedding), row))
            .collect();
        scored.sort_by(|left, right| {
            left.0
                .total_cmp(&right.0)
                .then(left.1.ordinal.cmp(&right.1.ordinal))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, row)| IndexHit {
                record: row.record.clone(),
                distance,
                ordinal: row.ordinal,
            })
            .collect())
    }

    async fn delete(&self, document_id: &str) -> Result<u64, StoreError> {
        let _writer = self.writer.lock().await;
        let current = self.current().await;
        let kept: Vec<StoredRow> = current
            .rows
            .iter()
            .filter(|row| row.record.document_id != document_id)
            .cloned()
            .collect();

        let removed = (current.rows.len() - kept.len()) as u64;
        if removed == 0 {
            return Ok(0);
        }

        self.commit(IndexSnapshot {
            next_ordinal: current.next_ordinal,
            rows: kept,
        })
        .await?;
        Ok(removed)
    }

    async fn list(&self, document_id: &str) -> Result<Vec<LineRecord>, StoreError> {
        let state = self.current().await;
        let mut records: Vec<LineRecord> = state
            .rows
            .iter()
            .filter(|row| row.record.document_id == document_id)
            .map(|row| row.record.clone())
            .collect();
        records.sort_by_key(|record| record.line_number);
        Ok(records)
    }

    async fn count(&self, document_id: &str) -> Result<u64, StoreError> {
        let state = self.current().await;
        Ok(state
            .rows
            .iter()
            .filter(|row| row.record.document_id == document_id)
            .count() as u64)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistrySnapshot {
    documents: BTreeMap<String, Document>,
}

pub struct LocalRegistry {
    path: Option<PathBuf>,
    state: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
}

impl LocalRegistry {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(Arc::default()),
            writer: Mutex::new(()),
        }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot: RegistrySnapshot = read_snapshot(&path).await?.unwrap_or_default();
        debug!(path = %path.display(), documents = snapshot.documents.len(), "registry opened");
        Ok(Self {
            path: Some(path),
            state: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    async fn current(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&*self.state.read().await)
    }

    async fn commit(&self, next: RegistrySnapshot) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            write_snapshot(path, &next).await?;
        }
        *self.state.write().await = Arc::new(next);
        Ok(())
    }
}

#[async_trait]
impl DocumentRegistry for LocalRegistry {
    async fn register(&self, document: Document) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        let mut next = RegistrySnapshot::clone(&*self.current().await);
        next.documents.insert(document.document_id.clone(), document);
        self.commit(next).await
    }

    async fn get(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.current().await.documents.get(document_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Document>, StoreError> {
        let state = self.current().await;
        let mut documents: Vec<Document> = state.documents.values().cloned().collect();
        documents.sort_by(|left, right| {
            right
                .created_at
                .cmp(&left.created_at)
                .then_with(|| left.document_id.cmp(&right.document_id))
        });
        Ok(documents)
    }

    async fn remove(&self, document_id: &str) -> Result<bool, StoreError> {
        let _writer = self.writer.lock().await;
        let mut next = RegistrySnapshot::clone(&*self.current().await);
        if next.documents.remove(document_id).is_none() {
            return Ok(false);
        }
        self.commit(next).await?;
        Ok(true)
    }
}

async fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(StoreError::Io(error)),
    }
}

/// Writes next to the target and renames over it, so a crash leaves either
/// the old or the new snapshot.
async fn write_snapshot<T: Serialize>(path: &Path, snapshot: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec(snapshot)?;
    let staging = path.with_extension("tmp");
    tokio::fs::write(&staging, bytes).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}
