use crate::config::EngineConfig;
use crate::embeddings::{embedder_from_config, Embedder};
use crate::error::IngestError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::stores::{LocalLineIndex, LocalRegistry};
use crate::traits::{DocumentRegistry, LineIndex};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

pub const INDEX_FILE: &str = "lines.json";
pub const REGISTRY_FILE: &str = "documents.json";

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<EngineConfig>,
    pub index: Arc<dyn LineIndex>,
    pub registry: Arc<dyn DocumentRegistry>,
    pub embedder: Arc<dyn Embedder>,
    pub extractor: Arc<dyn PdfExtractor>,
    pub locks: DocumentLocks,
}

impl AppContext {
    pub fn new(
        config: EngineConfig,
        index: Arc<dyn LineIndex>,
        registry: Arc<dyn DocumentRegistry>,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        let embedder = embedder_from_config(&config.embedding)?;
        let extractor = Arc::new(LopdfExtractor::new(config.ingestion.clone())?);

        info!(
            model = embedder.model_id(),
            dimensions = embedder.dimensions(),
            "application context ready"
        );
        Ok(Self::with_components(config, index, registry, embedder, extractor))
    }

    pub fn with_components(
        config: EngineConfig,
        index: Arc<dyn LineIndex>,
        registry: Arc<dyn DocumentRegistry>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn PdfExtractor>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            index,
            registry,
            embedder,
            extractor,
            locks: DocumentLocks::default(),
        }
    }

    pub async fn local(config: EngineConfig, data_dir: Option<&Path>) -> Result<Self, IngestError> {
        let dimensions = config.embedding.dimensions;
        let (index, registry) = match data_dir {
            Some(dir) => (
                LocalLineIndex::open(dir.join(INDEX_FILE), dimensions).await?,
                LocalRegistry::open(dir.join(REGISTRY_FILE)).await?,
            ),
            None => (LocalLineIndex::in_memory(dimensions), LocalRegistry::in_memory()),
        };
        Self::new(config, Arc::new(index), Arc::new(registry))
    }
}

/// One async mutex per document id, created on demand and dropped once no
/// task holds or waits on it.
#[derive(Clone, Default)]
pub struct DocumentLocks {
    locks: Arc<Mutex<HashMap<String, Weak<Mutex<()>>>>>,
}

impl DocumentLocks {
    pub async fn acquire(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| lock.strong_count() > 0);
            match locks.get(document_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(document_id.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        let locks = self.locks.lock().await;
        locks.values().filter(|lock| lock.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_document_is_serialized() {
        let locks = DocumentLocks::default();
        let guard = locks.acquire("doc-1").await;

        let waiting = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("doc-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiter should get the lock")
            .expect("waiter should not panic");
    }

    #[tokio::test]
    async fn other_documents_are_not_blocked() {
        let locks = DocumentLocks::default();
        let _held = locks.acquire("doc-1").await;
        tokio::time::timeout(Duration::from_secs(1), locks.acquire("doc-2"))
            .await
            .expect("unrelated document should lock immediately");
    }

    #[tokio::test]
    async fn released_locks_are_forgotten() {
        let locks = DocumentLocks::default();
        drop(locks.acquire("doc-1").await);
        drop(locks.acquire("doc-2").await);
        assert_eq!(locks.tracked().await, 0);
    }

    #[tokio::test]
    async fn local_context_uses_builtin_embedder() -> Result<(), IngestError> {
        let context = AppContext::local(EngineConfig::default(), None).await?;
        assert_eq!(context.embedder.dimensions(), 384);
        Ok(())
    }
}
