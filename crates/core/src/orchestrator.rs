use crate::context::AppContext;
use crate::error::{EmbeddingError, SearchError};
use crate::models::{Document, SearchQuery, SearchResponse, SearchResult};
use crate::retry::with_retry;
use crate::scoring::{rank_order, ScoredHit, SimilarityScorer};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

pub struct SearchCoordinator {
    context: AppContext,
    scorer: SimilarityScorer,
}

impl SearchCoordinator {
    pub fn new(context: AppContext) -> Self {
        let scorer = SimilarityScorer::new(&context.config.scoring);
        Self { context, scorer }
    }

    pub fn query(&self, text: impl Into<String>) -> SearchQuery {
        let defaults = &self.context.config.search;
        SearchQuery::new(text, defaults.default_limit, defaults.default_min_similarity)
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();

        if query.text.trim().is_empty() {
            return Err(SearchError::InvalidQuery("query is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&query.min_similarity) {
            return Err(SearchError::InvalidQuery(format!(
                "min_similarity must be within [0, 1], got {}",
                query.min_similarity
            )));
        }
        if query.limit == 0 {
            return Ok(respond(query, started, Vec::new()));
        }

        let embedder = &self.context.embedder;
        let query_vector = embedder.embed(&query.text).await?;
        if query_vector.len() != embedder.dimensions() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: embedder.dimensions(),
                actual: query_vector.len(),
            }
            .into());
        }

        let pool = self.context.config.search.candidate_pool(query.limit);
        let index = &self.context.index;
        let candidates = with_retry(&self.context.config.retry, "search", || {
            index.search(&query_vector, pool)
        })
        .await?;
        let candidate_count = candidates.len();

        let terms = query.terms();
        let mut documents: HashMap<String, Option<Document>> = HashMap::new();
        let mut scored = Vec::with_capacity(candidates.len());

        for hit in candidates {
            let document_id = hit.record.document_id.clone();
            if !documents.contains_key(&document_id) {
                let document = self.context.registry.get(&document_id).await?;
                documents.insert(document_id.clone(), document);
            }
            // Rows of a document that is not registered are mid-commit or
            // mid-delete and stay hidden.
            if !matches!(documents.get(&document_id), Some(Some(_))) {
                continue;
            }

            let breakdown = self.scorer.score(hit.distance, &terms, &hit.record.text);
            if breakdown.score < query.min_similarity {
                continue;
            }
            scored.push(ScoredHit {
                hit,
                score: breakdown.score,
            });
        }

        scored.sort_by(rank_order);
        scored.truncate(query.limit);

        let results = scored
            .into_iter()
            .filter_map(|item| {
                let document = documents.get(&item.hit.record.document_id)?.as_ref()?;
                let record = item.hit.record;
                Some(SearchResult {
                    filename: document.filename.clone(),
                    document_id: record.document_id,
                    page_number: record.page_number,
                    line_number: record.line_number,
                    text_fragment: record.text,
                    similarity_score: item.score,
                })
            })
            .collect();

        let response = respond(query, started, results);
        debug!(
            query = %query.text,
            pool,
            candidates = candidate_count,
            results = response.number_of_results,
            response_time_ms = response.response_time_ms,
            "search completed"
        );
        Ok(response)
    }
}

fn respond(query: &SearchQuery, started: Instant, results: Vec<SearchResult>) -> SearchResponse {
    SearchResponse {
        query: query.text.clone(),
        response_time_ms: round_ms(started.elapsed().as_secs_f64() * 1000.0),
        number_of_results: results.len(),
        results,
    }
}

fn round_ms(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::embeddings::Embedder;
    use crate::error::StoreError;
    use crate::extractor::LopdfExtractor;
    use crate::models::{IndexHit, LineRecord, NewLine};
    use crate::stores::LocalRegistry;
    use crate::traits::{DocumentRegistry, LineIndex};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_id(&self) -> &str {
            "fixed"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.0, 0.0])
        }
    }

    #[derive(Default)]
    struct FakeLineIndex {
        hits: Vec<IndexHit>,
        requested: AtomicUsize,
    }

    #[async_trait]
    impl LineIndex for FakeLineIndex {
        async fn insert(&self, _document_id: &str, _rows: &[NewLine]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn search(&self, _query_vector: &[f32], k: usize) -> Result<Vec<IndexHit>, StoreError> {
            self.requested.store(k, Ordering::SeqCst);
            Ok(self.hits.iter().take(k).cloned().collect())
        }

        async fn delete(&self, _document_id: &str) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn list(&self, _document_id: &str) -> Result<Vec<LineRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn count(&self, _document_id: &str) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    fn hit(document_id: &str, line_number: u64, text: &str, distance: f64) -> IndexHit {
        IndexHit {
            record: LineRecord {
                document_id: document_id.to_string(),
                page_number: 1,
                line_number,
                text: text.to_string(),
                embedding: vec![0.0, 0.0],
                is_table_row: false,
            },
            distance,
            ordinal: line_number,
        }
    }

    async fn coordinator(hits: Vec<IndexHit>) -> (SearchCoordinator, Arc<FakeLineIndex>) {
        let index = Arc::new(FakeLineIndex {
            hits,
            ..FakeLineIndex::default()
        });
        let registry = Arc::new(LocalRegistry::in_memory());
        registry
            .register(Document {
                document_id: "doc-1".to_string(),
                filename: "site-report.pdf".to_string(),
                created_at: Utc::now(),
                line_count: 3,
                first_page: 1,
                last_page: 1,
                checksum: String::new(),
            })
            .await
            .expect("register should succeed");

        let config = EngineConfig::default();
        let extractor =
            LopdfExtractor::new(config.ingestion.clone()).expect("default options are valid");
        let context = AppContext::with_components(
            config,
            index.clone(),
            registry,
            Arc::new(FixedEmbedder),
            Arc::new(extractor),
        );
        (SearchCoordinator::new(context), index)
    }

    #[tokio::test]
    async fn boosted_line_outside_limit_is_promoted() -> Result<(), SearchError> {
        let (coordinator, index) = coordinator(vec![
            hit("doc-1", 1, "General site conditions", 0.5),
            hit("doc-1", 2, "Concrete curing schedule", 0.6),
            hit("doc-1", 3, "Pumping and removal of ponding water thru out the site", 0.89),
        ])
        .await;

        let response = coordinator
            .search(&SearchQuery::new("ponding water", 1, 0.0))
            .await?;

        assert!(index.requested.load(Ordering::SeqCst) > 1);
        assert_eq!(response.number_of_results, 1);
        assert_eq!(response.results[0].line_number, 3);
        assert_eq!(response.results[0].filename, "site-report.pdf");
        assert!((response.results[0].similarity_score - 0.8107).abs() < 1e-4);
        Ok(())
    }

    #[tokio::test]
    async fn lines_below_threshold_are_dropped() -> Result<(), SearchError> {
        let (coordinator, _) = coordinator(vec![
            hit("doc-1", 1, "Site runoff and liquid management systems", 1.25),
            hit("doc-1", 2, "Water drainage channels along the east boundary", 1.25),
        ])
        .await;

        let response = coordinator
            .search(&SearchQuery::new("water drainage", 10, 0.5))
            .await?;

        assert_eq!(response.number_of_results, 1);
        assert_eq!(response.results[0].line_number, 2);
        Ok(())
    }

    #[tokio::test]
    async fn unregistered_documents_are_hidden() -> Result<(), SearchError> {
        let (coordinator, _) = coordinator(vec![
            hit("doc-2", 1, "Pumping and removal of ponding water", 0.1),
            hit("doc-1", 2, "Ponding water near the gate", 0.2),
        ])
        .await;

        let response = coordinator
            .search(&SearchQuery::new("ponding water", 10, 0.0))
            .await?;

        assert!(response
            .results
            .iter()
            .all(|result| result.document_id == "doc-1"));
        assert_eq!(response.number_of_results, 1);
        Ok(())
    }

    #[tokio::test]
    async fn equal_scores_rank_by_distance_then_insertion() -> Result<(), SearchError> {
        let (coordinator, _) = coordinator(vec![
            hit("doc-1", 3, "water water", 0.3),
            hit("doc-1", 2, "water pump", 0.1),
            hit("doc-1", 1, "water seal", 0.1),
        ])
        .await;

        let response = coordinator
            .search(&SearchQuery::new("water", 10, 0.0))
            .await?;

        let lines: Vec<u64> = response.results.iter().map(|result| result.line_number).collect();
        assert_eq!(lines, vec![1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (coordinator, _) = coordinator(Vec::new()).await;
        let result = coordinator.search(&SearchQuery::new("   ", 10, 0.5)).await;
        assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn out_of_range_threshold_is_rejected() {
        let (coordinator, _) = coordinator(Vec::new()).await;
        let result = coordinator.search(&SearchQuery::new("water", 10, 1.5)).await;
        assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn zero_limit_returns_nothing() -> Result<(), SearchError> {
        let (coordinator, index) =
            coordinator(vec![hit("doc-1", 1, "Ponding water near the gate", 0.1)]).await;
        let response = coordinator.search(&SearchQuery::new("water", 0, 0.0)).await?;
        assert_eq!(response.number_of_results, 0);
        assert_eq!(index.requested.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn default_query_uses_configured_values() {
        let (coordinator, _) = coordinator(Vec::new()).await;
        let query = coordinator.query("water");
        assert_eq!(query.limit, 10);
        assert_eq!(query.min_similarity, 0.5);
    }

    #[test]
    fn response_time_is_rounded_to_two_decimals() {
        assert_eq!(round_ms(12.345_678), 12.35);
        assert_eq!(round_ms(0.001), 0.0);
    }
}
