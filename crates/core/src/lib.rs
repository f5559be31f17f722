pub mod config;
pub mod context;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod retry;
pub mod scoring;
pub mod stores;
pub mod traits;

pub use config::{
    EmbeddingConfig, EngineConfig, IngestionOptions, RetryPolicy, ScoringConfig, SearchOptions,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
};
pub use context::{AppContext, DocumentLocks};
pub use documents::{
    delete_all_documents, delete_document, document_lines, get_document, list_documents,
};
pub use embeddings::{
    embedder_from_config, CharacterNgramEmbedder, Embedder, RemoteEmbedder, SerializedEmbedder,
};
pub use error::{
    ConfigError, DocumentError, EmbeddingError, ExtractionError, IngestError, SearchError,
    StoreError,
};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use ingest::{
    digest_bytes, discover_pdf_files, ingest_folder_best_effort, ingest_path, ingest_pdf,
    validate_filename, IngestionReport, SkippedPdf,
};
pub use models::{
    DeleteResult, Document, ExtractedLine, IndexHit, LineRecord, NewLine, PurgeResult,
    SearchQuery, SearchResponse, SearchResult, UploadResult,
};
pub use normalizer::{filter_lines, normalize_whitespace};
pub use orchestrator::SearchCoordinator;
pub use scoring::{ScoreBreakdown, SimilarityScorer};
pub use stores::{LocalLineIndex, LocalRegistry, QdrantStore};
pub use traits::{DocumentRegistry, LineIndex};
