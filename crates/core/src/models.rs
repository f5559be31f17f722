use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub document_id: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub line_count: u64,
    pub first_page: u32,
    pub last_page: u32,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedLine {
    pub page_number: u32,
    pub line_number: u64,
    pub text: String,
    pub is_table_row: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewLine {
    pub page_number: u32,
    pub line_number: u64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub is_table_row: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineRecord {
    pub document_id: String,
    pub page_number: u32,
    pub line_number: u64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub is_table_row: bool,
}

impl LineRecord {
    pub fn from_new(document_id: &str, line: NewLine) -> Self {
        Self {
            document_id: document_id.to_string(),
            page_number: line.page_number,
            line_number: line.line_number,
            text: line.text,
            embedding: line.embedding,
            is_table_row: line.is_table_row,
        }
    }
}

/// One nearest-neighbour row from the index. `ordinal` reflects insertion
/// order and is the last tie-breaker when ranking.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub record: LineRecord,
    pub distance: f64,
    pub ordinal: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub limit: usize,
    pub min_similarity: f64,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, limit: usize, min_similarity: f64) -> Self {
        Self {
            text: text.into(),
            limit,
            min_similarity,
        }
    }

    pub fn terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for token in self.text.split_whitespace() {
            let term = token
                .trim_matches(|ch: char| !ch.is_alphanumeric())
                .to_lowercase();
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub document_id: String,
    pub filename: String,
    pub page_number: u32,
    pub line_number: u64,
    pub text_fragment: String,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub response_time_ms: f64,
    pub number_of_results: usize,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResult {
    pub document_id: String,
    pub filename: String,
    pub lines_processed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub document_id: String,
    pub rows_removed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PurgeResult {
    pub documents_removed: u64,
    pub rows_removed: u64,
}
