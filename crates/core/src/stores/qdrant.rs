use crate::error::StoreError;
use crate::models::{IndexHit, LineRecord, NewLine};
use crate::traits::LineIndex;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: usize = 256;

/// Line index backed by a Qdrant collection using Euclid distance. Qdrant
/// reports plain Euclidean distance; hits are squared on the way out.
pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, StoreError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            endpoint,
            collection: collection.into(),
            client,
            vector_size,
        })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self
            .endpoint
            .join(&format!("collections/{}{}", self.collection, path))?)
    }

    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.url("")?).send().await?;

        if response.status() == StatusCode::OK {
            let info: Value = response.json().await?;
            let size = info
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
                .unwrap_or(self.vector_size as u64) as usize;
            if size != self.vector_size {
                return Err(StoreError::DimensionMismatch {
                    expected: self.vector_size,
                    actual: size,
                });
            }
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response).await);
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({
                "vectors": {"size": self.vector_size, "distance": "Euclid"}
            }))
            .send()
            .await?;
        check(response).await?;

        let response = self
            .client
            .put(self.url("/index?wait=true")?)
            .json(&json!({"field_name": "document_id", "field_schema": "keyword"}))
            .send()
            .await?;
        check(response).await?;

        debug!(collection = %self.collection, size = self.vector_size, "qdrant collection created");
        Ok(())
    }

    async fn count_exact(&self, document_id: &str) -> Result<u64, StoreError> {
        let response = self
            .client
            .post(self.url("/points/count")?)
            .json(&json!({"filter": document_filter(document_id), "exact": true}))
            .send()
            .await?;
        let parsed: Value = check(response).await?.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed("count response has no result.count"))
    }
}

#[async_trait]
impl LineIndex for QdrantStore {
    async fn insert(&self, document_id: &str, rows: &[NewLine]) -> Result<(), StoreError> {
        let base_ordinal = (Utc::now().timestamp_millis().max(0) as u64).saturating_mul(1_000_000);
        let points = rows
            .iter()
            .enumerate()
            .map(|(position, row)| {
                if row.embedding.len() != self.vector_size {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.vector_size,
                        actual: row.embedding.len(),
                    });
                }
                Ok(json!({
                    "id": point_id(document_id, row.line_number).to_string(),
                    "vector": row.embedding,
                    "payload": {
                        "document_id": document_id,
                        "page_number": row.page_number,
                        "line_number": row.line_number,
                        "text": row.text,
                        "is_table_row": row.is_table_row,
                        "ordinal": base_ordinal + position as u64,
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        // One upsert request is applied by Qdrant as a single operation.
        let response = self
            .client
            .put(self.url("/points?wait=true")?)
            .json(&json!({ "points": points }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<IndexHit>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.url("/points/search")?)
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
                "with_vector": true,
            }))
            .send()
            .await?;
        let parsed: Value = check(response).await?.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        hits.iter().map(point_to_hit).collect()
    }

    async fn delete(&self, document_id: &str) -> Result<u64, StoreError> {
        let existing = self.count_exact(document_id).await?;
        if existing == 0 {
            return Ok(0);
        }

        let response = self
            .client
            .post(self.url("/points/delete?wait=true")?)
            .json(&json!({"filter": document_filter(document_id)}))
            .send()
            .await?;
        check(response).await?;
        Ok(existing)
    }

    async fn list(&self, document_id: &str) -> Result<Vec<LineRecord>, StoreError> {
        let mut records = Vec::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "filter": document_filter(document_id),
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": true,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(self.url("/points/scroll")?)
                .json(&body)
                .send()
                .await?;
            let parsed: Value = check(response).await?.json().await?;

            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for point in &points {
                records.push(point_to_record(point)?);
            }

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() || points.is_empty() {
                break;
            }
        }

        records.sort_by_key(|record| record.line_number);
        Ok(records)
    }

    async fn count(&self, document_id: &str) -> Result<u64, StoreError> {
        self.count_exact(document_id).await
    }
}

/// Stable per line, so a retried upsert overwrites instead of duplicating.
fn point_id(document_id: &str, line_number: u64) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{document_id}:{line_number}").as_bytes(),
    )
}

fn document_filter(document_id: &str) -> Value {
    json!({"must": [{"key": "document_id", "match": {"value": document_id}}]})
}

async fn check(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(backend_error(response).await)
    }
}

async fn backend_error(response: Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let details = format!("{status}: {body}");
    if status.is_server_error() {
        StoreError::Unavailable(details)
    } else {
        StoreError::Backend {
            backend: BACKEND.to_string(),
            details,
        }
    }
}

fn malformed(details: &str) -> StoreError {
    StoreError::Backend {
        backend: BACKEND.to_string(),
        details: details.to_string(),
    }
}

fn point_to_hit(point: &Value) -> Result<IndexHit, StoreError> {
    let distance = point
        .pointer("/score")
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed("search hit has no score"))?;
    let ordinal = point
        .pointer("/payload/ordinal")
        .and_then(Value::as_u64)
        .unwrap_or_default();

    Ok(IndexHit {
        record: point_to_record(point)?,
        distance: distance * distance,
        ordinal,
    })
}

fn point_to_record(point: &Value) -> Result<LineRecord, StoreError> {
    let text_field = |name: &str| {
        point
            .pointer(&format!("/payload/{name}"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| malformed(&format!("point payload has no {name}")))
    };
    let number_field = |name: &str| {
        point
            .pointer(&format!("/payload/{name}"))
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed(&format!("point payload has no {name}")))
    };

    let embedding = point
        .pointer("/vector")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default();

    Ok(LineRecord {
        document_id: text_field("document_id")?,
        page_number: number_field("page_number")? as u32,
        line_number: number_field("line_number")?,
        text: text_field("text")?,
        embedding,
        is_table_row: point
            .pointer("/payload/is_table_row")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}
