use crate::config::{EmbeddingConfig, DEFAULT_EMBEDDING_MODEL};
use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Maps text into one fixed-dimension vector space. The same instance must
/// embed both indexed lines and queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let embedder: Arc<dyn Embedder> = if config.model == DEFAULT_EMBEDDING_MODEL {
        Arc::new(CharacterNgramEmbedder {
            dimensions: config.dimensions,
        })
    } else {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            EmbeddingError::ModelUnavailable(format!(
                "model {} needs an embedding endpoint",
                config.model
            ))
        })?;
        Arc::new(RemoteEmbedder::new(
            endpoint,
            &config.model,
            config.dimensions,
            config.api_key.clone(),
        )?)
    };

    if config.serialize_calls {
        return Ok(Arc::new(SerializedEmbedder::new(embedder)));
    }
    Ok(embedder)
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: crate::config::DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        DEFAULT_EMBEDDING_MODEL
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl RemoteEmbedder {
    pub fn new(
        endpoint: &str,
        model: &str,
        dimensions: usize,
        api_key: Option<String>,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", endpoint.trim_end_matches('/')),
            model: model.to_string(),
            dimensions,
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| EmbeddingError::Backend {
            status: 200,
            details: "response carried no embedding".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_connect() || error.is_timeout() {
                EmbeddingError::ModelUnavailable(error.to_string())
            } else {
                EmbeddingError::Http(error)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(EmbeddingError::ModelUnavailable(format!("{status}: {details}")));
            }
            return Err(EmbeddingError::Backend {
                status: status.as_u16(),
                details,
            });
        }

        let payload: EmbeddingResponse = response.json().await?;
        let vectors = order_embeddings(payload, texts.len(), self.dimensions)?;
        debug!(model = %self.model, count = vectors.len(), "remote embeddings received");
        Ok(vectors)
    }
}

fn order_embeddings(
    mut payload: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if payload.data.len() != expected {
        return Err(EmbeddingError::Backend {
            status: 200,
            details: format!(
                "expected {expected} embeddings, received {}",
                payload.data.len()
            ),
        });
    }

    payload.data.sort_by_key(|item| item.index);
    payload
        .data
        .into_iter()
        .map(|item| {
            if item.embedding.len() != dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimensions,
                    actual: item.embedding.len(),
                });
            }
            Ok(item.embedding)
        })
        .collect()
}

/// Lets one call at a time reach the wrapped embedder. Use it for models
/// that are not reentrant; concurrent callers queue on the gate.
pub struct SerializedEmbedder {
    inner: Arc<dyn Embedder>,
    gate: Mutex<()>,
}

impl SerializedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Embedder for SerializedEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let _guard = self.gate.lock().await;
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let _guard = self.gate.lock().await;
        self.inner.embed_batch(texts).await
    }
}
