use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether a text is embedded as stored content or as a search query.
/// Forwarded to the backend as the `input_type` field; asymmetric models
/// use it, symmetric backends ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Passage,
    Query,
}

impl EmbedMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passage => "passage",
            Self::Query => "query",
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("embedding request failed: {0}")]
    Transport(reqwest::Error),

    #[error("embedding call timed out after {} ms", timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("embedding backend returned {got} vectors for {want} inputs")]
    Cardinality { want: usize, got: usize },

    #[error("embedding vectors disagree on dimension: first has {first}, item {index} has {got}")]
    Dimension {
        first: usize,
        index: usize,
        got: usize,
    },

    #[error("embedding backend returned an empty vector")]
    EmptyVector,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    input_type: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed a single text. Delegates to the batched call so both paths
    /// share one request shape and one validation path.
    pub async fn embed_one(
        &self,
        text: &str,
        mode: EmbedMode,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()], mode).await?;
        vectors.pop().ok_or(EmbeddingError::Cardinality {
            want: 1,
            got: 0,
        })
    }

    /// Embed a batch of texts in a single request. The response must have
    /// the same cardinality and order as the input, and every vector must
    /// share one dimension; anything else is a shape failure.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
            input_type: mode.as_str(),
        };

        let response = self
            .http
            .post(format!("{}/v1/embeddings", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|error| self.classify_transport(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let payload: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|error| self.classify_transport(error))?;

        if payload.data.len() != texts.len() {
            return Err(EmbeddingError::Cardinality {
                want: texts.len(),
                got: payload.data.len(),
            });
        }

        let vectors: Vec<Vec<f32>> = payload
            .data
            .into_iter()
            .map(|datum| datum.embedding)
            .collect();

        let first = vectors[0].len();
        if first == 0 {
            return Err(EmbeddingError::EmptyVector);
        }
        for (index, vector) in vectors.iter().enumerate() {
            if vector.len() != first {
                return Err(EmbeddingError::Dimension {
                    first,
                    index,
                    got: vector.len(),
                });
            }
        }

        tracing::debug!(inputs = texts.len(), dim = first, "embedded batch");
        Ok(vectors)
    }

    fn classify_transport(&self, error: reqwest::Error) -> EmbeddingError {
        if error.is_timeout() {
            EmbeddingError::Timeout {
                timeout: self.timeout,
            }
        } else {
            EmbeddingError::Transport(error)
        }
    }
}
