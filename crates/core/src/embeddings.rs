use crate::error::SearchError;
use crate::http::{endpoint_url, transport_error};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Maps text to L2-normalized vectors of a fixed dimension per model.
pub trait Embedder: Send + Sync {
    /// Identifier recorded in the index config. Vectors from different ids are incomparable.
    fn model_id(&self) -> &str;

    /// Output dimension, when known without calling the model.
    fn dimensions(&self) -> Option<usize>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| SearchError::BackendResponse {
                backend: self.model_id().to_string(),
                details: "no vector returned for query".to_string(),
            })
    }
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Hashed character trigrams. Deterministic and offline.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    dimensions: usize,
    model: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model: format!("char-ngram-3/{dimensions}"),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

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

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings from a local Ollama server (`POST /api/embed`).
pub struct OllamaEmbedder {
    client: Client,
    url: Url,
    model: String,
    model_id: String,
}

impl OllamaEmbedder {
    pub fn new(config: &OllamaConfig) -> Result<Self, SearchError> {
        let url = endpoint_url(&config.endpoint, "api/embed")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            model: config.model.clone(),
            model_id: format!("ollama/{}", config.model),
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> Option<usize> {
        None
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.url.clone())
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|error| transport_error("ollama", error))?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("embed request returned {}", response.status()),
            });
        }

        let payload: EmbedResponse = response.json()?;
        if payload.embeddings.len() != texts.len() {
            return Err(SearchError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    payload.embeddings.len()
                ),
            });
        }

        Ok(payload
            .embeddings
            .into_iter()
            .map(|mut vector| {
                l2_normalize(&mut vector);
                vector
            })
            .collect())
    }
}

/// Embedding backend chosen once at startup.
#[derive(Debug, Clone)]
pub enum EmbeddingBackend {
    CharNgram { dimensions: usize },
    Ollama(OllamaConfig),
}

impl EmbeddingBackend {
    pub fn into_embedder(self) -> Result<Arc<dyn Embedder>, SearchError> {
        Ok(match self {
            EmbeddingBackend::CharNgram { dimensions } => {
                Arc::new(CharacterNgramEmbedder::new(dimensions))
            }
            EmbeddingBackend::Ollama(config) => Arc::new(OllamaEmbedder::new(&config)?),
        })
    }
}
