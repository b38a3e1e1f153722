use async_trait::async_trait;
use scour_core::{Result, ScourError};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Trait for generating text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts. Outputs are L2-normalized.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of the output embeddings.
    fn dimensions(&self) -> usize;

    /// Provider name.
    fn name(&self) -> &str;
}

/// Embeddings from a local inference server (OpenAI-compatible
/// `/v1/embeddings` or Ollama `/api/embeddings`). The service refuses to
/// depend on remote model downloads: the endpoint must be local unless the
/// operator explicitly allows otherwise (enforced by config validation).
pub struct LocalEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    /// Encode calls are serialized so a single-threaded model server never
    /// sees concurrent requests from one scour process.
    encode_lock: Mutex<()>,
}

impl LocalEmbedding {
    /// Connect to the endpoint and probe the model dimension with a single
    /// embed call. Fails when the endpoint is unreachable — embedding is a
    /// startup requirement, not a lazily-discovered one.
    pub async fn connect(base_url: String, model: String) -> Result<Self> {
        let provider = Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            dims: 0,
            encode_lock: Mutex::new(()),
        };
        let probe = provider.embed_batch(&["dimension probe"]).await?;
        let dims = probe
            .first()
            .map(|v| v.len())
            .filter(|d| *d > 0)
            .ok_or_else(|| {
                ScourError::Embedding("could not determine embedding dimension from the model".into())
            })?;
        info!(model = %provider.model, dims, "embedding model ready");
        Ok(Self { dims, ..provider })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": &self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| ScourError::Embedding(format!("embedding request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ScourError::Embedding(format!("embedding HTTP {status}: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ScourError::Embedding(format!("embedding parse error: {e}")))?;

        let embeddings: Vec<Vec<f32>> = data["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        item["embedding"].as_array().map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_f64().map(|f| f as f32))
                                .collect()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(embeddings.into_iter().map(|v| l2_normalize(v)).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        debug!(model = %self.model, count = texts.len(), "generating embeddings");
        let _guard = self.encode_lock.lock().await;
        self.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// L2-normalize a vector in place. Zero vectors pass through unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Deterministic embedder for tests: hashes words into a fixed-dimension
/// bag-of-words vector, L2-normalized, so similar texts land near each
/// other without any model.
pub struct MockEmbedding {
    dims: usize,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; self.dims];
                for word in text.to_lowercase().split_whitespace() {
                    let mut hash: u64 = 1469598103934665603;
                    for b in word.bytes() {
                        hash ^= b as u64;
                        hash = hash.wrapping_mul(1099511628211);
                    }
                    v[(hash % self.dims as u64) as usize] += 1.0;
                }
                l2_normalize(v)
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalization() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        // zero vector survives
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn mock_embedding_is_deterministic_and_normalized() {
        let embedder = MockEmbedding::new(64);
        let a = embedder.embed(&["quantum computing basics"]).await.unwrap();
        let b = embedder.embed(&["quantum computing basics"]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let embedder = MockEmbedding::new(128);
        let vs = embedder
            .embed(&[
                "quantum computing hardware",
                "quantum computing software",
                "medieval cooking recipes",
            ])
            .await
            .unwrap();
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&vs[0], &vs[1]) > dot(&vs[0], &vs[2]));
    }
}
