//! **castellan-embedder** – deterministic text → fixed-dimension vector
//! embedding for Castellan's vector index (C3).
//!
//! The crate is intentionally minimal and pluggable, mirroring the
//! `Llm`/`SentenceEncoder` split of the reference embedder crate: an
//! [`Embedder`] trait abstracts any backend (hashing, local transformer,
//! remote API), and [`HashingEmbedder`] is the zero-dependency reference
//! implementation used by default and in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use ndarray::Array1;

/// Fixed embedding dimension used throughout the vector store (§4.2, §4.3).
pub const EMBEDDING_DIM: usize = 256;

/// Errors an [`Embedder`] backend can raise.
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    /// The backend could not be reached or returned a transport-level
    /// failure. Per §4.2/§4.14 this is recoverable: the orchestrator skips
    /// the LLM path for this event but continues the deterministic and
    /// correlation paths.
    #[error("embedder unavailable: {0}")]
    Unavailable(String),
}

/// Embed text into a dense vector of fixed dimension [`EMBEDDING_DIM`].
///
/// Implementations MUST be deterministic for a given provider/model
/// configuration (§4.2): the same input text always yields the same
/// vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text`, returning a vector of length [`EMBEDDING_DIM`].
    ///
    /// # Errors
    /// Returns [`EmbedderError::Unavailable`] on any transport-level
    /// failure.
    async fn embed(&self, text: &str) -> Result<Array1<f32>, EmbedderError>;
}

/// Deterministic, dependency-free embedder used as the default backend and
/// in tests. Hashes overlapping token shingles into embedding dimensions,
/// giving semantically similar short strings (shared substrings) partial
/// vector overlap without requiring a model download.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashingEmbedder;

impl HashingEmbedder {
    /// Construct the hashing embedder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn hash_token(token: &str) -> u64 {
        // FNV-1a, chosen for speed and determinism across platforms; this
        // is not a cryptographic hash and must never be used as one.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
        }
        hash
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Array1<f32>, EmbedderError> {
        let mut vector = vec![0f32; EMBEDDING_DIM];
        let normalized = text.to_lowercase();
        let tokens: Vec<&str> = normalized.split_whitespace().collect();

        if tokens.is_empty() {
            return Ok(Array1::from(vector));
        }

        for window in tokens.windows(2.min(tokens.len()).max(1)) {
            let shingle = window.join(" ");
            let hash = Self::hash_token(&shingle);
            let bucket = (hash as usize) % EMBEDDING_DIM;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        for token in &tokens {
            let hash = Self::hash_token(token);
            let bucket = (hash as usize) % EMBEDDING_DIM;
            let sign = if (hash >> 62) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * 0.5;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(Array1::from(vector))
    }
}

#[cfg(feature = "openai")]
mod openai_embedder {
    use super::{Array1, Embedder, EmbedderError, EMBEDDING_DIM};
    use async_trait::async_trait;
    use reqwest::Client;

    /// Remote embeddings backend speaking an OpenAI-compatible
    /// `/v1/embeddings` endpoint.
    pub struct OpenAiEmbedder {
        api_key: String,
        base_url: String,
        model: String,
        http: Client,
    }

    impl OpenAiEmbedder {
        /// Construct a client for `base_url` (e.g. `"https://api.openai.com"`).
        #[must_use]
        pub fn new(api_key: String, base_url: String, model: String) -> Self {
            Self { api_key, base_url, model, http: Client::new() }
        }
    }

    #[async_trait]
    impl Embedder for OpenAiEmbedder {
        async fn embed(&self, text: &str) -> Result<Array1<f32>, EmbedderError> {
            #[derive(serde::Serialize)]
            struct Req<'a> {
                model: &'a str,
                input: &'a str,
            }
            #[derive(serde::Deserialize)]
            struct Data {
                embedding: Vec<f32>,
            }
            #[derive(serde::Deserialize)]
            struct Resp {
                data: Vec<Data>,
            }

            let resp: Resp = self
                .http
                .post(format!("{}/v1/embeddings", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&Req { model: &self.model, input: text })
                .send()
                .await
                .map_err(|e| EmbedderError::Unavailable(e.to_string()))?
                .json()
                .await
                .map_err(|e| EmbedderError::Unavailable(e.to_string()))?;

            let vector = resp
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| EmbedderError::Unavailable("empty embeddings response".to_string()))?;

            if vector.len() != EMBEDDING_DIM {
                return Err(EmbedderError::Unavailable(format!(
                    "unexpected embedding dimension: {} != {EMBEDDING_DIM}",
                    vector.len()
                )));
            }
            Ok(Array1::from(vector))
        }
    }
}
#[cfg(feature = "openai")]
pub use openai_embedder::OpenAiEmbedder;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let embedder = HashingEmbedder::new();
        let a = embedder.embed("An account failed to log on").await.unwrap();
        let b = embedder.embed("An account failed to log on").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn embedding_has_fixed_dimension() {
        let embedder = HashingEmbedder::new();
        let v = embedder.embed("short").await.unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn empty_text_yields_zero_vector() {
        let embedder = HashingEmbedder::new();
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn distinct_text_yields_distinct_vectors() {
        let embedder = HashingEmbedder::new();
        let a = embedder.embed("logon success for admin").await.unwrap();
        let b = embedder.embed("process created cmd.exe").await.unwrap();
        assert_ne!(a, b);
    }
}
