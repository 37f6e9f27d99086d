//! Embedding providers and the batched embedding stage.
//!
//! The pipeline only needs a vector per text; where it comes from sits
//! behind [`EmbeddingProvider`]. [`EmbeddingChain`] pairs a primary with an
//! optional fallback and embeds a whole corpus in bounded-concurrency
//! batches:
//!
//! 1. each batch goes to the primary in one request
//! 2. if that fails, every text in the batch is retried on its own, first on
//!    the primary (multi-text batches only), then on the fallback
//! 3. a text both providers fail on gets no vector and is marked degraded
//!
//! Results are placed by input position, never by completion order. Empty
//! texts are never sent; they get no vector and are not degraded.

#[cfg(feature = "api")]
mod api;
mod hashing;
mod normalize;
pub mod resilience;
mod settings;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::TraceError;

#[cfg(feature = "api")]
pub use api::ApiEmbeddingProvider;
pub use hashing::{DEFAULT_HASHING_DIMENSION, HashingEmbeddingProvider};
pub use normalize::cosine;
pub use settings::{
    ApiKind, ApiProviderConfig, DEFAULT_AZURE_API_VERSION, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_OPENAI_BASE_URL, EmbeddingSettings, ProviderSpec,
};

/// Per-request provider failure. Recovered by the chain, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("provider returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
    #[error("circuit breaker open for provider '{0}'")]
    CircuitOpen(String),
    #[error("provider returned an empty vector")]
    EmptyVector,
    #[error("{0}")]
    Provider(String),
}

impl EmbeddingError {
    /// Timeouts, transport failures, 408, 429 and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Transport(_) | EmbeddingError::Timeout => true,
            EmbeddingError::Status { status, .. } => {
                matches!(status, 408 | 429 | 500..=599)
            }
            _ => false,
        }
    }
}

/// Source of embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Vectors for a corpus, by input position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingSet {
    vectors: Vec<Option<Vec<f32>>>,
    degraded: Vec<bool>,
    dimension: Option<usize>,
    fallback_served: usize,
}

impl EmbeddingSet {
    /// No provider configured: nothing embedded, nothing degraded.
    pub fn unavailable(len: usize) -> Self {
        Self {
            vectors: vec![None; len],
            degraded: vec![false; len],
            dimension: None,
            fallback_served: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vector(&self, idx: usize) -> Option<&[f32]> {
        self.vectors.get(idx).and_then(|v| v.as_deref())
    }

    /// Both providers failed for this text.
    pub fn is_degraded(&self, idx: usize) -> bool {
        self.degraded.get(idx).copied().unwrap_or(false)
    }

    pub fn degraded_count(&self) -> usize {
        self.degraded.iter().filter(|d| **d).count()
    }

    pub fn embedded_count(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }

    pub fn fallback_served(&self) -> usize {
        self.fallback_served
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Cosine of two embedded texts; `None` if either has no vector.
    pub fn similarity(&self, a: usize, b: usize) -> Option<f32> {
        Some(cosine(self.vector(a)?, self.vector(b)?))
    }
}

enum ItemOutcome {
    Primary(Vec<f32>),
    Fallback(Vec<f32>),
    Failed,
}

/// Primary + fallback providers with batching limits.
#[derive(Clone)]
pub struct EmbeddingChain {
    primary: Option<Arc<dyn EmbeddingProvider>>,
    fallback: Option<Arc<dyn EmbeddingProvider>>,
    batch_size: usize,
    max_concurrency: usize,
    expected_dimension: Option<usize>,
}

impl std::fmt::Debug for EmbeddingChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingChain")
            .field("primary", &self.primary.as_ref().map(|p| p.name().to_string()))
            .field("fallback", &self.fallback.as_ref().map(|p| p.name().to_string()))
            .field("batch_size", &self.batch_size)
            .field("max_concurrency", &self.max_concurrency)
            .field("expected_dimension", &self.expected_dimension)
            .finish()
    }
}

impl Default for EmbeddingChain {
    fn default() -> Self {
        Self::disabled()
    }
}

impl EmbeddingChain {
    pub fn new(
        primary: Option<Arc<dyn EmbeddingProvider>>,
        fallback: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        // a lone fallback is promoted so there is always a primary to try first
        let (primary, fallback) = match primary {
            Some(p) => (Some(p), fallback),
            None => (fallback, None),
        };
        let defaults = EmbeddingSettings::default();
        Self {
            primary,
            fallback,
            batch_size: defaults.batch_size,
            max_concurrency: defaults.max_concurrency,
            expected_dimension: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, EmbeddingError> {
        settings.validate()?;
        Ok(Self::new(settings.primary.build()?, settings.fallback.build()?)
            .with_batch_size(settings.batch_size)
            .with_max_concurrency(settings.max_concurrency)
            .with_expected_dimension(settings.expected_dimension))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_expected_dimension(mut self, dimension: Option<usize>) -> Self {
        self.expected_dimension = dimension;
        self
    }

    pub fn is_available(&self) -> bool {
        self.primary.is_some()
    }

    /// Embed every non-empty text.
    ///
    /// Fails only when vectors of different lengths show up in one run.
    pub async fn embed_all(&self, texts: &[String]) -> Result<EmbeddingSet, TraceError> {
        let Some(primary) = self.primary.as_deref() else {
            return Ok(EmbeddingSet::unavailable(texts.len()));
        };
        let fallback = self.fallback.as_deref();
        let start = Instant::now();

        let pending: Vec<usize> = (0..texts.len())
            .filter(|&i| !texts[i].trim().is_empty())
            .collect();

        let batches: Vec<Vec<String>> = pending
            .chunks(self.batch_size)
            .map(|chunk| chunk.iter().map(|&i| texts[i].clone()).collect())
            .collect();
        let outcomes: Vec<Vec<ItemOutcome>> = stream::iter(batches)
            .map(|batch| embed_chunk(primary, fallback, batch))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut set = EmbeddingSet::unavailable(texts.len());
        let mut dimension = self.expected_dimension;
        for (idx, outcome) in pending.iter().zip(outcomes.into_iter().flatten()) {
            let vector = match outcome {
                ItemOutcome::Primary(v) => v,
                ItemOutcome::Fallback(v) => {
                    set.fallback_served += 1;
                    v
                }
                ItemOutcome::Failed => {
                    set.degraded[*idx] = true;
                    continue;
                }
            };
            match dimension {
                None => dimension = Some(vector.len()),
                Some(expected) if expected != vector.len() => {
                    return Err(TraceError::EmbeddingDimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
            }
            set.vectors[*idx] = Some(vector);
        }
        set.dimension = dimension;

        info!(
            provider = primary.name(),
            texts = texts.len(),
            embedded = set.embedded_count(),
            fallback_served = set.fallback_served,
            degraded = set.degraded_count(),
            elapsed_micros = start.elapsed().as_micros() as u64,
            "embedding_complete"
        );
        Ok(set)
    }
}

async fn embed_chunk(
    primary: &dyn EmbeddingProvider,
    fallback: Option<&dyn EmbeddingProvider>,
    batch: Vec<String>,
) -> Vec<ItemOutcome> {
    match primary.embed_batch(&batch).await {
        Ok(vectors) if vectors.len() == batch.len() && vectors.iter().all(|v| !v.is_empty()) => {
            return vectors.into_iter().map(ItemOutcome::Primary).collect();
        }
        Ok(vectors) => {
            warn!(
                provider = primary.name(),
                expected = batch.len(),
                actual = vectors.len(),
                "embedding_batch_malformed"
            );
        }
        Err(err) => {
            warn!(
                provider = primary.name(),
                batch = batch.len(),
                error = %err,
                "embedding_batch_failed"
            );
        }
    }

    let retry_primary = batch.len() > 1;
    let mut out = Vec::with_capacity(batch.len());
    for text in &batch {
        out.push(embed_one(primary, fallback, text, retry_primary).await);
    }
    out
}

async fn embed_one(
    primary: &dyn EmbeddingProvider,
    fallback: Option<&dyn EmbeddingProvider>,
    text: &str,
    retry_primary: bool,
) -> ItemOutcome {
    if retry_primary {
        match primary.embed(text).await {
            Ok(v) if !v.is_empty() => return ItemOutcome::Primary(v),
            Ok(_) => warn!(provider = primary.name(), "embedding_empty_vector"),
            Err(err) => warn!(provider = primary.name(), error = %err, "embedding_item_failed"),
        }
    }
    let Some(fallback) = fallback else {
        return ItemOutcome::Failed;
    };
    match fallback.embed(text).await {
        Ok(v) if !v.is_empty() => ItemOutcome::Fallback(v),
        Ok(_) => {
            warn!(provider = fallback.name(), "embedding_empty_vector");
            ItemOutcome::Failed
        }
        Err(err) => {
            warn!(provider = fallback.name(), error = %err, "embedding_fallback_failed");
            ItemOutcome::Failed
        }
    }
}
