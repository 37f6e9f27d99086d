#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqtrace::embed::HashingEmbeddingProvider;
use reqtrace::{
    DomainLexicon, EmbeddingChain, EmbeddingError, EmbeddingProvider, MatchingConfig, Pipeline,
    RequirementRecord,
};

pub const DIM: usize = 128;

pub fn lexicon() -> DomainLexicon {
    DomainLexicon::from_groups([
        ("SpO2", vec!["spo2", "oxygen saturation", "desaturation"]),
        ("ECG", vec!["ecg", "electrocardiogram", "waveform"]),
        ("Alarms", vec!["alarm", "alert"]),
    ])
    .expect("valid lexicon")
}

pub fn hashing_chain() -> EmbeddingChain {
    EmbeddingChain::new(
        Some(Arc::new(HashingEmbeddingProvider::new(DIM).expect("dimension"))),
        None,
    )
}

pub fn pipeline_with(chain: EmbeddingChain) -> Pipeline {
    Pipeline::new(MatchingConfig::default(), lexicon(), chain).expect("pipeline")
}

pub fn records(items: &[(&str, &str)]) -> Vec<RequirementRecord> {
    items
        .iter()
        .map(|(id, text)| RequirementRecord::new(*id, *text))
        .collect()
}

pub fn monitor_children() -> Vec<RequirementRecord> {
    records(&[
        ("C1", "The user shall be able to view ECG waveforms in real time"),
        ("C2", "The monitor shall raise an alarm on SpO2 desaturation"),
        ("C3", "Battery status is shown on the main screen"),
        ("C4", "Trend data is stored for 72 hours"),
        ("C5", "The user shall"),
    ])
}

pub fn monitor_parents() -> Vec<RequirementRecord> {
    records(&[
        ("P1", "Display electrocardiogram waveform continuously"),
        ("P2", "Generate alerts for low oxygen saturation"),
        ("P3", "Show battery charge status on screen"),
        ("P4", "Store physiological trend data"),
        ("P5", "Support remote firmware upgrades"),
    ])
}

/// Hashing provider that fails every request touching a text containing
/// `needle`, batch or single.
pub struct FailingFor {
    inner: HashingEmbeddingProvider,
    needle: String,
    pub calls: AtomicUsize,
}

impl FailingFor {
    pub fn new(needle: &str) -> Self {
        Self {
            inner: HashingEmbeddingProvider::new(DIM).expect("dimension"),
            needle: needle.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingFor {
    fn name(&self) -> &str {
        "failing-for"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(&self.needle) {
            return Err(EmbeddingError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(self.inner.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains(&self.needle)) {
            return Err(EmbeddingError::Transport("connection reset".into()));
        }
        Ok(texts.iter().map(|t| self.inner.embed_sync(t)).collect())
    }
}

/// Provider whose vectors have a fixed length.
pub struct FixedDim(pub usize);

#[async_trait]
impl EmbeddingProvider for FixedDim {
    fn name(&self) -> &str {
        "fixed-dim"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0; self.0])
    }
}

/// Hashing provider that holds each batch briefly and records how many
/// batches were in flight at once.
pub struct InFlight {
    inner: HashingEmbeddingProvider,
    current: AtomicUsize,
    pub peak: AtomicUsize,
}

impl InFlight {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbeddingProvider::new(DIM).expect("dimension"),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for InFlight {
    fn name(&self) -> &str {
        "in-flight"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.inner.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.inner.embed_sync(t)).collect())
    }
}

/// Provider that never answers within a test's patience.
pub struct Stalled;

#[async_trait]
impl EmbeddingProvider for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![1.0; DIM])
    }
}
