use async_trait::async_trait;
use fxhash::hash64;

use super::normalize::l2_normalize_in_place;
use super::{EmbeddingError, EmbeddingProvider};

pub const DEFAULT_HASHING_DIMENSION: usize = 384;

const BIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic local provider: signed feature hashing of word unigrams and
/// bigrams into a fixed number of buckets, L2-normalized.
///
/// Needs no network or model files, so runs work offline. Texts sharing
/// vocabulary land near each other; it carries no synonym knowledge.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    name: String,
    dimension: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "hashing dimension must be > 0".into(),
            ));
        }
        Ok(Self {
            name: format!("hashing-{dimension}"),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut v = vec![0f32; self.dimension];
        for word in &words {
            self.add_feature(&mut v, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            let feature = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut v, feature.as_bytes(), BIGRAM_WEIGHT);
        }
        l2_normalize_in_place(&mut v);
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = hash64(feature);
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self {
            name: format!("hashing-{DEFAULT_HASHING_DIMENSION}"),
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::cosine;

    #[test]
    fn deterministic_and_normalized() {
        let p = HashingEmbeddingProvider::new(64).unwrap();
        let a = p.embed_sync("ECG waveform display");
        let b = p.embed_sync("ECG waveform display");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_score_higher() {
        let p = HashingEmbeddingProvider::default();
        let base = p.embed_sync("configure heart rate alarm limit");
        let near = p.embed_sync("heart rate alarm limit");
        let far = p.embed_sync("battery backup duration");
        assert!(cosine(&base, &near) > cosine(&base, &far));
    }

    #[test]
    fn text_without_words_is_zero_vector() {
        let p = HashingEmbeddingProvider::new(8).unwrap();
        assert_eq!(p.embed_sync("% --"), vec![0.0; 8]);
    }

    #[test]
    fn zero_dimension_rejected() {
        assert!(matches!(
            HashingEmbeddingProvider::new(0),
            Err(EmbeddingError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn batch_matches_single() {
        let p = HashingEmbeddingProvider::new(32).unwrap();
        let texts = vec!["alarm".to_string(), "spo2 value".to_string()];
        let batch = p.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[1], p.embed("spo2 value").await.unwrap());
    }
}
