//! Run configuration, optionally loaded from YAML.
//!
//! ```yaml
//! version: "1.0"
//! name: "monitor-trace"
//!
//! matching:
//!   top_k: 3
//!   ngram_range: [1, 3]
//!   rules_enabled: true
//!   orphan_threshold: 0.5
//!   stop_phrases:
//!     - "the user shall be able to"
//!     - "the monitor shall"
//!   protected_tokens: ["Alarms"]
//!
//! embedding:
//!   primary:
//!     type: api
//!     kind: azure
//!     url: "https://my-resource.openai.azure.com"
//!     model: "text-embedding-3-large"
//!     api_version: "2024-02-01"
//!     api_key_env: "AZURE_OPENAI_API_KEY"
//!     timeout_ms: 120000
//!     retry: { max_retries: 3, base_delay_ms: 200, max_delay_ms: 10000, jitter: true }
//!   fallback:
//!     type: hashing
//!     dimension: 3072
//!   batch_size: 16
//!   max_concurrency: 4
//!   expected_dimension: 3072
//! ```
//!
//! Every section is optional; missing fields take their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embed::{EmbeddingError, EmbeddingSettings};
use crate::preprocess::Preprocessor;
use crate::tfidf::TfidfConfig;
use crate::validate::DEFAULT_ORPHAN_THRESHOLD;

/// Boilerplate stripped from requirement text unless configured otherwise.
pub const DEFAULT_STOP_PHRASES: &[&str] = &[
    "the user shall be able to",
    "the user shall",
    "shall be able",
    "as a clinical user",
    "the monitor shall",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("embedding config: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Scoring and ranking knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Parents kept per child.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Inclusive TF-IDF n-gram orders.
    #[serde(default = "default_ngram_range")]
    pub ngram_range: (usize, usize),

    #[serde(default = "default_stop_phrases")]
    pub stop_phrases: Vec<String>,

    /// Tokens the preprocessor never lemmatizes.
    #[serde(default)]
    pub protected_tokens: Vec<String>,

    #[serde(default = "true_value")]
    pub rules_enabled: bool,

    /// Children whose best score is below this are orphans.
    #[serde(default = "default_orphan_threshold")]
    pub orphan_threshold: f32,

    #[serde(default)]
    pub lexical_max_features: Option<usize>,

    /// Stop words for TF-IDF on top of the built-in English list.
    #[serde(default)]
    pub extra_stop_words: Vec<String>,
}

fn default_top_k() -> usize {
    3
}

fn default_ngram_range() -> (usize, usize) {
    (1, 3)
}

fn default_stop_phrases() -> Vec<String> {
    DEFAULT_STOP_PHRASES.iter().map(|s| (*s).to_string()).collect()
}

fn default_orphan_threshold() -> f32 {
    DEFAULT_ORPHAN_THRESHOLD
}

fn true_value() -> bool {
    true
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            ngram_range: default_ngram_range(),
            stop_phrases: default_stop_phrases(),
            protected_tokens: Vec::new(),
            rules_enabled: true,
            orphan_threshold: default_orphan_threshold(),
            lexical_max_features: None,
            extra_stop_words: Vec::new(),
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Validation("matching.top_k must be >= 1".into()));
        }
        let (min_n, max_n) = self.ngram_range;
        if min_n == 0 || max_n < min_n {
            return Err(ConfigError::Validation(format!(
                "matching.ngram_range must satisfy 1 <= min <= max, got ({min_n}, {max_n})"
            )));
        }
        if !(0.0..=1.0).contains(&self.orphan_threshold) {
            return Err(ConfigError::Validation(format!(
                "matching.orphan_threshold must be within [0, 1], got {}",
                self.orphan_threshold
            )));
        }
        if self.lexical_max_features == Some(0) {
            return Err(ConfigError::Validation(
                "matching.lexical_max_features must be >= 1 when set".into(),
            ));
        }
        Ok(())
    }

    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor::new(&self.stop_phrases, &self.protected_tokens)
    }

    pub fn tfidf_config(&self) -> TfidfConfig {
        TfidfConfig {
            ngram_range: self.ngram_range,
            english_stop_words: true,
            extra_stop_words: self.extra_stop_words.clone(),
            max_features: self.lexical_max_features,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub embedding: EmbeddingSettings,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            matching: MatchingConfig::default(),
            embedding: EmbeddingSettings::default(),
        }
    }
}

impl TraceConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: TraceConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.version.as_str() {
            "1.0" | "1" => {}
            v => return Err(ConfigError::UnsupportedVersion(v.to_string())),
        }
        self.matching.validate()?;
        self.embedding.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{ApiKind, ProviderSpec};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = MatchingConfig::default();
        assert_eq!(cfg.top_k, 3);
        assert_eq!(cfg.ngram_range, (1, 3));
        assert!(cfg.rules_enabled);
        assert_eq!(cfg.orphan_threshold, 0.5);
        assert_eq!(cfg.stop_phrases.len(), DEFAULT_STOP_PHRASES.len());
        assert!(TraceConfig::default().validate().is_ok());
    }

    #[test]
    fn load_partial_yaml() {
        let yaml = r#"
version: "1.0"
name: "monitor"
matching:
  top_k: 5
  ngram_range: [1, 2]
  rules_enabled: false
"#;
        let cfg = TraceConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.name.as_deref(), Some("monitor"));
        assert_eq!(cfg.matching.top_k, 5);
        assert_eq!(cfg.matching.ngram_range, (1, 2));
        assert!(!cfg.matching.rules_enabled);
        assert_eq!(cfg.matching.orphan_threshold, 0.5);
        assert_eq!(cfg.embedding, EmbeddingSettings::default());
    }

    #[test]
    fn load_embedding_section() {
        let yaml = r#"
version: "1"
embedding:
  primary:
    type: api
    kind: openai
    url: "http://litellm:4000"
    model: "text-embedding-3-large"
  fallback:
    type: hashing
    dimension: 3072
  expected_dimension: 3072
  max_concurrency: 2
"#;
        let cfg = TraceConfig::from_yaml(yaml).unwrap();
        let ProviderSpec::Api(api) = &cfg.embedding.primary else {
            panic!("expected api primary");
        };
        assert_eq!(api.kind, ApiKind::OpenAi);
        assert_eq!(cfg.embedding.fallback, ProviderSpec::Hashing { dimension: 3072 });
        assert_eq!(cfg.embedding.max_concurrency, 2);
        assert_eq!(cfg.embedding.batch_size, 16);
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"version: \"1.0\"\nmatching:\n  top_k: 2\n").unwrap();
        let cfg = TraceConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.matching.top_k, 2);
        assert!(matches!(
            TraceConfig::from_file("/no/such/reqtrace.yaml"),
            Err(ConfigError::FileRead(_))
        ));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            TraceConfig::from_yaml("version: \"2.0\"\n"),
            Err(ConfigError::UnsupportedVersion(v)) if v == "2.0"
        ));
        for bad in [
            "version: \"1.0\"\nmatching:\n  top_k: 0\n",
            "version: \"1.0\"\nmatching:\n  ngram_range: [2, 1]\n",
            "version: \"1.0\"\nmatching:\n  orphan_threshold: 1.5\n",
        ] {
            assert!(matches!(
                TraceConfig::from_yaml(bad),
                Err(ConfigError::Validation(_))
            ));
        }
        assert!(matches!(
            TraceConfig::from_yaml("version: \"1.0\"\nembedding:\n  batch_size: 0\n"),
            Err(ConfigError::Embedding(_))
        ));
        assert!(matches!(
            TraceConfig::from_yaml("version: [oops"),
            Err(ConfigError::YamlParse(_))
        ));
    }

    #[test]
    fn derived_stage_configs() {
        let cfg = MatchingConfig {
            ngram_range: (1, 2),
            lexical_max_features: Some(100),
            ..MatchingConfig::default()
        };
        let tfidf = cfg.tfidf_config();
        assert_eq!(tfidf.ngram_range, (1, 2));
        assert_eq!(tfidf.max_features, Some(100));
        assert_eq!(cfg.preprocessor().normalize("The monitor shall alarm"), "alarm");
    }
}
