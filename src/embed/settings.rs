//! Serializable provider selection.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::resilience::{CircuitBreakerConfig, RetryConfig};
use super::{
    DEFAULT_HASHING_DIMENSION, EmbeddingError, EmbeddingProvider, HashingEmbeddingProvider,
};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";

/// Request/response shape spoken by a remote provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKind {
    /// OpenAI-compatible `/embeddings`, including LiteLLM proxies.
    #[serde(alias = "openai")]
    OpenAi,
    /// Azure OpenAI deployment endpoint.
    Azure,
    /// Hugging Face inference (`{"inputs": [...]}`).
    #[serde(alias = "hf")]
    HuggingFace,
    /// `{"texts": [...]}` -> `{"embeddings": [...]}`.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiProviderConfig {
    pub kind: ApiKind,
    /// Base URL (OpenAI), resource endpoint (Azure) or full URL (others).
    pub url: String,
    /// Model name; the deployment name for Azure.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(
        default = "default_timeout",
        with = "crate::serde_millis",
        rename = "timeout_ms"
    )]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

impl ApiProviderConfig {
    pub fn new(kind: ApiKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            model: None,
            api_version: None,
            api_key_env: None,
            timeout: default_timeout(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    /// Provider from the process environment, if one is configured.
    ///
    /// `OPENAI_BASE_URL` selects an OpenAI-compatible proxy (LiteLLM) keyed by
    /// `OPENAI_API_KEY`; otherwise `AZURE_OPENAI_ENDPOINT` selects Azure with
    /// `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_API_VERSION` and
    /// `AZURE_OPENAI_EMBEDDING_DEPLOYMENT`.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(base) = get("OPENAI_BASE_URL") {
            let model = get("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());
            return Some(
                Self::new(ApiKind::OpenAi, base)
                    .with_model(model)
                    .with_api_key_env("OPENAI_API_KEY"),
            );
        }
        let endpoint = get("AZURE_OPENAI_ENDPOINT")?;
        let deployment = get("AZURE_OPENAI_EMBEDDING_DEPLOYMENT")
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());
        let mut cfg = Self::new(ApiKind::Azure, endpoint)
            .with_model(deployment)
            .with_api_key_env("AZURE_OPENAI_API_KEY");
        cfg.api_version = Some(
            get("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
        );
        Some(cfg)
    }

    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.url.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig("api url must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(EmbeddingError::InvalidConfig("timeout_ms must be > 0".into()));
        }
        match self.kind {
            ApiKind::OpenAi if self.model.is_none() => Err(EmbeddingError::InvalidConfig(
                "openai provider requires a model".into(),
            )),
            ApiKind::Azure if self.model.is_none() || self.api_version.is_none() => {
                Err(EmbeddingError::InvalidConfig(
                    "azure provider requires model (deployment) and api_version".into(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// URL the embedding request is posted to.
    pub fn endpoint(&self) -> String {
        let base = self.url.trim_end_matches('/');
        match self.kind {
            ApiKind::OpenAi => format!("{base}/embeddings"),
            ApiKind::Azure => format!(
                "{base}/openai/deployments/{}/embeddings?api-version={}",
                self.model.as_deref().unwrap_or_default(),
                self.api_version.as_deref().unwrap_or(DEFAULT_AZURE_API_VERSION),
            ),
            ApiKind::HuggingFace | ApiKind::Custom => base.to_string(),
        }
    }

    /// Read the API key named by `api_key_env`.
    pub fn resolve_api_key(&self) -> Result<Option<String>, EmbeddingError> {
        let Some(var) = self.api_key_env.as_deref() else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
            _ => Err(EmbeddingError::InvalidConfig(format!(
                "environment variable {var} is not set"
            ))),
        }
    }
}

/// Which provider fills a slot of the embedding chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderSpec {
    Api(ApiProviderConfig),
    Hashing {
        #[serde(default = "default_hashing_dimension")]
        dimension: usize,
    },
    Disabled,
}

fn default_hashing_dimension() -> usize {
    DEFAULT_HASHING_DIMENSION
}

impl Default for ProviderSpec {
    fn default() -> Self {
        ProviderSpec::Hashing {
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl ProviderSpec {
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        match self {
            ProviderSpec::Api(cfg) => cfg.validate(),
            ProviderSpec::Hashing { dimension: 0 } => Err(EmbeddingError::InvalidConfig(
                "hashing dimension must be > 0".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Instantiate the provider; `Disabled` yields `None`.
    pub fn build(&self) -> Result<Option<Arc<dyn EmbeddingProvider>>, EmbeddingError> {
        match self {
            ProviderSpec::Disabled => Ok(None),
            ProviderSpec::Hashing { dimension } => {
                Ok(Some(Arc::new(HashingEmbeddingProvider::new(*dimension)?)))
            }
            #[cfg(feature = "api")]
            ProviderSpec::Api(cfg) => Ok(Some(Arc::new(super::ApiEmbeddingProvider::new(
                cfg.clone(),
            )?))),
            #[cfg(not(feature = "api"))]
            ProviderSpec::Api(_) => Err(EmbeddingError::InvalidConfig(
                "built without the `api` feature".into(),
            )),
        }
    }
}

/// Embedding stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default)]
    pub primary: ProviderSpec,
    #[serde(default = "default_fallback")]
    pub fallback: ProviderSpec,
    /// Texts per provider request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Requests in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Required vector length; `None` adopts the first vector's length.
    #[serde(default)]
    pub expected_dimension: Option<usize>,
}

fn default_fallback() -> ProviderSpec {
    ProviderSpec::Disabled
}

fn default_batch_size() -> usize {
    16
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            primary: ProviderSpec::default(),
            fallback: default_fallback(),
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            expected_dimension: None,
        }
    }
}

impl EmbeddingSettings {
    /// Settings for an API primary with a hashing fallback of `dimension`.
    pub fn api_with_hashing_fallback(api: ApiProviderConfig, dimension: usize) -> Self {
        Self {
            primary: ProviderSpec::Api(api),
            fallback: ProviderSpec::Hashing { dimension },
            expected_dimension: Some(dimension),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EmbeddingError> {
        self.primary.validate()?;
        self.fallback.validate()?;
        if self.batch_size == 0 {
            return Err(EmbeddingError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "max_concurrency must be > 0".into(),
            ));
        }
        if self.expected_dimension == Some(0) {
            return Err(EmbeddingError::InvalidConfig(
                "expected_dimension must be > 0".into(),
            ));
        }
        if let (Some(expected), ProviderSpec::Hashing { dimension }) =
            (self.expected_dimension, &self.fallback)
        {
            if expected != *dimension {
                return Err(EmbeddingError::InvalidConfig(format!(
                    "hashing fallback dimension {dimension} differs from expected_dimension {expected}"
                )));
            }
        }
        Ok(())
    }
}
