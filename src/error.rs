use thiserror::Error;

use crate::config::ConfigError;
use crate::embed::EmbeddingError;
use crate::lexicon::LexiconError;
use crate::record::InputError;

/// Fatal errors that abort a pipeline run before anything is exported.
///
/// Per-item embedding failures never surface here; they degrade the affected
/// scores instead.
#[derive(Debug, Error)]
pub enum TraceError {
    /// Record sets or column mappings are unusable.
    #[error("input validation failed: {0}")]
    Input(#[from] InputError),
    /// The domain lexicon could not be loaded.
    #[error("lexicon config error: {0}")]
    Lexicon(#[from] LexiconError),
    /// Matching or embedding configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Providers returned vectors of different lengths within one run.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },
    /// A provider could not be constructed from its configuration.
    #[error("embedding provider setup failed: {0}")]
    ProviderSetup(#[from] EmbeddingError),
}
