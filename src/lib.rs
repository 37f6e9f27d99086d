//! Hybrid requirement traceability.
//!
//! Matches legacy source requirements ("children") against canonical target
//! requirements ("parents") and produces a ranked trace matrix plus a
//! coverage report. Three independent signals score every pair:
//!
//! - rule matching against a domain lexicon of keyword groups ([`rules`])
//! - corpus-wide TF-IDF cosine similarity ([`tfidf`])
//! - embedding cosine similarity from a pluggable provider ([`embed`])
//!
//! [`fusion`] combines them into one score and keeps the top K parents per
//! child; [`validate`] flags orphan children and childless parents.
//!
//! ```no_run
//! use reqtrace::{DomainLexicon, MatchingConfig, Pipeline, RequirementRecord};
//! use reqtrace::embed::{EmbeddingChain, HashingEmbeddingProvider};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), reqtrace::TraceError> {
//! let lexicon = DomainLexicon::from_groups([("SpO2", vec!["spo2", "oxygen saturation"])])?;
//! let chain = EmbeddingChain::new(Some(Arc::new(HashingEmbeddingProvider::default())), None);
//! let pipeline = Pipeline::new(MatchingConfig::default(), lexicon, chain)?;
//!
//! let out = pipeline
//!     .run(
//!         vec![RequirementRecord::new("C1", "SpO2 desaturation alarm")],
//!         vec![RequirementRecord::new("P1", "Oxygen saturation monitoring")],
//!     )
//!     .await?;
//! assert_eq!(out.matrix.rows()[0].entries[0].parent_id, "P1");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embed;
mod error;
pub mod export;
pub mod fusion;
pub mod lexicon;
pub mod metrics;
pub mod pipeline;
pub mod preprocess;
pub mod record;
pub mod rules;
mod serde_millis;
pub mod tfidf;
pub mod validate;

pub use config::{ConfigError, DEFAULT_STOP_PHRASES, MatchingConfig, TraceConfig};
pub use embed::{EmbeddingChain, EmbeddingError, EmbeddingProvider, EmbeddingSettings};
pub use error::TraceError;
pub use export::{COLUMNS, ExtraColumns, TraceRow, build_rows, filter_rows};
pub use fusion::{Method, ScoreEntry, TraceMatrix, fuse, rank_top_k};
pub use lexicon::{DomainLexicon, LexiconError};
pub use metrics::{PipelineMetrics, Stage, set_pipeline_metrics};
pub use pipeline::{Pipeline, TraceOutput};
pub use preprocess::{Preprocessor, normalize};
pub use record::{ColumnMapping, InputError, RecordTable, RequirementRecord};
pub use rules::{RULE_SCORE, RuleMatch};
pub use validate::{ValidationReport, validate};
