//! End-to-end run: records in, ranked trace matrix and validation report out.
//!
//! Each stage is its own type and consumes the previous one by value:
//!
//! ```text
//! Loaded -> Preprocessed -> Scored -> Fused -> Ranked -> Validated -> TraceOutput
//! ```
//!
//! [`Pipeline::run`] drives all of them. Nothing is returned until the whole
//! batch is validated, so dropping the future mid-run leaves no partial
//! output behind.

use std::collections::BTreeSet;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{Instrument, Level, info, warn};

use crate::config::{MatchingConfig, TraceConfig};
use crate::embed::{EmbeddingChain, EmbeddingSet};
use crate::error::TraceError;
use crate::export::{self, ExtraColumns, TraceRow};
use crate::fusion::{ChildTraces, ScoreEntry, TraceMatrix, rank_top_k};
use crate::lexicon::DomainLexicon;
use crate::metrics::{self, Stage};
use crate::preprocess::Preprocessor;
use crate::record::{RequirementRecord, validate_records};
use crate::rules::{self, RuleMatch};
use crate::tfidf::{TfidfConfig, TfidfVectorizer};
use crate::validate::{self, ValidationReport};

/// Validated input record sets.
#[derive(Debug, Clone)]
pub struct Loaded {
    children: Vec<RequirementRecord>,
    parents: Vec<RequirementRecord>,
}

impl Loaded {
    pub fn new(
        children: Vec<RequirementRecord>,
        parents: Vec<RequirementRecord>,
    ) -> Result<Self, TraceError> {
        validate_records(&children, "children")?;
        validate_records(&parents, "parents")?;
        Ok(Self { children, parents })
    }

    pub fn children(&self) -> &[RequirementRecord] {
        &self.children
    }

    pub fn parents(&self) -> &[RequirementRecord] {
        &self.parents
    }

    pub fn preprocess(self, preprocessor: &Preprocessor) -> Preprocessed {
        let start = Instant::now();
        let normalize = |records: &[RequirementRecord]| -> Vec<String> {
            records
                .par_iter()
                .map(|r| preprocessor.normalize(&r.text))
                .collect()
        };
        let child_texts = normalize(&self.children);
        let parent_texts = normalize(&self.parents);
        let empty_children = child_texts.iter().filter(|t| t.is_empty()).count();
        let elapsed = start.elapsed();
        metrics::record_stage(Stage::Preprocess, elapsed);
        info!(
            children = child_texts.len(),
            parents = parent_texts.len(),
            empty_children,
            elapsed_micros = elapsed.as_micros() as u64,
            "preprocess_complete"
        );
        Preprocessed {
            loaded: self,
            child_texts,
            parent_texts,
        }
    }
}

/// Records plus their normalized texts.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    loaded: Loaded,
    child_texts: Vec<String>,
    parent_texts: Vec<String>,
}

impl Preprocessed {
    pub fn child_texts(&self) -> &[String] {
        &self.child_texts
    }

    pub fn parent_texts(&self) -> &[String] {
        &self.parent_texts
    }

    /// Compute the three signals. Only the embedding step awaits.
    pub async fn score(
        self,
        lexicon: Option<&DomainLexicon>,
        tfidf: &TfidfConfig,
        embeddings: &EmbeddingChain,
    ) -> Result<Scored, TraceError> {
        let n_children = self.child_texts.len();
        let corpus: Vec<String> = self
            .child_texts
            .iter()
            .chain(self.parent_texts.iter())
            .cloned()
            .collect();

        let start = Instant::now();
        let embedded = embeddings.embed_all(&corpus).await?;
        metrics::record_stage(Stage::Embedding, start.elapsed());
        if embedded.degraded_count() > 0 {
            warn!(
                degraded_texts = embedded.degraded_count(),
                "embedding_degraded"
            );
        }

        let start = Instant::now();
        let space = TfidfVectorizer::new(tfidf.clone()).fit(&corpus);
        let tfidf_matrix = space.similarity_matrix(0..n_children, n_children..corpus.len());
        let elapsed = start.elapsed();
        metrics::record_stage(Stage::Tfidf, elapsed);
        info!(
            documents = corpus.len(),
            vocabulary = space.vocabulary_len(),
            elapsed_micros = elapsed.as_micros() as u64,
            "tfidf_fit"
        );

        let start = Instant::now();
        let (child_groups, parent_groups) = match lexicon {
            Some(lexicon) => (
                groups_per_text(&self.child_texts, lexicon),
                groups_per_text(&self.parent_texts, lexicon),
            ),
            None => (Vec::new(), Vec::new()),
        };
        metrics::record_stage(Stage::Rules, start.elapsed());

        Ok(Scored {
            preprocessed: self,
            tfidf: tfidf_matrix,
            embeddings: embedded,
            rules_enabled: lexicon.is_some(),
            child_groups,
            parent_groups,
        })
    }
}

fn groups_per_text(texts: &[String], lexicon: &DomainLexicon) -> Vec<BTreeSet<String>> {
    texts
        .par_iter()
        .map(|t| rules::groups_present(t, lexicon))
        .collect()
}

/// All pairwise signals, computed once.
#[derive(Debug, Clone)]
pub struct Scored {
    preprocessed: Preprocessed,
    /// `tfidf[child][parent]`.
    tfidf: Vec<Vec<f32>>,
    /// Children first, then parents.
    embeddings: EmbeddingSet,
    rules_enabled: bool,
    child_groups: Vec<BTreeSet<String>>,
    parent_groups: Vec<BTreeSet<String>>,
}

impl Scored {
    pub fn embeddings(&self) -> &EmbeddingSet {
        &self.embeddings
    }

    pub fn tfidf(&self, child: usize, parent: usize) -> Option<f32> {
        self.tfidf.get(child)?.get(parent).copied()
    }

    pub fn fuse(self) -> Fused {
        Fused { scored: self }
    }
}

/// Signals combined under the fusion policy.
///
/// Candidates are materialized one child at a time, so the full
/// child x parent entry set never lives in memory at once.
#[derive(Debug, Clone)]
pub struct Fused {
    scored: Scored,
}

impl Fused {
    /// Every (child, parent) pair for one child, in parent input order.
    /// Children with no text after preprocessing have no candidates.
    pub fn candidates(&self, child_idx: usize) -> Vec<ScoreEntry> {
        let s = &self.scored;
        let loaded = &s.preprocessed.loaded;
        if s.preprocessed.child_texts[child_idx].is_empty() {
            return Vec::new();
        }
        let n_children = loaded.children.len();
        let child = &loaded.children[child_idx];
        loaded
            .parents
            .iter()
            .enumerate()
            .map(|(parent_idx, parent)| {
                let rule = if s.rules_enabled {
                    rules::match_groups(&s.child_groups[child_idx], &s.parent_groups[parent_idx])
                } else {
                    RuleMatch::none()
                };
                let parent_pos = n_children + parent_idx;
                let degraded =
                    s.embeddings.is_degraded(child_idx) || s.embeddings.is_degraded(parent_pos);
                ScoreEntry::new(
                    child.id.as_str(),
                    parent.id.as_str(),
                    rule,
                    s.embeddings.similarity(child_idx, parent_pos),
                    s.tfidf[child_idx][parent_idx],
                )
                .with_degraded(degraded)
            })
            .collect()
    }

    pub fn rank(self, top_k: usize) -> Ranked {
        let start = Instant::now();
        let children = &self.scored.preprocessed.loaded.children;
        let rows: Vec<ChildTraces> = (0..children.len())
            .into_par_iter()
            .map(|idx| ChildTraces {
                child_id: children[idx].id.clone(),
                entries: rank_top_k(self.candidates(idx), top_k),
            })
            .collect();
        let matrix = TraceMatrix::new(rows);
        let elapsed = start.elapsed();
        metrics::record_stage(Stage::Rank, elapsed);
        info!(
            top_k,
            traces = matrix.total_traces(),
            elapsed_micros = elapsed.as_micros() as u64,
            "rank_complete"
        );
        Ranked {
            loaded: self.scored.preprocessed.loaded,
            matrix,
        }
    }
}

/// Top-K parents per child.
#[derive(Debug, Clone)]
pub struct Ranked {
    loaded: Loaded,
    matrix: TraceMatrix,
}

impl Ranked {
    pub fn matrix(&self) -> &TraceMatrix {
        &self.matrix
    }

    pub fn validate(self, threshold: f32) -> Validated {
        let start = Instant::now();
        let report = validate::validate(&self.matrix, &self.loaded.parents, threshold);
        let elapsed = start.elapsed();
        metrics::record_stage(Stage::Validate, elapsed);
        if !report.orphan_children.is_empty() {
            warn!(
                orphans = report.orphan_children.len(),
                threshold, "orphan_children"
            );
        }
        if !report.childless_parents.is_empty() {
            warn!(
                childless = report.childless_parents.len(),
                "childless_parents"
            );
        }
        info!(
            total_children = report.total_children,
            total_parents = report.total_parents,
            total_traces = report.total_traces,
            degraded_children = report.degraded_children,
            elapsed_micros = elapsed.as_micros() as u64,
            "validation_complete"
        );
        Validated {
            loaded: self.loaded,
            matrix: self.matrix,
            report,
        }
    }
}

/// Ranked matrix plus its coverage report; ready to export.
#[derive(Debug, Clone)]
pub struct Validated {
    loaded: Loaded,
    matrix: TraceMatrix,
    report: ValidationReport,
}

impl Validated {
    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn export(self, extras: &ExtraColumns) -> TraceOutput {
        let rows = export::build_rows(
            &self.matrix,
            &self.loaded.children,
            &self.loaded.parents,
            extras,
        );
        TraceOutput {
            header: export::header(extras),
            matrix: self.matrix,
            rows,
            report: self.report,
        }
    }
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceOutput {
    pub matrix: TraceMatrix,
    pub header: Vec<String>,
    pub rows: Vec<TraceRow>,
    pub report: ValidationReport,
}

/// Run-scoped configuration, lexicon and providers.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: MatchingConfig,
    lexicon: DomainLexicon,
    embeddings: EmbeddingChain,
    preprocessor: Preprocessor,
    extras: ExtraColumns,
}

impl Pipeline {
    pub fn new(
        config: MatchingConfig,
        lexicon: DomainLexicon,
        embeddings: EmbeddingChain,
    ) -> Result<Self, TraceError> {
        config.validate()?;
        let preprocessor = config.preprocessor();
        Ok(Self {
            config,
            lexicon,
            embeddings,
            preprocessor,
            extras: ExtraColumns::default(),
        })
    }

    /// Build providers from `config.embedding` as well.
    pub fn from_config(config: &TraceConfig, lexicon: DomainLexicon) -> Result<Self, TraceError> {
        config.validate()?;
        let embeddings = EmbeddingChain::from_settings(&config.embedding)?;
        Self::new(config.matching.clone(), lexicon, embeddings)
    }

    pub fn with_extra_columns(mut self, extras: ExtraColumns) -> Self {
        self.extras = extras;
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub async fn run(
        &self,
        children: Vec<RequirementRecord>,
        parents: Vec<RequirementRecord>,
    ) -> Result<TraceOutput, TraceError> {
        let span = tracing::span!(
            Level::INFO,
            "reqtrace.pipeline",
            children = children.len(),
            parents = parents.len(),
            rules_enabled = self.config.rules_enabled,
            embeddings = self.embeddings.is_available(),
        );
        self.run_inner(children, parents).instrument(span).await
    }

    async fn run_inner(
        &self,
        children: Vec<RequirementRecord>,
        parents: Vec<RequirementRecord>,
    ) -> Result<TraceOutput, TraceError> {
        let start = Instant::now();
        let lexicon = (self.config.rules_enabled && !self.lexicon.is_empty()).then_some(&self.lexicon);

        let validated = Loaded::new(children, parents)?
            .preprocess(&self.preprocessor)
            .score(lexicon, &self.config.tfidf_config(), &self.embeddings)
            .await?
            .fuse()
            .rank(self.config.top_k)
            .validate(self.config.orphan_threshold);

        let output = validated.export(&self.extras);
        if let Some(recorder) = metrics::metrics_recorder() {
            recorder.record_run(
                start.elapsed(),
                output.report.total_traces,
                output.report.orphan_children.len(),
                output.report.degraded_children,
            );
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbeddingProvider;
    use crate::fusion::Method;
    use std::sync::Arc;

    fn lexicon() -> DomainLexicon {
        DomainLexicon::from_groups([("SpO2", vec!["spo2", "oxygen saturation"])]).unwrap()
    }

    fn hashing_chain() -> EmbeddingChain {
        EmbeddingChain::new(Some(Arc::new(HashingEmbeddingProvider::new(128).unwrap())), None)
    }

    #[test]
    fn loaded_rejects_bad_input() {
        let err = Loaded::new(Vec::new(), vec![RequirementRecord::new("P1", "x")]).unwrap_err();
        assert!(matches!(err, TraceError::Input(_)));
    }

    #[tokio::test]
    async fn stages_chain_by_value() {
        let loaded = Loaded::new(
            vec![RequirementRecord::new("C1", "Display SpO2 value")],
            vec![
                RequirementRecord::new("P1", "Show oxygen saturation"),
                RequirementRecord::new("P2", "Battery status"),
            ],
        )
        .unwrap();
        let pre = loaded.preprocess(&Preprocessor::default());
        assert_eq!(pre.child_texts()[0], "display SpO2 value");

        let scored = pre
            .score(Some(&lexicon()), &TfidfConfig::default(), &EmbeddingChain::disabled())
            .await
            .unwrap();
        assert!(scored.embeddings().vector(0).is_none());

        let fused = scored.fuse();
        let candidates = fused.candidates(0);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].method_used, Method::Fusion);
        assert_eq!(candidates[1].score_rule, None);

        let ranked = fused.rank(1);
        assert_eq!(ranked.matrix().rows()[0].entries.len(), 1);
        let validated = ranked.validate(0.5);
        assert_eq!(validated.report().childless_parents, vec!["P2"]);
    }

    #[tokio::test]
    async fn rules_disabled_never_scores_rules() {
        let cfg = MatchingConfig {
            rules_enabled: false,
            ..MatchingConfig::default()
        };
        let pipeline = Pipeline::new(cfg, lexicon(), hashing_chain()).unwrap();
        let out = pipeline
            .run(
                vec![RequirementRecord::new("C1", "SpO2 alarm")],
                vec![RequirementRecord::new("P1", "oxygen saturation alarm")],
            )
            .await
            .unwrap();
        assert!(out.matrix.entries().all(|e| e.score_rule.is_none()));
    }

    #[test]
    fn invalid_config_rejected() {
        let cfg = MatchingConfig {
            top_k: 0,
            ..MatchingConfig::default()
        };
        assert!(matches!(
            Pipeline::new(cfg, DomainLexicon::default(), EmbeddingChain::disabled()),
            Err(TraceError::Config(_))
        ));
    }
}
