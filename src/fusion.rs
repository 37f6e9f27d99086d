//! Score fusion and top-K selection.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rules::RuleMatch;

/// Which signal decided a pair's computed score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// A lexicon group matched; the rule score took part in the max.
    Fusion,
    Embedding,
    #[serde(rename = "TF-IDF")]
    Tfidf,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Fusion => "Fusion",
            Method::Embedding => "Embedding",
            Method::Tfidf => "TF-IDF",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combine the three signals into `(computed_score, method)`.
///
/// An absent embedding counts as 0 in the max. Without a rule match, ties
/// between embedding and TF-IDF go to the embedding.
pub fn fuse(rule: Option<f32>, embedding: Option<f32>, tfidf: f32) -> (f32, Method) {
    let emb = embedding.unwrap_or(0.0);
    match rule {
        Some(rule) => (rule.max(emb).max(tfidf), Method::Fusion),
        None if emb >= tfidf => (emb, Method::Embedding),
        None => (tfidf, Method::Tfidf),
    }
}

/// One scored (child, parent) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub child_id: String,
    pub parent_id: String,
    pub score_rule: Option<f32>,
    pub score_embedding: Option<f32>,
    pub score_tfidf: f32,
    pub computed_score: f32,
    pub method_used: Method,
    pub matched_groups: BTreeSet<String>,
    /// The embedding provider failed for the child or the parent.
    pub embedding_degraded: bool,
}

impl ScoreEntry {
    pub fn new(
        child_id: impl Into<String>,
        parent_id: impl Into<String>,
        rule: RuleMatch,
        score_embedding: Option<f32>,
        score_tfidf: f32,
    ) -> Self {
        let (computed_score, method_used) = fuse(rule.score, score_embedding, score_tfidf);
        Self {
            child_id: child_id.into(),
            parent_id: parent_id.into(),
            score_rule: rule.score,
            score_embedding,
            score_tfidf,
            computed_score,
            method_used,
            matched_groups: rule.matched_groups,
            embedding_degraded: false,
        }
    }

    pub fn with_degraded(mut self, degraded: bool) -> Self {
        self.embedding_degraded = degraded;
        self
    }

    /// Zero computed score and no rule match: nothing links the pair.
    pub fn has_signal(&self) -> bool {
        self.score_rule.is_some() || self.computed_score > 0.0
    }
}

/// Higher score first, then ascending parent id.
pub fn rank_order(a: &ScoreEntry, b: &ScoreEntry) -> Ordering {
    b.computed_score
        .total_cmp(&a.computed_score)
        .then_with(|| a.parent_id.cmp(&b.parent_id))
}

/// Keep the `k` best candidates carrying any signal, in rank order.
///
/// Duplicate parent ids keep their best-ranked entry only.
pub fn rank_top_k(candidates: Vec<ScoreEntry>, k: usize) -> Vec<ScoreEntry> {
    let mut ranked: Vec<ScoreEntry> = candidates.into_iter().filter(ScoreEntry::has_signal).collect();
    ranked.sort_by(rank_order);
    let mut seen = BTreeSet::new();
    ranked.retain(|e| seen.insert(e.parent_id.clone()));
    ranked.truncate(k);
    ranked
}

/// Ranked parents per child, in child input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceMatrix {
    rows: Vec<ChildTraces>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildTraces {
    pub child_id: String,
    pub entries: Vec<ScoreEntry>,
}

impl TraceMatrix {
    pub fn new(rows: Vec<ChildTraces>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ChildTraces] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, child_id: &str) -> Option<&[ScoreEntry]> {
        self.rows
            .iter()
            .find(|r| r.child_id == child_id)
            .map(|r| r.entries.as_slice())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScoreEntry> {
        self.rows.iter().flat_map(|r| r.entries.iter())
    }

    pub fn total_traces(&self) -> usize {
        self.rows.iter().map(|r| r.entries.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RULE_SCORE;

    fn entry(parent: &str, emb: Option<f32>, tfidf: f32) -> ScoreEntry {
        ScoreEntry::new("C1", parent, RuleMatch::none(), emb, tfidf)
    }

    #[test]
    fn fuse_rule_dominates_method() {
        assert_eq!(fuse(Some(RULE_SCORE), Some(0.9), 0.2), (0.9, Method::Fusion));
        assert_eq!(fuse(Some(RULE_SCORE), None, 0.1), (RULE_SCORE, Method::Fusion));
    }

    #[test]
    fn fuse_without_rule_picks_larger_signal() {
        assert_eq!(fuse(None, Some(0.4), 0.3), (0.4, Method::Embedding));
        assert_eq!(fuse(None, Some(0.3), 0.4), (0.4, Method::Tfidf));
        assert_eq!(fuse(None, Some(0.5), 0.5), (0.5, Method::Embedding));
        assert_eq!(fuse(None, None, 0.2), (0.2, Method::Tfidf));
        assert_eq!(fuse(None, None, 0.0), (0.0, Method::Embedding));
    }

    #[test]
    fn method_labels() {
        assert_eq!(Method::Tfidf.to_string(), "TF-IDF");
        assert_eq!(Method::Fusion.to_string(), "Fusion");
        assert_eq!(serde_json::to_string(&Method::Tfidf).unwrap(), "\"TF-IDF\"");
    }

    #[test]
    fn top_k_sorted_with_parent_tiebreak() {
        let ranked = rank_top_k(
            vec![
                entry("P3", Some(0.5), 0.1),
                entry("P1", Some(0.5), 0.1),
                entry("P2", Some(0.9), 0.1),
                entry("P4", Some(0.2), 0.1),
            ],
            3,
        );
        let ids: Vec<_> = ranked.iter().map(|e| e.parent_id.as_str()).collect();
        assert_eq!(ids, vec!["P2", "P1", "P3"]);
    }

    #[test]
    fn top_k_skips_signal_free_pairs() {
        let ranked = rank_top_k(vec![entry("P1", None, 0.0), entry("P2", Some(0.0), 0.0)], 5);
        assert!(ranked.is_empty());

        let mut rule = RuleMatch::none();
        rule.score = Some(RULE_SCORE);
        let kept = rank_top_k(vec![ScoreEntry::new("C1", "P1", rule, None, 0.0)], 5);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn fewer_candidates_than_k() {
        let ranked = rank_top_k(vec![entry("P1", Some(0.3), 0.0)], 10);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn duplicate_parent_keeps_best() {
        let ranked = rank_top_k(
            vec![entry("P1", Some(0.2), 0.0), entry("P1", Some(0.7), 0.0)],
            3,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].computed_score, 0.7);
    }
}
