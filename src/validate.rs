//! Coverage checks over a complete trace matrix.
//!
//! Findings are informational. They never block export.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::fusion::{ScoreEntry, TraceMatrix};
use crate::record::RequirementRecord;

pub const DEFAULT_ORPHAN_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Children whose best ranked score is below the threshold, in child
    /// input order. A child with no ranked entries scores 0.
    pub orphan_children: Vec<String>,
    /// Parents no child ranked, in parent input order.
    pub childless_parents: Vec<String>,
    pub threshold: f32,
    pub total_children: usize,
    pub total_parents: usize,
    pub total_traces: usize,
    /// Children with at least one entry missing its embedding score
    /// because of provider failure.
    pub degraded_children: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_children.is_empty() && self.childless_parents.is_empty()
    }
}

pub fn validate(
    matrix: &TraceMatrix,
    parents: &[RequirementRecord],
    threshold: f32,
) -> ValidationReport {
    let orphan_children = matrix
        .rows()
        .iter()
        .filter(|row| best_score(&row.entries) < threshold)
        .map(|row| row.child_id.clone())
        .collect();

    let referenced: HashSet<&str> = matrix.entries().map(|e| e.parent_id.as_str()).collect();
    let childless_parents = parents
        .iter()
        .filter(|p| !referenced.contains(p.id.as_str()))
        .map(|p| p.id.clone())
        .collect();

    let degraded_children = matrix
        .rows()
        .iter()
        .filter(|row| row.entries.iter().any(|e| e.embedding_degraded))
        .count();

    ValidationReport {
        orphan_children,
        childless_parents,
        threshold,
        total_children: matrix.len(),
        total_parents: parents.len(),
        total_traces: matrix.total_traces(),
        degraded_children,
    }
}

/// Highest computed score in a ranked sequence, 0 when it is empty.
fn best_score(entries: &[ScoreEntry]) -> f32 {
    entries
        .iter()
        .map(|e| e.computed_score)
        .fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::ChildTraces;
    use crate::rules::RuleMatch;

    fn traces(child: &str, scored: &[(&str, f32)]) -> ChildTraces {
        ChildTraces {
            child_id: child.into(),
            entries: scored
                .iter()
                .map(|(p, s)| ScoreEntry::new(child, *p, RuleMatch::none(), Some(*s), 0.0))
                .collect(),
        }
    }

    fn parents(ids: &[&str]) -> Vec<RequirementRecord> {
        ids.iter().map(|id| RequirementRecord::new(*id, "text")).collect()
    }

    #[test]
    fn flags_orphans_and_childless() {
        let matrix = TraceMatrix::new(vec![
            traces("C1", &[("P1", 0.9), ("P2", 0.2)]),
            traces("C2", &[("P2", 0.4), ("P1", 0.3)]),
            traces("C3", &[]),
        ]);
        let report = validate(&matrix, &parents(&["P1", "P2", "P3"]), 0.5);
        assert_eq!(report.orphan_children, vec!["C2", "C3"]);
        assert_eq!(report.childless_parents, vec!["P3"]);
        assert_eq!(report.total_children, 3);
        assert_eq!(report.total_parents, 3);
        assert_eq!(report.total_traces, 4);
        assert!(!report.is_clean());
    }

    #[test]
    fn threshold_is_strict_less_than() {
        let matrix = TraceMatrix::new(vec![traces("C1", &[("P1", 0.5)])]);
        let report = validate(&matrix, &parents(&["P1"]), 0.5);
        assert!(report.orphan_children.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn empty_sequence_scores_zero() {
        let matrix = TraceMatrix::new(vec![traces("C1", &[]), traces("C2", &[("P1", 0.1)])]);
        let report = validate(&matrix, &parents(&["P1"]), 0.0);
        assert!(report.orphan_children.is_empty());

        let report = validate(&matrix, &parents(&["P1"]), 0.05);
        assert_eq!(report.orphan_children, vec!["C1"]);
    }

    #[test]
    fn counts_degraded_children() {
        let mut row = traces("C1", &[("P1", 0.7)]);
        row.entries[0].embedding_degraded = true;
        let matrix = TraceMatrix::new(vec![row, traces("C2", &[("P1", 0.7)])]);
        let report = validate(&matrix, &parents(&["P1"]), 0.5);
        assert_eq!(report.degraded_children, 1);
    }
}
