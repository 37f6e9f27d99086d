//! Flattening the trace matrix into export rows.
//!
//! The core stops at [`TraceRow`] values; writing them to a file is the
//! caller's job. Every child produces at least one row: a child with no
//! ranked parents gets a single placeholder row with empty parent fields and
//! `Method_Used = "N/A"`.

use serde::Serialize;

use crate::fusion::{Method, TraceMatrix};
use crate::record::RequirementRecord;

/// Fixed leading columns of every export.
pub const COLUMNS: [&str; 10] = [
    "Child_ID",
    "Child_Text",
    "Parent_ID",
    "Parent_Title",
    "Score_Rule",
    "Score_Embedding",
    "Score_TFIDF",
    "Computed_Score",
    "Method_Used",
    "Matched_Groups",
];

pub const PLACEHOLDER_METHOD: &str = "N/A";

/// Caller-selected extra columns copied from the source records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraColumns {
    pub child: Vec<String>,
    pub parent: Vec<String>,
}

impl ExtraColumns {
    pub fn new(child: Vec<String>, parent: Vec<String>) -> Self {
        Self { child, parent }
    }

    /// `Child_<col>` then `Parent_<col>` names, in selection order.
    pub fn header_names(&self) -> Vec<String> {
        self.child
            .iter()
            .map(|c| format!("Child_{c}"))
            .chain(self.parent.iter().map(|c| format!("Parent_{c}")))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRow {
    pub child_id: String,
    pub child_text: String,
    pub parent_id: String,
    pub parent_title: String,
    pub score_rule: Option<f32>,
    pub score_embedding: Option<f32>,
    pub score_tfidf: f32,
    pub computed_score: f32,
    /// `None` marks a placeholder row.
    pub method_used: Option<Method>,
    pub matched_groups: Vec<String>,
    /// Extra values, already prefixed, in header order.
    pub extras: Vec<(String, String)>,
}

impl TraceRow {
    pub fn method_label(&self) -> &'static str {
        self.method_used.map_or(PLACEHOLDER_METHOD, |m| m.as_str())
    }

    pub fn is_placeholder(&self) -> bool {
        self.method_used.is_none()
    }

    /// Cells in [`header`] order. Absent scores are empty cells.
    pub fn to_record(&self) -> Vec<String> {
        let mut cells = vec![
            self.child_id.clone(),
            self.child_text.clone(),
            self.parent_id.clone(),
            self.parent_title.clone(),
            format_score(self.score_rule),
            format_score(self.score_embedding),
            format_score(Some(self.score_tfidf)),
            format_score(Some(self.computed_score)),
            self.method_label().to_string(),
            self.matched_groups.join(", "),
        ];
        cells.extend(self.extras.iter().map(|(_, value)| value.clone()));
        cells
    }
}

fn format_score(score: Option<f32>) -> String {
    score.map(|s| format!("{s:.4}")).unwrap_or_default()
}

/// [`COLUMNS`] followed by the prefixed extra column names.
pub fn header(extras: &ExtraColumns) -> Vec<String> {
    COLUMNS
        .iter()
        .map(|c| (*c).to_string())
        .chain(extras.header_names())
        .collect()
}

/// One row per ranked entry, child input order then rank order.
///
/// `children` and `parents` are the records the matrix was built from;
/// entries whose ids are not among them are skipped.
pub fn build_rows(
    matrix: &TraceMatrix,
    children: &[RequirementRecord],
    parents: &[RequirementRecord],
    extras: &ExtraColumns,
) -> Vec<TraceRow> {
    let parent_index: std::collections::HashMap<&str, &RequirementRecord> =
        parents.iter().map(|p| (p.id.as_str(), p)).collect();

    let mut rows = Vec::with_capacity(matrix.total_traces() + children.len());
    for (child, traces) in children.iter().zip(matrix.rows()) {
        if traces.entries.is_empty() {
            let mut row_extras = extra_cells("Child", &extras.child, Some(child));
            row_extras.extend(extra_cells("Parent", &extras.parent, None));
            rows.push(TraceRow {
                child_id: child.id.clone(),
                child_text: child.text.clone(),
                parent_id: String::new(),
                parent_title: String::new(),
                score_rule: None,
                score_embedding: None,
                score_tfidf: 0.0,
                computed_score: 0.0,
                method_used: None,
                matched_groups: Vec::new(),
                extras: row_extras,
            });
            continue;
        }

        for entry in &traces.entries {
            let Some(&parent) = parent_index.get(entry.parent_id.as_str()) else {
                continue;
            };
            let mut row_extras = extra_cells("Child", &extras.child, Some(child));
            row_extras.extend(extra_cells("Parent", &extras.parent, Some(parent)));
            rows.push(TraceRow {
                child_id: child.id.clone(),
                child_text: child.text.clone(),
                parent_id: parent.id.clone(),
                parent_title: parent.display_title().to_string(),
                score_rule: entry.score_rule,
                score_embedding: entry.score_embedding,
                score_tfidf: entry.score_tfidf,
                computed_score: entry.computed_score,
                method_used: Some(entry.method_used),
                matched_groups: entry.matched_groups.iter().cloned().collect(),
                extras: row_extras,
            });
        }
    }
    rows
}

fn extra_cells(
    prefix: &str,
    columns: &[String],
    record: Option<&RequirementRecord>,
) -> Vec<(String, String)> {
    columns
        .iter()
        .map(|col| {
            let value = record.and_then(|r| r.extra(col)).unwrap_or_default();
            (format!("{prefix}_{col}"), value.to_string())
        })
        .collect()
}

/// Method filter selects rows by label (`"Fusion"`, `"Embedding"`,
/// `"TF-IDF"`, `"N/A"`); score filter keeps rows at or above `min_score`.
pub fn filter_rows<'a>(
    rows: &'a [TraceRow],
    method: Option<&str>,
    min_score: Option<f32>,
) -> Vec<&'a TraceRow> {
    rows.iter()
        .filter(|row| method.is_none_or(|m| row.method_label().eq_ignore_ascii_case(m)))
        .filter(|row| min_score.is_none_or(|min| row.computed_score >= min))
        .collect()
}
