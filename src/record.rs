//! Requirement records and the ingestion contract.
//!
//! The core never parses spreadsheets. An external layer hands over either
//! ready [`RequirementRecord`] lists or a generic [`RecordTable`] plus a
//! caller-selected [`ColumnMapping`], which [`RecordTable::into_records`]
//! resolves here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural problems with the input record sets. Always fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("{0} record set is empty")]
    EmptyRecordSet(&'static str),
    #[error("{set} column mapping references missing column '{column}' ({role})")]
    MissingColumn {
        set: &'static str,
        column: String,
        role: &'static str,
    },
    #[error("id column and text column must differ (both '{0}')")]
    IdColumnIsTextColumn(String),
    #[error("{set} record at row {row} has an empty id")]
    EmptyId { set: &'static str, row: usize },
    #[error("{set} record id '{id}' appears more than once")]
    DuplicateId { set: &'static str, id: String },
    #[error("row {row} has {actual} cells but the header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// One requirement, child or parent. Immutable after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementRecord {
    pub id: String,
    pub text: String,
    /// Display name for parents; exports fall back to `text` when absent.
    #[serde(default)]
    pub title: Option<String>,
    /// Caller-selected extra columns, in selection order.
    #[serde(default)]
    pub extras: Vec<(String, String)>,
}

impl RequirementRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            title: None,
            extras: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_extra(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.push((column.into(), value.into()));
        self
    }

    /// `title` if set and non-blank, otherwise the raw text.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => &self.text,
        }
    }

    pub fn extra(&self, column: &str) -> Option<&str> {
        self.extras
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

/// Which source columns feed a record's fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMapping {
    pub id_column: String,
    pub text_column: String,
    #[serde(default)]
    pub title_column: Option<String>,
    #[serde(default)]
    pub extra_columns: Vec<String>,
}

impl ColumnMapping {
    pub fn new(id_column: impl Into<String>, text_column: impl Into<String>) -> Self {
        Self {
            id_column: id_column.into(),
            text_column: text_column.into(),
            title_column: None,
            extra_columns: Vec::new(),
        }
    }
}

/// Header plus string cells, as produced by whatever reads the source sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RecordTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn column_index(
        &self,
        column: &str,
        role: &'static str,
        set: &'static str,
    ) -> Result<usize, InputError> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| InputError::MissingColumn {
                set,
                column: column.to_string(),
                role,
            })
    }

    /// Resolve `mapping` against the header and build records in row order.
    ///
    /// Missing cells in short rows are rejected rather than padded.
    pub fn into_records(
        self,
        mapping: &ColumnMapping,
        set: &'static str,
    ) -> Result<Vec<RequirementRecord>, InputError> {
        if mapping.id_column == mapping.text_column {
            return Err(InputError::IdColumnIsTextColumn(mapping.id_column.clone()));
        }
        let id_idx = self.column_index(&mapping.id_column, "id", set)?;
        let text_idx = self.column_index(&mapping.text_column, "text", set)?;
        let title_idx = mapping
            .title_column
            .as_deref()
            .map(|c| self.column_index(c, "title", set))
            .transpose()?;
        let extra_idx = mapping
            .extra_columns
            .iter()
            .map(|c| {
                self.column_index(c, "extra", set)
                    .map(|idx| (c.clone(), idx))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let expected = self.headers.len();
        let mut records = Vec::with_capacity(self.rows.len());
        for (row_no, mut row) in self.rows.into_iter().enumerate() {
            if row.len() != expected {
                return Err(InputError::RaggedRow {
                    row: row_no,
                    expected,
                    actual: row.len(),
                });
            }
            let extras = extra_idx
                .iter()
                .map(|(name, idx)| (name.clone(), row[*idx].clone()))
                .collect();
            let title = title_idx.map(|idx| row[idx].clone());
            let text = std::mem::take(&mut row[text_idx]);
            let id = std::mem::take(&mut row[id_idx]).trim().to_string();
            records.push(RequirementRecord {
                id,
                text,
                title,
                extras,
            });
        }
        Ok(records)
    }
}

/// Reject empty sets, blank ids, and duplicate ids.
pub fn validate_records(
    records: &[RequirementRecord],
    set: &'static str,
) -> Result<(), InputError> {
    if records.is_empty() {
        return Err(InputError::EmptyRecordSet(set));
    }
    let mut seen = HashSet::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        if record.id.trim().is_empty() {
            return Err(InputError::EmptyId { set, row });
        }
        if !seen.insert(record.id.as_str()) {
            return Err(InputError::DuplicateId {
                set,
                id: record.id.clone(),
            });
        }
    }
    Ok(())
}
