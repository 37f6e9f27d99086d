//! Domain lexicon: keyword groups shared by every rule evaluation in a run.
//!
//! The on-disk format is a JSON object mapping a group name to an array of
//! keywords or phrases:
//!
//! ```json
//! { "SpO2": ["spo2", "oxygen saturation", "desaturation"],
//!   "ECG":  ["ecg", "electrocardiogram", "waveform"] }
//! ```
//!
//! Group names are reported verbatim in `matched_groups`. Keywords are
//! case-insensitive and are compiled into folded token sequences once, at
//! load time. Any malformed entry rejects the whole lexicon; dropping a group
//! silently would change what matches.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::rules::keyword_tokens;

#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("failed to read lexicon file: {0}")]
    Io(#[from] std::io::Error),
    #[error("lexicon is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("lexicon root must be an object of group -> keyword array")]
    NotAnObject,
    #[error("lexicon group name must not be empty")]
    EmptyGroupName,
    #[error("lexicon group '{0}' must be an array of strings")]
    GroupNotArray(String),
    #[error("lexicon group '{0}' has no keywords")]
    EmptyGroup(String),
    #[error("lexicon group '{group}' keyword #{index} is not a non-empty string")]
    BadKeyword { group: String, index: usize },
}

/// Compiled keyword group: each keyword as a folded token sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordGroup {
    pub keywords: Vec<String>,
    pub(crate) phrases: Vec<Vec<String>>,
}

/// Immutable group name -> keywords table, ordered by group name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainLexicon {
    groups: BTreeMap<String, KeywordGroup>,
}

impl DomainLexicon {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LexiconError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, LexiconError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, LexiconError> {
        let Value::Object(map) = value else {
            return Err(LexiconError::NotAnObject);
        };
        let mut groups = BTreeMap::new();
        for (name, keywords) in map {
            let Value::Array(items) = keywords else {
                return Err(LexiconError::GroupNotArray(name));
            };
            let mut parsed = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Value::String(s) if !s.trim().is_empty() => parsed.push(s),
                    _ => {
                        return Err(LexiconError::BadKeyword {
                            group: name,
                            index,
                        });
                    }
                }
            }
            Self::insert_group(&mut groups, name, parsed)?;
        }
        Ok(Self { groups })
    }

    /// Build from in-memory pairs; same validation as the JSON path.
    pub fn from_groups<I, K, V, S>(groups: I) -> Result<Self, LexiconError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = BTreeMap::new();
        for (name, keywords) in groups {
            let name = name.into();
            let mut parsed = Vec::new();
            for (index, keyword) in keywords.into_iter().enumerate() {
                let keyword = keyword.into();
                if keyword.trim().is_empty() {
                    return Err(LexiconError::BadKeyword { group: name, index });
                }
                parsed.push(keyword);
            }
            Self::insert_group(&mut table, name, parsed)?;
        }
        Ok(Self { groups: table })
    }

    fn insert_group(
        table: &mut BTreeMap<String, KeywordGroup>,
        name: String,
        keywords: Vec<String>,
    ) -> Result<(), LexiconError> {
        if name.trim().is_empty() {
            return Err(LexiconError::EmptyGroupName);
        }
        if keywords.is_empty() {
            return Err(LexiconError::EmptyGroup(name));
        }
        let mut phrases: Vec<Vec<String>> = Vec::with_capacity(keywords.len());
        for (index, keyword) in keywords.iter().enumerate() {
            let tokens = keyword_tokens(keyword);
            // e.g. "--" folds to nothing and would match everywhere
            if tokens.is_empty() {
                return Err(LexiconError::BadKeyword { group: name, index });
            }
            if !phrases.contains(&tokens) {
                phrases.push(tokens);
            }
        }
        table.insert(name, KeywordGroup { keywords, phrases });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn get(&self, group: &str) -> Option<&KeywordGroup> {
        self.groups.get(group)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &KeywordGroup)> {
        self.groups.iter()
    }
}
