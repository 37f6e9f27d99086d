//! Rule-based matching against the domain lexicon.
//!
//! A pair earns the fixed [`RULE_SCORE`] when at least one lexicon group is
//! present in both texts. Presence means a keyword appears as a whole word,
//! or a phrase as a whole contiguous word sequence: `ecg` never matches
//! inside `ecgx`, and `bp` never matches inside `bpm`. The score does not grow
//! with the number of shared groups; every shared group is still reported.

use std::collections::BTreeSet;

use crate::lexicon::DomainLexicon;
use crate::preprocess::lemmatize;

/// Score assigned to any pair sharing a lexicon group.
pub const RULE_SCORE: f32 = 0.85;

/// Outcome of a rule evaluation for one (child, parent) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleMatch {
    /// `Some(RULE_SCORE)` when any group is shared, otherwise `None`.
    pub score: Option<f32>,
    pub matched_groups: BTreeSet<String>,
}

impl RuleMatch {
    pub fn none() -> Self {
        Self::default()
    }

    fn from_groups(matched_groups: BTreeSet<String>) -> Self {
        let score = (!matched_groups.is_empty()).then_some(RULE_SCORE);
        Self {
            score,
            matched_groups,
        }
    }
}

/// Split on non-alphanumeric boundaries, lowercase, lemmatize.
///
/// Used for both lexicon keywords and requirement texts so both sides fold
/// the same way.
pub fn keyword_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| lemmatize(&t.to_lowercase()))
        .collect()
}

fn contains_phrase(tokens: &[String], phrase: &[String]) -> bool {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return false;
    }
    tokens.windows(phrase.len()).any(|window| window == phrase)
}

/// Lexicon groups with at least one keyword present in `text`.
pub fn groups_present(text: &str, lexicon: &DomainLexicon) -> BTreeSet<String> {
    let tokens = keyword_tokens(text);
    if tokens.is_empty() {
        return BTreeSet::new();
    }
    lexicon
        .iter()
        .filter(|(_, group)| {
            group
                .phrases
                .iter()
                .any(|phrase| contains_phrase(&tokens, phrase))
        })
        .map(|(name, _)| name.clone())
        .collect()
}

/// Combine precomputed per-text group sets into a pair result.
///
/// The pipeline computes [`groups_present`] once per record and calls this
/// for every pair instead of re-tokenizing.
pub fn match_groups(child: &BTreeSet<String>, parent: &BTreeSet<String>) -> RuleMatch {
    RuleMatch::from_groups(child.intersection(parent).cloned().collect())
}

/// Score one pair directly.
pub fn score(child_text: &str, parent_text: &str, lexicon: &DomainLexicon) -> RuleMatch {
    let child = groups_present(child_text, lexicon);
    if child.is_empty() {
        return RuleMatch::none();
    }
    let parent = groups_present(parent_text, lexicon);
    match_groups(&child, &parent)
}
