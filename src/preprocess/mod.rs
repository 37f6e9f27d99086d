//! Requirement text normalization.
//!
//! Turns raw requirement text into the form every scorer consumes:
//!
//! - boilerplate stop phrases ("the user shall be able to", ...) are removed
//!   as whole token sequences, case-insensitively
//! - whitespace collapses to single spaces, edges trimmed
//! - ordinary words are lowercased and lemmatized
//! - domain tokens (units, acronyms, anything with a digit or inner capital,
//!   plus a configured protected list) pass through verbatim
//!
//! Pure and idempotent: `normalize(normalize(x)) == normalize(x)`. Text that
//! is empty after normalization comes back as `""`, which downstream stages
//! read as "no signal".

mod lemma;

use std::collections::HashSet;

pub use lemma::lemmatize;

/// Normalize `text`, stripping `stop_phrases`, with no extra protected tokens.
pub fn normalize<S: AsRef<str>>(text: &str, stop_phrases: &[S]) -> String {
    Preprocessor::new(stop_phrases, &[] as &[&str]).normalize(text)
}

/// Reusable normalizer with pre-folded stop phrases.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    stop_phrases: Vec<Vec<String>>,
    protected: HashSet<String>,
}

impl Preprocessor {
    pub fn new<S: AsRef<str>, P: AsRef<str>>(stop_phrases: &[S], protected_tokens: &[P]) -> Self {
        let stop_phrases = stop_phrases
            .iter()
            .map(|phrase| {
                phrase
                    .as_ref()
                    .split_whitespace()
                    .filter_map(fold_word)
                    .collect::<Vec<_>>()
            })
            .filter(|tokens| !tokens.is_empty())
            .collect();
        let protected = protected_tokens
            .iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            stop_phrases,
            protected,
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        let tokens: Vec<String> = text
            .split_whitespace()
            .filter_map(|raw| self.prepare_token(raw))
            .collect();
        let tokens = self.strip_stop_phrases(tokens);

        let mut normalized = String::with_capacity(text.len());
        for token in &tokens {
            if !normalized.is_empty() {
                normalized.push(' ');
            }
            normalized.push_str(token);
        }
        normalized
    }

    fn prepare_token(&self, raw: &str) -> Option<String> {
        let trimmed = trim_punctuation(raw);
        if trimmed.is_empty() {
            return None;
        }
        if is_domain_token(trimmed) || self.protected.contains(&trimmed.to_lowercase()) {
            return Some(trimmed.to_string());
        }
        Some(lemmatize(&trimmed.to_lowercase()))
    }

    /// Removes stop phrases until none remain, so removal that joins two
    /// halves of a phrase is caught too. Tokens are already lemmatized here,
    /// which keeps a second pass from finding new phrases.
    fn strip_stop_phrases(&self, mut tokens: Vec<String>) -> Vec<String> {
        if self.stop_phrases.is_empty() {
            return tokens;
        }
        loop {
            let keys: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
            let mut kept = Vec::with_capacity(tokens.len());
            let mut removed = false;
            let mut idx = 0;
            while idx < tokens.len() {
                let hit = self
                    .stop_phrases
                    .iter()
                    .find(|phrase| keys[idx..].starts_with(phrase.as_slice()));
                match hit {
                    Some(phrase) => {
                        idx += phrase.len();
                        removed = true;
                    }
                    None => {
                        kept.push(std::mem::take(&mut tokens[idx]));
                        idx += 1;
                    }
                }
            }
            tokens = kept;
            if !removed {
                return tokens;
            }
        }
    }
}

/// Lowercase and lemmatize one word of a stop phrase or keyword.
fn fold_word(raw: &str) -> Option<String> {
    let trimmed = trim_punctuation(raw);
    if trimmed.is_empty() {
        None
    } else {
        Some(lemmatize(&trimmed.to_lowercase()))
    }
}

fn trim_punctuation(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_ascii_punctuation() && c != '%')
}

/// Units and acronyms: a digit anywhere, or a capital after the first char.
fn is_domain_token(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit()) || token.chars().skip(1).any(char::is_uppercase)
}
