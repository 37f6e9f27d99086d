//! Corpus-wide TF-IDF vectorization and cosine similarity.
//!
//! The vectorizer is fit once over every child and parent text in a batch so
//! all pairs share one vocabulary and one IDF table. Word tokens are runs of
//! two or more alphanumeric characters, lowercased; stop words are dropped
//! before n-grams are formed. Weights are raw counts times smoothed IDF
//! (`ln((1 + n) / (1 + df)) + 1`) and each row is L2-normalized, so cosine
//! similarity reduces to a dot product.
//!
//! [`VectorSpace::similarity_matrix`] computes a whole child x parent block in
//! one pass over an inverted index of the parent rows. Accumulation always
//! walks terms in ascending id order, so the result is bit-identical to
//! calling [`similarity`] per pair, whatever the thread count.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// English stop words removed before n-gram extraction.
pub const ENGLISH_STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "either",
    "etc", "every", "few", "for", "from", "further", "had", "has", "have", "having", "he", "her",
    "here", "hers", "him", "his", "how", "if", "in", "into", "is", "it", "its", "itself", "least",
    "less", "may", "me", "might", "more", "most", "must", "my", "no", "nor", "not", "of", "off",
    "on", "once", "one", "only", "or", "other", "our", "ours", "out", "over", "own", "per",
    "same", "she", "should", "so", "some", "such", "than", "that", "the", "their", "theirs",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "upon", "us", "very", "via", "was", "we", "were", "what", "when", "where",
    "whether", "which", "while", "who", "whom", "why", "will", "with", "within", "without",
    "would", "yet", "you", "your", "yours",
];

/// Vectorizer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TfidfConfig {
    /// Inclusive n-gram orders, `(1, 3)` = unigrams through trigrams.
    pub ngram_range: (usize, usize),
    /// Drop [`ENGLISH_STOP_WORDS`].
    #[serde(default = "default_true")]
    pub english_stop_words: bool,
    /// Additional stop words; multi-word entries contribute each word.
    #[serde(default)]
    pub extra_stop_words: Vec<String>,
    /// Keep only the most frequent terms across the corpus.
    #[serde(default)]
    pub max_features: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for TfidfConfig {
    fn default() -> Self {
        Self {
            ngram_range: (1, 3),
            english_stop_words: true,
            extra_stop_words: Vec::new(),
            max_features: None,
        }
    }
}

/// Sparse, L2-normalized term-weight row. Entries sorted by term id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    entries: Vec<(u32, f64)>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(u32, f64)] {
        &self.entries
    }
}

/// Cosine similarity of two rows from the same space, clamped to `[0, 1]`.
pub fn similarity(a: &SparseVector, b: &SparseVector) -> f32 {
    let (mut i, mut j) = (0, 0);
    let mut dot = 0.0f64;
    while i < a.entries.len() && j < b.entries.len() {
        let (ta, wa) = a.entries[i];
        let (tb, wb) = b.entries[j];
        match ta.cmp(&tb) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += wa * wb;
                i += 1;
                j += 1;
            }
        }
    }
    clamp_unit(dot)
}

fn clamp_unit(value: f64) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0) as f32
    }
}

/// Fitted vocabulary, IDF table, and one row per input text (input order).
#[derive(Debug, Clone)]
pub struct VectorSpace {
    vocabulary: BTreeMap<String, u32>,
    idf: Vec<f64>,
    rows: Vec<SparseVector>,
}

impl VectorSpace {
    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn term_id(&self, term: &str) -> Option<u32> {
        self.vocabulary.get(term).copied()
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.term_id(term).map(|id| self.idf[id as usize])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<&SparseVector> {
        self.rows.get(idx)
    }

    /// Similarity of every row in `left` against every row in `right`,
    /// as `matrix[l][r]`.
    pub fn similarity_matrix(&self, left: Range<usize>, right: Range<usize>) -> Vec<Vec<f32>> {
        let right_rows = &self.rows[right];
        let mut postings: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.vocabulary.len()];
        for (col, row) in right_rows.iter().enumerate() {
            for &(term, weight) in &row.entries {
                postings[term as usize].push((col, weight));
            }
        }

        self.rows[left]
            .par_iter()
            .map(|row| {
                let mut acc = vec![0.0f64; right_rows.len()];
                for &(term, weight) in &row.entries {
                    for &(col, other) in &postings[term as usize] {
                        acc[col] += weight * other;
                    }
                }
                acc.into_iter().map(clamp_unit).collect()
            })
            .collect()
    }
}

/// Stateless analyzer + fitter. See the module docs for the weighting.
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    cfg: TfidfConfig,
    stop_words: HashSet<String>,
}

impl TfidfVectorizer {
    pub fn new(cfg: TfidfConfig) -> Self {
        let mut stop_words: HashSet<String> = HashSet::new();
        if cfg.english_stop_words {
            stop_words.extend(ENGLISH_STOP_WORDS.iter().map(|w| (*w).to_string()));
        }
        for entry in &cfg.extra_stop_words {
            stop_words.extend(word_tokens(entry));
        }
        Self { cfg, stop_words }
    }

    pub fn config(&self) -> &TfidfConfig {
        &self.cfg
    }

    /// Word tokens minus stop words, expanded into the configured n-grams.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let words: Vec<String> = word_tokens(text)
            .into_iter()
            .filter(|w| !self.stop_words.contains(w))
            .collect();
        let (min_n, max_n) = self.cfg.ngram_range;
        let min_n = min_n.max(1);
        let mut grams = Vec::new();
        for n in min_n..=max_n.max(min_n) {
            if n > words.len() {
                break;
            }
            grams.extend(words.windows(n).map(|w| w.join(" ")));
        }
        grams
    }

    /// Fit vocabulary and IDF over `texts` and vectorize each one.
    pub fn fit<S: AsRef<str> + Sync>(&self, texts: &[S]) -> VectorSpace {
        let analyzed: Vec<Vec<String>> = texts
            .par_iter()
            .map(|text| self.analyze(text.as_ref()))
            .collect();

        // term -> (document frequency, corpus frequency)
        let mut stats: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for doc in &analyzed {
            let mut seen: HashSet<&str> = HashSet::with_capacity(doc.len());
            for term in doc {
                let entry = stats.entry(term.as_str()).or_insert((0, 0));
                entry.1 += 1;
                if seen.insert(term.as_str()) {
                    entry.0 += 1;
                }
            }
        }

        if let Some(limit) = self.cfg.max_features {
            if stats.len() > limit {
                let mut ranked: Vec<(&str, usize)> =
                    stats.iter().map(|(t, (_, cf))| (*t, *cf)).collect();
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
                let keep: HashSet<&str> = ranked.into_iter().take(limit).map(|(t, _)| t).collect();
                stats.retain(|term, _| keep.contains(term));
            }
        }

        let n_docs = texts.len() as f64;
        let mut vocabulary = BTreeMap::new();
        let mut idf = Vec::with_capacity(stats.len());
        for (id, (term, (df, _))) in stats.iter().enumerate() {
            vocabulary.insert((*term).to_string(), id as u32);
            idf.push(((1.0 + n_docs) / (1.0 + *df as f64)).ln() + 1.0);
        }

        let rows = analyzed
            .par_iter()
            .map(|doc| {
                let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
                for term in doc {
                    if let Some(&id) = vocabulary.get(term.as_str()) {
                        *counts.entry(id).or_insert(0) += 1;
                    }
                }
                let mut entries: Vec<(u32, f64)> = counts
                    .into_iter()
                    .map(|(id, count)| (id, count as f64 * idf[id as usize]))
                    .collect();
                let norm = entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for (_, w) in entries.iter_mut() {
                        *w /= norm;
                    }
                }
                SparseVector { entries }
            })
            .collect();

        VectorSpace {
            vocabulary,
            idf,
            rows,
        }
    }
}

fn word_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}
