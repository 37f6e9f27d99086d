//! Suffix-based lemmatizer.
//!
//! Deliberately small: plural and `-ied` reduction only. Every rule produces a
//! word no other rule applies to, so `lemmatize(lemmatize(w)) == lemmatize(w)`.

/// Words that end like plurals but are not.
const EXCEPTIONS: &[&str] = &[
    "always",
    "besides",
    "does",
    "lens",
    "news",
    "perhaps",
    "series",
    "sometimes",
    "species",
    "towards",
    "whereas",
    "yes",
];

/// Reduce a lowercase word to its lemma. Non-alphabetic tokens and words of
/// three characters or fewer are returned unchanged.
pub fn lemmatize(word: &str) -> String {
    if word.chars().count() <= 3 || !word.chars().all(char::is_alphabetic) {
        return word.to_string();
    }
    if EXCEPTIONS.contains(&word) {
        return word.to_string();
    }

    if let Some(stem) = word.strip_suffix("ies") {
        if stem.chars().count() >= 2 {
            return format!("{stem}y");
        }
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ied") {
        if stem.chars().count() >= 2 {
            return format!("{stem}y");
        }
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("sses") {
        return format!("{stem}ss");
    }
    for suffix in ["xes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix('s') {
        // "-ieds" would reduce twice
        if !stem.ends_with("ied") {
            return stem.to_string();
        }
    }
    word.to_string()
}
