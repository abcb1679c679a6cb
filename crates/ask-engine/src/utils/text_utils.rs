//! Efficient text processing utilities

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Question normalization helpers shared by the hasher and the similarity scorer
pub struct TextUtils;

impl TextUtils {
    /// Normalize whitespace efficiently
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Lower-case a question and collapse every whitespace run into one space.
    ///
    /// This is the canonical form fed to the exact-match fingerprint, so two
    /// questions that differ only in case or spacing normalize identically.
    pub fn normalize_question(text: &str) -> String {
        Self::normalize_whitespace(&text.to_lowercase()).into_owned()
    }

    /// Split text into case-folded words.
    ///
    /// Punctuation is stripped from the edges of each word so that `"today?"`
    /// and `"today"` produce the same token. Words made only of punctuation
    /// are dropped.
    pub fn tokenize(text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    /// Truncate text to max chars with ellipsis if needed
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            Cow::Borrowed(text)
        } else if max_chars <= 3 {
            Cow::Borrowed("...")
        } else {
            let mut result: String = text.chars().take(max_chars - 3).collect();
            result.push_str("...");
            Cow::Owned(result)
        }
    }
}
