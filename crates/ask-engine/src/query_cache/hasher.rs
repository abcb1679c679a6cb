use crate::utils::TextUtils;

/// Stable question fingerprint for the exact-match tier
pub struct QueryHasher;

impl QueryHasher {
    /// Lower-case hex BLAKE3 digest of the normalized question (64 chars)
    pub fn hash(text: &str) -> String {
        let normalized = TextUtils::normalize_question(text);
        blake3::hash(normalized.as_bytes()).to_hex().to_string()
    }
}
