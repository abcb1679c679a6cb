use std::collections::HashSet;
use crate::utils::TextUtils;

/// Set-overlap similarity between two questions
pub struct SimilarityScorer;

impl SimilarityScorer {
    /// Jaccard similarity `|A ∩ B| / |A ∪ B|` over case-folded word sets.
    ///
    /// Symmetric and linear in the number of words. Two empty inputs score 0.
    pub fn score<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B]) -> f32 {
        let set_a: HashSet<String> = a.iter().map(|w| w.as_ref().to_lowercase()).collect();
        let set_b: HashSet<String> = b.iter().map(|w| w.as_ref().to_lowercase()).collect();

        let union = set_a.union(&set_b).count();
        if union == 0 {
            return 0.0;
        }
        let intersection = set_a.intersection(&set_b).count();
        intersection as f32 / union as f32
    }

    /// Tokenize both questions and score them
    pub fn score_text(a: &str, b: &str) -> f32 {
        Self::score(&TextUtils::tokenize(a), &TextUtils::tokenize(b))
    }
}
