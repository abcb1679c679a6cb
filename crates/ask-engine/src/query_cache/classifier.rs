use regex::Regex;
use lazy_static::lazy_static;
use crate::memory_db::ComplexityClass;

lazy_static! {
    static ref COMPLEX_MARKERS: Regex = Regex::new(r"(?i)\b(join|union|intersect|except)\b").unwrap();
    static ref SELECT_KEYWORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
    static ref MEDIUM_MARKERS: Regex = Regex::new(r"(?i)\b(group\s+by|order\s+by|having)\b").unwrap();
}

/// Structural complexity label for a generated query
pub struct ResultClassifier;

impl ResultClassifier {
    /// Joins, set operations and subqueries are complex; grouping, ordering and
    /// `HAVING` are medium; everything else is simple. The row count does not
    /// influence the class.
    pub fn classify(query: &str, _row_count: usize) -> ComplexityClass {
        if COMPLEX_MARKERS.is_match(query) || SELECT_KEYWORD.find_iter(query).count() > 1 {
            ComplexityClass::Complex
        } else if MEDIUM_MARKERS.is_match(query) {
            ComplexityClass::Medium
        } else {
            ComplexityClass::Simple
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_select_is_simple() {
        assert_eq!(
            ResultClassifier::classify("SELECT name FROM products WHERE stock > 5", 3),
            ComplexityClass::Simple
        );
    }

    #[test]
    fn test_grouping_and_ordering_are_medium() {
        assert_eq!(
            ResultClassifier::classify("SELECT category, SUM(stock) FROM products GROUP BY category", 4),
            ComplexityClass::Medium
        );
        assert_eq!(
            ResultClassifier::classify("select name from products order  by stock desc limit 5", 5),
            ComplexityClass::Medium
        );
    }

    #[test]
    fn test_join_union_and_subquery_are_complex() {
        assert_eq!(
            ResultClassifier::classify("SELECT * FROM a JOIN b ON a.id = b.a_id ORDER BY a.id", 0),
            ComplexityClass::Complex
        );
        assert_eq!(
            ResultClassifier::classify("SELECT id FROM a UNION SELECT id FROM b", 0),
            ComplexityClass::Complex
        );
        assert_eq!(
            ResultClassifier::classify("SELECT * FROM p WHERE id IN (SELECT pid FROM s)", 0),
            ComplexityClass::Complex
        );
    }

    #[test]
    fn test_markers_need_word_boundaries() {
        assert_eq!(
            ResultClassifier::classify("SELECT joined_at, union_name FROM members", 1),
            ComplexityClass::Simple
        );
    }
}
