use regex::Regex;
use thiserror::Error;

/// Why a generated query was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardViolation {
    #[error("generated query is empty")]
    Empty,

    #[error("generated query does not start with a read-only verb: {0}")]
    NotReadOnly(String),

    #[error("generated query contains more than one statement")]
    MultipleStatements,
}

/// Accepts only a single statement that starts with one of the read-only verbs
#[derive(Debug, Clone)]
pub struct QueryGuard {
    leading_verb: Regex,
}

impl QueryGuard {
    pub fn new<S: AsRef<str>>(verbs: &[S]) -> anyhow::Result<Self> {
        let alternatives: Vec<String> = verbs
            .iter()
            .map(|v| v.as_ref().trim())
            .filter(|v| !v.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Err(anyhow::anyhow!("At least one read-only verb is required"));
        }
        let leading_verb = Regex::new(&format!(r"(?i)^(?:{})\b", alternatives.join("|")))?;
        Ok(Self { leading_verb })
    }

    /// Normalized query text, or the reason it was refused
    pub fn check(&self, candidate: &str) -> Result<String, GuardViolation> {
        let trimmed = candidate.trim();
        let statement = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

        if statement.is_empty() {
            return Err(GuardViolation::Empty);
        }
        if has_statement_separator(statement) {
            return Err(GuardViolation::MultipleStatements);
        }
        if !self.leading_verb.is_match(statement) {
            let head: String = statement.chars().take(40).collect();
            return Err(GuardViolation::NotReadOnly(head));
        }
        Ok(statement.to_string())
    }
}

/// Whether a `;` appears outside string literals and quoted identifiers.
/// Doubled quotes inside a literal toggle twice and stay balanced.
fn has_statement_separator(statement: &str) -> bool {
    let mut closing: Option<char> = None;
    for c in statement.chars() {
        match closing {
            Some(close) if c == close => closing = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => closing = Some(c),
                '[' => closing = Some(']'),
                ';' => return true,
                _ => {}
            },
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> QueryGuard {
        QueryGuard::new(&["select"]).unwrap()
    }

    #[test]
    fn test_accepts_select_and_strips_trailing_semicolon() {
        assert_eq!(
            guard().check("  select name from products;  ").unwrap(),
            "select name from products"
        );
    }

    #[test]
    fn test_rejects_mutating_statements() {
        assert!(matches!(guard().check("DROP TABLE x"), Err(GuardViolation::NotReadOnly(_))));
        assert!(matches!(guard().check("DELETE FROM products"), Err(GuardViolation::NotReadOnly(_))));
    }

    #[test]
    fn test_verb_needs_word_boundary() {
        assert!(guard().check("SELECTED rows").is_err());
        assert!(guard().check("SELECT\n*\nFROM t").is_ok());
    }

    #[test]
    fn test_rejects_stacked_statements() {
        assert_eq!(
            guard().check("SELECT 1; DROP TABLE x;"),
            Err(GuardViolation::MultipleStatements)
        );
    }

    #[test]
    fn test_semicolons_inside_quotes_are_not_separators() {
        assert_eq!(
            guard().check("SELECT * FROM products WHERE note = 'a;b'").unwrap(),
            "SELECT * FROM products WHERE note = 'a;b'"
        );
        assert!(guard().check("SELECT \"odd;name\", [x;y] FROM t WHERE a = 'it''s;here';").is_ok());
        assert_eq!(
            guard().check("SELECT 'a;b'; DELETE FROM products"),
            Err(GuardViolation::MultipleStatements)
        );
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(guard().check("  ; "), Err(GuardViolation::Empty));
    }

    #[test]
    fn test_custom_verbs() {
        let guard = QueryGuard::new(&["select", "with"]).unwrap();
        assert!(guard.check("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
        assert!(QueryGuard::new::<&str>(&[]).is_err());
    }
}
