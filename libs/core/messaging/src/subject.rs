//! Subject matching with broker wildcard semantics.
//!
//! Subjects are `.`-separated tokens. In a pattern, `*` matches exactly one
//! token and `>` (last token only) matches one or more trailing tokens.

use crate::error::ValidationError;

const SEPARATOR: char = '.';
const SINGLE: &str = "*";
const TAIL: &str = ">";

/// Whether `subject` is matched by `pattern`.
pub fn subject_matches(subject: &str, pattern: &str) -> bool {
    let mut subject_tokens = subject.split(SEPARATOR);
    let mut pattern_tokens = pattern.split(SEPARATOR).peekable();

    while let Some(expected) = pattern_tokens.next() {
        if expected == TAIL && pattern_tokens.peek().is_none() {
            return subject_tokens.next().is_some();
        }
        match subject_tokens.next() {
            Some(token) if expected == SINGLE || expected == token => {}
            _ => return false,
        }
    }

    subject_tokens.next().is_none()
}

/// Whether any of `patterns` matches `subject`.
pub fn is_covered<S: AsRef<str>>(subject: &str, patterns: &[S]) -> bool {
    patterns
        .iter()
        .any(|pattern| subject_matches(subject, pattern.as_ref()))
}

/// Check a concrete subject a message may be published on.
pub fn validate_publish_subject(subject: &str) -> Result<(), ValidationError> {
    if subject.is_empty() {
        return Err(ValidationError::EmptySubject);
    }

    let invalid = |reason| ValidationError::InvalidSubject {
        subject: subject.to_string(),
        reason,
    };

    if subject.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }
    for token in subject.split(SEPARATOR) {
        if token.is_empty() {
            return Err(invalid("contains an empty token"));
        }
        if token == SINGLE || token == TAIL {
            return Err(invalid("wildcards are not allowed when publishing"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(subject_matches("orders.created", "orders.created"));
        assert!(!subject_matches("orders.created", "orders.paid"));
        assert!(!subject_matches("orders.created.eu", "orders.created"));
        assert!(!subject_matches("orders", "orders.created"));
    }

    #[test]
    fn test_single_token_wildcard() {
        assert!(subject_matches("orders.created", "orders.*"));
        assert!(subject_matches("orders.eu.paid", "orders.*.paid"));
        assert!(!subject_matches("orders.eu.west.paid", "orders.*.paid"));
        assert!(!subject_matches("orders", "orders.*"));
    }

    #[test]
    fn test_tail_wildcard_needs_at_least_one_token() {
        assert!(subject_matches("orders.created", "orders.>"));
        assert!(subject_matches("orders.eu.created", "orders.>"));
        assert!(!subject_matches("orders", "orders.>"));
        assert!(subject_matches("anything.at.all", ">"));
    }

    #[test]
    fn test_tail_wildcard_only_special_in_last_position() {
        assert!(!subject_matches("orders.created", ">.created"));
        assert!(subject_matches(">.created", ">.created"));
    }

    #[test]
    fn test_is_covered() {
        let filters = ["invoices.*", "orders.>"];
        assert!(is_covered("orders.eu.created", &filters));
        assert!(!is_covered("payments.created", &filters));
        assert!(!is_covered("a", &Vec::<String>::new()));
    }

    #[test]
    fn test_validate_publish_subject() {
        assert!(validate_publish_subject("orders.created").is_ok());
        assert_eq!(validate_publish_subject(""), Err(ValidationError::EmptySubject));
        assert!(validate_publish_subject("orders..created").is_err());
        assert!(validate_publish_subject(".orders").is_err());
        assert!(validate_publish_subject("orders created").is_err());
        assert!(validate_publish_subject("orders.*").is_err());
        assert!(validate_publish_subject("orders.>").is_err());
    }
}
