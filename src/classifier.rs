//! Lexical admission control for submitted statements.
//!
//! Statements are matched against a fixed set of keyword patterns instead of
//! being parsed. Matching runs on an uppercased copy; the text handed to the
//! executor keeps its original case.
//!
//! Known limitation: this is a filter on shape, not a parser. A keyword that
//! appears inside a string literal (`WHERE note = 'drop table'`) is still
//! rejected, and destructive forms outside the pattern list are left to the
//! backend session, which runs read-only.

use log::debug;
use regex::{Regex, RegexSet};
use serde_json::Value as JsonValue;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("Invalid query")]
    InvalidInput,

    #[error("Query contains prohibited operations")]
    ProhibitedOperation { keyword: &'static str },

    #[error("Only SELECT queries are allowed")]
    NotSelect,
}

/// Patterns rejected wherever they appear, paired with the label used in logs.
const PROHIBITED_PATTERNS: &[(&str, &str)] = &[
    (r"\bDROP\s+(TABLE|DATABASE|SCHEMA)\b", "DROP"),
    (r"\bDELETE\s+FROM\b", "DELETE FROM"),
    (r"\bTRUNCATE\b", "TRUNCATE"),
    (r"\bALTER\s+TABLE\b", "ALTER TABLE"),
    (r"\bCREATE\s+(TABLE|DATABASE|SCHEMA)\b", "CREATE"),
    (r"\bINSERT\s+INTO\b", "INSERT INTO"),
    (r"(?s)\bUPDATE\b.*\bSET\b", "UPDATE ... SET"),
    (r"\bGRANT\b", "GRANT"),
    (r"\bREVOKE\b", "REVOKE"),
    (r"\bEXEC(UTE)?\b", "EXEC"),
];

static PROHIBITED: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(PROHIBITED_PATTERNS.iter().map(|(pattern, _)| *pattern))
        .expect("prohibited patterns are valid")
});

/// Keywords that may not open a statement, at the start of the text or
/// right after a `;` separator. Whitespace and SQL comments may sit in between.
const LEADING_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "INSERT", "UPDATE", "GRANT", "REVOKE",
    "EXECUTE", "EXEC",
];

static LEADING_MODIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?s)(^|;)(?:\s|/\*.*?\*/|--[^\n]*\n)*({})\b",
        LEADING_KEYWORDS.join("|")
    ))
    .expect("leading keyword pattern is valid")
});

/// Decide whether `raw` may be executed.
///
/// Returns the statement trimmed at its edges, ready for execution.
pub fn classify(raw: &str) -> Result<&str, ClassifyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ClassifyError::InvalidInput);
    }

    let normalized = trimmed.to_uppercase();

    if let Some(keyword) = prohibited_keyword(&normalized) {
        debug!("Rejected statement containing {}", keyword);
        return Err(ClassifyError::ProhibitedOperation { keyword });
    }

    if !starts_with_select(&normalized) {
        return Err(ClassifyError::NotSelect);
    }

    Ok(trimmed)
}

/// Same rules as [`classify`] for a value taken straight from a JSON body.
/// Anything other than a string is invalid input.
pub fn classify_value(raw: &JsonValue) -> Result<&str, ClassifyError> {
    match raw {
        JsonValue::String(sql) => classify(sql),
        _ => Err(ClassifyError::InvalidInput),
    }
}

fn prohibited_keyword(normalized: &str) -> Option<&'static str> {
    if let Some(index) = PROHIBITED.matches(normalized).into_iter().next() {
        return Some(PROHIBITED_PATTERNS[index].1);
    }

    LEADING_MODIFIER
        .captures(normalized)
        .and_then(|caps| caps.get(2))
        .and_then(|m| LEADING_KEYWORDS.iter().copied().find(|k| *k == m.as_str()))
}

fn starts_with_select(normalized: &str) -> bool {
    match normalized.strip_prefix("SELECT") {
        Some(rest) => !rest
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_'),
        None => false,
    }
}
