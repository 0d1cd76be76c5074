//! Read-only query gate.

use super::ValidationResult;
use super::patterns::ValidationPatterns;
use crate::error::DbVaultError;

/// A query that passed [`validate_query`].
///
/// There is no other constructor, so holding a `ReadOnlyQuery` proves the
/// text was checked. The text is executed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadOnlyQuery(String);

impl ReadOnlyQuery {
    /// Validates `sql` and wraps it.
    ///
    /// # Errors
    /// Returns `DbVaultError::Validation` listing every finding when the
    /// query is not read-only or matches the deny-list.
    ///
    /// # Example
    /// ```rust
    /// use dbvault_core::validation::ReadOnlyQuery;
    ///
    /// let query = ReadOnlyQuery::new("SELECT name FROM res_groups")?;
    /// assert_eq!(query.as_str(), "SELECT name FROM res_groups");
    /// assert!(ReadOnlyQuery::new("SELECT * FROM x; DELETE FROM y").is_err());
    /// # Ok::<(), dbvault_core::DbVaultError>(())
    /// ```
    pub fn new(sql: impl Into<String>) -> crate::Result<Self> {
        let sql = sql.into();
        let result = validate_query(&sql);
        if result.valid {
            Ok(Self(sql.trim().to_string()))
        } else {
            Err(DbVaultError::validation(result.errors))
        }
    }

    /// The validated SQL text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReadOnlyQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validates that `query` is a single read-only statement.
///
/// Rejects queries that do not start with `SELECT` or `WITH`, that contain
/// a data- or schema-mutating keyword, or that match the deny-list (comment
/// markers, statement terminators, `UNION SELECT`, script markers, timing and
/// file access functions). Never rewrites the query.
pub fn validate_query(query: &str) -> ValidationResult {
    let patterns = ValidationPatterns::instance();
    let mut result = ValidationResult::new();
    let trimmed = query.trim();

    if trimmed.is_empty() {
        result.add_error("Query is required");
        return result;
    }

    if patterns.has_control_chars(&trimmed.replace(['\t', '\n', '\r'], " ")) {
        result.add_error("Query contains control characters");
    }

    if !patterns.read_only_prefix.is_match(trimmed) {
        result.add_error("Only SELECT or WITH queries are allowed");
    }

    let mut keywords: Vec<String> = patterns
        .mutating_keywords
        .find_iter(trimmed)
        .map(|m| m.as_str().to_ascii_uppercase())
        .collect();
    keywords.sort();
    keywords.dedup();
    for keyword in keywords {
        result.add_error(format!("Query contains forbidden keyword: {}", keyword));
    }

    for (pattern, description) in &patterns.query_deny_list {
        if pattern.is_match(trimmed) {
            result.add_error(format!("Query contains a dangerous pattern: {}", description));
        }
    }

    result
}
