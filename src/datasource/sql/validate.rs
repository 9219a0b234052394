//! Read-only statement checks and LIMIT handling.

use crate::datasource::{DataSourceError, DataSourceResult};

/// Keywords (or keyword pairs) that disqualify a statement.
pub const BLOCKED_KEYWORDS: [&str; 15] = [
    "DROP",
    "DELETE",
    "INSERT",
    "UPDATE",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "REPLACE",
    "LOAD_FILE",
    "INTO OUTFILE",
    "INTO DUMPFILE",
    "EXEC",
    "EXECUTE",
    "CALL",
    "PROCEDURE",
];

/// Upper-cased identifier-like words of a statement.
fn words(sql: &str) -> Vec<String> {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split(' ').collect();
    words
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(w, n)| w == n))
}

/// Statement text without surrounding whitespace and trailing semicolons.
pub fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Accept a single `SELECT` statement free of blocked keywords.
pub fn validate_select(sql: &str) -> DataSourceResult<()> {
    let statement = strip_terminator(sql);
    if statement.is_empty() {
        return Err(DataSourceError::validation("query is empty"));
    }
    if statement.contains(';') {
        return Err(DataSourceError::validation(
            "only a single statement is allowed",
        ));
    }

    let words = words(statement);
    if words.first().map(String::as_str) != Some("SELECT") {
        return Err(DataSourceError::validation("only SELECT statements are allowed"));
    }
    if let Some(keyword) = BLOCKED_KEYWORDS
        .iter()
        .find(|k| contains_phrase(&words, k))
    {
        return Err(DataSourceError::validation(format!(
            "keyword {} is not allowed",
            keyword
        )));
    }
    Ok(())
}

/// Whether the statement already carries a LIMIT clause.
pub fn has_limit(sql: &str) -> bool {
    words(sql).iter().any(|w| w == "LIMIT")
}

/// Append `LIMIT <limit>` unless the statement has one.
pub fn apply_limit(sql: &str, limit: usize) -> String {
    let statement = strip_terminator(sql);
    if has_limit(statement) {
        statement.to_string()
    } else {
        format!("{} LIMIT {}", statement, limit)
    }
}

/// Quote an identifier with `quote`, doubling embedded quote characters.
pub fn quote_identifier(name: &str, quote: char) -> String {
    let escaped = name.replace(quote, &format!("{quote}{quote}"));
    format!("{quote}{escaped}{quote}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_select() {
        assert!(validate_select("SELECT * FROM users").is_ok());
        assert!(validate_select("  select id, name from users where id = 1;  ").is_ok());
        assert!(validate_select("SELECT created_at, updated_by FROM audit").is_ok());
    }

    #[test]
    fn test_rejects_non_select() {
        for sql in ["UPDATE users SET a = 1", "WITH x AS (SELECT 1) SELECT * FROM x", "SHOW TABLES"] {
            let err = validate_select(sql).unwrap_err();
            assert!(err.is_validation(), "{sql}");
        }
    }

    #[test]
    fn test_rejects_every_blocked_keyword() {
        for keyword in BLOCKED_KEYWORDS {
            let sql = format!("SELECT * FROM t WHERE x = 1 {}", keyword.to_lowercase());
            assert!(validate_select(&sql).is_err(), "{keyword} should be blocked");
        }
    }

    #[test]
    fn test_rejects_multiple_statements() {
        assert!(validate_select("SELECT 1; SELECT 2").is_err());
        assert!(validate_select("SELECT 1;;").is_ok());
    }

    #[test]
    fn test_rejects_empty() {
        assert!(validate_select("   ").is_err());
        assert!(validate_select(";").is_err());
    }

    #[test]
    fn test_apply_limit_only_when_absent() {
        assert_eq!(apply_limit("SELECT * FROM t;", 10), "SELECT * FROM t LIMIT 10");
        assert_eq!(
            apply_limit("SELECT * FROM t limit 5", 10),
            "SELECT * FROM t limit 5"
        );
        assert!(!has_limit("SELECT limited FROM t"));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users", '`'), "`users`");
        assert_eq!(quote_identifier("we\"ird", '"'), "\"we\"\"ird\"");
    }
}
