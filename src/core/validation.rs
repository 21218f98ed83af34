//! Naming rules for table and field identifiers
//!
//! The graph only enforces the minimal rules (non-empty, ASCII word characters,
//! no leading digit, bounded length). Reserved keywords are reported as warnings
//! by the description export since the SQL emitter never quotes identifiers.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Maximum identifier length (PostgreSQL NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Keywords PostgreSQL reserves for table and column names
static RESERVED_KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "ALL",
        "ANALYSE",
        "ANALYZE",
        "AND",
        "ANY",
        "ARRAY",
        "AS",
        "ASC",
        "ASYMMETRIC",
        "BOTH",
        "CASE",
        "CAST",
        "CHECK",
        "COLLATE",
        "COLUMN",
        "CONSTRAINT",
        "CREATE",
        "CURRENT_CATALOG",
        "CURRENT_DATE",
        "CURRENT_ROLE",
        "CURRENT_TIME",
        "CURRENT_TIMESTAMP",
        "CURRENT_USER",
        "DEFAULT",
        "DEFERRABLE",
        "DESC",
        "DISTINCT",
        "DO",
        "ELSE",
        "END",
        "EXCEPT",
        "FALSE",
        "FETCH",
        "FOR",
        "FOREIGN",
        "FROM",
        "GRANT",
        "GROUP",
        "HAVING",
        "IN",
        "INITIALLY",
        "INTERSECT",
        "INTO",
        "LATERAL",
        "LEADING",
        "LIMIT",
        "LOCALTIME",
        "LOCALTIMESTAMP",
        "NOT",
        "NULL",
        "OFFSET",
        "ON",
        "ONLY",
        "OR",
        "ORDER",
        "PLACING",
        "PRIMARY",
        "REFERENCES",
        "RETURNING",
        "SELECT",
        "SESSION_USER",
        "SOME",
        "SYMMETRIC",
        "TABLE",
        "THEN",
        "TO",
        "TRAILING",
        "TRUE",
        "UNION",
        "UNIQUE",
        "USER",
        "USING",
        "VARIADIC",
        "WHEN",
        "WHERE",
        "WINDOW",
        "WITH",
    ]
    .into_iter()
    .collect()
});

/// Why an identifier was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Name cannot be empty")]
    Empty,
    #[error("Name '{name}' is too long ({actual} chars, max {max})")]
    TooLong {
        name: String,
        max: usize,
        actual: usize,
    },
    #[error(
        "Name '{name}' contains invalid characters: '{}'. Only letters, numbers, and underscores are allowed",
        .invalid.iter().collect::<String>()
    )]
    InvalidCharacters { name: String, invalid: Vec<char> },
    #[error("Name '{0}' cannot start with a digit")]
    StartsWithDigit(String),
    #[error("'{0}' is a reserved SQL keyword")]
    ReservedKeyword(String),
}

/// Validation strictness level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationLevel {
    /// Structural rules only
    #[default]
    Minimal,
    /// Structural rules plus reserved keywords
    Standard,
}

/// Validates a table or field name, returning the first problem found
pub fn validate_identifier(name: &str, level: ValidationLevel) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            name: name.to_string(),
            max: MAX_IDENTIFIER_LENGTH,
            actual: name.len(),
        });
    }

    // Names are stored as given, so surrounding whitespace counts as invalid too
    let invalid: Vec<char> = name
        .chars()
        .filter(|c| !c.is_ascii_alphanumeric() && *c != '_')
        .collect();
    if !invalid.is_empty() {
        return Err(ValidationError::InvalidCharacters {
            name: name.to_string(),
            invalid,
        });
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ValidationError::StartsWithDigit(name.to_string()));
    }

    if level == ValidationLevel::Standard && is_reserved_keyword(name) {
        return Err(ValidationError::ReservedKeyword(name.to_string()));
    }

    Ok(())
}

/// Check if a string is a reserved keyword
pub fn is_reserved_keyword(name: &str) -> bool {
    RESERVED_KEYWORDS.contains(name.trim().to_uppercase().as_str())
}

/// Rewrites a name into a valid identifier: spaces and dashes become
/// underscores, other invalid characters and leading digits are dropped.
/// Returns None if nothing usable is left.
pub fn sanitize_identifier(name: &str) -> Option<String> {
    let mapped: String = name
        .trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '_' => Some(c),
            ' ' | '-' => Some('_'),
            _ => None,
        })
        .collect();

    let mut collapsed = String::with_capacity(mapped.len());
    for c in mapped.trim_start_matches(|c: char| c.is_ascii_digit()).chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }

    let result = collapsed.trim_matches('_');
    if !result.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(result.chars().take(MAX_IDENTIFIER_LENGTH).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        for name in ["users", "user_id", "User123", "a", "id_ref_2"] {
            assert!(validate_identifier(name, ValidationLevel::Standard).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(
            validate_identifier("  ", ValidationLevel::Minimal),
            Err(ValidationError::Empty)
        );
        assert!(matches!(
            validate_identifier("user name", ValidationLevel::Minimal),
            Err(ValidationError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            validate_identifier("1user", ValidationLevel::Minimal),
            Err(ValidationError::StartsWithDigit(_))
        ));
        assert!(matches!(
            validate_identifier(&"a".repeat(64), ValidationLevel::Minimal),
            Err(ValidationError::TooLong { actual: 64, .. })
        ));
        assert!(validate_identifier(&"a".repeat(63), ValidationLevel::Minimal).is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_is_rejected() {
        for name in [" users", "users ", "\tusers"] {
            assert!(
                matches!(
                    validate_identifier(name, ValidationLevel::Minimal),
                    Err(ValidationError::InvalidCharacters { .. })
                ),
                "{:?}",
                name
            );
        }
    }

    #[test]
    fn test_reserved_keywords_only_at_standard_level() {
        assert!(validate_identifier("order", ValidationLevel::Minimal).is_ok());
        assert_eq!(
            validate_identifier("order", ValidationLevel::Standard),
            Err(ValidationError::ReservedKeyword("order".to_string()))
        );
        assert!(is_reserved_keyword("User"));
        assert!(!is_reserved_keyword("users"));
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("user name"), Some("user_name".to_string()));
        assert_eq!(sanitize_identifier("order-items"), Some("order_items".to_string()));
        assert_eq!(sanitize_identifier("123user"), Some("user".to_string()));
        assert_eq!(sanitize_identifier("__name__"), Some("name".to_string()));
        assert_eq!(sanitize_identifier("a  b  c"), Some("a_b_c".to_string()));
        assert_eq!(sanitize_identifier("123"), None);
        assert_eq!(sanitize_identifier("@#$"), None);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ValidationError::Empty.to_string(), "Name cannot be empty");
        let err = ValidationError::InvalidCharacters {
            name: "a-b".to_string(),
            invalid: vec!['-'],
        };
        assert!(err.to_string().contains("invalid characters: '-'"));
    }
}
