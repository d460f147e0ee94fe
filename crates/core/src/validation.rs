//! Field validation shared by the request generators.
//!
//! Every check returns `DomainError::Validation`, which surfaces as `BadRequest`
//! before anything is appended.

use crate::error::{DomainError, DomainResult};

/// Upper bound for predefined/enumerated string values.
pub const PREDEFINED_MAX: usize = 64;
/// Upper bound for object names and display names.
pub const OBJECT_NAME_MAX: usize = 128;
/// Upper bound for descriptions, URLs and other free text.
pub const LONG_TEXT_MAX: usize = 1024;

/// Non-empty, at most [`OBJECT_NAME_MAX`] chars, `[A-Za-z0-9_-]` only.
pub fn object_name(field: &str, value: &str) -> DomainResult<()> {
    if value.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    max_len(field, value, OBJECT_NAME_MAX)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DomainError::validation(format!(
            "{field} may only contain letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

/// Non-blank display text, at most [`OBJECT_NAME_MAX`] chars.
pub fn display_name(field: &str, value: &str) -> DomainResult<()> {
    required(field, value)?;
    max_len(field, value, OBJECT_NAME_MAX)
}

/// Non-blank, at most [`PREDEFINED_MAX`] chars.
pub fn predefined(field: &str, value: &str) -> DomainResult<()> {
    required(field, value)?;
    max_len(field, value, PREDEFINED_MAX)
}

/// Optional free text, at most [`LONG_TEXT_MAX`] chars.
pub fn long_text(field: &str, value: &str) -> DomainResult<()> {
    max_len(field, value, LONG_TEXT_MAX)
}

/// Absolute `https://` URL with a host, at most [`LONG_TEXT_MAX`] chars.
pub fn https_url(field: &str, value: &str) -> DomainResult<()> {
    max_len(field, value, LONG_TEXT_MAX)?;
    let rest = value
        .strip_prefix("https://")
        .ok_or_else(|| DomainError::validation(format!("{field} must be an https URL")))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(DomainError::validation(format!("{field} has no valid host")));
    }
    Ok(())
}

pub fn required(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

pub fn max_len(field: &str, value: &str, max: usize) -> DomainResult<()> {
    if value.chars().count() > max {
        return Err(DomainError::validation(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(())
}

pub fn in_range<T>(field: &str, value: T, min: T, max: T) -> DomainResult<()>
where
    T: PartialOrd + core::fmt::Display,
{
    if value < min || value > max {
        return Err(DomainError::validation(format!(
            "{field} must be between {min} and {max} (got {value})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_url_rules() {
        assert!(https_url("url", "https://example.com/template.json").is_ok());
        assert!(https_url("url", "https://example.com").is_ok());
        assert!(https_url("url", "http://example.com").is_err());
        assert!(https_url("url", "https:///path").is_err());
        assert!(https_url("url", "example.com").is_err());
    }

    #[test]
    fn display_name_rejects_blank_and_long() {
        assert!(display_name("display_name", "Foo").is_ok());
        assert!(display_name("display_name", "  ").is_err());
        assert!(display_name("display_name", &"x".repeat(OBJECT_NAME_MAX + 1)).is_err());
    }

    #[test]
    fn long_text_allows_empty() {
        assert!(long_text("description", "").is_ok());
        assert!(long_text("description", &"x".repeat(LONG_TEXT_MAX)).is_ok());
        assert!(long_text("description", &"x".repeat(LONG_TEXT_MAX + 1)).is_err());
    }

    #[test]
    fn in_range_is_inclusive() {
        assert!(in_range("timeout", 1u32, 1, 10).is_ok());
        assert!(in_range("timeout", 10u32, 1, 10).is_ok());
        assert!(in_range("timeout", 0u32, 1, 10).is_err());
    }
}
