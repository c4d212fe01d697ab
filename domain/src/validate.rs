//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use crate::CoreError;

/// Validate a display name (organization name, contact name part, user name).
pub fn validate_name(field: &'static str, s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidField(field, "empty".into()));
    }
    if trimmed.len() > 200 {
        return Err(CoreError::InvalidField(field, "too long".into()));
    }
    Ok(())
}

/// Validate a demand title: non-empty, bounded.
pub fn validate_title(s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidField("title", "empty".into()));
    }
    if trimmed.len() > 300 {
        return Err(CoreError::InvalidField("title", "too long".into()));
    }
    Ok(())
}

/// Validate a phone number. We keep this intentionally light to avoid heavy
/// parsing crates: digits plus common separators, bounded length.
pub fn validate_phone(s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.len() < 6 || trimmed.len() > 20 {
        return Err(CoreError::InvalidField("phone", "bad length".into()));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '.' | '(' | ')'))
    {
        return Err(CoreError::InvalidField("phone", "invalid characters".into()));
    }
    Ok(())
}

/// Validate a postal code: ascii alphanumeric plus space/dash, bounded.
pub fn validate_postal_code(s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.len() < 3 || trimmed.len() > 10 {
        return Err(CoreError::InvalidField("postal_code", "bad length".into()));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
    {
        return Err(CoreError::InvalidField(
            "postal_code",
            "invalid characters".into(),
        ));
    }
    Ok(())
}
