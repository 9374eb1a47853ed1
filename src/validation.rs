//! Input validation for the Sealbox relay server
//!
//! Usernames are stored in canonical form: callers normalize first, then
//! everything downstream (uniqueness, lookups, credentials) operates on the
//! normalized value.

/// Normalizes and validates a username, returning the canonical form.
///
/// Normalization: trim surrounding whitespace, ASCII-lowercase.
/// Requirements after normalization:
/// - 3-50 characters
/// - Alphanumeric characters plus underscore and hyphen
pub fn normalize_username(raw: &str) -> Result<String, String> {
    let name = raw.trim().to_ascii_lowercase();

    if name.len() < 3 {
        return Err("Username must be at least 3 characters long".to_string());
    }

    if name.len() > 50 {
        return Err("Username must not exceed 50 characters".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(
            "Username can only contain alphanumeric characters, underscores, and hyphens"
                .to_string(),
        );
    }

    Ok(name)
}

/// Validates a Signal-style registration id.
///
/// Requirements:
/// - Integer >= 1
pub fn validate_registration_id(registration_id: i64) -> Result<(), String> {
    if registration_id < 1 {
        return Err("Registration id must be at least 1".to_string());
    }

    Ok(())
}
