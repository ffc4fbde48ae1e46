//! Validation rules for registration, login, and preference updates.
//!
//! Boundary values are taken verbatim from the source implementation's
//! `auth/validators.py`.

use crate::state_value::StateMap;

const SUPPORTED_MODELS: &[&str] = &[
    "gpt-3.5-turbo",
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4o",
    "claude-2",
    "claude-3-opus",
    "claude-3-sonnet",
    "llama-2",
    "mistral",
    "gemini-pro",
];

/// Username: 3-30 chars, must start with a letter, only letters/digits/underscore.
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username cannot be empty".to_string());
    }
    if username.chars().count() < 3 {
        return Err("Username must be at least 3 characters long".to_string());
    }
    if username.chars().count() > 30 {
        return Err("Username cannot exceed 30 characters".to_string());
    }
    let mut chars = username.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphabetic() {
        return Err(
            "Username must start with a letter and contain only letters, numbers, and underscores"
                .to_string(),
        );
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(
            "Username must start with a letter and contain only letters, numbers, and underscores"
                .to_string(),
        );
    }
    Ok(())
}

/// Password: more than 4 characters, no leading/trailing whitespace.
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password cannot be empty".to_string());
    }
    if password.chars().count() <= 4 {
        return Err("Password must be longer than 4 characters".to_string());
    }
    if password != password.trim() {
        return Err("Password cannot start or end with spaces".to_string());
    }
    Ok(())
}

pub fn validate_password_match(password: &str, confirm: &str) -> Result<(), String> {
    if password != confirm {
        return Err("Passwords do not match".to_string());
    }
    Ok(())
}

pub fn validate_registration_data(
    username: &str,
    password: &str,
    confirm_password: Option<&str>,
) -> Result<(), String> {
    validate_username(username)?;
    validate_password(password)?;
    if let Some(confirm) = confirm_password {
        validate_password_match(password, confirm)?;
    }
    Ok(())
}

/// API key: `sk-` prefix, total length >= 20 chars (i.e. >= 17 chars after
/// the prefix), body restricted to `[a-zA-Z0-9_-]`.
pub fn validate_api_key_format(api_key: &str) -> Result<(), String> {
    if api_key.is_empty() {
        return Err("API key cannot be empty".to_string());
    }
    if !api_key.starts_with("sk-") {
        return Err("API key must start with 'sk-'".to_string());
    }
    if api_key.len() < 20 {
        return Err("API key is too short".to_string());
    }
    let body = &api_key[3..];
    if !body
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("API key contains invalid characters".to_string());
    }
    Ok(())
}

pub fn validate_session_limit(limit: i64) -> Result<(), String> {
    if limit < 1 {
        return Err("Session limit must be at least 1".to_string());
    }
    if limit > 100 {
        return Err("Session limit cannot exceed 100".to_string());
    }
    Ok(())
}

/// Validates a known subset of preference keys, ignoring any keys not in
/// that list (the original allows arbitrary extra keys through).
pub fn validate_preferences(preferences: &StateMap) -> Result<(), String> {
    if let Some(temp) = preferences.get("temperature") {
        let t = temp
            .as_f64()
            .ok_or_else(|| "Temperature must be a number".to_string())?;
        if !(0.0..=2.0).contains(&t) {
            return Err("Temperature must be between 0 and 2".to_string());
        }
    }

    if let Some(max_tokens) = preferences.get("max_tokens") {
        let n = max_tokens
            .as_i64()
            .ok_or_else(|| "Max tokens must be an integer".to_string())?;
        if !(1..=100_000).contains(&n) {
            return Err("Max tokens must be between 1 and 100000".to_string());
        }
    }

    if let Some(model) = preferences.get("model") {
        let m = model
            .as_str()
            .ok_or_else(|| "Model must be a string".to_string())?;
        if !SUPPORTED_MODELS.contains(&m) {
            return Err(format!("Model '{m}' is not supported"));
        }
    }

    for key in ["auto_checkpoint", "enable_tool_rollback"] {
        if let Some(v) = preferences.get(key)
            && v.as_bool().is_none()
        {
            return Err(format!("{key} must be a boolean"));
        }
    }

    for key in ["checkpoint_frequency", "max_checkpoints"] {
        if let Some(v) = preferences.get(key) {
            let n = v
                .as_i64()
                .ok_or_else(|| format!("{key} must be an integer"))?;
            if n < 1 {
                return Err(format!("{key} must be positive"));
            }
        }
    }

    if let Some(prompt) = preferences.get("system_prompt") {
        let s = prompt
            .as_str()
            .ok_or_else(|| "System prompt must be a string".to_string())?;
        if s.chars().count() > 10_000 {
            return Err("System prompt is too long (max 10000 characters)".to_string());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_value::StateValue;

    #[test]
    /// Usernames must start with a letter and be 3-30 characters.
    fn test_validate_username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username("1alice").is_err());
        assert!(validate_username(&"a".repeat(31)).is_err());
        assert!(validate_username("alice_1").is_ok());
    }

    #[test]
    /// Passwords over 4 characters pass; trimmed-mismatch or short ones fail.
    fn test_validate_password_rules() {
        assert!(validate_password("hunter22").is_ok());
        assert!(validate_password("abcd").is_err());
        assert!(validate_password(" abcdef").is_err());
    }

    #[test]
    /// API keys need the sk- prefix and at least 20 total characters.
    fn test_validate_api_key_format() {
        assert!(validate_api_key_format("sk-abcdefghijklmnopqrstuvwxyz").is_ok());
        assert!(validate_api_key_format("sk-short").is_err());
        assert!(validate_api_key_format("pk-abcdefghijklmnopqrstuvwxyz").is_err());
    }

    #[test]
    /// Preference validation rejects an unsupported model name.
    fn test_validate_preferences_model() {
        let mut prefs: StateMap = Default::default();
        prefs.insert("model".to_string(), StateValue::String("gpt-4".to_string()));
        assert!(validate_preferences(&prefs).is_ok());

        prefs.insert(
            "model".to_string(),
            StateValue::String("not-a-model".to_string()),
        );
        assert!(validate_preferences(&prefs).is_err());
    }

    #[test]
    /// Temperature outside [0, 2] is rejected.
    fn test_validate_preferences_temperature_range() {
        let mut prefs: StateMap = Default::default();
        prefs.insert("temperature".to_string(), StateValue::Float(2.5));
        assert!(validate_preferences(&prefs).is_err());
    }
}
