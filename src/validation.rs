//! Centralized validation and value parsing.
//!
//! This module provides unified validation for:
//! - Preset names and their storage keys
//! - Typed parsing of `config set` values (booleans, timeouts, lists)

use anyhow::{bail, Result};

/// Validate a preset name: non-empty after trimming, ASCII letters,
/// digits and spaces only.
///
/// # Examples
/// ```
/// use sdrpick::validation::validate_preset_name;
/// assert!(validate_preset_name("EU Low Ping").is_ok());
/// assert!(validate_preset_name("eu-west").is_err());
/// assert!(validate_preset_name("   ").is_err());
/// ```
pub fn validate_preset_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Preset name cannot be empty");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ')
    {
        bail!("Preset name can only contain letters, numbers, and spaces");
    }
    Ok(())
}

/// Storage key for a preset: the name with every space removed.
///
/// # Examples
/// ```
/// use sdrpick::validation::preset_key;
/// assert_eq!(preset_key("My EU Set"), "MyEUSet");
/// ```
pub fn preset_key(name: &str) -> String {
    name.replace(' ', "")
}

/// Parse a boolean config value. `true`, `1`, `yes` and `on` (any case)
/// are true; everything else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Parse a positive, finite number of seconds.
///
/// # Examples
/// ```
/// use sdrpick::validation::parse_positive_float;
/// assert_eq!(parse_positive_float("1.5").unwrap(), 1.5);
/// assert!(parse_positive_float("0").is_err());
/// assert!(parse_positive_float("NaN").is_err());
/// ```
pub fn parse_positive_float(value: &str) -> Result<f64> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid number: {}", value))?;
    if !parsed.is_finite() || parsed <= 0.0 {
        bail!("Value must be a finite number greater than 0: {}", value);
    }
    Ok(parsed)
}

/// Split a comma-separated list, trimming items and dropping empty ones.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Empty (after trim) means "unset".
pub fn parse_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
