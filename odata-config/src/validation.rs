// Settings validation

use crate::{ConfigError, Result};

/// Trait for validating settings
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Field validators
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(value: T, min: T, max: T, field: &str) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate an absolute http(s) URL usable as a base
    pub fn is_url(value: &str, field: &str) -> Result<()> {
        let valid = url::Url::parse(value)
            .map(|url| matches!(url.scheme(), "http" | "https") && !url.cannot_be_a_base())
            .unwrap_or(false);
        if !valid {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a valid http(s) URL, got '{}'",
                field, value
            )));
        }
        Ok(())
    }

    /// Validate an HTTP header name
    pub fn is_header_name(value: &str, field: &str) -> Result<()> {
        let valid = !value.is_empty()
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
        if !valid {
            return Err(ConfigError::ValidationError(format!(
                "{} contains an invalid header name '{}'",
                field, value
            )));
        }
        Ok(())
    }
}
