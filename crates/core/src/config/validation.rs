use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Environment variable error: {message}")]
    EnvironmentError { message: String },

    #[error("Parsing error in {source_name}: {message}")]
    ParsingError { source_name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create a validation failed error
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// Create an environment error
    pub fn environment_error(message: impl Into<String>) -> Self {
        Self::EnvironmentError {
            message: message.into(),
        }
    }

    /// Create a parsing error for a named source
    pub fn parsing(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::ParsingError {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}

/// Trait for validating configuration values
pub trait ConfigValidator<T: ?Sized> {
    /// Validate a configuration value
    fn validate(&self, value: &T) -> Result<(), ConfigError>;
}

/// PostgreSQL identifier validator (schema and table names)
pub struct IdentifierValidator {
    pub field: &'static str,
    pub max_length: usize,
}

impl IdentifierValidator {
    pub fn new(field: &'static str) -> Self {
        Self { field, max_length: 63 }
    }
}

impl ConfigValidator<str> for IdentifierValidator {
    fn validate(&self, value: &str) -> Result<(), ConfigError> {
        let mut chars = value.chars();
        let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_start || !valid_rest || value.len() > self.max_length {
            return Err(ConfigError::invalid_value(
                self.field,
                value,
                format!(
                    "identifier of letters, digits and underscores, at most {} characters",
                    self.max_length
                ),
            ));
        }
        Ok(())
    }
}

/// Database URL validator
pub struct UrlValidator {
    pub schemes: Vec<String>,
    pub require_host: bool,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self {
            schemes: vec!["postgres".to_string(), "postgresql".to_string()],
            require_host: true,
        }
    }
}

impl ConfigValidator<str> for UrlValidator {
    fn validate(&self, value: &str) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(value).map_err(|e| {
            ConfigError::invalid_value("database_url", redact(value), format!("valid URL ({})", e))
        })?;

        if !self.schemes.iter().any(|scheme| scheme == parsed.scheme()) {
            return Err(ConfigError::invalid_value(
                "database_url",
                redact(value),
                format!("URL with scheme: {}", self.schemes.join(", ")),
            ));
        }

        if self.require_host && parsed.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::invalid_value(
                "database_url",
                redact(value),
                "URL with host",
            ));
        }

        Ok(())
    }
}

/// Hide credentials before a URL lands in an error message
fn redact(value: &str) -> String {
    match url::Url::parse(value) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => value.to_string(),
    }
}

/// Non-empty string validator
pub struct NonEmptyValidator {
    pub field: &'static str,
}

impl ConfigValidator<str> for NonEmptyValidator {
    fn validate(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid_value(self.field, value, "non-empty value"));
        }
        Ok(())
    }
}
