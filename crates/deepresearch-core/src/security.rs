use std::env;

use crate::DeepResearchError;

/// Wrapper around the provider API key to keep it out of logs.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, DeepResearchError> {
    secret_from(var, env::var(var).ok())
}

fn secret_from(var: &str, value: Option<String>) -> Result<SecretValue, DeepResearchError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(SecretValue(value.trim().to_string())),
        _ => Err(DeepResearchError::MissingSecret(var.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_trimmed() {
        let secret = secret_from("GOOGLE_API_KEY", Some(" key-123 \n".into())).unwrap();
        assert_eq!(secret.expose(), "key-123");
    }

    #[test]
    fn blank_secret_is_missing() {
        let err = secret_from("GOOGLE_API_KEY", Some("   ".into())).unwrap_err();
        assert!(matches!(err, DeepResearchError::MissingSecret(var) if var == "GOOGLE_API_KEY"));
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = SecretValue::new("sk-live");
        assert_eq!(format!("{secret:?}"), "***redacted***");
    }

    #[test]
    fn unset_variable_is_missing() {
        let err = require_env("DEEPRESEARCH_TEST_SECRET_THAT_IS_NEVER_SET").unwrap_err();
        assert!(matches!(err, DeepResearchError::MissingSecret(_)));
    }
}
