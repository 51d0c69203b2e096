use thiserror::Error;

/// Errors raised while loading or validating runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse runtime config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {section} config: {message}")]
    Invalid {
        section: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(section: &'static str, message: String) -> Self {
        Self::Invalid { section, message }
    }
}
