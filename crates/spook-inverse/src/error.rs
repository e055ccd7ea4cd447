//! Inverse helper errors

use ha_config_entries::ConfigEntriesError;
use thiserror::Error;

use crate::constants::DOMAIN;

#[derive(Debug, Error)]
pub enum InverseError {
    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] serde_json::Error),

    #[error("Missing option: {0}")]
    MissingOption(&'static str),

    #[error("Unsupported inverse type: {0}")]
    UnsupportedPlatform(String),

    #[error("Source entity not found: {0}")]
    SourceNotFound(String),

    #[error("Option {0} cannot be changed after creation")]
    ImmutableOption(&'static str),
}

impl From<InverseError> for ConfigEntriesError {
    fn from(err: InverseError) -> Self {
        ConfigEntriesError::Integration {
            domain: DOMAIN.to_string(),
            message: err.to_string(),
        }
    }
}
