//! Error types for lyra-core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LyraError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed recipe JSON at line {line}, column {column}: {message}")]
    RecipeParse {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("Recipe is missing required field `{field}`")]
    MissingField { field: String },
    #[error("Unsupported recipe version {found}; supported versions: {supported}")]
    UnsupportedVersion { found: String, supported: String },
    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),
    #[error("Stretch engine error: {0}")]
    Engine(String),
}

impl LyraError {
    pub(crate) fn parse(err: &serde_json::Error) -> Self {
        Self::RecipeParse {
            message: err.to_string(),
            line: err.line(),
            column: err.column(),
        }
    }

    pub(crate) fn missing(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRecipe(message.into())
    }

    /// Build an engine error from any displayable failure
    pub fn engine(err: impl std::fmt::Display) -> Self {
        Self::Engine(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LyraError>;
