//! Dispatch error types

use thiserror::Error;

use super::template::TemplateError;
use crate::ticket::RepositoryError;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Missing hostname, credentials or a malformed section
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The endpoint answered with a status outside the expected set
    #[error("{method} {url} returned unexpected status {status}: {body}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("function '{name}' failed: {source:#}")]
    Function {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    pub fn configuration(message: impl Into<String>) -> Self {
        DispatchError::Configuration(message.into())
    }

    pub fn function(name: impl Into<String>, source: anyhow::Error) -> Self {
        DispatchError::Function {
            name: name.into(),
            source,
        }
    }
}
