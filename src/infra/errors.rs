// src/infra/errors.rs — Error types for queryloop
//
// Only collaborator unavailability is an error. An invalid candidate query, a
// failed plan check or a failed execution are ordinary values handled by the
// retry policy, never `Err`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryLoopError {
    // Chat provider errors
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    // Collaborator errors (caught at the orchestrator boundary)
    #[error("Query generation failed: {0}")]
    Generation(String),

    #[error("Collaborator '{collaborator}' failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    #[error("No model configured. Set [models] in config.toml or export the API key.")]
    NoProvider,

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Prompt template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QueryLoopError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            QueryLoopError::Provider {
                retriable: true,
                ..
            } | QueryLoopError::RateLimited { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryLoopError::Timeout { .. })
    }

    pub fn collaborator(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        QueryLoopError::Collaborator {
            collaborator: name.into(),
            message: message.to_string(),
        }
    }
}
