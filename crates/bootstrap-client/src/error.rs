//! Bootstrap client errors

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The request never got an answer
    #[error("bootstrap service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("undecodable bootstrap payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Bearer token refused by the bootstrap service
    #[error("bootstrap service rejected credentials ({0})")]
    Unauthorized(StatusCode),

    #[error("{0} not found")]
    NotFound(String),

    /// An agent with the same name already exists for the template
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The agent token was revoked and can no longer register
    #[error("token of {0} is revoked")]
    TokenRevoked(String),

    /// Agent is missing its name or template and was never sent
    #[error("incomplete agent: {0}")]
    IncompleteAgent(&'static str),

    /// Any other non-success answer
    #[error("bootstrap service failed to {action}: {status} {body}")]
    Status {
        action: String,
        status: StatusCode,
        body: String,
    },
}

impl BootstrapError {
    /// True when the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Maps a failed answer for `what` onto the matching variant.
    pub(crate) fn from_status(status: StatusCode, what: &str, body: String) -> Self {
        match status {
            StatusCode::NOT_FOUND => Self::NotFound(what.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(status),
            StatusCode::CONFLICT => Self::AlreadyExists(what.to_string()),
            StatusCode::GONE => Self::TokenRevoked(what.to_string()),
            _ => Self::Status {
                action: what.to_string(),
                status,
                body,
            },
        }
    }
}
