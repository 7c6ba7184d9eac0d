//! Error taxonomy for the collector.
//!
//! Every collaborator call returns [`EicError`]. The variant decides whether
//! the retry policy may try again ([`EicError::is_transient`]); everything
//! else is surfaced to the orchestrator as a single-candidate or single-call
//! failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EicError>;

#[derive(Debug, Error)]
pub enum EicError {
    /// Connection, timeout, or body-read failure.
    #[error("Network error: {0}")]
    Transport(String),

    #[error("HTTP error (status {status}): {body}")]
    Status { status: u16, body: String },

    /// The remote accepted the request but reported application errors.
    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    /// A response or file that does not have the expected shape.
    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EicError {
    /// Timeouts, transport failures, throttling and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            EicError::Transport(_) => true,
            EicError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Build a status error from a non-success response, keeping a bounded
    /// slice of the body for the log.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        EicError::Status {
            status,
            body: crate::utils::truncate_for_log(&body, 300),
        }
    }
}

impl From<reqwest::Error> for EicError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return EicError::Malformed(err.to_string());
        }
        match err.status() {
            Some(status) => EicError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => EicError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for EicError {
    fn from(err: serde_json::Error) -> Self {
        EicError::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_server_errors_are_transient() {
        assert!(EicError::Transport("timed out".into()).is_transient());
        assert!(EicError::Status { status: 503, body: String::new() }.is_transient());
        assert!(EicError::Status { status: 429, body: String::new() }.is_transient());
    }

    #[test]
    fn application_errors_are_not_transient() {
        assert!(!EicError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!EicError::GraphQl("bad id".into()).is_transient());
        assert!(!EicError::Malformed("eof".into()).is_transient());
        assert!(!EicError::Config("missing".into()).is_transient());
    }
}
