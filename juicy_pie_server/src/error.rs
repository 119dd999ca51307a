// Error types for the server crate.
//
// `CommandError` is what handlers return when they cannot complete a request.
// The session never lets it escape: its `Display` text becomes the reply line
// sent to the client. `ServerError` covers startup failures (binding the
// listener, loading config) and is only ever seen by the host process.

use std::io;

use juicy_pie_protocol::ArgumentError;
use thiserror::Error;

/// A handler could not complete a command. Displayed verbatim as the reply.
#[derive(Debug, Error)]
pub enum CommandError {
    /// An argument was absent or could not be interpreted.
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    /// The handler expected session-scoped state that was never created.
    #[error("No session context for {0}")]
    MissingContext(&'static str),

    /// The request was understood but refused.
    #[error("{0}")]
    Rejected(String),
}

impl CommandError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Failures while starting or configuring the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_error_displays_as_reply() {
        let err = CommandError::from(ArgumentError::Missing { index: 2 });
        assert_eq!(err.to_string(), "Missing argument 2");
    }

    #[test]
    fn rejected_displays_reason_only() {
        assert_eq!(CommandError::rejected("No such block").to_string(), "No such block");
    }
}
