//! Client error types.

use crate::protocol::Method;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tourist_core::{ServerError, ServerErrorCode};

/// Error returned by the transport and by every client call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server executable could not be spawned.
    #[error("failed to start tourist server `{}`: {source}", .path.display())]
    Connection {
        /// Executable that was spawned.
        path: PathBuf,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },

    /// A call was made before `connect`.
    #[error("not connected to a tourist server")]
    NotConnected,

    /// `connect` was called on a client that already has a connection.
    #[error("already connected to a tourist server")]
    AlreadyConnected,

    /// The server exited or its stream closed. The client is unusable.
    #[error("connection to tourist server closed: {0}")]
    TransportClosed(String),

    /// A response answered some other request.
    #[error("response id {actual:?} does not match request id {expected}")]
    ProtocolMismatch {
        /// Id of the request just sent.
        expected: u64,
        /// Id carried by the response, if it had a numeric one.
        actual: Option<u64>,
    },

    /// No response arrived in time. The stream may now be out of step.
    #[error("`{method}` request {id} timed out after {timeout:?}")]
    RequestTimeout {
        /// Method of the request that timed out.
        method: Method,
        /// Its id.
        id: u64,
        /// The limit that was exceeded.
        timeout: Duration,
    },

    /// A response line was not a well-formed JSON-RPC response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A well-formed response carried a result of the wrong shape.
    #[error("unexpected result for `{method}`: {source}")]
    UnexpectedResult {
        /// Method whose result failed to decode.
        method: Method,
        /// Decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A request frame would have contained a newline.
    #[error("request frame contains a newline")]
    InvalidFrame,

    /// A parameter could not be encoded as JSON.
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// The server answered with a domain error.
    #[error("`{method}` failed: {error}")]
    Server {
        /// Method that failed.
        method: Method,
        /// Error reported by the server.
        #[source]
        error: ServerError,
    },
}

impl ClientError {
    /// Errors after which the connection must be torn down.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::TransportClosed(_)
                | Self::ProtocolMismatch { .. }
                | Self::RequestTimeout { .. }
                | Self::MalformedResponse(_)
        )
    }

    /// The server's domain error, if that is what this is.
    pub const fn server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Server { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The server's error code, if this is a domain error.
    pub fn server_code(&self) -> Option<ServerErrorCode> {
        self.server_error().map(|e| e.code)
    }

    /// The server refused because a path is outside every mapped repository.
    pub fn needs_repository_mapping(&self) -> bool {
        self.server_code()
            .is_some_and(ServerErrorCode::needs_repository_mapping)
    }
}
