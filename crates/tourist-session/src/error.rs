//! Session error types.

use std::path::PathBuf;
use thiserror::Error;
use tourist_client::ClientError;
use tourist_core::{ServerErrorCode, StopId};

/// Error returned by session commands.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The RPC call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The command needs an active tour.
    #[error("no tour is active")]
    NoActiveTour,

    /// The command needs an active stop.
    #[error("no stop is active")]
    NoActiveStop,

    /// The stop is not part of the active tour.
    #[error("stop {0} is not part of the active tour")]
    StopNotInTour(StopId),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Whether the underlying connection is gone.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Client(err) => err.is_fatal(),
            _ => false,
        }
    }

    /// The server's error code, if the server reported one.
    pub fn server_code(&self) -> Option<ServerErrorCode> {
        match self {
            Self::Client(err) => err.server_code(),
            _ => None,
        }
    }

    /// Whether mapping a repository would let the command succeed.
    pub fn needs_repository_mapping(&self) -> bool {
        match self {
            Self::Client(err) => err.needs_repository_mapping(),
            _ => false,
        }
    }
}

/// Error loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Config file.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("invalid configuration in {}: {source}", .path.display())]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for session commands.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use tourist_client::Method;
    use tourist_core::ServerError;

    #[test]
    fn test_classification_passes_through() {
        let err = SessionError::from(ClientError::Server {
            method: Method::MoveStop,
            error: ServerError::new(ServerErrorCode::PathNotInIndex, "nope"),
        });
        assert!(err.needs_repository_mapping());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "`move_stop` failed: nope (code 200)");

        let err = SessionError::from(ClientError::TransportClosed("eof".into()));
        assert!(err.is_fatal());
        assert_eq!(err.server_code(), None);

        assert!(!SessionError::NoActiveTour.is_fatal());
    }
}
