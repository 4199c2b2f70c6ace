//! Domain errors reported by the tourist server.
//!
//! The server returns these in the `error` member of a JSON-RPC response.
//! The code table belongs to the server and may grow, so unknown codes are
//! kept as [`ServerErrorCode::Unknown`] instead of being rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Known server error codes, with a fallback for anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ServerErrorCode {
    /// `-32700`: the server could not parse the request.
    ParseError,
    /// `-32600`: the request was not a valid JSON-RPC request.
    InvalidRequest,
    /// `-32601`: the method does not exist on this server.
    MethodNotFound,
    /// `-32602`: wrong parameter count or types.
    InvalidParams,
    /// `-32603`: unexpected failure inside the server.
    InternalError,
    /// `100`: no tour is tracked under the given id.
    NoTourWithId,
    /// `101`: the tour has no stop with the given id.
    NoStopWithId,
    /// `200`: the path is not inside any repository in the server's index.
    PathNotInIndex,
    /// `201`: the repository is checked out at a different version than the tour expects.
    MismatchedRepositoryVersion,
    /// `202`: the repository's working-tree commit could not be determined.
    NoCommitForRepository,
    /// `300`: the tour was never given a path to save to.
    NoPathForTour,
    /// `400`: a tour file was not valid JSON.
    InvalidJson,
    /// `401`: a tour file was valid JSON but not a valid tour.
    InvalidTourFile,
    /// `500`: the server hit an I/O error.
    IoError,
    /// `501`: the server hit a git error.
    GitError,
    /// Any other code.
    Unknown(i64),
}

impl ServerErrorCode {
    /// The numeric code.
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::NoTourWithId => 100,
            Self::NoStopWithId => 101,
            Self::PathNotInIndex => 200,
            Self::MismatchedRepositoryVersion => 201,
            Self::NoCommitForRepository => 202,
            Self::NoPathForTour => 300,
            Self::InvalidJson => 400,
            Self::InvalidTourFile => 401,
            Self::IoError => 500,
            Self::GitError => 501,
            Self::Unknown(code) => code,
        }
    }

    /// Map a numeric code onto the table.
    pub const fn from_code(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            100 => Self::NoTourWithId,
            101 => Self::NoStopWithId,
            200 => Self::PathNotInIndex,
            201 => Self::MismatchedRepositoryVersion,
            202 => Self::NoCommitForRepository,
            300 => Self::NoPathForTour,
            400 => Self::InvalidJson,
            401 => Self::InvalidTourFile,
            500 => Self::IoError,
            501 => Self::GitError,
            other => Self::Unknown(other),
        }
    }

    /// The user can fix this by mapping a repository name to a local path.
    pub const fn needs_repository_mapping(self) -> bool {
        matches!(self, Self::PathNotInIndex)
    }

    /// Short description, used when the server's own message is empty.
    pub const fn description(self) -> &'static str {
        match self {
            Self::ParseError => "server could not parse the request",
            Self::InvalidRequest => "invalid request",
            Self::MethodNotFound => "method not found",
            Self::InvalidParams => "invalid parameters",
            Self::InternalError => "internal server error",
            Self::NoTourWithId => "no such tour",
            Self::NoStopWithId => "no such stop",
            Self::PathNotInIndex => "path is not in a mapped repository",
            Self::MismatchedRepositoryVersion => "repository is at a different version",
            Self::NoCommitForRepository => "could not determine repository commit",
            Self::NoPathForTour => "tour has no save path",
            Self::InvalidJson => "invalid JSON",
            Self::InvalidTourFile => "invalid tour file",
            Self::IoError => "I/O error",
            Self::GitError => "git error",
            Self::Unknown(_) => "unrecognized server error",
        }
    }
}

impl From<i64> for ServerErrorCode {
    fn from(code: i64) -> Self {
        Self::from_code(code)
    }
}

impl From<ServerErrorCode> for i64 {
    fn from(code: ServerErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{} (code {code})", shown_message(.message, .code))]
pub struct ServerError {
    /// Error code.
    pub code: ServerErrorCode,
    /// Message from the server.
    #[serde(default)]
    pub message: String,
    /// Extra payload, if the server sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ServerError {
    /// Create an error without extra data.
    pub fn new(code: ServerErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

fn shown_message<'a>(message: &'a str, code: &ServerErrorCode) -> &'a str {
    if message.is_empty() {
        code.description()
    } else {
        message
    }
}
