//! Wire protocol: newline-delimited JSON-RPC 2.0.
//!
//! Requests are `{"jsonrpc":"2.0","method":..,"params":[..],"id":n}` with
//! positional params. Responses carry the same `id` and exactly one of
//! `result` or `error`.

use crate::error::ClientError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tourist_core::ServerError;

/// JSON-RPC version string sent with every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Every remote operation the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `list_tours`
    ListTours,
    /// `create_tour`
    CreateTour,
    /// `open_tour`
    OpenTour,
    /// `set_tour_edit`
    SetTourEdit,
    /// `view_tour`
    ViewTour,
    /// `edit_tour_metadata`
    EditTourMetadata,
    /// `forget_tour`
    ForgetTour,
    /// `create_stop`
    CreateStop,
    /// `view_stop`
    ViewStop,
    /// `move_stop`
    MoveStop,
    /// `reorder_stop`
    ReorderStop,
    /// `edit_stop_metadata`
    EditStopMetadata,
    /// `link_stop`
    LinkStop,
    /// `unlink_stop`
    UnlinkStop,
    /// `locate_stop`
    LocateStop,
    /// `remove_stop`
    RemoveStop,
    /// `refresh_tour`
    RefreshTour,
    /// `save_tour`
    SaveTour,
    /// `save_all`
    SaveAll,
    /// `delete_tour`
    DeleteTour,
    /// `index_repository`
    IndexRepository,
}

impl Method {
    /// All methods, in declaration order.
    pub const ALL: [Self; 21] = [
        Self::ListTours,
        Self::CreateTour,
        Self::OpenTour,
        Self::SetTourEdit,
        Self::ViewTour,
        Self::EditTourMetadata,
        Self::ForgetTour,
        Self::CreateStop,
        Self::ViewStop,
        Self::MoveStop,
        Self::ReorderStop,
        Self::EditStopMetadata,
        Self::LinkStop,
        Self::UnlinkStop,
        Self::LocateStop,
        Self::RemoveStop,
        Self::RefreshTour,
        Self::SaveTour,
        Self::SaveAll,
        Self::DeleteTour,
        Self::IndexRepository,
    ];

    /// The wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListTours => "list_tours",
            Self::CreateTour => "create_tour",
            Self::OpenTour => "open_tour",
            Self::SetTourEdit => "set_tour_edit",
            Self::ViewTour => "view_tour",
            Self::EditTourMetadata => "edit_tour_metadata",
            Self::ForgetTour => "forget_tour",
            Self::CreateStop => "create_stop",
            Self::ViewStop => "view_stop",
            Self::MoveStop => "move_stop",
            Self::ReorderStop => "reorder_stop",
            Self::EditStopMetadata => "edit_stop_metadata",
            Self::LinkStop => "link_stop",
            Self::UnlinkStop => "unlink_stop",
            Self::LocateStop => "locate_stop",
            Self::RemoveStop => "remove_stop",
            Self::RefreshTour => "refresh_tour",
            Self::SaveTour => "save_tour",
            Self::SaveAll => "save_all",
            Self::DeleteTour => "delete_tour",
            Self::IndexRepository => "index_repository",
        }
    }

    /// Look a method up by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    /// Whether the method changes server state.
    pub const fn is_mutating(self) -> bool {
        !matches!(
            self,
            Self::ListTours | Self::ViewTour | Self::ViewStop | Self::LocateStop
        )
    }

    /// Methods that walk repository history and may take much longer than the rest.
    pub const fn is_slow(self) -> bool {
        matches!(self, Self::RefreshTour | Self::OpenTour)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: &'a [Value],
    id: u64,
}

/// Serialize a request into a single frame (no trailing newline).
pub fn encode_request(method: Method, params: &[Value], id: u64) -> Result<Vec<u8>, ClientError> {
    let request = Request {
        jsonrpc: JSONRPC_VERSION,
        method: method.as_str(),
        params,
        id,
    };
    serde_json::to_vec(&request).map_err(ClientError::Encode)
}

/// A correlated response, reduced to its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The `result` member.
    Result(Value),
    /// The `error` member.
    Error(ServerError),
}

/// Parse one response line and check it answers request `expected_id`.
pub fn decode_response(line: &str, expected_id: u64) -> Result<Outcome, ClientError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| ClientError::MalformedResponse(format!("invalid JSON: {e}")))?;
    let Value::Object(mut object) = value else {
        return Err(ClientError::MalformedResponse(
            "response is not a JSON object".to_string(),
        ));
    };

    let actual = object.get("id").and_then(Value::as_u64);
    if actual != Some(expected_id) {
        return Err(ClientError::ProtocolMismatch {
            expected: expected_id,
            actual,
        });
    }

    match (object.remove("result"), object.remove("error")) {
        (Some(result), None) => Ok(Outcome::Result(result)),
        (None, Some(error)) => serde_json::from_value(error)
            .map(Outcome::Error)
            .map_err(|e| ClientError::MalformedResponse(format!("invalid error object: {e}"))),
        (Some(_), Some(_)) => Err(ClientError::MalformedResponse(
            "response has both `result` and `error`".to_string(),
        )),
        (None, None) => Err(ClientError::MalformedResponse(
            "response has neither `result` nor `error`".to_string(),
        )),
    }
}

/// Build a positional parameter list, failing instead of panicking on
/// values that cannot be represented as JSON.
macro_rules! params {
    ($($value:expr),* $(,)?) => {
        (|| -> ::std::result::Result<::std::vec::Vec<::serde_json::Value>, $crate::error::ClientError> {
            Ok(vec![$(::serde_json::to_value($value).map_err($crate::error::ClientError::Encode)?),*])
        })()
    };
}

pub(crate) use params;
