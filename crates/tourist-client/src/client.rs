//! Typed client for the tourist server.
//!
//! Every method performs exactly one request/response round trip. The
//! connection sits behind an async mutex that is held from the moment a
//! request is written until its response has been read, so at most one
//! request is ever in flight no matter how many tasks share the client.

use crate::error::ClientError;
use crate::protocol::{self, params, Method, Outcome};
use crate::transport::Transport;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tourist_core::{
    LocateMode, Location, StopId, StopMetadata, StopView, TourId, TourMetadata, TourView,
};

/// Default limit for ordinary requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit for requests that walk repository history.
pub const DEFAULT_SLOW_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Tunables for [`TouristClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Limit for most requests. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Limit for `refresh_tour` and `open_tour`. `None` waits forever.
    pub slow_request_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            slow_request_timeout: Some(DEFAULT_SLOW_REQUEST_TIMEOUT),
        }
    }
}

impl ClientOptions {
    /// Options with no timeouts at all.
    pub const fn without_timeouts() -> Self {
        Self {
            request_timeout: None,
            slow_request_timeout: None,
        }
    }

    const fn timeout_for(&self, method: Method) -> Option<Duration> {
        if method.is_slow() {
            self.slow_request_timeout
        } else {
            self.request_timeout
        }
    }
}

enum ConnectionState {
    Disconnected,
    Connected(Connection),
    Closed(String),
}

struct Connection {
    transport: Transport,
    next_id: u64,
}

impl Connection {
    const fn new(transport: Transport) -> Self {
        Self {
            transport,
            next_id: 1,
        }
    }

    async fn round_trip(
        &mut self,
        method: Method,
        params: &[Value],
        id: u64,
    ) -> Result<Outcome, ClientError> {
        let frame = protocol::encode_request(method, params, id)?;
        tracing::debug!("RPC request: {}", String::from_utf8_lossy(&frame));
        self.transport.send(&frame).await?;

        let line = self.transport.receive_one().await?;
        tracing::debug!("RPC response: {}", line);
        protocol::decode_response(&line, id)
    }
}

/// Client for one `tourist serve` process.
///
/// Share it between sessions with an `Arc`; the server multiplexes tours by
/// [`TourId`], so one process serves every session.
pub struct TouristClient {
    options: ClientOptions,
    state: Mutex<ConnectionState>,
}

impl Default for TouristClient {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl std::fmt::Debug for TouristClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TouristClient")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TouristClient {
    /// Create a disconnected client.
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    /// The options this client was built with.
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Spawn `<executable> serve` and connect to it.
    ///
    /// Must be called exactly once. A client whose connection was closed
    /// stays closed; build a new client to start over.
    pub async fn connect(&self, executable: impl AsRef<Path>) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        Self::check_connectable(&state)?;
        let transport = Transport::spawn(executable)?;
        *state = ConnectionState::Connected(Connection::new(transport));
        Ok(())
    }

    /// Connect over an already established transport.
    pub async fn attach(&self, transport: Transport) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        Self::check_connectable(&state)?;
        *state = ConnectionState::Connected(Connection::new(transport));
        Ok(())
    }

    /// Whether the client has a live connection.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, ConnectionState::Connected(_))
    }

    /// Close the connection. Later calls fail with [`ClientError::TransportClosed`].
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if let ConnectionState::Connected(mut connection) = std::mem::replace(
            &mut *state,
            ConnectionState::Closed("client disconnected".to_string()),
        ) {
            connection.transport.close("client disconnected").await;
        }
    }

    fn check_connectable(state: &ConnectionState) -> Result<(), ClientError> {
        match state {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connected(_) => Err(ClientError::AlreadyConnected),
            ConnectionState::Closed(reason) => Err(ClientError::TransportClosed(reason.clone())),
        }
    }

    async fn request(&self, method: Method, params: Vec<Value>) -> Result<Value, ClientError> {
        let mut state = self.state.lock().await;
        let connection = match &mut *state {
            ConnectionState::Connected(connection) => connection,
            ConnectionState::Disconnected => return Err(ClientError::NotConnected),
            ConnectionState::Closed(reason) => {
                return Err(ClientError::TransportClosed(reason.clone()))
            }
        };

        let id = connection.next_id;
        connection.next_id += 1;

        let exchange = connection.round_trip(method, &params, id);
        let outcome = match self.options.timeout_for(method) {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .unwrap_or(Err(ClientError::RequestTimeout {
                    method,
                    id,
                    timeout: limit,
                })),
            None => exchange.await,
        };

        match outcome {
            Ok(Outcome::Result(value)) => Ok(value),
            Ok(Outcome::Error(error)) => {
                tracing::debug!("`{}` returned server error: {}", method, error);
                Err(ClientError::Server { method, error })
            }
            Err(err) => {
                if err.is_fatal() {
                    let reason = err.to_string();
                    if let ConnectionState::Connected(mut connection) =
                        std::mem::replace(&mut *state, ConnectionState::Closed(reason.clone()))
                    {
                        connection.transport.close(reason).await;
                    }
                }
                Err(err)
            }
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        params: Vec<Value>,
    ) -> Result<T, ClientError> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|source| ClientError::UnexpectedResult { method, source })
    }

    async fn call_unit(&self, method: Method, params: Vec<Value>) -> Result<(), ClientError> {
        self.call::<IgnoredAny>(method, params).await.map(|_| ())
    }

    /// All tours the server tracks, as `(id, title)` pairs.
    pub async fn list_tours(&self) -> Result<Vec<(TourId, String)>, ClientError> {
        self.call(Method::ListTours, Vec::new()).await
    }

    /// Create an empty tour in edit mode.
    pub async fn create_tour(&self, title: &str) -> Result<TourId, ClientError> {
        self.call(Method::CreateTour, params![title]?).await
    }

    /// Load a tour from a `.tour` file.
    pub async fn open_tour(&self, path: &Path, edit: bool) -> Result<TourId, ClientError> {
        self.call(Method::OpenTour, params![path, edit]?).await
    }

    /// Turn edit mode on or off.
    pub async fn set_tour_edit(&self, tour: &TourId, edit: bool) -> Result<(), ClientError> {
        self.call_unit(Method::SetTourEdit, params![tour, edit]?)
            .await
    }

    /// A fresh view of a tour.
    pub async fn view_tour(&self, tour: &TourId) -> Result<TourView, ClientError> {
        self.call(Method::ViewTour, params![tour]?).await
    }

    /// Change a tour's title and/or description.
    pub async fn edit_tour_metadata(
        &self,
        tour: &TourId,
        metadata: &TourMetadata,
    ) -> Result<(), ClientError> {
        self.call_unit(Method::EditTourMetadata, params![tour, metadata]?)
            .await
    }

    /// Stop tracking a tour. The file on disk is left alone.
    pub async fn forget_tour(&self, tour: &TourId) -> Result<(), ClientError> {
        self.call_unit(Method::ForgetTour, params![tour]?).await
    }

    /// Add a stop at `path:line` (1-based line).
    pub async fn create_stop(
        &self,
        tour: &TourId,
        title: &str,
        path: &Path,
        line: usize,
    ) -> Result<StopId, ClientError> {
        self.call(Method::CreateStop, params![tour, title, path, line]?)
            .await
    }

    /// A fresh view of a stop.
    pub async fn view_stop(&self, tour: &TourId, stop: &StopId) -> Result<StopView, ClientError> {
        self.call(Method::ViewStop, params![tour, stop]?).await
    }

    /// Rebind a stop to a new location.
    pub async fn move_stop(
        &self,
        tour: &TourId,
        stop: &StopId,
        path: &Path,
        line: usize,
    ) -> Result<(), ClientError> {
        self.call_unit(Method::MoveStop, params![tour, stop, path, line]?)
            .await
    }

    /// Shift a stop by `delta` positions, clamped to the ends of the list.
    pub async fn reorder_stop(
        &self,
        tour: &TourId,
        stop: &StopId,
        delta: isize,
    ) -> Result<(), ClientError> {
        self.call_unit(Method::ReorderStop, params![tour, stop, delta]?)
            .await
    }

    /// Change a stop's title and/or description.
    pub async fn edit_stop_metadata(
        &self,
        tour: &TourId,
        stop: &StopId,
        metadata: &StopMetadata,
    ) -> Result<(), ClientError> {
        self.call_unit(Method::EditStopMetadata, params![tour, stop, metadata]?)
            .await
    }

    /// Link a stop to another tour, or to a stop inside it.
    pub async fn link_stop(
        &self,
        tour: &TourId,
        stop: &StopId,
        other_tour: &TourId,
        other_stop: Option<&StopId>,
    ) -> Result<(), ClientError> {
        self.call_unit(
            Method::LinkStop,
            params![tour, stop, other_tour, other_stop]?,
        )
        .await
    }

    /// Remove a link created by [`TouristClient::link_stop`].
    pub async fn unlink_stop(
        &self,
        tour: &TourId,
        stop: &StopId,
        other_tour: &TourId,
        other_stop: Option<&StopId>,
    ) -> Result<(), ClientError> {
        self.call_unit(
            Method::UnlinkStop,
            params![tour, stop, other_tour, other_stop]?,
        )
        .await
    }

    /// Where a stop is now. `None` means the stop is broken, not that the call failed.
    pub async fn locate_stop(
        &self,
        tour: &TourId,
        stop: &StopId,
        mode: LocateMode,
    ) -> Result<Option<Location>, ClientError> {
        self.call(Method::LocateStop, params![tour, stop, mode.is_naive()]?)
            .await
    }

    /// Delete a stop.
    pub async fn remove_stop(&self, tour: &TourId, stop: &StopId) -> Result<(), ClientError> {
        self.call_unit(Method::RemoveStop, params![tour, stop]?)
            .await
    }

    /// Recompute every stop location against `commit`, or HEAD when `None`.
    pub async fn refresh_tour(&self, tour: &TourId, commit: Option<&str>) -> Result<(), ClientError> {
        self.call_unit(Method::RefreshTour, params![tour, commit]?)
            .await
    }

    /// Write a tour to disk. `path` is required the first time a new tour is saved.
    pub async fn save_tour(&self, tour: &TourId, path: Option<&Path>) -> Result<(), ClientError> {
        let params = match path {
            Some(path) => params![tour, path]?,
            None => params![tour]?,
        };
        self.call_unit(Method::SaveTour, params).await
    }

    /// Write every tracked tour. Fails if any of them has no path yet.
    pub async fn save_all(&self) -> Result<(), ClientError> {
        self.call_unit(Method::SaveAll, Vec::new()).await
    }

    /// Stop tracking a tour and delete its file.
    pub async fn delete_tour(&self, tour: &TourId) -> Result<(), ClientError> {
        self.call_unit(Method::DeleteTour, params![tour]?).await
    }

    /// Map a repository name to a local checkout, or remove the mapping with `None`.
    pub async fn index_repository(
        &self,
        name: &str,
        path: Option<&Path>,
    ) -> Result<(), ClientError> {
        self.call_unit(Method::IndexRepository, params![name, path]?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;
    use std::sync::Arc;
    use tokio_test::io::Builder;
    use tourist_core::ServerErrorCode;

    async fn scripted(mock: tokio_test::io::Mock) -> TouristClient {
        let (reader, writer) = tokio::io::split(mock);
        let client = TouristClient::new(ClientOptions::without_timeouts());
        client
            .attach(Transport::from_streams(reader, writer))
            .await
            .unwrap();
        client
    }

    async fn mocked() -> (TouristClient, crate::mock::MockHandle) {
        let (transport, handle) = MockServer::start();
        let client = TouristClient::new(ClientOptions::default());
        client.attach(transport).await.unwrap();
        (client, handle)
    }

    #[tokio::test]
    async fn test_not_connected() {
        let client = TouristClient::default();
        let err = client.list_tours().await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let mock = Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"method\":\"list_tours\",\"params\":[],\"id\":1}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":[[\"t1\",\"Intro\"]]}\n")
            .write(b"{\"jsonrpc\":\"2.0\",\"method\":\"save_all\",\"params\":[],\"id\":2}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":null}\n")
            .build();
        let client = scripted(mock).await;

        let tours = client.list_tours().await.unwrap();
        assert_eq!(tours, vec![(TourId::new("t1"), "Intro".to_string())]);
        client.save_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_tour_omits_missing_path() {
        let mock = Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"method\":\"save_tour\",\"params\":[\"t1\"],\"id\":1}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":null}\n")
            .write(b"{\"jsonrpc\":\"2.0\",\"method\":\"save_tour\",\"params\":[\"t1\",\"/tmp/a.tour\"],\"id\":2}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":null}\n")
            .build();
        let client = scripted(mock).await;

        let tour = TourId::new("t1");
        client.save_tour(&tour, None).await.unwrap();
        client
            .save_tour(&tour, Some(Path::new("/tmp/a.tour")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_locate_sends_naive_flag_explicitly() {
        let mock = Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"method\":\"locate_stop\",\"params\":[\"t1\",\"s1\",true],\"id\":1}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":[\"/repo/a.rs\",4]}\n")
            .write(b"{\"jsonrpc\":\"2.0\",\"method\":\"locate_stop\",\"params\":[\"t1\",\"s1\",false],\"id\":2}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":null}\n")
            .build();
        let client = scripted(mock).await;

        let tour = TourId::new("t1");
        let stop = StopId::new("s1");
        let naive = client
            .locate_stop(&tour, &stop, LocateMode::Naive)
            .await
            .unwrap();
        assert_eq!(naive, Some(Location::new("/repo/a.rs", 4)));
        let adjusted = client
            .locate_stop(&tour, &stop, LocateMode::Adjusted)
            .await
            .unwrap();
        assert_eq!(adjusted, None);
    }

    #[tokio::test]
    async fn test_mismatched_id_is_fatal() {
        let mock = Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"method\":\"list_tours\",\"params\":[],\"id\":1}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":[]}\n")
            .build();
        let client = scripted(mock).await;

        let err = client.list_tours().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::ProtocolMismatch {
                expected: 1,
                actual: Some(7)
            }
        ));
        assert!(!client.is_connected().await);

        let err = client.list_tours().await.unwrap_err();
        assert!(matches!(err, ClientError::TransportClosed(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_not_fatal() {
        let (client, _server) = mocked().await;
        let tour = client.create_tour("T1").await.unwrap();

        let err = client
            .create_stop(&tour, "A", Path::new("/unmapped/file.py"), 10)
            .await
            .unwrap_err();
        assert!(err.needs_repository_mapping());
        assert!(client.is_connected().await);

        let view = client.view_tour(&tour).await.unwrap();
        assert!(view.stops.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_server_code_reported_generically() {
        let (client, server) = mocked().await;
        server.fail_next(4242, "new failure mode");

        let err = client.list_tours().await.unwrap_err();
        assert_eq!(err.server_code(), Some(ServerErrorCode::Unknown(4242)));
        assert!(!err.is_fatal());
        assert!(client.list_tours().await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_tears_down_connection() {
        let (transport, server) = MockServer::start();
        let client = TouristClient::new(ClientOptions {
            request_timeout: Some(Duration::from_millis(50)),
            slow_request_timeout: None,
        });
        client.attach(transport).await.unwrap();
        server.hang_next();

        let err = client.list_tours().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::RequestTimeout {
                method: Method::ListTours,
                id: 1,
                ..
            }
        ));

        let err = client.list_tours().await.unwrap_err();
        assert!(matches!(err, ClientError::TransportClosed(_)));
    }

    #[tokio::test]
    async fn test_server_exit_fails_pending_and_future_requests() {
        let (client, server) = mocked().await;
        client.list_tours().await.unwrap();
        server.close_next();

        let err = client.list_tours().await.unwrap_err();
        assert!(matches!(err, ClientError::TransportClosed(_)));
        let err = client.create_tour("again").await.unwrap_err();
        assert!(matches!(err, ClientError::TransportClosed(_)));
    }

    #[tokio::test]
    async fn test_garbage_response_is_fatal() {
        let (client, server) = mocked().await;
        server.garble_next();

        let err = client.list_tours().await.unwrap_err();
        assert!(matches!(err, ClientError::MalformedResponse(_)));
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_wrong_result_shape_is_not_fatal() {
        let mock = Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"method\":\"create_tour\",\"params\":[\"x\"],\"id\":1}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"weird\":true}}\n")
            .build();
        let client = scripted(mock).await;

        let err = client.create_tour("x").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedResult {
                method: Method::CreateTour,
                ..
            }
        ));
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let (client, _server) = mocked().await;
        let (other, _other_server) = MockServer::start();
        let err = client.attach(other).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyConnected));
    }

    #[tokio::test]
    async fn test_disconnect_is_terminal() {
        let (client, _server) = mocked().await;
        client.disconnect().await;
        let err = client.list_tours().await.unwrap_err();
        assert!(matches!(err, ClientError::TransportClosed(_)));

        let (transport, _again) = MockServer::start();
        let err = client.attach(transport).await.unwrap_err();
        assert!(matches!(err, ClientError::TransportClosed(_)));
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_serialized() {
        let (client, server) = mocked().await;
        let client = Arc::new(client);
        let tour = client.create_tour("T").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let client = Arc::clone(&client);
            let tour = tour.clone();
            tasks.push(tokio::spawn(async move {
                client
                    .edit_tour_metadata(&tour, &TourMetadata::default().with_title(format!("T{i}")))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(server.max_in_flight(), 1);
        assert_eq!(server.requests_seen(), 17);
    }
}
