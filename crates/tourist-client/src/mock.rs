//! In-process tourist server for tests.
//!
//! [`MockServer::start`] returns a [`Transport`] wired to a task that speaks
//! the same newline-delimited JSON-RPC as `tourist serve`, backed by a small
//! in-memory tour store. The [`MockHandle`] injects faults and reports what
//! the server saw.
//!
//! Repository resolution is deliberately simple: a stop belongs to the
//! mapped repository whose path is the longest prefix of the stop's path,
//! and a stop is locatable while that repository is mapped and the file
//! still exists.

use crate::protocol::Method;
use crate::transport::Transport;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tourist_core::{
    ServerError, ServerErrorCode, StopId, StopMetadata, StopReference, StopView, TourId,
    TourMetadata, TourView,
};

/// Commit reported for every repository until `refresh_tour` pins another.
pub const MOCK_COMMIT: &str = "0000000000000000000000000000000000000000";

const PIPELINE_WINDOW: Duration = Duration::from_millis(2);

/// Entry point for the mock server.
pub struct MockServer;

impl MockServer {
    /// Start a mock server task and return the client end of its stream.
    pub fn start() -> (Transport, MockHandle) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client_io);
        let handle = MockHandle {
            shared: Arc::new(Mutex::new(Shared::default())),
        };
        tokio::spawn(serve(server_io, handle.clone()));
        (Transport::from_streams(reader, writer), handle)
    }
}

/// Controls and inspects a running mock server.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Default)]
struct Shared {
    service: MockService,
    faults: VecDeque<Fault>,
    methods: Vec<String>,
    max_in_flight: usize,
}

enum Fault {
    Fail(i64, String),
    Hang,
    Close,
    Garble,
    WrongId,
}

enum Reply {
    Line(String),
    Silent,
    Close,
}

impl MockHandle {
    /// Answer the next request with a server error.
    pub fn fail_next(&self, code: i64, message: impl Into<String>) {
        self.push(Fault::Fail(code, message.into()));
    }

    /// Never answer the next request.
    pub fn hang_next(&self) {
        self.push(Fault::Hang);
    }

    /// Close the stream instead of answering the next request.
    pub fn close_next(&self) {
        self.push(Fault::Close);
    }

    /// Answer the next request with a line that is not JSON.
    pub fn garble_next(&self) {
        self.push(Fault::Garble);
    }

    /// Answer the next request with someone else's id.
    pub fn wrong_id_next(&self) {
        self.push(Fault::WrongId);
    }

    /// Make adjusted (non-naive) lookups in `path` report lines shifted by `delta`.
    pub fn shift_lines(&self, path: impl Into<PathBuf>, delta: isize) {
        self.shared
            .lock()
            .service
            .line_shifts
            .insert(path.into(), delta);
    }

    /// Number of requests received so far.
    pub fn requests_seen(&self) -> usize {
        self.shared.lock().methods.len()
    }

    /// Wire names of every request received so far, in order.
    pub fn methods_seen(&self) -> Vec<String> {
        self.shared.lock().methods.clone()
    }

    /// Forget the request log.
    pub fn clear_log(&self) {
        self.shared.lock().methods.clear();
    }

    /// Largest number of requests that were outstanding at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.shared.lock().max_in_flight
    }

    fn push(&self, fault: Fault) {
        self.shared.lock().faults.push_back(fault);
    }
}

async fn serve(stream: DuplexStream, handle: MockHandle) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }

        // A second request already waiting here means the client pipelined.
        let pipelined = matches!(
            tokio::time::timeout(PIPELINE_WINDOW, reader.fill_buf()).await,
            Ok(Ok(buf)) if !buf.is_empty()
        );

        let reply = handle.shared.lock().dispatch(line.trim_end(), pipelined);
        match reply {
            Reply::Line(text) => {
                let frame = format!("{text}\n");
                if write_half.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
            }
            Reply::Silent => {}
            Reply::Close => break,
        }
    }
}

impl Shared {
    fn dispatch(&mut self, line: &str, pipelined: bool) -> Reply {
        self.max_in_flight = self.max_in_flight.max(if pipelined { 2 } else { 1 });

        let request: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                return Reply::Line(error_line(
                    &Value::Null,
                    &ServerError::new(ServerErrorCode::ParseError, e.to_string()),
                ))
            }
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = match request.get("params") {
            Some(Value::Array(params)) => params.clone(),
            _ => Vec::new(),
        };
        self.methods.push(method.clone());

        match self.faults.pop_front() {
            Some(Fault::Fail(code, message)) => {
                return Reply::Line(error_line(
                    &id,
                    &ServerError::new(ServerErrorCode::from_code(code), message),
                ))
            }
            Some(Fault::Hang) => return Reply::Silent,
            Some(Fault::Close) => return Reply::Close,
            Some(Fault::Garble) => return Reply::Line("}{ not json".to_string()),
            Some(Fault::WrongId) => {
                let wrong = id.as_u64().map_or(Value::Null, |n| json!(n + 100));
                return Reply::Line(result_line(&wrong, &Value::Null));
            }
            None => {}
        }

        let Some(method) = Method::from_name(&method) else {
            return Reply::Line(error_line(
                &id,
                &ServerError::new(
                    ServerErrorCode::MethodNotFound,
                    format!("unknown method `{method}`"),
                ),
            ));
        };
        match self.service.handle(method, &params) {
            Ok(result) => Reply::Line(result_line(&id, &result)),
            Err(error) => Reply::Line(error_line(&id, &error)),
        }
    }
}

fn result_line(id: &Value, result: &Value) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string()
}

fn error_line(id: &Value, error: &ServerError) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "error": error }).to_string()
}

#[derive(Default)]
struct MockService {
    tours: Vec<MockTour>,
    index: BTreeMap<String, PathBuf>,
    line_shifts: HashMap<PathBuf, isize>,
    next_tour: u64,
    next_stop: u64,
}

struct MockTour {
    id: TourId,
    title: String,
    description: String,
    stops: Vec<MockStop>,
    commits: BTreeMap<String, String>,
    edit: bool,
    path: Option<PathBuf>,
}

struct MockStop {
    id: StopId,
    title: String,
    description: String,
    repository: String,
    path: PathBuf,
    line: usize,
    links: Vec<(TourId, Option<StopId>)>,
}

#[derive(Serialize, Deserialize)]
struct TourFileDump {
    title: String,
    #[serde(default)]
    description: String,
    stops: Vec<StopDump>,
}

#[derive(Serialize, Deserialize)]
struct StopDump {
    title: String,
    #[serde(default)]
    description: String,
    repository: String,
    path: PathBuf,
    line: usize,
}

type Handled = Result<Value, ServerError>;

fn arg<T: DeserializeOwned>(params: &[Value], index: usize) -> Result<T, ServerError> {
    let value = params.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| {
        ServerError::new(
            ServerErrorCode::InvalidParams,
            format!("parameter {index}: {e}"),
        )
    })
}

fn done() -> Handled {
    Ok(Value::Null)
}

fn to_json<T: Serialize>(value: &T) -> Handled {
    serde_json::to_value(value)
        .map_err(|e| ServerError::new(ServerErrorCode::InternalError, e.to_string()))
}

fn io_error(e: &std::io::Error) -> ServerError {
    ServerError::new(ServerErrorCode::IoError, e.to_string())
}

impl MockService {
    fn handle(&mut self, method: Method, params: &[Value]) -> Handled {
        match method {
            Method::ListTours => {
                let tours: Vec<(TourId, String)> = self
                    .tours
                    .iter()
                    .map(|t| (t.id.clone(), t.title.clone()))
                    .collect();
                to_json(&tours)
            }
            Method::CreateTour => {
                let title: String = arg(params, 0)?;
                let id = self.new_tour(title, String::new(), true, None);
                to_json(&id)
            }
            Method::OpenTour => {
                let path: PathBuf = arg(params, 0)?;
                let edit: bool = arg(params, 1)?;
                self.open_tour(&path, edit)
            }
            Method::SetTourEdit => {
                let edit: bool = arg(params, 1)?;
                self.tour_mut(&arg(params, 0)?)?.edit = edit;
                done()
            }
            Method::ViewTour => self.view_tour(&arg(params, 0)?),
            Method::EditTourMetadata => {
                let metadata: TourMetadata = arg(params, 1)?;
                let tour = self.tour_mut(&arg(params, 0)?)?;
                if let Some(title) = metadata.title {
                    tour.title = title;
                }
                if let Some(description) = metadata.description {
                    tour.description = description;
                }
                done()
            }
            Method::ForgetTour => {
                let id: TourId = arg(params, 0)?;
                self.tour(&id)?;
                self.tours.retain(|t| t.id != id);
                done()
            }
            Method::CreateStop => {
                let tour: TourId = arg(params, 0)?;
                let title: String = arg(params, 1)?;
                let path: PathBuf = arg(params, 2)?;
                let line: usize = arg(params, 3)?;
                self.create_stop(&tour, title, path, line)
            }
            Method::ViewStop => self.view_stop(&arg(params, 0)?, &arg(params, 1)?),
            Method::MoveStop => {
                let path: PathBuf = arg(params, 2)?;
                let line: usize = arg(params, 3)?;
                let repository = self.repository_for(&path)?;
                let tour = self.tour_mut(&arg(params, 0)?)?;
                tour.commits
                    .entry(repository.clone())
                    .or_insert_with(|| MOCK_COMMIT.to_string());
                let stop = Self::stop_in(tour, &arg(params, 1)?)?;
                stop.repository = repository;
                stop.path = path;
                stop.line = line;
                done()
            }
            Method::ReorderStop => {
                let stop: StopId = arg(params, 1)?;
                let delta: isize = arg(params, 2)?;
                let tour = self.tour_mut(&arg(params, 0)?)?;
                let index = tour
                    .stops
                    .iter()
                    .position(|s| s.id == stop)
                    .ok_or_else(|| no_stop(&stop))?;
                let last = tour.stops.len() as isize - 1;
                let target = (index as isize + delta).clamp(0, last) as usize;
                let moved = tour.stops.remove(index);
                tour.stops.insert(target, moved);
                done()
            }
            Method::EditStopMetadata => {
                let metadata: StopMetadata = arg(params, 2)?;
                let tour = self.tour_mut(&arg(params, 0)?)?;
                let stop = Self::stop_in(tour, &arg(params, 1)?)?;
                if let Some(title) = metadata.title {
                    stop.title = title;
                }
                if let Some(description) = metadata.description {
                    stop.description = description;
                }
                done()
            }
            Method::LinkStop | Method::UnlinkStop => {
                let other_tour: TourId = arg(params, 2)?;
                let other_stop: Option<StopId> = arg(params, 3)?;
                let target = (other_tour, other_stop);
                let tour = self.tour_mut(&arg(params, 0)?)?;
                let stop = Self::stop_in(tour, &arg(params, 1)?)?;
                if method == Method::LinkStop {
                    if !stop.links.contains(&target) {
                        stop.links.push(target);
                    }
                } else {
                    stop.links.retain(|link| *link != target);
                }
                done()
            }
            Method::LocateStop => {
                let naive: bool = arg(params, 2)?;
                self.locate_stop(&arg(params, 0)?, &arg(params, 1)?, naive)
            }
            Method::RemoveStop => {
                let stop: StopId = arg(params, 1)?;
                let tour = self.tour_mut(&arg(params, 0)?)?;
                let before = tour.stops.len();
                tour.stops.retain(|s| s.id != stop);
                if tour.stops.len() == before {
                    return Err(no_stop(&stop));
                }
                done()
            }
            Method::RefreshTour => {
                let commit: Option<String> = arg(params, 1)?;
                let tour = self.tour_mut(&arg(params, 0)?)?;
                let commit = commit.unwrap_or_else(|| MOCK_COMMIT.to_string());
                for pinned in tour.commits.values_mut() {
                    pinned.clone_from(&commit);
                }
                done()
            }
            Method::SaveTour => {
                let path: Option<PathBuf> = arg(params, 1)?;
                let tour = self.tour_mut(&arg(params, 0)?)?;
                if let Some(path) = path {
                    tour.path = Some(path);
                }
                Self::write_tour(tour)?;
                done()
            }
            Method::SaveAll => {
                if let Some(unsaved) = self.tours.iter().find(|t| t.path.is_none()) {
                    return Err(ServerError::new(
                        ServerErrorCode::NoPathForTour,
                        format!("tour {} has no path", unsaved.id),
                    ));
                }
                for tour in &self.tours {
                    Self::write_tour(tour)?;
                }
                done()
            }
            Method::DeleteTour => {
                let id: TourId = arg(params, 0)?;
                let path = self.tour(&id)?.path.clone();
                self.tours.retain(|t| t.id != id);
                if let Some(path) = path {
                    match std::fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(io_error(&e)),
                    }
                }
                done()
            }
            Method::IndexRepository => {
                let name: String = arg(params, 0)?;
                let path: Option<PathBuf> = arg(params, 1)?;
                match path {
                    Some(path) => {
                        self.index.insert(name, path);
                    }
                    None => {
                        self.index.remove(&name);
                    }
                }
                done()
            }
        }
    }

    fn new_tour(
        &mut self,
        title: String,
        description: String,
        edit: bool,
        path: Option<PathBuf>,
    ) -> TourId {
        self.next_tour += 1;
        let id = TourId::new(format!("tour-{}", self.next_tour));
        self.tours.push(MockTour {
            id: id.clone(),
            title,
            description,
            stops: Vec::new(),
            commits: BTreeMap::new(),
            edit,
            path,
        });
        id
    }

    fn next_stop_id(&mut self) -> StopId {
        self.next_stop += 1;
        StopId::new(format!("stop-{}", self.next_stop))
    }

    fn tour(&self, id: &TourId) -> Result<&MockTour, ServerError> {
        self.tours
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| no_tour(id))
    }

    fn tour_mut(&mut self, id: &TourId) -> Result<&mut MockTour, ServerError> {
        self.tours
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| no_tour(id))
    }

    fn stop_in<'a>(tour: &'a mut MockTour, id: &StopId) -> Result<&'a mut MockStop, ServerError> {
        tour.stops
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| no_stop(id))
    }

    fn repository_for(&self, path: &Path) -> Result<String, ServerError> {
        self.index
            .iter()
            .filter(|(_, root)| path.starts_with(root))
            .max_by_key(|(_, root)| root.components().count())
            .map(|(name, _)| name.clone())
            .ok_or_else(|| {
                ServerError::new(
                    ServerErrorCode::PathNotInIndex,
                    format!("{} is not in any indexed repository", path.display()),
                )
            })
    }

    fn view_tour(&self, id: &TourId) -> Handled {
        let tour = self.tour(id)?;
        to_json(&TourView {
            title: tour.title.clone(),
            description: tour.description.clone(),
            stops: tour
                .stops
                .iter()
                .map(|s| (s.id.clone(), s.title.clone()))
                .collect(),
            repositories: tour
                .commits
                .iter()
                .map(|(repo, commit)| (repo.clone(), commit.clone()))
                .collect(),
            edit: tour.edit,
        })
    }

    fn view_stop(&self, tour_id: &TourId, stop_id: &StopId) -> Handled {
        let tour = self.tour(tour_id)?;
        let stop = tour
            .stops
            .iter()
            .find(|s| &s.id == stop_id)
            .ok_or_else(|| no_stop(stop_id))?;
        let children = stop
            .links
            .iter()
            .map(|(target_tour, target_stop)| {
                let loaded = self.tours.iter().find(|t| &t.id == target_tour);
                StopReference {
                    tour_id: target_tour.clone(),
                    stop_id: target_stop.clone(),
                    tour_title: loaded.map(|t| t.title.clone()),
                    stop_title: target_stop.as_ref().and_then(|sid| {
                        loaded
                            .and_then(|t| t.stops.iter().find(|s| &s.id == sid))
                            .map(|s| s.title.clone())
                    }),
                }
            })
            .collect();
        to_json(&StopView {
            title: stop.title.clone(),
            description: stop.description.clone(),
            repository: stop.repository.clone(),
            children,
        })
    }

    fn create_stop(&mut self, tour_id: &TourId, title: String, path: PathBuf, line: usize) -> Handled {
        self.tour(tour_id)?;
        let repository = self.repository_for(&path)?;
        let id = self.next_stop_id();
        let tour = self.tour_mut(tour_id)?;
        tour.commits
            .entry(repository.clone())
            .or_insert_with(|| MOCK_COMMIT.to_string());
        tour.stops.push(MockStop {
            id: id.clone(),
            title,
            description: String::new(),
            repository,
            path,
            line,
            links: Vec::new(),
        });
        to_json(&id)
    }

    fn locate_stop(&self, tour_id: &TourId, stop_id: &StopId, naive: bool) -> Handled {
        let tour = self.tour(tour_id)?;
        let stop = tour
            .stops
            .iter()
            .find(|s| &s.id == stop_id)
            .ok_or_else(|| no_stop(stop_id))?;
        if !self.index.contains_key(&stop.repository) || !stop.path.exists() {
            return Ok(Value::Null);
        }
        let shift = if naive {
            0
        } else {
            self.line_shifts.get(&stop.path).copied().unwrap_or(0)
        };
        let line = (stop.line as isize + shift).max(1) as usize;
        Ok(json!([stop.path, line]))
    }

    fn open_tour(&mut self, path: &Path, edit: bool) -> Handled {
        let text = std::fs::read_to_string(path).map_err(|e| io_error(&e))?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ServerError::new(ServerErrorCode::InvalidJson, e.to_string()))?;
        let dump: TourFileDump = serde_json::from_value(value)
            .map_err(|e| ServerError::new(ServerErrorCode::InvalidTourFile, e.to_string()))?;

        let id = self.new_tour(dump.title, dump.description, edit, Some(path.to_path_buf()));
        let mut stops = Vec::with_capacity(dump.stops.len());
        for stop in dump.stops {
            stops.push(MockStop {
                id: self.next_stop_id(),
                title: stop.title,
                description: stop.description,
                repository: stop.repository,
                path: stop.path,
                line: stop.line,
                links: Vec::new(),
            });
        }
        let tour = self.tour_mut(&id)?;
        for stop in &stops {
            tour.commits
                .entry(stop.repository.clone())
                .or_insert_with(|| MOCK_COMMIT.to_string());
        }
        tour.stops = stops;
        to_json(&id)
    }

    fn write_tour(tour: &MockTour) -> Result<(), ServerError> {
        let path = tour.path.as_ref().ok_or_else(|| {
            ServerError::new(
                ServerErrorCode::NoPathForTour,
                format!("tour {} has no path", tour.id),
            )
        })?;
        let dump = TourFileDump {
            title: tour.title.clone(),
            description: tour.description.clone(),
            stops: tour
                .stops
                .iter()
                .map(|s| StopDump {
                    title: s.title.clone(),
                    description: s.description.clone(),
                    repository: s.repository.clone(),
                    path: s.path.clone(),
                    line: s.line,
                })
                .collect(),
        };
        let text = serde_json::to_string_pretty(&dump)
            .map_err(|e| ServerError::new(ServerErrorCode::InternalError, e.to_string()))?;
        std::fs::write(path, text).map_err(|e| io_error(&e))
    }
}

fn no_tour(id: &TourId) -> ServerError {
    ServerError::new(ServerErrorCode::NoTourWithId, format!("no tour with id {id}"))
}

fn no_stop(id: &StopId) -> ServerError {
    ServerError::new(ServerErrorCode::NoStopWithId, format!("no stop with id {id}"))
}
