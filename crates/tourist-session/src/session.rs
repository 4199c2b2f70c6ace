//! The command layer.
//!
//! A [`Session`] is what a host UI holds: the shared client, one
//! [`NavigationState`], and the observers that redraw when something changes.
//!
//! Every mutating command follows the same contract:
//!
//! 1. issue exactly one mutating RPC;
//! 2. unless that call killed the connection, [`Session::resync`] from a
//!    fresh `view_tour` and emit [`SessionEvent::Refreshed`], whether the
//!    call succeeded or the server rejected it.
//!
//! Nothing is patched optimistically. After a command returns, the session
//! reflects exactly one fresh read from the server.

use crate::error::{Result, SessionError};
use crate::navigation::{Direction, NavigationState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tourist_client::{ClientError, TouristClient};
use tourist_core::{
    LocateMode, Location, ServerErrorCode, StopId, StopMetadata, StopView, TourId, TourMetadata,
    TourView,
};

/// Something observers should redraw for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A mutating command finished and the session has resynced.
    Refreshed {
        /// The active tour after the resync.
        tour: Option<TourId>,
    },
    /// The navigation state changed.
    Navigated(NavigationState),
    /// The session is over, either by request or because the connection died.
    Closed,
}

/// Handle returned by [`Session::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Result of going to a stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopVisit {
    /// The stop that is now active.
    pub stop: StopId,
    /// Its title.
    pub title: String,
    /// Where it is now, or `None` if it is broken.
    pub location: Option<Location>,
}

/// A located stop, for markers and breakpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopMarker {
    /// The stop.
    pub stop: StopId,
    /// Its title.
    pub title: String,
    /// Its recorded location.
    pub location: Location,
}

/// One user's view onto the tourist server.
///
/// Sessions are cheap. Several can share one client; each keeps its own
/// navigation state.
pub struct Session {
    client: Arc<TouristClient>,
    navigation: RwLock<NavigationState>,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
    next_subscription: AtomicU64,
    save_paths: Mutex<HashMap<TourId, PathBuf>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("navigation", &*self.navigation.read())
            .field("observers", &self.observers.lock().len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session on a connected client.
    pub fn new(client: Arc<TouristClient>) -> Self {
        Self {
            client,
            navigation: RwLock::new(NavigationState::NoTour),
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            save_paths: Mutex::new(HashMap::new()),
        }
    }

    /// The shared client.
    pub fn client(&self) -> &Arc<TouristClient> {
        &self.client
    }

    /// Call `observer` for every future event.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, Arc::new(observer)));
        id
    }

    /// Stop calling an observer. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    fn notify(&self, event: &SessionEvent) {
        // Observers may call back into the session, so none of our locks are held.
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(event);
        }
    }

    /// A copy of the navigation state.
    pub fn navigation(&self) -> NavigationState {
        self.navigation.read().clone()
    }

    /// The active tour.
    pub fn active_tour(&self) -> Option<TourId> {
        self.navigation.read().tour().cloned()
    }

    /// The active stop.
    pub fn active_stop(&self) -> Option<StopId> {
        self.navigation.read().stop().cloned()
    }

    fn require_tour(&self) -> Result<TourId> {
        self.active_tour().ok_or(SessionError::NoActiveTour)
    }

    /// The active stop, or `NoActiveStop`.
    pub fn require_stop(&self) -> Result<StopId> {
        self.active_stop().ok_or(SessionError::NoActiveStop)
    }

    /// Apply `change` to the navigation state and emit `Navigated` if it moved.
    fn transition(&self, change: impl FnOnce(&mut NavigationState)) {
        let changed = {
            let mut navigation = self.navigation.write();
            let before = navigation.clone();
            change(&mut *navigation);
            (*navigation != before).then(|| navigation.clone())
        };
        if let Some(state) = changed {
            tracing::debug!("Navigation is now {:?}", state);
            self.notify(&SessionEvent::Navigated(state));
        }
    }

    /// All tours the server tracks.
    pub async fn list_tours(&self) -> Result<Vec<(TourId, String)>> {
        self.client
            .list_tours()
            .await
            .map_err(|e| self.fail_if_fatal(e))
    }

    /// A fresh view of `tour`.
    pub async fn view_tour(&self, tour: &TourId) -> Result<TourView> {
        self.client
            .view_tour(tour)
            .await
            .map_err(|e| self.fail_if_fatal(e))
    }

    /// A fresh view of the active tour.
    pub async fn view_active_tour(&self) -> Result<TourView> {
        let tour = self.require_tour()?;
        self.view_tour(&tour).await
    }

    /// A fresh view of a stop.
    pub async fn view_stop(&self, tour: &TourId, stop: &StopId) -> Result<StopView> {
        self.client
            .view_stop(tour, stop)
            .await
            .map_err(|e| self.fail_if_fatal(e))
    }

    /// A fresh view of the active stop.
    pub async fn view_active_stop(&self) -> Result<StopView> {
        let tour = self.require_tour()?;
        let stop = self.require_stop()?;
        self.view_stop(&tour, &stop).await
    }

    /// Where a stop is now. `None` means broken.
    pub async fn locate_stop(
        &self,
        tour: &TourId,
        stop: &StopId,
        mode: LocateMode,
    ) -> Result<Option<Location>> {
        self.client
            .locate_stop(tour, stop, mode)
            .await
            .map_err(|e| self.fail_if_fatal(e))
    }

    /// Stops of the active tour that cannot be located.
    pub async fn broken_stops(&self) -> Result<Vec<(StopId, String)>> {
        let tour = self.require_tour()?;
        let view = self
            .client
            .view_tour(&tour)
            .await
            .map_err(|e| self.fail_if_fatal(e))?;
        let mut broken = Vec::new();
        for (stop, title) in view.stops {
            if self
                .client
                .locate_stop(&tour, &stop, LocateMode::Adjusted)
                .await
                .map_err(|e| self.fail_if_fatal(e))?
                .is_none()
            {
                broken.push((stop, title));
            }
        }
        Ok(broken)
    }

    /// Recorded locations of every locatable stop in the active tour.
    pub async fn breakpoints(&self) -> Result<Vec<StopMarker>> {
        let tour = self.require_tour()?;
        let view = self
            .client
            .view_tour(&tour)
            .await
            .map_err(|e| self.fail_if_fatal(e))?;
        let mut markers = Vec::with_capacity(view.stops.len());
        for (stop, title) in view.stops {
            if let Some(location) = self
                .client
                .locate_stop(&tour, &stop, LocateMode::Naive)
                .await
                .map_err(|e| self.fail_if_fatal(e))?
            {
                markers.push(StopMarker {
                    stop,
                    title,
                    location,
                });
            }
        }
        Ok(markers)
    }

    /// Stops of the active tour recorded in `path`, in tour order.
    pub async fn stop_markers(&self, path: &Path) -> Result<Vec<StopMarker>> {
        let mut markers = self.breakpoints().await?;
        markers.retain(|marker| marker.location.path == path);
        Ok(markers)
    }

    /// Re-read the active tour and reconcile navigation with it.
    ///
    /// Clears the active stop if the server no longer has it, and leaves the
    /// tour if the server no longer tracks it. Always emits `Refreshed`
    /// unless the connection died. Returns the fresh view, if there was an
    /// active tour to read.
    pub async fn resync(&self) -> Result<Option<TourView>> {
        let Some(tour) = self.active_tour() else {
            self.notify_refreshed();
            return Ok(None);
        };

        match self.client.view_tour(&tour).await {
            Ok(view) => {
                self.transition(|navigation| {
                    let stale = navigation.is_active(&tour)
                        && navigation.stop().is_some_and(|stop| !view.contains_stop(stop));
                    if stale {
                        tracing::warn!("Active stop is gone from tour {}", tour);
                        navigation.clear_stop();
                    }
                });
                self.notify_refreshed();
                Ok(Some(view))
            }
            Err(err) if err.server_code() == Some(ServerErrorCode::NoTourWithId) => {
                tracing::warn!("Active tour {} is no longer tracked", tour);
                self.transition(|navigation| {
                    if navigation.is_active(&tour) {
                        navigation.stop_tour();
                    }
                });
                self.notify_refreshed();
                Ok(None)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn notify_refreshed(&self) {
        self.notify(&SessionEvent::Refreshed {
            tour: self.active_tour(),
        });
    }

    fn fail(&self, err: ClientError) -> SessionError {
        if !err.is_fatal() {
            self.notify_refreshed();
        }
        self.fail_if_fatal(err)
    }

    /// Convert a read failure, telling observers if it ended the session.
    fn fail_if_fatal(&self, err: ClientError) -> SessionError {
        if err.is_fatal() {
            tracing::warn!("Session lost its server: {}", err);
            self.notify(&SessionEvent::Closed);
        }
        err.into()
    }

    /// Finish a mutating command: resync unless the call was fatal, then
    /// hand back the call's own result.
    async fn finish<T>(&self, result: Result<T, ClientError>) -> Result<T> {
        match result {
            Err(err) if err.is_fatal() => Err(self.fail(err)),
            Err(err) => {
                // The call's error wins over anything resync reports.
                let _ = self.resync().await;
                Err(err.into())
            }
            Ok(value) => {
                self.resync().await?;
                Ok(value)
            }
        }
    }

    /// Create a tour and start it. `path` is used the first time it is saved.
    pub async fn new_tour(&self, title: &str, path: Option<PathBuf>) -> Result<TourId> {
        let result = self.client.create_tour(title).await;
        if let Ok(tour) = &result {
            tracing::info!("Created tour {} ({})", tour, title);
            if let Some(path) = path {
                self.save_paths.lock().insert(tour.clone(), path);
            }
            self.transition(|navigation| navigation.start_tour(tour.clone()));
        }
        self.finish(result).await
    }

    /// Open a tour file, start it, and go to its first stop.
    pub async fn open_tour(&self, path: &Path, edit: bool) -> Result<TourId> {
        let tour = match self.client.open_tour(path, edit).await {
            Ok(tour) => tour,
            Err(err) => return self.finish(Err(err)).await,
        };
        tracing::info!("Opened {} as tour {}", path.display(), tour);
        self.transition(|navigation| navigation.start_tour(tour.clone()));

        if let Some(view) = self.resync().await? {
            if let Some(first) = view.first_stop() {
                let first = first.clone();
                self.transition(|navigation| {
                    if navigation.is_active(&tour) {
                        let _ = navigation.goto_stop(first);
                    }
                });
            }
        }
        Ok(tour)
    }

    /// Turn edit mode on or off for the active tour.
    pub async fn set_edit(&self, edit: bool) -> Result<()> {
        let tour = self.require_tour()?;
        let result = self.client.set_tour_edit(&tour, edit).await;
        self.finish(result).await
    }

    /// Retitle the active tour.
    pub async fn rename_tour(&self, title: &str) -> Result<()> {
        self.edit_tour(TourMetadata::default().with_title(title))
            .await
    }

    /// Replace the active tour's description.
    pub async fn edit_tour_description(&self, description: &str) -> Result<()> {
        self.edit_tour(TourMetadata::default().with_description(description))
            .await
    }

    async fn edit_tour(&self, metadata: TourMetadata) -> Result<()> {
        let tour = self.require_tour()?;
        let result = self.client.edit_tour_metadata(&tour, &metadata).await;
        self.finish(result).await
    }

    /// Stop tracking `tour` on the server. Leaves the tour if it was active.
    pub async fn forget_tour(&self, tour: &TourId) -> Result<()> {
        let result = self.client.forget_tour(tour).await;
        if result.is_ok() {
            self.leave(tour);
        }
        self.finish(result).await
    }

    /// Stop tracking `tour` and delete its file. Leaves the tour if it was active.
    pub async fn delete_tour(&self, tour: &TourId) -> Result<()> {
        let result = self.client.delete_tour(tour).await;
        if result.is_ok() {
            tracing::info!("Deleted tour {}", tour);
            self.leave(tour);
        }
        self.finish(result).await
    }

    fn leave(&self, tour: &TourId) {
        self.save_paths.lock().remove(tour);
        self.transition(|navigation| {
            if navigation.is_active(tour) {
                navigation.stop_tour();
            }
        });
    }

    /// Recompute stop locations of the active tour against `commit` (HEAD if `None`).
    pub async fn refresh_tour(&self, commit: Option<&str>) -> Result<()> {
        let tour = self.require_tour()?;
        let result = self.client.refresh_tour(&tour, commit).await;
        self.finish(result).await
    }

    /// Save the active tour.
    ///
    /// Without `path`, uses the path given to [`Session::new_tour`] if the
    /// tour has never been saved, and the tour's own path otherwise.
    pub async fn save(&self, path: Option<&Path>) -> Result<()> {
        let tour = self.require_tour()?;
        let remembered = self.save_paths.lock().get(&tour).cloned();
        let path = path.map(Path::to_path_buf).or(remembered);
        let result = self.client.save_tour(&tour, path.as_deref()).await;
        if result.is_ok() {
            self.save_paths.lock().remove(&tour);
        }
        self.finish(result).await
    }

    /// Save every tracked tour.
    pub async fn save_all(&self) -> Result<()> {
        let result = self.client.save_all().await;
        self.finish(result).await
    }

    /// Map a repository name to a local checkout.
    pub async fn map_repository(&self, name: &str, path: &Path) -> Result<()> {
        let result = self.client.index_repository(name, Some(path)).await;
        self.finish(result).await
    }

    /// Remove a repository mapping.
    pub async fn unmap_repository(&self, name: &str) -> Result<()> {
        let result = self.client.index_repository(name, None).await;
        self.finish(result).await
    }

    /// Add a stop at `path:line` to the active tour.
    pub async fn add_stop(&self, title: &str, path: &Path, line: usize) -> Result<StopId> {
        let tour = self.require_tour()?;
        let result = self.client.create_stop(&tour, title, path, line).await;
        self.finish(result).await
    }

    /// Rebind a stop of the active tour to `path:line`.
    pub async fn move_stop(&self, stop: &StopId, path: &Path, line: usize) -> Result<()> {
        let tour = self.require_tour()?;
        let result = self.client.move_stop(&tour, stop, path, line).await;
        self.finish(result).await
    }

    /// Move a stop one place towards the start.
    pub async fn move_stop_up(&self, stop: &StopId) -> Result<()> {
        self.reorder(stop, -1).await
    }

    /// Move a stop one place towards the end.
    pub async fn move_stop_down(&self, stop: &StopId) -> Result<()> {
        self.reorder(stop, 1).await
    }

    /// Shift a stop by `delta` places, clamped to the ends.
    pub async fn reorder(&self, stop: &StopId, delta: isize) -> Result<()> {
        let tour = self.require_tour()?;
        let result = self.client.reorder_stop(&tour, stop, delta).await;
        self.finish(result).await
    }

    /// Retitle a stop.
    pub async fn edit_stop_title(&self, stop: &StopId, title: &str) -> Result<()> {
        self.edit_stop(stop, StopMetadata::default().with_title(title))
            .await
    }

    /// Replace a stop's description.
    pub async fn edit_stop_description(&self, stop: &StopId, description: &str) -> Result<()> {
        self.edit_stop(stop, StopMetadata::default().with_description(description))
            .await
    }

    async fn edit_stop(&self, stop: &StopId, metadata: StopMetadata) -> Result<()> {
        let tour = self.require_tour()?;
        let result = self.client.edit_stop_metadata(&tour, stop, &metadata).await;
        self.finish(result).await
    }

    /// Link a stop to another tour, or to a stop in it.
    pub async fn link_stop(
        &self,
        stop: &StopId,
        other_tour: &TourId,
        other_stop: Option<&StopId>,
    ) -> Result<()> {
        let tour = self.require_tour()?;
        let result = self
            .client
            .link_stop(&tour, stop, other_tour, other_stop)
            .await;
        self.finish(result).await
    }

    /// Remove a link.
    pub async fn unlink_stop(
        &self,
        stop: &StopId,
        other_tour: &TourId,
        other_stop: Option<&StopId>,
    ) -> Result<()> {
        let tour = self.require_tour()?;
        let result = self
            .client
            .unlink_stop(&tour, stop, other_tour, other_stop)
            .await;
        self.finish(result).await
    }

    /// Delete a stop. If it was the active stop, resync clears it.
    pub async fn remove_stop(&self, stop: &StopId) -> Result<()> {
        let tour = self.require_tour()?;
        let result = self.client.remove_stop(&tour, stop).await;
        self.finish(result).await
    }

    /// Make `tour` the active tour.
    pub fn start_tour(&self, tour: TourId) {
        self.transition(|navigation| navigation.start_tour(tour));
    }

    /// Leave the active tour.
    pub fn stop_tour(&self) {
        self.transition(NavigationState::stop_tour);
    }

    /// Go to `stop` in the active tour.
    ///
    /// The stop is checked against a fresh view first; navigation only moves
    /// if the server still has it. The returned location is diff-adjusted.
    pub async fn goto_stop(&self, stop: &StopId) -> Result<StopVisit> {
        let tour = self.require_tour()?;
        let view = self
            .client
            .view_tour(&tour)
            .await
            .map_err(|e| self.fail_if_fatal(e))?;
        let title = view
            .stop_title(stop)
            .ok_or_else(|| SessionError::StopNotInTour(stop.clone()))?
            .to_string();

        let mut outcome = Ok(());
        self.transition(|navigation| {
            if navigation.is_active(&tour) {
                outcome = navigation.goto_stop(stop.clone());
            } else {
                outcome = Err(SessionError::NoActiveTour);
            }
        });
        outcome?;

        let location = self
            .client
            .locate_stop(&tour, stop, LocateMode::Adjusted)
            .await
            .map_err(|e| self.fail_if_fatal(e))?;
        Ok(StopVisit {
            stop: stop.clone(),
            title,
            location,
        })
    }

    /// Go to the next stop. `None` when there is none.
    pub async fn next(&self) -> Result<Option<StopVisit>> {
        self.step(Direction::Next).await
    }

    /// Go to the previous stop. `None` when there is none.
    pub async fn prev(&self) -> Result<Option<StopVisit>> {
        self.step(Direction::Prev).await
    }

    async fn step(&self, direction: Direction) -> Result<Option<StopVisit>> {
        let navigation = self.navigation();
        let next = navigation
            .step(&self.client, direction)
            .await
            .map_err(|e| self.fail_if_fatal(e))?;
        match next {
            Some(stop) => self.goto_stop(&stop).await.map(Some),
            None => Ok(None),
        }
    }

    /// End the session: leave the tour and tell observers.
    ///
    /// The shared client stays connected for other sessions.
    pub fn close(&self) {
        self.transition(NavigationState::stop_tour);
        self.save_paths.lock().clear();
        self.notify(&SessionEvent::Closed);
    }
}
