//! Where the user is in a tour.
//!
//! The state holds ids only. Stop order belongs to the server and changes
//! under us (reorders, removals, other clients), so stepping always asks
//! the server for a fresh [`TourView`] and never looks at a cached list.

use crate::error::{Result, SessionError};
use tourist_client::{ClientError, TouristClient};
use tourist_core::{ServerErrorCode, StopId, TourId, TourView};

/// Active tour and, inside it, the active stop.
///
/// A stop can only be active inside an active tour; the enum makes the
/// other combination unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NavigationState {
    /// Nothing is being toured.
    #[default]
    NoTour,
    /// A tour is active.
    TourActive {
        /// The active tour.
        tour: TourId,
        /// The active stop, if the user has gone to one.
        stop: Option<StopId>,
    },
}

/// Step direction for [`adjacent_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards the end of the tour.
    Next,
    /// Towards the start of the tour.
    Prev,
}

impl NavigationState {
    /// The active tour.
    pub const fn tour(&self) -> Option<&TourId> {
        match self {
            Self::NoTour => None,
            Self::TourActive { tour, .. } => Some(tour),
        }
    }

    /// The active stop.
    pub const fn stop(&self) -> Option<&StopId> {
        match self {
            Self::NoTour => None,
            Self::TourActive { stop, .. } => stop.as_ref(),
        }
    }

    /// Whether `tour` is the active tour.
    pub fn is_active(&self, tour: &TourId) -> bool {
        self.tour() == Some(tour)
    }

    /// Make `tour` active with no stop selected. Allowed from any state.
    pub fn start_tour(&mut self, tour: TourId) {
        *self = Self::TourActive { tour, stop: None };
    }

    /// Leave the tour. Clears the stop with it.
    pub fn stop_tour(&mut self) {
        *self = Self::NoTour;
    }

    /// Select `stop` inside the active tour.
    ///
    /// The state is untouched on failure.
    pub fn goto_stop(&mut self, stop: StopId) -> Result<()> {
        match self {
            Self::NoTour => Err(SessionError::NoActiveTour),
            Self::TourActive { stop: current, .. } => {
                *current = Some(stop);
                Ok(())
            }
        }
    }

    /// Keep the tour, drop the stop.
    pub fn clear_stop(&mut self) {
        if let Self::TourActive { stop, .. } = self {
            *stop = None;
        }
    }

    /// The stop after the active one, from a fresh view of the tour.
    pub async fn next_stop(&self, client: &TouristClient) -> Result<Option<StopId>, ClientError> {
        self.step(client, Direction::Next).await
    }

    /// The stop before the active one, from a fresh view of the tour.
    pub async fn prev_stop(&self, client: &TouristClient) -> Result<Option<StopId>, ClientError> {
        self.step(client, Direction::Prev).await
    }

    /// `None` without a request when there is no active tour or stop, and
    /// `None` when the tour itself is gone from the server. Never changes
    /// the state; callers apply [`NavigationState::goto_stop`] to the result.
    pub async fn step(
        &self,
        client: &TouristClient,
        direction: Direction,
    ) -> Result<Option<StopId>, ClientError> {
        let (Some(tour), Some(stop)) = (self.tour(), self.stop()) else {
            return Ok(None);
        };
        match client.view_tour(tour).await {
            Ok(view) => Ok(adjacent_stop(&view, stop, direction)),
            Err(err) if err.server_code() == Some(ServerErrorCode::NoTourWithId) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// The stop next to `stop` in `view`, matched by identity.
///
/// `None` at either end of the list and when `stop` is not in it.
pub fn adjacent_stop(view: &TourView, stop: &StopId, direction: Direction) -> Option<StopId> {
    let index = view.position_of(stop)?;
    let target = match direction {
        Direction::Next => index.checked_add(1)?,
        Direction::Prev => index.checked_sub(1)?,
    };
    view.stops.get(target).map(|(id, _)| id.clone())
}
