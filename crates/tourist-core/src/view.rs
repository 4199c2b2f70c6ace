//! Read-only projections of tours and stops.
//!
//! A view is produced fresh by every `view_tour` / `view_stop` call. Callers
//! must not keep a view around as a cache of stop order: any mutation on the
//! server (including one from another process) can invalidate it.

use crate::id::{StopId, TourId};
use serde::{Deserialize, Serialize};

/// A snapshot of a tour as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TourView {
    /// Tour title.
    pub title: String,
    /// Free-form description (markdown in practice).
    #[serde(default)]
    pub description: String,
    /// Stops in tour order, paired with their titles.
    #[serde(default)]
    pub stops: Vec<(StopId, String)>,
    /// Repositories the tour refers to, paired with the commit each is pinned at.
    #[serde(default)]
    pub repositories: Vec<(String, String)>,
    /// Whether the tour is open in edit mode.
    #[serde(default)]
    pub edit: bool,
}

impl TourView {
    /// Index of `stop` in the ordered stop list, matched by identity.
    pub fn position_of(&self, stop: &StopId) -> Option<usize> {
        self.stops.iter().position(|(id, _)| id == stop)
    }

    /// Whether `stop` is part of this tour.
    pub fn contains_stop(&self, stop: &StopId) -> bool {
        self.position_of(stop).is_some()
    }

    /// Title of `stop`, if it is part of this tour.
    pub fn stop_title(&self, stop: &StopId) -> Option<&str> {
        self.stops
            .iter()
            .find(|(id, _)| id == stop)
            .map(|(_, title)| title.as_str())
    }

    /// Ids of all stops, in order.
    pub fn stop_ids(&self) -> impl Iterator<Item = &StopId> {
        self.stops.iter().map(|(id, _)| id)
    }

    /// The first stop, if any.
    pub fn first_stop(&self) -> Option<&StopId> {
        self.stops.first().map(|(id, _)| id)
    }
}

/// A snapshot of one stop.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StopView {
    /// Stop title.
    pub title: String,
    /// Stop body.
    #[serde(default)]
    pub description: String,
    /// Name of the repository the stop lives in.
    #[serde(default)]
    pub repository: String,
    /// Outgoing links to other tours or stops.
    #[serde(default)]
    pub children: Vec<StopReference>,
}

/// A link from a stop to another tour, or to a stop within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReference {
    /// Target tour.
    pub tour_id: TourId,
    /// Target stop, when the link points inside the tour.
    #[serde(default)]
    pub stop_id: Option<StopId>,
    /// Title of the target tour, when the server has it loaded.
    #[serde(default)]
    pub tour_title: Option<String>,
    /// Title of the target stop, when the server has it loaded.
    #[serde(default)]
    pub stop_title: Option<String>,
}

impl StopReference {
    /// Human readable label, falling back to raw ids when titles are unknown.
    pub fn label(&self) -> String {
        let tour = self
            .tour_title
            .clone()
            .unwrap_or_else(|| self.tour_id.to_string());
        match (&self.stop_id, &self.stop_title) {
            (Some(_), Some(title)) => format!("{tour} > {title}"),
            (Some(id), None) => format!("{tour} > {id}"),
            (None, _) => tour,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> TourView {
        TourView {
            title: "T1".to_string(),
            stops: vec![
                (StopId::new("a"), "A".to_string()),
                (StopId::new("b"), "B".to_string()),
            ],
            ..TourView::default()
        }
    }

    #[test]
    fn test_position_by_identity() {
        let view = view();
        assert_eq!(view.position_of(&StopId::new("a")), Some(0));
        assert_eq!(view.position_of(&StopId::new("b")), Some(1));
        assert_eq!(view.position_of(&StopId::new("zzz")), None);
        assert_eq!(view.stop_title(&StopId::new("b")), Some("B"));
    }

    #[test]
    fn test_tour_view_wire_shape() {
        let json = r#"{
            "title": "Intro",
            "description": "Start here",
            "stops": [["s1", "main"]],
            "repositories": [["app", "deadbeef"]],
            "edit": false
        }"#;
        let view: TourView = serde_json::from_str(json).unwrap();
        assert_eq!(view.first_stop(), Some(&StopId::new("s1")));
        assert_eq!(view.repositories[0], ("app".to_string(), "deadbeef".to_string()));
        assert!(!view.edit);
    }

    #[test]
    fn test_stop_view_children_default_to_empty() {
        let view: StopView = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert!(view.children.is_empty());
        assert_eq!(view.repository, "");
    }

    #[test]
    fn test_reference_label() {
        let link = StopReference {
            tour_id: TourId::new("t2"),
            stop_id: Some(StopId::new("s9")),
            tour_title: Some("Other".to_string()),
            stop_title: None,
        };
        assert_eq!(link.label(), "Other > s9");

        let whole_tour = StopReference {
            tour_id: TourId::new("t2"),
            stop_id: None,
            tour_title: None,
            stop_title: None,
        };
        assert_eq!(whole_tour.label(), "t2");
    }
}
