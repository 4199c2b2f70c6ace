//! Partial metadata edits for tours and stops.
//!
//! Only fields that are `Some` are sent, and the server only touches those.

use serde::{Deserialize, Serialize};

/// Edit to a tour's title and/or description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TourMetadata {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Edit to a stop's title and/or description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StopMetadata {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

macro_rules! metadata_builders {
    ($name:ident) => {
        impl $name {
            /// Set the title.
            pub fn with_title(mut self, title: impl Into<String>) -> Self {
                self.title = Some(title.into());
                self
            }

            /// Set the description.
            pub fn with_description(mut self, description: impl Into<String>) -> Self {
                self.description = Some(description.into());
                self
            }

            /// True when the edit would change nothing.
            pub const fn is_empty(&self) -> bool {
                self.title.is_none() && self.description.is_none()
            }
        }
    };
}

metadata_builders!(TourMetadata);
metadata_builders!(StopMetadata);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_provided_fields_are_sent() {
        let edit = StopMetadata::default().with_title("New");
        assert_eq!(serde_json::to_string(&edit).unwrap(), r#"{"title":"New"}"#);

        let edit = TourMetadata::default().with_description("body");
        assert_eq!(
            serde_json::to_string(&edit).unwrap(),
            r#"{"description":"body"}"#
        );
    }

    #[test]
    fn test_empty_edit() {
        assert!(TourMetadata::default().is_empty());
        assert_eq!(serde_json::to_string(&TourMetadata::default()).unwrap(), "{}");
        assert!(!StopMetadata::default().with_title("x").is_empty());
    }
}
