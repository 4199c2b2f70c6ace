//! Core types for tourist clients.
//!
//! This crate provides the types shared by everything that talks to a
//! `tourist serve` process:
//!
//! - [`TourId`] / [`StopId`] - Opaque identifiers assigned by the server
//! - [`TourView`] / [`StopView`] - Read-only projections returned by `view_*` calls
//! - [`TourMetadata`] / [`StopMetadata`] - Partial metadata edits
//! - [`Location`] / [`LocateMode`] - Where a stop currently lives in the working tree
//! - [`ServerError`] / [`ServerErrorCode`] - Domain errors reported by the server
//!
//! None of these types perform I/O. They are produced fresh from server
//! responses and are never patched in place by the client.
//!
//! # Example
//!
//! ```
//! use tourist_core::{StopId, TourView};
//!
//! let view: TourView = serde_json::from_str(
//!     r#"{"title":"T1","description":"","stops":[["a","A"],["b","B"]],"repositories":[],"edit":true}"#,
//! ).unwrap();
//!
//! assert_eq!(view.position_of(&StopId::new("b")), Some(1));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod location;
pub mod metadata;
pub mod view;

pub use error::{ServerError, ServerErrorCode};
pub use id::{StopId, TourId};
pub use location::{LocateMode, Location};
pub use metadata::{StopMetadata, TourMetadata};
pub use view::{StopReference, StopView, TourView};
