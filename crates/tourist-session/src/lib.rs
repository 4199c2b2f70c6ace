//! Sessions on top of the tourist client.
//!
//! - [`NavigationState`] - Active tour and stop, stepped against fresh server views
//! - [`Session`] - Commands that follow the "one call, then resync" contract
//!   and notify observers
//! - [`Config`] - Binary path, timeouts, and tour directories
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tourist_client::TouristClient;
//! use tourist_session::{Session, SessionEvent};
//!
//! let client = Arc::new(TouristClient::default());
//! client.connect("tourist").await?;
//! let session = Session::new(Arc::clone(&client));
//! session.subscribe(|event: &SessionEvent| println!("{event:?}"));
//! session.open_tour("intro.tour".as_ref(), false).await?;
//! while let Some(visit) = session.next().await? {
//!     println!("{}", visit.title);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod navigation;
pub mod session;

pub use config::Config;
pub use error::{ConfigError, Result, SessionError};
pub use navigation::{adjacent_stop, Direction, NavigationState};
pub use session::{Session, SessionEvent, StopMarker, StopVisit, SubscriptionId};
