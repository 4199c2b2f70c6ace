//! JSON-RPC client for the tourist server.
//!
//! The server runs as a child process (`tourist serve`) and speaks
//! newline-delimited JSON-RPC 2.0 over its stdin/stdout. This crate provides:
//!
//! - [`Transport`] - Owns the child process and frames messages by line
//! - [`TouristClient`] - One typed async method per remote operation
//! - [`ClientError`] - Everything that can go wrong, with [`ClientError::is_fatal`]
//!   separating dead connections from ordinary server errors
//!
//! With the `mock` feature, [`mock::MockServer`] provides an in-process
//! server for tests.
//!
//! # Example
//!
//! ```ignore
//! use tourist_client::TouristClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tourist_client::ClientError> {
//!     let client = TouristClient::default();
//!     client.connect("tourist").await?;
//!     for (id, title) in client.list_tours().await? {
//!         println!("{id}: {title}");
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod protocol;

pub mod client;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod transport;

pub use client::{
    ClientOptions, TouristClient, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SLOW_REQUEST_TIMEOUT,
};
pub use error::ClientError;
pub use protocol::Method;
pub use transport::Transport;
