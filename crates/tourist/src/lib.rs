//! Command-line host for tourist tours.
//!
//! - `tourist-shell`: an interactive shell that starts `tourist serve`, opens
//!   tours, and walks through their stops
//!
//! # Example Usage
//!
//! ```bash
//! tourist-shell intro.tour
//! tourist-shell --binary ~/bin/tourist --timeout 60
//! tourist-shell --generate-completions zsh > _tourist-shell
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cmd;
