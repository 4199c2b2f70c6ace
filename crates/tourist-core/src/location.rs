//! Stop locations in the working tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A file position reported by `locate_stop`.
///
/// On the wire this is a two element array `[path, line]`. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(PathBuf, usize)", into = "(PathBuf, usize)")]
pub struct Location {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// 1-based line number.
    pub line: usize,
}

impl Location {
    /// Create a new location.
    pub fn new(path: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }
}

impl From<(PathBuf, usize)> for Location {
    fn from((path, line): (PathBuf, usize)) -> Self {
        Self { path, line }
    }
}

impl From<Location> for (PathBuf, usize) {
    fn from(location: Location) -> Self {
        (location.path, location.line)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// How `locate_stop` should resolve a stop.
///
/// The two modes are not interchangeable, so every call site picks one:
///
/// - [`LocateMode::Adjusted`] asks the server to carry the recorded line
///   through the repository diff. Use it for anything shown to the user
///   as "where the stop is now" (jumping to a stop, listings).
/// - [`LocateMode::Naive`] returns the recorded location untouched. Use it
///   for placement that must stay stable while the file has uncommitted
///   edits (stop markers, breakpoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LocateMode {
    /// Raw recorded location.
    Naive,
    /// Diff-adjusted location.
    #[default]
    Adjusted,
}

impl LocateMode {
    /// The value of the `naive` flag sent on the wire.
    pub const fn is_naive(self) -> bool {
        matches!(self, Self::Naive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_wire_form_is_pair() {
        let loc: Location = serde_json::from_str(r#"["/repo/file.py", 10]"#).unwrap();
        assert_eq!(loc, Location::new("/repo/file.py", 10));
        assert_eq!(
            serde_json::to_string(&loc).unwrap(),
            r#"["/repo/file.py",10]"#
        );
    }

    #[test]
    fn test_absent_location_is_null() {
        let loc: Option<Location> = serde_json::from_str("null").unwrap();
        assert!(loc.is_none());
    }

    #[test]
    fn test_naive_flag() {
        assert!(LocateMode::Naive.is_naive());
        assert!(!LocateMode::Adjusted.is_naive());
    }
}
