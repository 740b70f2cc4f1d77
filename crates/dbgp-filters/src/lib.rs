//! Log-point templates and file/exception glob filters.
//!
//! Two independent, line/pattern-keyed lookups the session manager
//! consults on every engine stop: [`log_points`] resolves a message
//! template at the current location, and [`glob`] answers file- and
//! exception-name pattern questions for `skip_files`, `ignore`, and
//! `ignore_exceptions`.

#![warn(missing_docs)]

pub mod glob;
pub mod log_points;

pub use glob::{is_positive_match_in_globs, matches_any};
pub use log_points::{LogPointError, LogPointStore};

/// `should_ignore_exception(name, patterns)`: true iff `name` matches any
/// of `patterns` once each is converted to an anchored glob-style regex.
#[must_use]
pub fn should_ignore_exception(name: &str, patterns: &[String]) -> bool {
    matches_any(name, patterns)
}
