//! Per-file-per-line log-point templates, resolved lazily at stop time.

use std::collections::HashMap;
use std::future::Future;

use thiserror::Error;

/// Errors raised while resolving a log point.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogPointError {
    /// No log point is registered at this file/line.
    #[error("no log point at {file_uri}:{line}")]
    NoSuchLogPoint {
        /// The queried file URI.
        file_uri: String,
        /// The queried line.
        line: u32,
    },
}

/// `Map<(file_uri_case_folded, line), template>`.
///
/// Case-folding of the key is delegated to [`dbgp_uri::case_fold_key`] so
/// Windows and POSIX URIs key consistently with the rest of the adapter.
#[derive(Debug, Default)]
pub struct LogPointStore {
    templates: HashMap<(String, u32), String>,
}

impl LogPointStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(file_uri: &str, line: u32) -> (String, u32) {
        (dbgp_uri::case_fold_key(file_uri), line)
    }

    /// Register (or replace) the log-point template at `file_uri`:`line`.
    pub fn set(&mut self, file_uri: &str, line: u32, template: String) {
        self.templates.insert(Self::key(file_uri, line), template);
    }

    /// Remove the log point at `file_uri`:`line`, if any.
    pub fn remove(&mut self, file_uri: &str, line: u32) {
        self.templates.remove(&Self::key(file_uri, line));
    }

    /// True iff a log point is registered at `file_uri`:`line`.
    #[must_use]
    pub fn contains(&self, file_uri: &str, line: u32) -> bool {
        self.templates.contains_key(&Self::key(file_uri, line))
    }

    /// Resolve the template at `file_uri`:`line`, replacing each `{expr}`
    /// occurrence with the result of awaiting `evaluator(expr)`. An empty
    /// `{}` placeholder produces empty output without invoking the
    /// evaluator. The evaluator is executor-agnostic: any `Future` works,
    /// so this crate carries no async-runtime dependency of its own.
    pub async fn resolve<F, Fut>(
        &self,
        file_uri: &str,
        line: u32,
        mut evaluator: F,
    ) -> Result<String, LogPointError>
    where
        F: FnMut(&str) -> Fut,
        Fut: Future<Output = String>,
    {
        let key = Self::key(file_uri, line);
        let template = self.templates.get(&key).ok_or_else(|| LogPointError::NoSuchLogPoint {
            file_uri: file_uri.to_string(),
            line,
        })?;

        let mut out = String::new();
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];
            match after_open.find('}') {
                Some(close) => {
                    let expr = &after_open[..close];
                    if !expr.is_empty() {
                        out.push_str(&evaluator(expr).await);
                    }
                    rest = &after_open[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                    break;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::{must, must_err};

    async fn echo_evaluator(expr: &str) -> String {
        format!("<{expr}>")
    }

    #[tokio::test]
    async fn resolves_single_placeholder() {
        let mut store = LogPointStore::new();
        store.set("file:///a.php", 10, "x = {x}".to_string());
        let resolved = must(store.resolve("file:///a.php", 10, echo_evaluator).await);
        assert_eq!(resolved, "x = <x>");
    }

    #[tokio::test]
    async fn resolves_multiple_placeholders_in_order() {
        let mut store = LogPointStore::new();
        store.set("file:///a.php", 10, "{a} and {b}".to_string());
        let resolved = must(store.resolve("file:///a.php", 10, echo_evaluator).await);
        assert_eq!(resolved, "<a> and <b>");
    }

    #[tokio::test]
    async fn empty_braces_produce_empty_output() {
        let mut store = LogPointStore::new();
        store.set("file:///a.php", 10, "before {} after".to_string());
        let resolved = must(store.resolve("file:///a.php", 10, echo_evaluator).await);
        assert_eq!(resolved, "before  after");
    }

    #[tokio::test]
    async fn missing_log_point_is_an_error() {
        let store = LogPointStore::new();
        let err = must_err(store.resolve("file:///a.php", 10, echo_evaluator).await);
        assert_eq!(
            err,
            LogPointError::NoSuchLogPoint { file_uri: "file:///a.php".to_string(), line: 10 }
        );
    }

    #[tokio::test]
    async fn windows_uri_is_case_folded_for_lookup() {
        let mut store = LogPointStore::new();
        store.set("file:///C:/App/Index.php", 3, "hit".to_string());
        assert!(store.contains("file:///c:/app/index.php", 3));
    }

    #[tokio::test]
    async fn posix_uri_is_case_sensitive() {
        let mut store = LogPointStore::new();
        store.set("file:///srv/App/Index.php", 3, "hit".to_string());
        assert!(!store.contains("file:///srv/app/index.php", 3));
    }
}
