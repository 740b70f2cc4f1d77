//! The UI-side authoritative breakpoint set (C5): holds the most recent
//! snapshot the UI has asked for and emits add/remove deltas to every
//! subscribed per-connection reconciler.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::model::{Breakpoint, HitGate, parse_hit_condition};

/// A process-wide unique breakpoint id, monotonic from 1.
pub type BreakpointId = u64;

/// A delta broadcast to subscribed reconcilers.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// Breakpoints that should be added, keyed by id.
    Add(HashMap<BreakpointId, Breakpoint>),
    /// Breakpoint ids that should be removed.
    Remove(Vec<BreakpointId>),
    /// Drain queued deltas now (emitted by [`BreakpointManager::process`]).
    Drain,
}

/// One entry of a `set_line_breakpoints` (or exception/function) result,
/// in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct SetBreakpointResult {
    /// The assigned id.
    pub id: BreakpointId,
    /// Whether this entry is considered verified already. True
    /// immediately when the spec round-tripped cleanly and no adapter is
    /// subscribed (nothing will ever verify it later); otherwise false
    /// until a connection's reconciler reports back.
    pub verified: bool,
    /// The requested line (0 for non-line breakpoint kinds).
    pub line: u32,
    /// A human-readable message, present when `verified` is false due to
    /// a parse failure.
    pub message: Option<String>,
}

/// A line-breakpoint request: a location plus an optional condition and
/// hit-count gate string (parsed internally; parse failures are reported
/// per-entry rather than failing the whole call).
#[derive(Debug, Clone)]
pub struct LineBreakpointSpec {
    /// 1-based line number.
    pub line: u32,
    /// An optional boolean expression; present iff this is a conditional
    /// breakpoint rather than a plain line breakpoint.
    pub condition: Option<String>,
    /// The raw (unparsed) `hitCondition` string, if any.
    pub hit_condition: Option<String>,
}

struct State {
    next_id: BreakpointId,
    line: HashMap<String, HashMap<BreakpointId, Breakpoint>>,
    exception: HashMap<BreakpointId, Breakpoint>,
    call: HashMap<BreakpointId, Breakpoint>,
    subscribers: Vec<mpsc::UnboundedSender<ManagerEvent>>,
}

impl State {
    fn new() -> Self {
        Self { next_id: 1, line: HashMap::new(), exception: HashMap::new(), call: HashMap::new(), subscribers: Vec::new() }
    }

    fn fresh_id(&mut self) -> BreakpointId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn snapshot(&self) -> Vec<(BreakpointId, Breakpoint)> {
        self.line
            .values()
            .flat_map(|m| m.iter())
            .chain(self.exception.iter())
            .chain(self.call.iter())
            .map(|(id, bp)| (*id, bp.clone()))
            .collect()
    }

    fn broadcast(&mut self, event: ManagerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Holds the authoritative UI-side breakpoint set and fans out add/remove
/// deltas to subscribed per-connection reconcilers.
pub struct BreakpointManager {
    state: Mutex<State>,
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(State::new()) }
    }

    /// Subscribe a new per-connection reconciler: returns the current
    /// snapshot and a receiver for future deltas, registered atomically so
    /// no event between the snapshot and the subscription is missed.
    pub fn subscribe(&self) -> (Vec<(BreakpointId, Breakpoint)>, mpsc::UnboundedReceiver<ManagerEvent>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        (state.snapshot(), rx)
    }

    /// Snapshot of every currently held breakpoint, for newly-arrived adapters.
    #[must_use]
    pub fn all(&self) -> Vec<(BreakpointId, Breakpoint)> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).snapshot()
    }

    /// Broadcast a "drain queued deltas" signal to every subscriber.
    pub fn process(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.broadcast(ManagerEvent::Drain);
    }

    /// Replace the entire line-breakpoint set for `source`. Every
    /// previously held id for this source is scheduled for removal; every
    /// new spec gets a fresh id and is scheduled for addition. Returns the
    /// per-entry results in request order.
    pub fn set_line_breakpoints(
        &self,
        source: &str,
        file_uri: &str,
        specs: Vec<LineBreakpointSpec>,
    ) -> Vec<SetBreakpointResult> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let old_ids: Vec<BreakpointId> = state.line.remove(source).map(|m| m.into_keys().collect()).unwrap_or_default();
        let no_subscribers = state.subscribers.is_empty();

        let mut new_map = HashMap::with_capacity(specs.len());
        let mut results = Vec::with_capacity(specs.len());

        for spec in specs {
            let id = state.fresh_id();
            let (hit, hit_error) = match spec.hit_condition.as_deref() {
                None => (None, None),
                Some(raw) => match parse_hit_condition(raw) {
                    Ok((condition, value)) => (Some(HitGate { condition, value }), None),
                    Err(message) => (None, Some(message)),
                },
            };

            let breakpoint = match spec.condition {
                Some(expression) => {
                    Breakpoint::Conditional { expression, file_uri: file_uri.to_string(), line: spec.line, hit }
                }
                None => Breakpoint::Line { file_uri: file_uri.to_string(), line: spec.line, hit },
            };

            let verified = hit_error.is_none() || no_subscribers;
            results.push(SetBreakpointResult { id, verified, line: spec.line, message: hit_error });
            new_map.insert(id, breakpoint);
        }

        if !new_map.is_empty() {
            state.line.insert(source.to_string(), new_map.clone());
        }

        debug!(source, added = new_map.len(), removed = old_ids.len(), "replaced line breakpoints");
        state.broadcast(ManagerEvent::Add(new_map));
        state.broadcast(ManagerEvent::Remove(old_ids));

        results
    }

    /// Atomically replace the entire exception-breakpoint set.
    pub fn set_exception_breakpoints(&self, patterns: Vec<String>) -> Vec<SetBreakpointResult> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let old_ids: Vec<BreakpointId> = state.exception.keys().copied().collect();
        state.exception.clear();

        let mut new_map = HashMap::with_capacity(patterns.len());
        let mut results = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let id = state.fresh_id();
            new_map.insert(id, Breakpoint::Exception { class_name_pattern: pattern });
            results.push(SetBreakpointResult { id, verified: true, line: 0, message: None });
        }
        state.exception = new_map.clone();

        state.broadcast(ManagerEvent::Add(new_map));
        state.broadcast(ManagerEvent::Remove(old_ids));
        results
    }

    /// Atomically replace the entire function/call-breakpoint set.
    pub fn set_function_breakpoints(&self, specs: Vec<(String, Option<String>)>) -> Vec<SetBreakpointResult> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let old_ids: Vec<BreakpointId> = state.call.keys().copied().collect();
        state.call.clear();

        let mut new_map = HashMap::with_capacity(specs.len());
        let mut results = Vec::with_capacity(specs.len());
        for (function_name, condition) in specs {
            let id = state.fresh_id();
            new_map.insert(id, Breakpoint::Call { function_name, condition, hit: None });
            results.push(SetBreakpointResult { id, verified: true, line: 0, message: None });
        }
        state.call = new_map.clone();

        state.broadcast(ManagerEvent::Add(new_map));
        state.broadcast(ManagerEvent::Remove(old_ids));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;

    fn spec(line: u32) -> LineBreakpointSpec {
        LineBreakpointSpec { line, condition: None, hit_condition: None }
    }

    #[test]
    fn set_line_breakpoints_assigns_ids_in_order() {
        let manager = BreakpointManager::new();
        let results = manager.set_line_breakpoints("a.php", "file:///a.php", vec![spec(1), spec(2), spec(3)]);
        let ids: Vec<_> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        let lines: Vec<_> = results.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn verified_true_with_no_subscribers() {
        let manager = BreakpointManager::new();
        let results = manager.set_line_breakpoints("a.php", "file:///a.php", vec![spec(1)]);
        assert!(results[0].verified);
    }

    #[test]
    fn verified_false_with_subscriber_until_engine_confirms() {
        let manager = BreakpointManager::new();
        let (_, _rx) = manager.subscribe();
        let results = manager.set_line_breakpoints("a.php", "file:///a.php", vec![spec(1)]);
        assert!(!results[0].verified);
    }

    #[test]
    fn invalid_hit_condition_marks_only_that_entry() {
        let manager = BreakpointManager::new();
        let (_, _rx) = manager.subscribe();
        let mut bad = spec(1);
        bad.hit_condition = Some("garbage".to_string());
        let results = manager.set_line_breakpoints("a.php", "file:///a.php", vec![bad, spec(2)]);
        assert!(!results[0].verified);
        assert!(results[0].message.is_some());
        assert!(!results[1].verified);
        assert!(results[1].message.is_none());
    }

    #[test]
    fn replace_semantics_clears_previous_set_for_source() {
        let manager = BreakpointManager::new();
        manager.set_line_breakpoints("a.php", "file:///a.php", vec![spec(1), spec(2)]);
        manager.set_line_breakpoints("a.php", "file:///a.php", vec![spec(5)]);
        let snapshot = manager.all();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1.location(), Some(("file:///a.php", 5)));
    }

    #[test]
    fn other_sources_are_unaffected_by_replace() {
        let manager = BreakpointManager::new();
        manager.set_line_breakpoints("a.php", "file:///a.php", vec![spec(1)]);
        manager.set_line_breakpoints("b.php", "file:///b.php", vec![spec(2)]);
        manager.set_line_breakpoints("a.php", "file:///a.php", vec![]);
        assert_eq!(manager.all().len(), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_add_then_remove_in_order() {
        let manager = BreakpointManager::new();
        manager.set_line_breakpoints("a.php", "file:///a.php", vec![spec(1)]);
        let (snapshot, mut rx) = manager.subscribe();
        assert_eq!(snapshot.len(), 1);

        manager.set_line_breakpoints("a.php", "file:///a.php", vec![spec(9)]);

        let first = must(rx.recv().await.ok_or("expected an Add event"));
        assert!(matches!(first, ManagerEvent::Add(_)));
        let second = must(rx.recv().await.ok_or("expected a Remove event"));
        assert!(matches!(second, ManagerEvent::Remove(_)));
    }

    #[tokio::test]
    async fn process_broadcasts_drain() {
        let manager = BreakpointManager::new();
        let (_, mut rx) = manager.subscribe();
        manager.process();
        let event = must(rx.recv().await.ok_or("expected a Drain event"));
        assert!(matches!(event, ManagerEvent::Drain));
    }

    #[test]
    fn exception_breakpoints_replace_atomically() {
        let manager = BreakpointManager::new();
        manager.set_exception_breakpoints(vec!["Foo".to_string(), "Bar".to_string()]);
        assert_eq!(manager.all().len(), 2);
        manager.set_exception_breakpoints(vec!["Baz".to_string()]);
        assert_eq!(manager.all().len(), 1);
    }

    #[test]
    fn function_breakpoints_replace_atomically() {
        let manager = BreakpointManager::new();
        manager.set_function_breakpoints(vec![("foo".to_string(), None)]);
        assert_eq!(manager.all().len(), 1);
        manager.set_function_breakpoints(vec![("bar".to_string(), Some("$x > 0".to_string())), ("baz".to_string(), None)]);
        assert_eq!(manager.all().len(), 2);
    }
}
