//! DAP-facing shapes the session manager produces and consumes. These are
//! plain, serializable projections — the actual DAP transport (request
//! framing, sequence numbers, marshaling) is out of scope here and is
//! whatever a caller plugs into [`crate::dispatcher`].

use serde::{Deserialize, Serialize};

use dbgp_connection::ConnectionId;

/// One DBGp connection, presented to the UI as a DAP "thread".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub id: ConnectionId,
    pub name: String,
}

/// Why execution stopped, per the DAP `stopped` event's `reason` field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoppedReason {
    Step,
    Breakpoint,
    Exception,
    Pause,
    Entry,
}

/// A source location, DAP's `Source` shape. `source_reference` is set
/// (instead of `path`) for engine-virtual sources (`dbgp:` scheme).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<u64>,
}

/// One DAP stack frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackFrameInfo {
    /// Globally unique across the whole adapter, not just this connection.
    pub id: u64,
    pub name: String,
    pub source: SourceRef,
    pub line: u32,
    pub column: u32,
}

/// One DAP `Scope` (e.g. `Locals`, `Superglobals`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScopeInfo {
    pub name: String,
    pub variables_reference: u64,
    pub expensive: bool,
}

/// One DAP `Variable`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariableInfo {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    pub variables_reference: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub named_variables: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_variables: Option<u64>,
}

/// A DAP `Breakpoint` acknowledgement, emitted whenever the reconciler
/// reports a breakpoint's verification status changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointInfo {
    pub id: u64,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Output category, DAP's `OutputEvent.category`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputCategory {
    Stdout,
    Stderr,
    Console,
}

/// Everything the session manager fans out to the DAP-facing edge. A real
/// transport turns each of these into the matching DAP event/response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionEvent {
    ThreadStarted { thread_id: ConnectionId },
    ThreadExited { thread_id: ConnectionId },
    Stopped { thread_id: ConnectionId, reason: StoppedReason, description: Option<String> },
    Continued { thread_id: ConnectionId },
    Output { category: OutputCategory, output: String },
    BreakpointChanged { breakpoint: BreakpointInfo },
    Terminated,
}
