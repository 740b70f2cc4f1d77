//! Thin mapping from DAP request shapes to [`SessionManager`] calls: holds
//! the reference-id bookkeeping (`variablesReference`/`frameId`/
//! `sourceReference`) a DAP transport needs but the session layer itself
//! has no reason to track. Request marshaling and sequence numbers are a
//! transport concern and live outside this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dbgp_connection::ConnectionId;
use dbgp_uri::PathMapping;
use dbgp_wire::DbgpError;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::configuration::Configuration;
use crate::protocol::{
    BreakpointInfo, ScopeInfo, SessionEvent, SourceRef, StackFrameInfo, ThreadInfo, VariableInfo,
};
use crate::session::{EvaluateContext, SessionManager};

/// One `setBreakpoints` line entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub hit_condition: Option<String>,
    #[serde(default)]
    pub log_message: Option<String>,
}

/// `setBreakpoints` request body: a client-side file path plus its
/// full, replacing set of line breakpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub path: String,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpoint>,
}

/// One `setFunctionBreakpoints` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionBreakpoint {
    pub name: String,
    #[serde(default)]
    pub condition: Option<String>,
}

/// A resolved `variablesReference`: which connection, scope depth, and
/// (optionally) which already-fetched property this page of children
/// belongs to.
#[derive(Debug, Clone)]
struct VariablesRef {
    thread_id: ConnectionId,
    depth: u32,
    context_id: u32,
    parent_name: Option<String>,
}

/// A resolved `frameId`: which connection and which stack depth.
#[derive(Debug, Clone, Copy)]
struct FrameRef {
    thread_id: ConnectionId,
    depth: u32,
}

/// Routes DAP requests to a [`SessionManager`], translating DBGp-shaped
/// replies into DAP-shaped ones and minting the opaque reference ids a
/// `variables`/`stackTrace`/`evaluate` round trip needs to stay lazy.
pub struct Dispatcher {
    session: Arc<SessionManager>,
    path_mapping: PathMapping,
    variables_refs: Mutex<HashMap<u64, VariablesRef>>,
    next_variables_ref: AtomicU64,
    frame_refs: Mutex<HashMap<u64, FrameRef>>,
    next_frame_ref: AtomicU64,
}

impl Dispatcher {
    /// Build a dispatcher over a fresh [`SessionManager`] for `config`,
    /// returning it alongside the session's event receiver.
    #[must_use]
    pub fn new(config: Configuration) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
        let path_mapping = config.path_mapping();
        let (session, events) = SessionManager::new(config);
        let dispatcher = Arc::new(Self {
            session,
            path_mapping,
            variables_refs: Mutex::new(HashMap::new()),
            next_variables_ref: AtomicU64::new(1),
            frame_refs: Mutex::new(HashMap::new()),
            next_frame_ref: AtomicU64::new(1),
        });
        (dispatcher, events)
    }

    /// The underlying session manager, for `accept`/`disconnect_all` and
    /// anything else a transport drives directly.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// `initialize`/`configurationDone`: no further per-request data, so
    /// this is a direct passthrough.
    pub fn configuration_done(&self) {
        self.session.configuration_done();
    }

    /// `setBreakpoints`: replaces the entire line-breakpoint set for the
    /// source named in `args.path`, mapping the client path to the
    /// engine's URI space first.
    pub async fn set_breakpoints(&self, args: SetBreakpointsArguments) -> Vec<BreakpointInfo> {
        let file_uri = self.path_mapping.to_server(&args.path);
        let specs = args
            .breakpoints
            .iter()
            .map(|b| dbgp_breakpoint::LineBreakpointSpec {
                line: b.line,
                condition: b.condition.clone(),
                hit_condition: b.hit_condition.clone(),
            })
            .collect();
        let results = self.session.breakpoints().set_line_breakpoints(&args.path, &file_uri, specs);

        for source in &args.breakpoints {
            if let Some(template) = &source.log_message {
                self.session.set_log_point(&file_uri, source.line, template.clone()).await;
            }
        }

        results
            .into_iter()
            .map(|r| BreakpointInfo { id: r.id, verified: r.verified, line: Some(r.line), message: r.message })
            .collect()
    }

    /// `setExceptionBreakpoints`: `filters` are engine class-name glob
    /// patterns (e.g. `*Exception`), not DAP's predefined filter ids —
    /// the caller's UI surfaces whatever patterns it lets the user type.
    pub fn set_exception_breakpoints(&self, filters: Vec<String>) -> Vec<BreakpointInfo> {
        self.session
            .breakpoints()
            .set_exception_breakpoints(filters)
            .into_iter()
            .map(|r| BreakpointInfo { id: r.id, verified: r.verified, line: None, message: r.message })
            .collect()
    }

    /// `setFunctionBreakpoints`.
    pub fn set_function_breakpoints(&self, breakpoints: Vec<FunctionBreakpoint>) -> Vec<BreakpointInfo> {
        let specs = breakpoints.into_iter().map(|b| (b.name, b.condition)).collect();
        self.session
            .breakpoints()
            .set_function_breakpoints(specs)
            .into_iter()
            .map(|r| BreakpointInfo { id: r.id, verified: r.verified, line: None, message: r.message })
            .collect()
    }

    /// `threads`: one entry per live DBGp connection.
    pub async fn threads(&self) -> Vec<ThreadInfo> {
        self.session
            .connection_ids()
            .await
            .into_iter()
            .map(|id| ThreadInfo { id, name: format!("Xdebug connection {id}") })
            .collect()
    }

    /// `continue`.
    pub async fn continue_(&self, thread_id: ConnectionId) -> Result<(), DbgpError> {
        self.session.control(thread_id, crate::session::ControlOp::Continue).await
    }

    /// `next` (step over).
    pub async fn next(&self, thread_id: ConnectionId) -> Result<(), DbgpError> {
        self.session.control(thread_id, crate::session::ControlOp::Next).await
    }

    /// `stepIn`.
    pub async fn step_in(&self, thread_id: ConnectionId) -> Result<(), DbgpError> {
        self.session.control(thread_id, crate::session::ControlOp::StepIn).await
    }

    /// `stepOut`.
    pub async fn step_out(&self, thread_id: ConnectionId) -> Result<(), DbgpError> {
        self.session.control(thread_id, crate::session::ControlOp::StepOut).await
    }

    /// `pause`.
    pub async fn pause(&self, thread_id: ConnectionId) -> Result<(), DbgpError> {
        self.session.pause(thread_id).await
    }

    /// `disconnect` for one connection.
    pub async fn disconnect(&self, thread_id: ConnectionId) {
        self.session.disconnect(thread_id).await;
    }

    /// `disconnect` with no `restart`: tears down every connection.
    pub async fn disconnect_all(&self) {
        self.session.disconnect_all().await;
    }

    /// `stackTrace`: allocates a fresh `frameId` per frame so `scopes`/
    /// `evaluate` can later recover which connection and depth it names.
    pub async fn stack_trace(&self, thread_id: ConnectionId) -> Result<Vec<StackFrameInfo>, DbgpError> {
        let frames = self.session.stack_frames(thread_id).await?;
        let mut result = Vec::with_capacity(frames.len());
        for frame in frames {
            let frame_id = self.alloc_frame_ref(FrameRef { thread_id, depth: frame.level }).await;
            let source = match frame.frame_type {
                dbgp_model::FrameType::File => {
                    SourceRef { name: None, path: self.path_mapping.to_client(&frame.file_uri), source_reference: None }
                }
                dbgp_model::FrameType::Eval => {
                    let reference = self.session.source_reference_for(&frame.file_uri).await;
                    SourceRef {
                        name: Some("eval'd code".to_string()),
                        path: frame.file_uri.clone(),
                        source_reference: Some(reference),
                    }
                }
            };
            result.push(StackFrameInfo { id: frame_id, name: frame.name, source, line: frame.line, column: 1 });
        }
        Ok(result)
    }

    /// `scopes`: one entry per DBGp context at `frame_id`'s depth.
    pub async fn scopes(&self, frame_id: u64) -> Result<Vec<ScopeInfo>, DbgpError> {
        let frame = self.frame_ref(frame_id).await?;
        let contexts = self.session.context_names(frame.thread_id, frame.depth).await?;
        let mut scopes = Vec::with_capacity(contexts.len());
        for context in contexts {
            let expensive = context.name.eq_ignore_ascii_case("superglobals");
            let reference = self
                .alloc_variables_ref(VariablesRef {
                    thread_id: frame.thread_id,
                    depth: frame.depth,
                    context_id: context.id,
                    parent_name: None,
                })
                .await;
            scopes.push(ScopeInfo { name: context.name, variables_reference: reference, expensive });
        }
        Ok(scopes)
    }

    /// `variables`: resolves `variables_reference` back to either a
    /// whole context (top level) or a previously seen property's
    /// children (nested), optionally paged.
    pub async fn variables(&self, variables_reference: u64, page: Option<u32>) -> Result<Vec<VariableInfo>, DbgpError> {
        let reference = {
            let refs = self.variables_refs.lock().await;
            refs.get(&variables_reference)
                .cloned()
                .ok_or_else(|| DbgpError::UnknownReference(format!("variables reference {variables_reference}")))?
        };

        let properties = match &reference.parent_name {
            None => self.session.properties(reference.thread_id, reference.depth, reference.context_id).await?,
            Some(name) => {
                self.session
                    .property_children(reference.thread_id, reference.depth, reference.context_id, name.clone(), page)
                    .await?
            }
        };

        let mut variables = Vec::with_capacity(properties.len());
        for property in properties {
            let children_reference = if property.has_children {
                self.alloc_variables_ref(VariablesRef {
                    thread_id: reference.thread_id,
                    depth: reference.depth,
                    context_id: reference.context_id,
                    parent_name: Some(property.full_name.clone()),
                })
                .await
            } else {
                0
            };
            variables.push(VariableInfo {
                name: property.name,
                value: property.value.unwrap_or_default(),
                type_: Some(property.type_name),
                variables_reference: children_reference,
                named_variables: None,
                indexed_variables: if property.has_children { Some(property.n_children as u64) } else { None },
            });
        }
        Ok(variables)
    }

    /// `evaluate`: resolves `frame_id` back to a connection and depth,
    /// then evaluates `expression` in the requested DAP context.
    pub async fn evaluate(
        &self,
        frame_id: u64,
        expression: String,
        context: EvaluateContext,
    ) -> Result<Option<VariableInfo>, DbgpError> {
        let frame = self.frame_ref(frame_id).await?;
        let result = self.session.evaluate(frame.thread_id, frame.depth, expression, context).await?;
        let Some(result) = result else { return Ok(None) };

        // An eval result carries no `full_name` (dbgp-model::EvalResult), so
        // its children have no addressable path back into the engine's
        // variable space — nothing a later `variables` call could resolve.
        Ok(Some(VariableInfo {
            name: String::new(),
            value: result.value.unwrap_or_default(),
            type_: Some(result.type_name),
            variables_reference: 0,
            named_variables: None,
            indexed_variables: if result.children.is_empty() { None } else { Some(result.children.len() as u64) },
        }))
    }

    /// `source`: fetches a `dbgp:`-scheme virtual source's text.
    pub async fn source(&self, thread_id: ConnectionId, source_reference: u64) -> Result<String, DbgpError> {
        self.session.fetch_source(thread_id, source_reference).await
    }

    async fn alloc_frame_ref(&self, frame: FrameRef) -> u64 {
        let id = self.next_frame_ref.fetch_add(1, Ordering::SeqCst);
        self.frame_refs.lock().await.insert(id, frame);
        id
    }

    async fn frame_ref(&self, frame_id: u64) -> Result<FrameRef, DbgpError> {
        self.frame_refs
            .lock()
            .await
            .get(&frame_id)
            .copied()
            .ok_or_else(|| DbgpError::UnknownReference(format!("frame {frame_id}")))
    }

    async fn alloc_variables_ref(&self, reference: VariablesRef) -> u64 {
        let id = self.next_variables_ref.fetch_add(1, Ordering::SeqCst);
        self.variables_refs.lock().await.insert(id, reference);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must_err;

    fn dispatcher() -> Arc<Dispatcher> {
        Dispatcher::new(Configuration::default()).0
    }

    #[tokio::test]
    async fn set_breakpoints_assigns_ids() {
        let dispatcher = dispatcher();
        let results = dispatcher
            .set_breakpoints(SetBreakpointsArguments {
                path: "/home/u/site/index.php".to_string(),
                breakpoints: vec![SourceBreakpoint { line: 10, condition: None, hit_condition: None, log_message: None }],
            })
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].line, Some(10));
    }

    #[tokio::test]
    async fn set_exception_breakpoints_round_trips() {
        let dispatcher = dispatcher();
        let results = dispatcher.set_exception_breakpoints(vec!["*Exception".to_string()]);
        assert_eq!(results.len(), 1);
        assert!(results[0].verified);
    }

    #[tokio::test]
    async fn threads_is_empty_with_no_connections() {
        let dispatcher = dispatcher();
        assert!(dispatcher.threads().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_frame_id_errors() {
        let dispatcher = dispatcher();
        let err = must_err(dispatcher.scopes(999).await);
        assert!(matches!(err, DbgpError::UnknownReference(_)));
    }

    #[tokio::test]
    async fn unknown_variables_reference_errors() {
        let dispatcher = dispatcher();
        let err = must_err(dispatcher.variables(999, None).await);
        assert!(matches!(err, DbgpError::UnknownReference(_)));
    }
}
