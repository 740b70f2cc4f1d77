//! Connection bootstrap, stop-state handling, and DAP-facing operations
//! (C8): turns a raw accepted socket into a negotiated, breakpoint-synced
//! DBGp connection and keeps translating its `status` replies into
//! session events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dbgp_breakpoint::BreakpointManager;
use dbgp_connection::{Connection, ConnectionId, Event as ConnectionEvent};
use dbgp_filters::log_points::LogPointStore;
use dbgp_filters::{is_positive_match_in_globs, matches_any};
use dbgp_model::{EvalResult, Status, StatusReply, parse_eval, parse_stack_get, parse_status};
use dbgp_reconciler::Reconciler;
use dbgp_uri::PathMapping;
use dbgp_wire::{CommandBuilder, DbgpError, Reply};
use quick_xml::events::Event as XmlEvent;
use quick_xml::reader::Reader;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{info, warn};

use crate::configuration::Configuration;
use crate::protocol::{OutputCategory, SessionEvent, StoppedReason};

/// `max_children` applied to every connection unless overridden (§4.8).
const DEFAULT_MAX_CHILDREN: u32 = 100;

/// How long `disconnect` waits for a graceful `stop` reply before giving
/// up and closing the socket anyway (§4.8).
const STOP_RACE_TIMEOUT: Duration = Duration::from_millis(500);

/// Why a DAP `evaluate` request was made; chooses which DBGp command(s)
/// satisfy it (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluateContext {
    /// Hovering an identifier in the editor: looked up by name in the
    /// current frame's locals, never executed as an arbitrary expression.
    Hover,
    /// Typed into the debug console: resolved against a cached globals
    /// context so the result carries an addressable full name.
    Repl,
    /// A persistent watch expression, or any other context: a direct
    /// `eval` of the expression text.
    Watch,
}

/// A fully negotiated DBGp connection plus the session-local state the
/// stop-state handler and control operations need.
struct ConnectionState {
    connection: Arc<Connection>,
    reconciler: Arc<Reconciler>,
    path_mapping: PathMapping,
    stopped_on_entry: AtomicBool,
    currently_skipping: AtomicBool,
    globals_context_id: Mutex<Option<u32>>,
}

/// Everything needed to drive a population of DBGp connections against one
/// DAP session: configuration, the authoritative breakpoint set, and the
/// event channel every connection's status changes fan out on.
pub struct SessionManager {
    config: Configuration,
    breakpoints: BreakpointManager,
    connections: Mutex<HashMap<ConnectionId, Arc<ConnectionState>>>,
    next_connection_id: AtomicU64,
    next_source_reference: AtomicU64,
    virtual_sources: Mutex<HashMap<u64, String>>,
    log_points: Mutex<LogPointStore>,
    configuration_done: Arc<Notify>,
    configuration_done_flag: AtomicBool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    /// Build a manager for `config`, returning it alongside the receiver
    /// half of its session-event channel.
    #[must_use]
    pub fn new(config: Configuration) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            config,
            breakpoints: BreakpointManager::new(),
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            next_source_reference: AtomicU64::new(1),
            virtual_sources: Mutex::new(HashMap::new()),
            log_points: Mutex::new(LogPointStore::new()),
            configuration_done: Arc::new(Notify::new()),
            configuration_done_flag: AtomicBool::new(false),
            events,
        });
        (manager, events_rx)
    }

    /// The authoritative breakpoint set, for the dispatcher's `setBreakpoints` family.
    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    /// Raise the "UI finished its initial breakpoint setup" signal (DAP
    /// `configurationDone`). Idempotent and safe to call before or after
    /// any connection's bootstrap reaches step 8.
    pub fn configuration_done(&self) {
        if !self.configuration_done_flag.swap(true, Ordering::SeqCst) {
            self.configuration_done.notify_waiters();
        }
    }

    async fn wait_for_configuration_done(&self) {
        if self.configuration_done_flag.load(Ordering::SeqCst) {
            return;
        }
        self.configuration_done.notified().await;
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Register (or replace) a log-point template at `file_uri`:`line`,
    /// keyed in the same (engine-reported) URI space `status` replies
    /// report their current location in.
    pub async fn set_log_point(&self, file_uri: &str, line: u32, template: String) {
        self.log_points.lock().await.set(file_uri, line, template);
    }

    /// Remove the log point at `file_uri`:`line`, if any.
    pub async fn remove_log_point(&self, file_uri: &str, line: u32) {
        self.log_points.lock().await.remove(file_uri, line);
    }

    /// Step 1-10 of bootstrapping a new connection: enforce the
    /// concurrent-connection cap, spawn the connection actor, await
    /// `init`, apply the skip-entry check, negotiate features, start
    /// stdout streaming if configured, announce the thread, wait for
    /// `configurationDone`, sync breakpoints, and run to the first stop.
    pub async fn accept(self: &Arc<Self>, stream: TcpStream) -> Result<(), DbgpError> {
        if let Some(cap) = self.config.effective_max_connections() {
            if self.connections.lock().await.len() >= cap {
                drop(stream);
                return Err(DbgpError::TransportError("max_connections reached".to_string()));
            }
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(Connection::spawn(stream, id));

        let init = connection.wait_for_init().await?;
        let file_uri = init.attribute("fileuri").unwrap_or_default().to_string();
        let path_mapping = self.config.path_mapping();

        if !self.config.skip_entry_paths.is_empty() {
            let client_path = path_mapping.to_client(&file_uri);
            if is_positive_match_in_globs(&client_path, &self.config.skip_entry_paths) {
                info!(connection = id, path = %client_path, "skip_entry_paths matched, detaching");
                return Ok(());
            }
        }

        negotiate_features(&connection, &self.config, &init).await;

        if self.config.stream.stdout != crate::configuration::StreamMode::Disabled {
            let mode = self.config.stream.stdout.wire_value();
            if let Err(e) = connection.stdout(mode).await {
                warn!(connection = id, error = %e, "stdout streaming request failed");
            }
        }

        let (reconciler, reconciler_events) = Reconciler::spawn(connection.clone(), &self.breakpoints);
        let state = Arc::new(ConnectionState {
            connection: connection.clone(),
            reconciler,
            path_mapping,
            stopped_on_entry: AtomicBool::new(false),
            currently_skipping: AtomicBool::new(false),
            globals_context_id: Mutex::new(None),
        });
        self.connections.lock().await.insert(id, state.clone());
        self.spawn_async_event_forwarder(id, &connection);
        self.spawn_reconciler_event_forwarder(reconciler_events);

        self.emit(SessionEvent::ThreadStarted { thread_id: id });

        self.wait_for_configuration_done().await;
        self.breakpoints.process();
        state.reconciler.process().await;

        let reply = if self.config.stop_on_entry { connection.step_into().await } else { connection.run().await };

        match reply {
            Ok(reply) => self.dispatch_status_reply(id, &reply).await,
            Err(e) => warn!(connection = id, error = %e, "initial run/step_into failed"),
        }

        Ok(())
    }

    fn spawn_async_event_forwarder(self: &Arc<Self>, id: ConnectionId, connection: &Arc<Connection>) {
        let manager = self.clone();
        let mut events = connection.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    ConnectionEvent::Notify { name, reply } if name == "breakpoint_resolved" => {
                        if let (Some(engine_id), Some(line)) =
                            (reply.attribute("id"), reply.attribute("lineno").and_then(|s| s.parse().ok()))
                        {
                            if let Some(state) = manager.connections.lock().await.get(&id).cloned() {
                                state.reconciler.notify_breakpoint_resolved(engine_id, line);
                            }
                        }
                    }
                    ConnectionEvent::Notify { .. } => {}
                    ConnectionEvent::Stream { reply } => {
                        let category = match reply.attribute("type") {
                            Some("stderr") => OutputCategory::Stderr,
                            _ => OutputCategory::Stdout,
                        };
                        let output = decode_base64_text(&reply.xml);
                        manager.emit(SessionEvent::Output { category, output });
                    }
                }
            }
        });
    }

    fn spawn_reconciler_event_forwarder(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<dbgp_reconciler::ReconcilerEvent>) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.emit(SessionEvent::BreakpointChanged {
                    breakpoint: crate::protocol::BreakpointInfo {
                        id: event.id,
                        verified: event.verified,
                        line: event.line,
                        message: event.message,
                    },
                });
            }
        });
    }

    fn dispatch_status_reply<'a>(
        self: &'a Arc<Self>,
        id: ConnectionId,
        reply: &'a Reply,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let status = match parse_status(&reply.xml) {
                Ok(status) => status,
                Err(e) => {
                    warn!(connection = id, error = %e, "malformed status reply");
                    return;
                }
            };
            self.handle_stop(id, status).await;
        })
    }

    /// The stop-state handler: drains the reconciler, resolves ignores,
    /// entry labeling, log points, and `skip_files`, recursing through
    /// further `run`/step commands until a reportable stop (or the
    /// engine terminates) is reached.
    async fn handle_stop(self: &Arc<Self>, id: ConnectionId, status: StatusReply) {
        let Some(state) = self.connections.lock().await.get(&id).cloned() else { return };
        state.reconciler.process().await;

        match status.status {
            Status::Stopping | Status::Stopped => {
                self.emit(SessionEvent::ThreadExited { thread_id: id });
                self.connections.lock().await.remove(&id);
                return;
            }
            Status::Running | Status::Starting => return,
            Status::Break => {}
        }

        if let Some(exception) = &status.exception {
            let file_ignored = status
                .file_uri
                .as_ref()
                .map(|uri| state.path_mapping.to_client(uri))
                .is_some_and(|path| is_positive_match_in_globs(&path, &self.config.ignore));
            let exception_ignored = matches_any(exception, &self.config.ignore_exceptions);
            if file_ignored || exception_ignored {
                self.resume(&state, id, ResumeCommand::Run).await;
                return;
            }
        }

        if self.config.stop_on_entry && !state.stopped_on_entry.swap(true, Ordering::SeqCst) {
            self.emit(SessionEvent::Stopped { thread_id: id, reason: StoppedReason::Entry, description: None });
            return;
        }

        let (file_uri, line) = match (&status.file_uri, status.line) {
            (Some(file_uri), Some(line)) => (file_uri.clone(), line),
            _ => {
                self.emit(SessionEvent::Stopped {
                    thread_id: id,
                    reason: StoppedReason::Breakpoint,
                    description: None,
                });
                return;
            }
        };

        let skip_matched = {
            let client_path = state.path_mapping.to_client(&file_uri);
            is_positive_match_in_globs(&client_path, &self.config.skip_files)
        };
        if skip_matched {
            state.currently_skipping.store(true, Ordering::SeqCst);
            self.resume(&state, id, ResumeCommand::StepOver).await;
            return;
        }
        state.currently_skipping.store(false, Ordering::SeqCst);

        let has_log_point = self.log_points.lock().await.contains(&file_uri, line);
        if has_log_point {
            let connection = state.connection.clone();
            let output = self
                .log_points
                .lock()
                .await
                .resolve(&file_uri, line, move |expr| {
                    let connection = connection.clone();
                    let expr = expr.to_string();
                    async move {
                        match connection.eval(expr).await {
                            Ok(reply) => parse_eval(&reply.xml)
                                .ok()
                                .flatten()
                                .and_then(|result| result.value)
                                .unwrap_or_default(),
                            Err(_) => String::new(),
                        }
                    }
                })
                .await
                .unwrap_or_default();
            self.emit(SessionEvent::Output { category: OutputCategory::Console, output });
            self.resume(&state, id, ResumeCommand::Run).await;
            return;
        }

        self.emit(SessionEvent::Stopped { thread_id: id, reason: StoppedReason::Breakpoint, description: None });
    }

    async fn resume(self: &Arc<Self>, state: &Arc<ConnectionState>, id: ConnectionId, command: ResumeCommand) {
        let result = match command {
            ResumeCommand::Run => state.connection.run().await,
            ResumeCommand::StepOver => state.connection.step_over().await,
        };
        match result {
            Ok(reply) => self.dispatch_status_reply(id, &reply).await,
            Err(e) => {
                warn!(connection = id, error = %e, "resume command failed");
                self.emit(SessionEvent::Output {
                    category: OutputCategory::Console,
                    output: format!("resume failed: {e}"),
                });
            }
        }
    }

    /// `continue|next|step_in|step_out`, fed back through the stop-state handler.
    pub async fn control(self: &Arc<Self>, id: ConnectionId, op: ControlOp) -> Result<(), DbgpError> {
        let Some(state) = self.connections.lock().await.get(&id).cloned() else {
            return Err(DbgpError::UnknownReference(format!("connection {id}")));
        };
        let reply = match op {
            ControlOp::Continue => state.connection.run().await,
            ControlOp::Next => state.connection.step_over().await,
            ControlOp::StepIn => state.connection.step_into().await,
            ControlOp::StepOut => state.connection.step_out().await,
        }?;
        self.emit(SessionEvent::Continued { thread_id: id });
        self.dispatch_status_reply(id, &reply).await;
        Ok(())
    }

    /// `pause`: unsupported by the engine. Clears a `skip_files` latch if
    /// one is set (treated as success); otherwise errors.
    pub async fn pause(&self, id: ConnectionId) -> Result<(), DbgpError> {
        let Some(state) = self.connections.lock().await.get(&id).cloned() else {
            return Err(DbgpError::UnknownReference(format!("connection {id}")));
        };
        if state.currently_skipping.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        Err(DbgpError::TransportError("pause is not supported by the DBGp engine".to_string()))
    }

    /// Race `stop` against a 500 ms timer, then drop the connection.
    /// Per-connection; callers disconnecting the whole session call this
    /// for every entry in `connections`.
    pub async fn disconnect(&self, id: ConnectionId) {
        let state = self.connections.lock().await.remove(&id);
        let Some(state) = state else { return };
        let _ = tokio::time::timeout(STOP_RACE_TIMEOUT, state.connection.stop()).await;
    }

    /// Every connection id currently tracked, for the DAP `threads` request.
    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.lock().await.keys().copied().collect()
    }

    /// Disconnect every live connection.
    pub async fn disconnect_all(&self) {
        let ids: Vec<ConnectionId> = self.connections.lock().await.keys().copied().collect();
        for id in ids {
            self.disconnect(id).await;
        }
    }

    /// Tear down every connection and report whole-adapter shutdown, as
    /// opposed to [`Self::handle_stop`]'s per-connection `ThreadExited`.
    /// Called once, when the listening socket itself is going away.
    pub async fn shutdown(&self) {
        self.disconnect_all().await;
        self.emit(SessionEvent::Terminated);
    }

    /// `stack_get` for `id`, decoded into typed frames.
    pub async fn stack_frames(&self, id: ConnectionId) -> Result<Vec<dbgp_model::StackFrame>, DbgpError> {
        let connection = self.connection_handle(id).await?;
        let reply = connection.stack_get(None).await?;
        parse_stack_get(&reply.xml)
    }

    /// `context_names` for `id` at `depth`, decoded into typed scope declarations.
    pub async fn context_names(&self, id: ConnectionId, depth: u32) -> Result<Vec<dbgp_model::ContextDecl>, DbgpError> {
        let connection = self.connection_handle(id).await?;
        let reply = connection.context_names(depth).await?;
        dbgp_model::parse_context_names(&reply.xml)
    }

    /// `context_get`/`property_get` for `id`, decoded into typed properties.
    pub async fn properties(
        &self,
        id: ConnectionId,
        depth: u32,
        context_id: u32,
    ) -> Result<Vec<dbgp_model::Property>, DbgpError> {
        let connection = self.connection_handle(id).await?;
        let reply = connection.context_get(depth, context_id).await?;
        dbgp_model::parse_context_get(&reply.xml)
    }

    /// `property_get -n <name> [-p <page>]` for a single property's children.
    pub async fn property_children(
        &self,
        id: ConnectionId,
        depth: u32,
        context_id: u32,
        name: String,
        page: Option<u32>,
    ) -> Result<Vec<dbgp_model::Property>, DbgpError> {
        let connection = self.connection_handle(id).await?;
        let reply = connection.property_get(depth, context_id, name, page).await?;
        dbgp_model::parse_properties(&reply.xml)
    }

    /// Resolve a DAP `evaluate` request against `id` (§4.8).
    pub async fn evaluate(
        &self,
        id: ConnectionId,
        depth: u32,
        expression: String,
        context: EvaluateContext,
    ) -> Result<Option<EvalResult>, DbgpError> {
        let state = self.state_handle(id).await?;
        match context {
            EvaluateContext::Hover => {
                let reply = state.connection.property_get(depth, 0, expression, None).await?;
                let properties = dbgp_model::parse_properties(&reply.xml)?;
                Ok(properties.into_iter().next().map(property_as_eval_result))
            }
            EvaluateContext::Repl => {
                let context_id = self.globals_context_id(&state, depth).await?;
                match state.connection.property_get(depth, context_id, expression.clone(), None).await {
                    Ok(reply) => {
                        let properties = dbgp_model::parse_properties(&reply.xml)?;
                        Ok(properties.into_iter().next().map(property_as_eval_result))
                    }
                    Err(DbgpError::EngineError { .. }) => {
                        let reply = state.connection.eval(expression).await?;
                        parse_eval(&reply.xml)
                    }
                    Err(e) => Err(e),
                }
            }
            EvaluateContext::Watch => {
                let reply = state.connection.eval(expression).await?;
                parse_eval(&reply.xml)
            }
        }
    }

    async fn globals_context_id(&self, state: &Arc<ConnectionState>, depth: u32) -> Result<u32, DbgpError> {
        let mut cached = state.globals_context_id.lock().await;
        if let Some(id) = *cached {
            return Ok(id);
        }
        let reply = state.connection.context_names(depth).await?;
        let contexts = dbgp_model::parse_context_names(&reply.xml)?;
        let id = contexts
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case("superglobals") || c.name.eq_ignore_ascii_case("globals"))
            .or_else(|| contexts.first())
            .map_or(0, |c| c.id);
        *cached = Some(id);
        Ok(id)
    }

    /// Register `file_uri` (a `dbgp:`-scheme engine-internal source) and
    /// return the DAP source reference addressing it, allocating a fresh
    /// one if this is the first time it's been seen.
    pub async fn source_reference_for(&self, file_uri: &str) -> u64 {
        let mut sources = self.virtual_sources.lock().await;
        if let Some((&reference, _)) = sources.iter().find(|(_, uri)| uri.as_str() == file_uri) {
            return reference;
        }
        let reference = self.next_source_reference.fetch_add(1, Ordering::SeqCst);
        sources.insert(reference, file_uri.to_string());
        reference
    }

    /// Fetch a virtual source's content via `source -f <uri>`, prefixing a
    /// scripting-language prolog if the text doesn't already start with one.
    pub async fn fetch_source(&self, id: ConnectionId, source_reference: u64) -> Result<String, DbgpError> {
        let file_uri = self
            .virtual_sources
            .lock()
            .await
            .get(&source_reference)
            .cloned()
            .ok_or_else(|| DbgpError::UnknownReference(format!("source reference {source_reference}")))?;

        let connection = self.connection_handle(id).await?;
        let reply = connection.execute("source", move |tx| CommandBuilder::new("source", tx).flag('f', file_uri)).await?;
        let text = decode_base64_text(&reply.xml);
        if text.starts_with("<?php") || text.starts_with("<?") {
            Ok(text)
        } else {
            Ok(format!("<?php\n{text}"))
        }
    }

    async fn connection_handle(&self, id: ConnectionId) -> Result<Arc<Connection>, DbgpError> {
        self.connections
            .lock()
            .await
            .get(&id)
            .map(|state| state.connection.clone())
            .ok_or_else(|| DbgpError::UnknownReference(format!("connection {id}")))
    }

    async fn state_handle(&self, id: ConnectionId) -> Result<Arc<ConnectionState>, DbgpError> {
        self.connections
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DbgpError::UnknownReference(format!("connection {id}")))
    }
}

/// The command the stop-state handler re-issues when it decides to keep
/// running past an ignored exception or a `skip_files` match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeCommand {
    Run,
    StepOver,
}

/// A DAP resume-family request, translated 1:1 to a DBGp command (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// `run`
    Continue,
    /// `step_over`
    Next,
    /// `step_into`
    StepIn,
    /// `step_out`
    StepOut,
}

fn property_as_eval_result(property: dbgp_model::Property) -> EvalResult {
    EvalResult {
        type_name: property.type_name,
        class: property.class,
        value: property.value,
        size: property.size,
        children: property.children,
    }
}

/// Feature negotiation (§4.8 step 5): unconditionally enable the features
/// an `>= 3.0.0`/`>= 3.2.0` engine is known to support, probing with
/// `feature_get` otherwise, then apply `xdebug_settings` overrides and the
/// default `max_children`.
async fn negotiate_features(connection: &Connection, config: &Configuration, init: &Reply) {
    let version = extract_engine_version(&init.xml);
    let modern = version.is_some_and(|v| v >= (3, 0, 0));
    let supports_return_value = version.is_some_and(|v| v >= (3, 2, 0));

    for feature in ["resolved_breakpoints", "notify_ok", "extended_properties"] {
        if modern {
            let _ = connection.feature_set(feature.to_string(), "1".to_string()).await;
        } else if let Ok(reply) = connection.feature_get(feature.to_string()).await {
            if reply.attribute("supported") == Some("1") {
                let _ = connection.feature_set(feature.to_string(), "1".to_string()).await;
            }
        }
    }

    if supports_return_value {
        let _ = connection.feature_set("breakpoint_include_return_value".to_string(), "1".to_string()).await;
    }

    for (name, value) in &config.xdebug_settings {
        let _ = connection.feature_set(name.clone(), value.clone()).await;
    }

    if !config.xdebug_settings.contains_key("max_children") {
        let _ = connection.feature_set("max_children".to_string(), DEFAULT_MAX_CHILDREN.to_string()).await;
    }
}

/// Pull `<engine version="x.y.z">` out of an `init` frame's raw XML. The
/// engine version is reported on a nested element, not the root's own
/// attributes, so [`dbgp_wire::Reply::attribute`] can't see it.
fn extract_engine_version(xml: &[u8]) -> Option<(u32, u32, u32)> {
    let text = std::str::from_utf8(xml).ok()?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).ok()? {
            XmlEvent::Eof => return None,
            XmlEvent::Start(tag) | XmlEvent::Empty(tag) => {
                let local = String::from_utf8_lossy(tag.name().as_ref());
                let local = local.rsplit(':').next().unwrap_or(&local);
                if local == "engine" {
                    for attr in tag.attributes().flatten() {
                        if attr.key.as_ref() == b"version" {
                            let value = attr.decode_and_unescape_value(reader.decoder()).ok()?;
                            return parse_version(&value);
                        }
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }
}

fn parse_version(raw: &str) -> Option<(u32, u32, u32)> {
    let mut parts = raw.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    Some((parts.next()?, parts.next().unwrap_or(0), parts.next().unwrap_or(0)))
}

fn decode_base64_text(xml: &[u8]) -> String {
    use base64::Engine as _;
    let text = std::str::from_utf8(xml).unwrap_or_default();
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut content = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Eof) => break,
            Ok(XmlEvent::Text(text)) => {
                content.push_str(&text.unescape().map(|c| c.into_owned()).unwrap_or_default());
            }
            Ok(_) => {}
            Err(_) => break,
        }
        buf.clear();
    }
    base64::engine::general_purpose::STANDARD
        .decode(content.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn frame(xml: &str) -> Vec<u8> {
        dbgp_frame::encode_frame(xml.as_bytes())
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = must(TcpListener::bind("127.0.0.1:0").await);
        let addr = must(listener.local_addr());
        let connect = TcpStream::connect(addr);
        let (accepted, client) = must(tokio::try_join!(listener.accept(), connect));
        (accepted.0, client)
    }

    #[test]
    fn extracts_engine_version_from_init_frame() {
        let xml = br#"<init xmlns="urn:debugger_protocol_v1" fileuri="file:///a.php"><engine version="3.3.1">Xdebug</engine></init>"#;
        assert_eq!(extract_engine_version(xml), Some((3, 3, 1)));
    }

    #[test]
    fn missing_engine_element_yields_none() {
        let xml = br#"<init xmlns="urn:debugger_protocol_v1" fileuri="file:///a.php"/>"#;
        assert_eq!(extract_engine_version(xml), None);
    }

    #[tokio::test]
    async fn max_connections_cap_rejects_new_sockets() {
        let config = Configuration { max_connections: 1, ..Configuration::default() };
        let (manager, _events) = SessionManager::new(config);

        let (mut engine_a, client_a) = connected_pair().await;
        let manager_a = manager.clone();
        let accept_a = tokio::spawn(async move { manager_a.accept(client_a).await });
        must(engine_a.write_all(&frame(r#"<init xmlns="urn:debugger_protocol_v1" fileuri="file:///a.php"/>"#)).await);
        must(engine_a.write_all(&frame(r#"<response command="run" transaction_id="1" status="running" reason="ok"/>"#)).await);

        // Give the first accept a moment to register before the cap check on the second.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (_engine_b, client_b) = connected_pair().await;
        let result = manager.accept(client_b).await;
        assert!(result.is_err());

        must(accept_a.await);
    }

    #[tokio::test]
    async fn configuration_done_unblocks_every_waiter() {
        let (manager, _events) = SessionManager::new(Configuration::default());
        manager.configuration_done();
        // A second call must stay idempotent rather than panicking or double-notifying.
        manager.configuration_done();
        manager.wait_for_configuration_done().await;
    }

    #[test]
    fn decode_base64_text_round_trips_stream_payload() {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello from stdout");
        let xml = format!(r#"<stream xmlns="urn:debugger_protocol_v1" type="stdout">{encoded}</stream>"#);
        assert_eq!(decode_base64_text(xml.as_bytes()), "hello from stdout");
    }
}
