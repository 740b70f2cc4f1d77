//! Per-connection breakpoint reconciliation (C6): applies the deltas a
//! [`dbgp_breakpoint::BreakpointManager`] emits against one DBGp
//! connection, removes before adds, and re-runs itself if new deltas
//! accumulate while it was talking to the engine.

#![warn(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use dbgp_breakpoint::{Breakpoint, BreakpointId, ManagerEvent};
use dbgp_connection::Connection;
use tokio::sync::{Notify, mpsc};
use tracing::warn;

/// A "breakpoint changed" signal for the session manager to translate into
/// a DAP event.
#[derive(Debug, Clone)]
pub struct ReconcilerEvent {
    /// The breakpoint id this change concerns.
    pub id: BreakpointId,
    /// Whether the engine has confirmed this breakpoint.
    pub verified: bool,
    /// The resolved line, when known and applicable (`Line`/`Conditional`).
    pub line: Option<u32>,
    /// A human-readable message, present when `verified` is false due to
    /// an engine error.
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    ToAdd,
    ToRemove,
    Clean,
}

struct Record {
    spec: Breakpoint,
    engine_id: Option<String>,
    status: Status,
}

enum Op {
    Add(HashMap<BreakpointId, Breakpoint>),
    Remove(Vec<BreakpointId>),
}

/// Applies a single connection's share of the authoritative breakpoint set.
pub struct Reconciler {
    connection: Arc<Connection>,
    records: Mutex<HashMap<BreakpointId, Record>>,
    op_queue: Mutex<VecDeque<Op>>,
    running: Mutex<Option<Arc<Notify>>>,
    events: mpsc::UnboundedSender<ReconcilerEvent>,
}

impl Reconciler {
    /// Subscribe to `manager`, seed the record table with its current
    /// snapshot (as pending adds), and spawn the task that drives
    /// reconciliation on every subsequent manager event.
    pub fn spawn(
        connection: Arc<Connection>,
        manager: &dbgp_breakpoint::BreakpointManager,
    ) -> (Arc<Reconciler>, mpsc::UnboundedReceiver<ReconcilerEvent>) {
        let (snapshot, mut manager_rx) = manager.subscribe();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut table = HashMap::with_capacity(snapshot.len());
        for (id, spec) in snapshot {
            table.insert(id, Record { spec, engine_id: None, status: Status::ToAdd });
        }

        let reconciler = Arc::new(Reconciler {
            connection,
            records: Mutex::new(table),
            op_queue: Mutex::new(VecDeque::new()),
            running: Mutex::new(None),
            events: events_tx,
        });

        let driver = reconciler.clone();
        tokio::spawn(async move {
            while let Some(event) = manager_rx.recv().await {
                match event {
                    ManagerEvent::Add(map) => driver.enqueue(Op::Add(map)),
                    ManagerEvent::Remove(ids) => driver.enqueue(Op::Remove(ids)),
                    ManagerEvent::Drain => {}
                }
                driver.process().await;
            }
        });

        (reconciler, events_rx)
    }

    fn enqueue(&self, op: Op) {
        self.op_queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(op);
    }

    fn has_queued_ops(&self) -> bool {
        !self.op_queue.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Drain `op_queue` into the record table, issue `breakpoint_remove`
    /// for every `ToRemove` record and `breakpoint_set` for every `ToAdd`
    /// record, and recurse if new deltas accumulated meanwhile.
    ///
    /// Re-entrant: a call arriving while another is in flight waits for
    /// that one's completion instead of running a redundant pass.
    pub async fn process(&self) {
        let wait_for = {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            match &*running {
                Some(notify) => Some(notify.clone()),
                None => {
                    *running = Some(Arc::new(Notify::new()));
                    None
                }
            }
        };
        if let Some(notify) = wait_for {
            notify.notified().await;
            return;
        }

        loop {
            self.drain_op_queue();

            if self.connection.is_pending_execute_command().await {
                break;
            }

            self.process_removes().await;
            self.process_adds().await;

            if !self.has_queued_ops() {
                break;
            }
        }

        let notify = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    fn drain_op_queue(&self) {
        let ops: Vec<Op> = self.op_queue.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        for op in ops {
            match op {
                Op::Add(map) => {
                    for (id, spec) in map {
                        records.insert(id, Record { spec, engine_id: None, status: Status::ToAdd });
                    }
                }
                Op::Remove(ids) => {
                    for id in ids {
                        match records.get(&id) {
                            Some(record) if record.engine_id.is_none() => {
                                records.remove(&id);
                            }
                            Some(_) => {
                                if let Some(record) = records.get_mut(&id) {
                                    record.status = Status::ToRemove;
                                }
                            }
                            None => {}
                        }
                    }
                }
            }
        }
    }

    async fn process_removes(&self) {
        let to_remove: Vec<(BreakpointId, String)> = {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records
                .iter()
                .filter(|(_, r)| r.status == Status::ToRemove)
                .filter_map(|(id, r)| r.engine_id.clone().map(|eid| (*id, eid)))
                .collect()
        };

        for (id, engine_id) in to_remove {
            if let Err(e) = self.connection.breakpoint_remove(engine_id).await {
                warn!(breakpoint = id, error = %e, "breakpoint_remove failed");
            }
            self.records.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
        }
    }

    async fn process_adds(&self) {
        let to_add: Vec<(BreakpointId, Breakpoint)> = {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records.iter().filter(|(_, r)| r.status == Status::ToAdd).map(|(id, r)| (*id, r.spec.clone())).collect()
        };

        for (id, spec) in to_add {
            let spec_for_command = spec.clone();
            let result = self.connection.execute("breakpoint_set", move |tx| spec_for_command.to_command(tx)).await;

            match result {
                Ok(reply) => {
                    let engine_id = reply.attribute("id").map(str::to_string);
                    let resolved = reply.attribute("resolved");
                    let verified = resolved != Some("unresolved");
                    let mut line = None;

                    if resolved == Some("resolved") {
                        if let (Some((_, requested_line)), Some(eid)) = (spec.location(), &engine_id) {
                            line = match self.connection.breakpoint_get(eid.clone()).await {
                                Ok(get_reply) => {
                                    Some(get_reply.attribute("lineno").and_then(|s| s.parse().ok()).unwrap_or(requested_line))
                                }
                                Err(_) => Some(requested_line),
                            };
                        }
                    }

                    {
                        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
                        if let Some(record) = records.get_mut(&id) {
                            record.engine_id = engine_id;
                            record.status = Status::Clean;
                        }
                    }

                    let _ = self.events.send(ReconcilerEvent { id, verified, line, message: None });
                }
                Err(e) => {
                    {
                        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
                        if let Some(record) = records.get_mut(&id) {
                            record.engine_id = None;
                            record.status = Status::Clean;
                        }
                    }
                    let _ = self.events.send(ReconcilerEvent { id, verified: false, line: None, message: Some(e.to_string()) });
                }
            }
        }
    }

    /// Handle an unsolicited `notify_breakpoint_resolved`: if `engine_id`
    /// is present in the table, emit a verified "changed" event with the
    /// reported line.
    pub fn notify_breakpoint_resolved(&self, engine_id: &str, line: u32) {
        let id = {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records.iter().find(|(_, r)| r.engine_id.as_deref() == Some(engine_id)).map(|(id, _)| *id)
        };
        if let Some(id) = id {
            let _ = self.events.send(ReconcilerEvent { id, verified: true, line: Some(line), message: None });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_breakpoint::{BreakpointManager, LineBreakpointSpec};
    use dbgp_test_support::must;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = must(TcpListener::bind("127.0.0.1:0").await);
        let addr = must(listener.local_addr());
        let connect = TcpStream::connect(addr);
        let (accepted, client) = must(tokio::try_join!(listener.accept(), connect));
        (accepted.0, client)
    }

    fn frame(xml: &str) -> Vec<u8> {
        dbgp_frame::encode_frame(xml.as_bytes())
    }

    async fn read_sent(engine: &mut TcpStream) -> String {
        let mut buf = [0u8; 512];
        let n = must(engine.read(&mut buf).await);
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[tokio::test]
    async fn initial_snapshot_is_added_on_first_process() {
        let (mut engine, client) = connected_pair().await;
        let connection = Arc::new(Connection::spawn(client, 1));
        must(engine.write_all(&frame(r#"<init appid="1"/>"#)).await);
        must(connection.wait_for_init().await);

        let manager = BreakpointManager::new();
        manager.set_line_breakpoints(
            "a.php",
            "file:///a.php",
            vec![LineBreakpointSpec { line: 10, condition: None, hit_condition: None }],
        );

        let (_reconciler, mut events) = Reconciler::spawn(connection, &manager);

        let sent = read_sent(&mut engine).await;
        assert!(sent.contains("breakpoint_set"));
        assert!(sent.contains("-t line"));

        must(
            engine
                .write_all(&frame(r#"<response command="breakpoint_set" transaction_id="1" state="enabled" id="7" resolved="resolved"/>"#))
                .await,
        );

        let event = must(events.recv().await.ok_or("expected a reconciler event"));
        assert_eq!(event.id, 1);
        assert!(event.verified);
    }

    #[tokio::test]
    async fn subsequent_remove_issues_breakpoint_remove_with_engine_id() {
        let (mut engine, client) = connected_pair().await;
        let connection = Arc::new(Connection::spawn(client, 1));
        must(engine.write_all(&frame(r#"<init appid="1"/>"#)).await);
        must(connection.wait_for_init().await);

        let manager = BreakpointManager::new();
        manager.set_line_breakpoints(
            "a.php",
            "file:///a.php",
            vec![LineBreakpointSpec { line: 10, condition: None, hit_condition: None }],
        );
        let (_reconciler, mut events) = Reconciler::spawn(connection, &manager);

        read_sent(&mut engine).await;
        must(
            engine
                .write_all(&frame(r#"<response command="breakpoint_set" transaction_id="1" id="9" resolved="resolved"/>"#))
                .await,
        );
        must(events.recv().await.ok_or("expected add event"));

        manager.set_line_breakpoints("a.php", "file:///a.php", vec![]);

        let sent = read_sent(&mut engine).await;
        assert!(sent.contains("breakpoint_remove"));
        assert!(sent.contains("-d 9"));
    }

    #[tokio::test]
    async fn removing_a_never_added_breakpoint_issues_no_network_call() {
        let (mut engine, client) = connected_pair().await;
        let connection = Arc::new(Connection::spawn(client, 1));
        must(engine.write_all(&frame(r#"<init appid="1"/>"#)).await);
        must(connection.wait_for_init().await);

        // Keep the connection busy with a `run` that never gets a reply, so
        // the reconciler's process() bails out before ever sending breakpoint_set.
        let busy_connection = connection.clone();
        let _run_task = tokio::spawn(async move {
            let _ = busy_connection.run().await;
        });
        let sent = read_sent(&mut engine).await;
        assert!(sent.starts_with("run"));

        let manager = BreakpointManager::new();
        let (_reconciler, _events) = Reconciler::spawn(connection, &manager);

        manager.set_line_breakpoints(
            "a.php",
            "file:///a.php",
            vec![LineBreakpointSpec { line: 1, condition: None, hit_condition: None }],
        );
        // Remove before the add could ever be sent (the connection is still busy).
        manager.set_line_breakpoints("a.php", "file:///a.php", vec![]);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut probe = [0u8; 1];
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), engine.read(&mut probe)).await;
        assert!(timed_out.is_err(), "no breakpoint_set/breakpoint_remove should have reached the wire");
    }

    #[tokio::test]
    async fn notify_breakpoint_resolved_emits_verified_event_for_known_engine_id() {
        let (mut engine, client) = connected_pair().await;
        let connection = Arc::new(Connection::spawn(client, 1));
        must(engine.write_all(&frame(r#"<init appid="1"/>"#)).await);
        must(connection.wait_for_init().await);

        let manager = BreakpointManager::new();
        manager.set_line_breakpoints(
            "a.php",
            "file:///a.php",
            vec![LineBreakpointSpec { line: 10, condition: None, hit_condition: None }],
        );
        let (reconciler, mut events) = Reconciler::spawn(connection, &manager);

        read_sent(&mut engine).await;
        must(
            engine
                .write_all(&frame(r#"<response command="breakpoint_set" transaction_id="1" id="42" resolved="unresolved"/>"#))
                .await,
        );
        let first = must(events.recv().await.ok_or("expected the unresolved add event"));
        assert!(!first.verified);

        reconciler.notify_breakpoint_resolved("42", 11);
        let second = must(events.recv().await.ok_or("expected the resolved-notification event"));
        assert!(second.verified);
        assert_eq!(second.line, Some(11));
    }
}
