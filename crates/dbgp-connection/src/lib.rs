//! One DBGp connection: a single full-duplex socket, the frame codec, and
//! a FIFO command pipeline matching replies to awaiters by transaction id.
//!
//! At most one command is ever in flight (DBGp is synchronous); further
//! requests queue and are sent once the current one resolves. The `init`
//! frame is consumed once at start-of-connection and delivered to every
//! caller of [`Connection::wait_for_init`]. Unsolicited `notify`/`stream`
//! frames are republished on a broadcast channel.

#![warn(missing_docs)]

use std::collections::{HashMap, VecDeque};

use dbgp_frame::FrameDecoder;
use dbgp_wire::{CommandBuilder, DbgpError, Reply, TransactionId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// A process-wide unique connection id, assigned by the session manager at
/// socket acceptance and never reused.
pub type ConnectionId = u64;

/// An asynchronous, unsolicited frame from the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// A `<notify name="…">` frame (e.g. `notify_user`, `notify_breakpoint_resolved`).
    Notify {
        /// The `name` attribute.
        name: String,
        /// The parsed reply, for further typed decoding downstream.
        reply: Reply,
    },
    /// A `<stream type="…">` frame carrying redirected engine stdout.
    Stream {
        /// The parsed reply, for further typed decoding downstream.
        reply: Reply,
    },
}

type BuildFn = Box<dyn FnOnce(TransactionId) -> CommandBuilder + Send>;

enum ActorMsg {
    Execute { name: &'static str, build: BuildFn, reply: oneshot::Sender<Result<Reply, DbgpError>> },
    WaitForInit(oneshot::Sender<Reply>),
    IsPendingExecute(oneshot::Sender<bool>),
}

/// A handle to a running DBGp connection actor.
pub struct Connection {
    id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<ActorMsg>,
    events: broadcast::Sender<Event>,
}

impl Connection {
    /// Take ownership of `stream` and spawn the connection actor.
    #[must_use]
    pub fn spawn(stream: TcpStream, id: ConnectionId) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let (read_half, write_half) = stream.into_split();
        let actor = Actor {
            id,
            read_half,
            write_half,
            decoder: FrameDecoder::new(),
            pending: HashMap::new(),
            queue: VecDeque::new(),
            next_tx: 1,
            current: None,
            init_waiters: Vec::new(),
            init_reply: None,
            got_init: false,
            events: events.clone(),
        };
        tokio::spawn(actor.run(cmd_rx));
        Self { id, cmd_tx, events }
    }

    /// This connection's id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Subscribe to this connection's asynchronous event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Wait for (and return) the one-shot `init` frame. Idempotent: every
    /// caller, whenever it calls this, gets the same reply.
    pub async fn wait_for_init(&self) -> Result<Reply, DbgpError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(ActorMsg::WaitForInit(tx)).map_err(|_| DbgpError::ConnectionClosed)?;
        rx.await.map_err(|_| DbgpError::ConnectionClosed)
    }

    /// True while an awaiter exists whose command name is `run` or begins
    /// with `step_`. C6 uses this to avoid contending with in-progress
    /// execution.
    pub async fn is_pending_execute_command(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(ActorMsg::IsPendingExecute(tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Submit an arbitrary command, built once the actor assigns it a
    /// transaction id, and await its reply.
    pub async fn execute(
        &self,
        name: &'static str,
        build: impl FnOnce(TransactionId) -> CommandBuilder + Send + 'static,
    ) -> Result<Reply, DbgpError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ActorMsg::Execute { name, build: Box::new(build), reply: reply_tx })
            .map_err(|_| DbgpError::ConnectionClosed)?;
        reply_rx.await.map_err(|_| DbgpError::ConnectionClosed)?
    }

    fn simple(&self, name: &'static str) -> impl FnOnce(TransactionId) -> CommandBuilder {
        move |tx| CommandBuilder::new(name, tx)
    }

    /// `status`
    pub async fn status(&self) -> Result<Reply, DbgpError> {
        self.execute("status", self.simple("status")).await
    }

    /// `run`
    pub async fn run(&self) -> Result<Reply, DbgpError> {
        self.execute("run", self.simple("run")).await
    }

    /// `step_into`
    pub async fn step_into(&self) -> Result<Reply, DbgpError> {
        self.execute("step_into", self.simple("step_into")).await
    }

    /// `step_over`
    pub async fn step_over(&self) -> Result<Reply, DbgpError> {
        self.execute("step_over", self.simple("step_over")).await
    }

    /// `step_out`
    pub async fn step_out(&self) -> Result<Reply, DbgpError> {
        self.execute("step_out", self.simple("step_out")).await
    }

    /// `stop`
    pub async fn stop(&self) -> Result<Reply, DbgpError> {
        self.execute("stop", self.simple("stop")).await
    }

    /// `breakpoint_remove -d <engine_id>`
    pub async fn breakpoint_remove(&self, engine_id: String) -> Result<Reply, DbgpError> {
        self.execute("breakpoint_remove", move |tx| CommandBuilder::new("breakpoint_remove", tx).flag('d', engine_id))
            .await
    }

    /// `breakpoint_get -d <engine_id>`
    pub async fn breakpoint_get(&self, engine_id: String) -> Result<Reply, DbgpError> {
        self.execute("breakpoint_get", move |tx| CommandBuilder::new("breakpoint_get", tx).flag('d', engine_id)).await
    }

    /// `breakpoint_list`
    pub async fn breakpoint_list(&self) -> Result<Reply, DbgpError> {
        self.execute("breakpoint_list", self.simple("breakpoint_list")).await
    }

    /// `feature_get -n <name>`
    pub async fn feature_get(&self, name: String) -> Result<Reply, DbgpError> {
        self.execute("feature_get", move |tx| CommandBuilder::new("feature_get", tx).flag('n', name)).await
    }

    /// `feature_set -n <name> -v <value>`
    pub async fn feature_set(&self, name: String, value: String) -> Result<Reply, DbgpError> {
        self.execute("feature_set", move |tx| CommandBuilder::new("feature_set", tx).flag('n', name).flag('v', value))
            .await
    }

    /// `context_names -d <depth>`
    pub async fn context_names(&self, depth: u32) -> Result<Reply, DbgpError> {
        self.execute("context_names", move |tx| CommandBuilder::new("context_names", tx).flag('d', depth)).await
    }

    /// `context_get -d <depth> -c <context_id>`
    pub async fn context_get(&self, depth: u32, context_id: u32) -> Result<Reply, DbgpError> {
        self.execute("context_get", move |tx| {
            CommandBuilder::new("context_get", tx).flag('d', depth).flag('c', context_id)
        })
        .await
    }

    /// `property_get -d <depth> -c <context_id> -n <name> [-p <page>]`
    pub async fn property_get(
        &self,
        depth: u32,
        context_id: u32,
        name: String,
        page: Option<u32>,
    ) -> Result<Reply, DbgpError> {
        self.execute("property_get", move |tx| {
            CommandBuilder::new("property_get", tx).flag('d', depth).flag('c', context_id).flag('n', name).maybe_flag(
                'p', page,
            )
        })
        .await
    }

    /// `property_value -d <depth> -c <context_id> -n <name>`: full value of
    /// a property whose reported `size` exceeded the inline `value`.
    pub async fn property_value(&self, depth: u32, context_id: u32, name: String) -> Result<Reply, DbgpError> {
        self.execute("property_value", move |tx| {
            CommandBuilder::new("property_value", tx).flag('d', depth).flag('c', context_id).flag('n', name)
        })
        .await
    }

    /// `property_set -d <depth> -c <context_id> -n <name> -t <type> -- <base64(value)>`
    pub async fn property_set(
        &self,
        depth: u32,
        context_id: u32,
        name: String,
        value_type: String,
        value: Vec<u8>,
    ) -> Result<Reply, DbgpError> {
        self.execute("property_set", move |tx| {
            CommandBuilder::new("property_set", tx)
                .flag('d', depth)
                .flag('c', context_id)
                .flag('n', name)
                .flag('t', value_type)
                .data(value)
        })
        .await
    }

    /// `property_source -d <depth> -c <context_id> -n <name>`
    pub async fn property_source(&self, depth: u32, context_id: u32, name: String) -> Result<Reply, DbgpError> {
        self.execute("property_source", move |tx| {
            CommandBuilder::new("property_source", tx).flag('d', depth).flag('c', context_id).flag('n', name)
        })
        .await
    }

    /// `stack_get [-d <depth>]`
    pub async fn stack_get(&self, depth: Option<u32>) -> Result<Reply, DbgpError> {
        self.execute("stack_get", move |tx| CommandBuilder::new("stack_get", tx).maybe_flag('d', depth)).await
    }

    /// `eval -- <base64(expression)>`
    pub async fn eval(&self, expression: String) -> Result<Reply, DbgpError> {
        self.execute("eval", move |tx| CommandBuilder::new("eval", tx).data(expression.into_bytes())).await
    }

    /// `stdout -c <mode>`: toggle engine stdout redirection (0 disable, 1
    /// copy, 2 redirect).
    pub async fn stdout(&self, mode: u8) -> Result<Reply, DbgpError> {
        self.execute("stdout", move |tx| CommandBuilder::new("stdout", tx).flag('c', mode)).await
    }
}

struct Actor {
    id: ConnectionId,
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    decoder: FrameDecoder,
    pending: HashMap<TransactionId, oneshot::Sender<Result<Reply, DbgpError>>>,
    queue: VecDeque<(&'static str, BuildFn, oneshot::Sender<Result<Reply, DbgpError>>)>,
    next_tx: TransactionId,
    current: Option<(TransactionId, &'static str)>,
    init_waiters: Vec<oneshot::Sender<Reply>>,
    init_reply: Option<Reply>,
    got_init: bool,
    events: broadcast::Sender<Event>,
}

impl Actor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ActorMsg>) {
        let mut buf = [0u8; 4096];
        loop {
            if self.current.is_none() {
                if let Some((name, build, reply_tx)) = self.queue.pop_front() {
                    let tx = self.next_tx;
                    self.next_tx += 1;
                    let bytes = build(tx).into_bytes();
                    if let Err(e) = self.write_half.write_all(&bytes).await {
                        warn!(connection = self.id, error = %e, "write failed");
                        let _ = reply_tx.send(Err(DbgpError::TransportError(e.to_string())));
                        self.fail_all(DbgpError::TransportError("connection write failed".to_string()));
                        return;
                    }
                    self.pending.insert(tx, reply_tx);
                    self.current = Some((tx, name));
                    continue;
                }
            }

            tokio::select! {
                msg = cmd_rx.recv() => {
                    match msg {
                        Some(ActorMsg::Execute { name, build, reply }) => {
                            self.queue.push_back((name, build, reply));
                        }
                        Some(ActorMsg::WaitForInit(tx)) => {
                            match &self.init_reply {
                                Some(reply) => { let _ = tx.send(reply.clone()); }
                                None => self.init_waiters.push(tx),
                            }
                        }
                        Some(ActorMsg::IsPendingExecute(tx)) => {
                            let _ = tx.send(self.is_pending_execute());
                        }
                        None => {
                            self.fail_all(DbgpError::ConnectionClosed);
                            return;
                        }
                    }
                }
                n = self.read_half.read(&mut buf) => {
                    match n {
                        Ok(0) => {
                            debug!(connection = self.id, "socket closed by peer");
                            self.fail_all(DbgpError::ConnectionClosed);
                            return;
                        }
                        Ok(n) => {
                            for frame in self.decoder.push(&buf[..n]) {
                                match frame {
                                    Ok(xml) => self.handle_frame(xml),
                                    Err(e) => self.handle_frame_error(e.into()),
                                }
                            }
                        }
                        Err(e) => {
                            self.fail_all(DbgpError::TransportError(e.to_string()));
                            return;
                        }
                    }
                }
            }
        }
    }

    fn is_pending_execute(&self) -> bool {
        matches!(self.current, Some((_, name)) if name == "run" || name.starts_with("step_"))
    }

    fn handle_frame(&mut self, xml: Vec<u8>) {
        if !self.got_init {
            self.got_init = true;
            match dbgp_wire::parse_reply(&xml, "init") {
                Ok(reply) => {
                    self.init_reply = Some(reply.clone());
                    for waiter in self.init_waiters.drain(..) {
                        let _ = waiter.send(reply.clone());
                    }
                }
                Err(e) => warn!(connection = self.id, error = %e, "malformed init frame"),
            }
            return;
        }

        let command_name = self.current.map_or("", |(_, name)| name);
        match dbgp_wire::parse_reply(&xml, command_name) {
            Ok(reply) => match reply.root_name.as_str() {
                "notify" => {
                    let name = reply.attribute("name").unwrap_or_default().to_string();
                    let _ = self.events.send(Event::Notify { name, reply });
                }
                "stream" => {
                    let _ = self.events.send(Event::Stream { reply });
                }
                _ => self.resolve_current(Ok(reply)),
            },
            Err(e) => self.resolve_current(Err(e)),
        }
    }

    fn handle_frame_error(&mut self, e: DbgpError) {
        warn!(connection = self.id, error = %e, "frame error");
        self.resolve_current(Err(e));
    }

    fn resolve_current(&mut self, result: Result<Reply, DbgpError>) {
        if let Some((tx, _)) = self.current.take() {
            if let Some(sender) = self.pending.remove(&tx) {
                let _ = sender.send(result);
            }
        }
    }

    fn fail_all(&mut self, err: DbgpError) {
        self.resolve_current(Err(err));
        for (_, sender) in self.pending.drain() {
            let _ = sender.send(Err(DbgpError::ConnectionClosed));
        }
        for (_, _, sender) in self.queue.drain(..) {
            let _ = sender.send(Err(DbgpError::ConnectionClosed));
        }
        self.init_waiters.clear();
    }
}
