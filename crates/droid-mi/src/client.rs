//! MI client over one persistent debugger connection.
//!
//! Three tasks run per client: a writer that owns the write half, a reader
//! that is the only consumer of the read half, and a poster that runs
//! commands queued with [`ProtocolClient::post_command`] (including those
//! the reader queues itself, since it must never wait on a reply).

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::dispatcher::{Correlation, Dispatcher, Routed};
use crate::error::MiError;
use crate::protocol::{
    parse_line, result_token, AsyncRecord, Line, ResultClass, ResultRecord, StreamKind, StreamRecord,
};
use crate::session::ClientState;
use crate::stack::{parse_frames, StackFrame};
use crate::transport::{encode_command, read_line, validate_command};

const WRITER_QUEUE: usize = 64;
const BROADCAST_CAPACITY: usize = 256;
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Reaction to the target stopping on a fault signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Resume immediately and do not report the stop. Faults used for
    /// runtime tricks (GC barriers, lazy binding) stay invisible, at the
    /// cost of also hiding genuine crashes.
    #[default]
    AutoContinue,
    /// Report the stop like any other.
    Surface,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub correlation: Correlation,
    /// Default deadline per command; `None` waits forever.
    pub command_timeout: Option<Duration>,
    pub fault_policy: FaultPolicy,
    /// Signal names the fault policy applies to.
    pub fault_signals: Vec<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            correlation: Correlation::Token,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            fault_policy: FaultPolicy::AutoContinue,
            fault_signals: vec!["SIGSEGV".into(), "SIGBUS".into(), "SIGILL".into()],
        }
    }
}

/// Called inline by the reader on every `*running`.
pub type ResumeHook = Box<dyn Fn() + Send + Sync>;

/// Target states a command may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Only while the target is idle.
    Idle,
    /// Also while the state reads `Running`. Used to resume past a fault
    /// stop the reader kept out of the state.
    Resume,
}

/// A command queued for the poster task.
#[derive(Debug)]
struct Posted {
    command: String,
    admission: Admission,
}

/// State visible to the reader task.
struct Shared {
    options: ClientOptions,
    dispatcher: SyncMutex<Dispatcher>,
    state: watch::Sender<ClientState>,
    hooks: SyncMutex<Vec<ResumeHook>>,
    notifications: broadcast::Sender<AsyncRecord>,
    console: broadcast::Sender<StreamRecord>,
}

impl Shared {
    fn dispatcher(&self) -> MutexGuard<'_, Dispatcher> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Move to `next` unless already there or disconnected for good.
    fn transition(&self, next: ClientState) {
        self.state.send_if_modified(|current| {
            if *current == ClientState::Disconnected || *current == next {
                return false;
            }
            tracing::debug!(from = ?current, to = ?next, "client state");
            *current = next;
            true
        });
    }

    fn close(&self, reason: &str) {
        let previous = self.state.send_replace(ClientState::Disconnected);
        if previous != ClientState::Disconnected {
            tracing::info!(reason, "debugger connection closed");
        }
        self.dispatcher().close(MiError::ConnectionClosed);
    }

    fn handle_line(&self, line: &str, post: &mpsc::UnboundedSender<Posted>) {
        tracing::debug!(line, "<-");
        let parsed = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                if let Some(token) = result_token(line) {
                    // The command it answers still has to finish, or every
                    // later FIFO result would be off by one.
                    tracing::warn!(error = %e, line, "unparseable result record");
                    let routed = self.dispatcher().fail(token, e);
                    log_routed(routed, line);
                    return;
                }
                tracing::warn!(error = %e, line, "unparseable record, passing through");
                let _ = self.console.send(StreamRecord {
                    kind: StreamKind::Program,
                    text: line.to_string(),
                });
                return;
            }
        };

        match parsed {
            Line::Prompt => {}
            Line::Stream(record) => {
                let _ = self.console.send(record);
            }
            Line::Result(record) => self.handle_result(record, line),
            Line::Async(record) => self.handle_async(record, post),
        }
    }

    fn handle_result(&self, record: ResultRecord, line: &str) {
        if let Some(next) = self.state().after_result(record.class) {
            self.transition(next);
        }
        if record.class == ResultClass::Exit {
            tracing::info!("debugger is exiting");
        }
        let routed = self.dispatcher().complete(record);
        log_routed(routed, line);
    }

    fn handle_async(&self, record: AsyncRecord, post: &mpsc::UnboundedSender<Posted>) {
        if record.is_stopped() && self.absorbs_fault(&record) {
            // The state is left alone: to every observer the target never
            // stopped.
            tracing::warn!(
                signal = record.field("signal-name").unwrap_or_default(),
                "continuing past fault signal"
            );
            let resume = Posted {
                command: "-exec-continue".to_string(),
                admission: Admission::Resume,
            };
            if post.send(resume).is_err() {
                tracing::warn!("command queue closed, cannot auto-continue");
            }
            return;
        }
        if let Some(next) = self.state().after_async(&record) {
            self.transition(next);
        }
        if record.is_running() {
            // Hooks finish before the next line is read, so nothing stale
            // survives into a later stop.
            let hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
            for hook in hooks.iter() {
                hook();
            }
        }
        let _ = self.notifications.send(record);
    }

    fn absorbs_fault(&self, record: &AsyncRecord) -> bool {
        if self.options.fault_policy != FaultPolicy::AutoContinue {
            return false;
        }
        if record.field("reason") != Some("signal-received") {
            return false;
        }
        record
            .field("signal-name")
            .is_some_and(|sig| self.options.fault_signals.iter().any(|s| s == sig))
    }
}

fn log_routed(routed: Routed, line: &str) {
    match routed {
        Routed::Delivered { .. } => {}
        Routed::Detached { command } => tracing::debug!(command = %command, "detached command done"),
        Routed::Late { command } => {
            tracing::warn!(command = %command, "discarding result of timed-out command")
        }
        Routed::Unmatched => tracing::warn!(line, "discarding result with no pending command"),
    }
}

/// The sending side: token allocation, the FIFO gate and the writer queue.
struct Outbox {
    shared: Arc<Shared>,
    writer: mpsc::Sender<Vec<u8>>,
    gate: Mutex<()>,
}

impl Outbox {
    fn admit(&self, admission: Admission) -> Result<(), MiError> {
        match (admission, self.shared.state()) {
            (Admission::Resume, ClientState::Running) => Ok(()),
            (_, state) => state.admit_command(),
        }
    }

    async fn send(
        &self,
        text: &str,
        timeout: Option<Duration>,
        admission: Admission,
    ) -> Result<ResultRecord, MiError> {
        let command = validate_command(text)?.to_string();
        self.admit(admission)?;

        let mode = self.shared.options.correlation;
        let _turn = match mode {
            Correlation::Fifo => Some(self.gate.lock().await),
            Correlation::Token => None,
        };
        // The state may have moved while waiting for our turn.
        self.admit(admission)?;

        let (id, rx) = self.shared.dispatcher().register(&command)?;
        let token = (mode == Correlation::Token).then_some(id);
        tracing::debug!(command = %command, ?token, "->");
        if self.writer.send(encode_command(token, &command)).await.is_err() {
            self.shared.dispatcher().abandon(id);
            return Err(MiError::Transport("writer task has stopped".into()));
        }

        let reply = match timeout.or(self.shared.options.command_timeout) {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.shared.dispatcher().abandon(id);
                    tracing::warn!(command = %command, "command timed out");
                    return Err(MiError::Timeout {
                        command,
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            },
            None => rx.await,
        };

        let record = reply.map_err(|_| MiError::ConnectionClosed)??;
        if record.is_error() {
            return Err(MiError::Command {
                message: record.error_message().unwrap_or("unknown error").to_string(),
                code: record.error_code().map(String::from),
            });
        }
        Ok(record)
    }

    async fn send_detached(&self, text: &str) -> Result<(), MiError> {
        let id = self.shared.dispatcher().register_detached(text)?;
        let token = (self.shared.options.correlation == Correlation::Token).then_some(id);
        tracing::debug!(command = text, ?token, "-> (detached)");
        self.writer
            .send(encode_command(token, text))
            .await
            .map_err(|_| MiError::Transport("writer task has stopped".into()))
    }
}

/// Client for a GDB/MI backend.
pub struct ProtocolClient {
    outbox: Arc<Outbox>,
    post_tx: mpsc::UnboundedSender<Posted>,
    reader: JoinHandle<()>,
    child: SyncMutex<Option<Child>>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("state", &self.state())
            .field("correlation", &self.outbox.shared.options.correlation)
            .finish()
    }
}

impl ProtocolClient {
    /// Start a client over an already-open connection. The client begins in
    /// [`ClientState::Connecting`]; call [`run_init_script`](Self::run_init_script)
    /// to reach `Ready`.
    pub fn connect<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (state, _) = watch::channel(ClientState::Connecting);
        let (notifications, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (console, _) = broadcast::channel(BROADCAST_CAPACITY);
        let shared = Arc::new(Shared {
            dispatcher: SyncMutex::new(Dispatcher::new(options.correlation)),
            options,
            state,
            hooks: SyncMutex::new(Vec::new()),
            notifications,
            console,
        });

        let (writer_tx, writer_rx) = mpsc::channel::<Vec<u8>>(WRITER_QUEUE);
        tokio::spawn(write_loop(writer, writer_rx));

        let outbox = Arc::new(Outbox {
            shared: shared.clone(),
            writer: writer_tx,
            gate: Mutex::new(()),
        });

        let (post_tx, post_rx) = mpsc::unbounded_channel();
        tokio::spawn(post_loop(Arc::downgrade(&outbox), post_rx));
        let reader = tokio::spawn(read_loop(reader, shared, post_tx.clone()));

        Self {
            outbox,
            post_tx,
            reader,
            child: SyncMutex::new(None),
        }
    }

    /// Launch `gdb --interpreter=mi2` and connect to its stdio.
    pub fn spawn(gdb: &Path, options: ClientOptions) -> Result<Self, MiError> {
        let mut child = Command::new(gdb)
            .arg("--quiet")
            .arg("--nx")
            .arg("--interpreter=mi2")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MiError::Spawn(format!("{}: {e}", gdb.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MiError::Spawn("could not capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MiError::Spawn("could not capture stdout".into()))?;

        tracing::info!(gdb = %gdb.display(), pid = ?child.id(), "debugger started");
        let client = Self::connect(stdout, stdin, options);
        *client.child.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
        Ok(client)
    }

    fn shared(&self) -> &Shared {
        &self.outbox.shared
    }

    pub fn state(&self) -> ClientState {
        self.shared().state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.shared().state.subscribe()
    }

    /// Async records (`*`, `+`, `=`) in arrival order.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<AsyncRecord> {
        self.shared().notifications.subscribe()
    }

    /// Console, target, log and program output.
    pub fn subscribe_console(&self) -> broadcast::Receiver<StreamRecord> {
        self.shared().console.subscribe()
    }

    /// Register a hook run by the reader on every resume.
    pub fn on_resume(&self, hook: ResumeHook) {
        self.shared()
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Send one command and wait for its result record.
    ///
    /// `timeout` overrides the client default for this command. Fails with
    /// [`MiError::Busy`] while the target runs, without writing anything.
    pub async fn send_command(
        &self,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<ResultRecord, MiError> {
        self.outbox.send(text, timeout, Admission::Idle).await
    }

    /// Queue a command for the poster task without waiting for it.
    pub fn post_command(&self, text: &str) -> Result<(), MiError> {
        let command = validate_command(text)?;
        self.post_tx
            .send(Posted {
                command: command.to_string(),
                admission: Admission::Idle,
            })
            .map_err(|_| MiError::Disconnected)
    }

    /// Run the debugger init script and move to `Ready`. A command the
    /// debugger rejects is logged and skipped.
    pub async fn run_init_script(&self, script: &[String]) -> Result<(), MiError> {
        if self.state() != ClientState::Connecting {
            return Err(MiError::InvalidState(format!(
                "init script needs a connecting client, state is {:?}",
                self.state()
            )));
        }
        for line in script {
            match self.send_command(line, None).await {
                Ok(_) => {}
                Err(MiError::Command { message, .. }) => {
                    tracing::warn!(command = %line, message = %message, "init command rejected");
                }
                Err(e) => return Err(e),
            }
        }
        self.shared().state.send_if_modified(|s| {
            if *s == ClientState::Connecting {
                *s = ClientState::Ready;
                true
            } else {
                false
            }
        });
        tracing::info!(commands = script.len(), "debugger initialized");
        Ok(())
    }

    /// Attach to a remote stub at `host:port`.
    pub async fn target_remote(&self, endpoint: &str) -> Result<ResultRecord, MiError> {
        self.send_command(&format!("-target-select remote {endpoint}"), None)
            .await
    }

    /// Ask a running target to stop. The state changes only once the
    /// debugger reports `*stopped`.
    pub async fn interrupt(&self) -> Result<(), MiError> {
        match self.state() {
            ClientState::Running => self.outbox.send_detached("-exec-interrupt").await,
            ClientState::Disconnected => Err(MiError::Disconnected),
            other => Err(MiError::InvalidState(format!(
                "interrupt needs a running target, state is {other:?}"
            ))),
        }
    }

    pub async fn exec_continue(&self) -> Result<(), MiError> {
        self.send_command("-exec-continue", None).await.map(|_| ())
    }

    pub async fn select_thread(&self, thread_id: u32) -> Result<(), MiError> {
        self.send_command(&format!("-thread-select {thread_id}"), None)
            .await
            .map(|_| ())
    }

    /// Frames of the selected thread, innermost first.
    pub async fn list_frames(&self) -> Result<Vec<StackFrame>, MiError> {
        let record = self.send_command("-stack-list-frames", None).await?;
        parse_frames(&record)
    }

    /// Drop the connection. Every outstanding command fails with
    /// [`MiError::ConnectionClosed`]; the client cannot be reused.
    pub fn kill(&self) {
        self.shared().close("killed");
        if let Some(child) = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            if let Err(e) = child.start_kill() {
                tracing::warn!(error = %e, "failed to kill debugger");
            }
        }
        self.reader.abort();
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = rx.recv().await {
        if writer.write_all(&bytes).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

async fn read_loop<R>(reader: R, shared: Arc<Shared>, post: mpsc::UnboundedSender<Posted>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = String::new();
    loop {
        match read_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => shared.handle_line(&line, &post),
            Ok(None) => {
                shared.close("end of stream");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "debugger read failed");
                shared.close("read error");
                break;
            }
        }
    }
}

async fn post_loop(outbox: Weak<Outbox>, mut rx: mpsc::UnboundedReceiver<Posted>) {
    while let Some(Posted { command, admission }) = rx.recv().await {
        let Some(outbox) = outbox.upgrade() else {
            break;
        };
        match outbox.send(&command, None, admission).await {
            Ok(record) => tracing::debug!(command = %command, class = %record.class, "posted command done"),
            Err(e) => tracing::warn!(command = %command, error = %e, "posted command failed"),
        }
    }
}
