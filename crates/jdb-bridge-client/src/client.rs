//! jdb protocol client.
//!
//! `JdbClient` owns one jdb session. Commands are written verbatim; jdb has no
//! correlation syntax, so replies are attributed in issue order: each prompt
//! completes the oldest pending command. The one exception is the prompt that
//! follows an unsolicited stop event, which belongs to the event.

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use jdb_bridge_core::{
    LaunchedTransport, Launcher, Record, RecordStore, ResultClass, ResultRecord, SessionSetup,
    StreamKind, Token, Transport, TransportError,
};
use tokio::{
    sync::{Mutex, broadcast, oneshot, watch},
    time::{self, Instant},
};
use uuid::Uuid;

use crate::router::{InboundHandler, Router};

/// Default inactivity window for synchronous commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Output marking an uncaught exception that leaves the target suspended.
pub const FATAL_EXCEPTION_MARKER: &str = "Exception occurred:";

/// Completion callback for an asynchronous command.
///
/// Receives `None` when the session ends before the reply arrives.
pub type CommandCallback = Box<dyn FnOnce(Option<ResultRecord>) + Send + 'static>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Inactivity window used by [`JdbClient::send`].
    pub command_timeout: Duration,
    /// stdout text that triggers an automatic `cont`.
    pub fatal_exception_marker: String,
    /// Whether to issue `cont` when the marker is seen.
    pub auto_continue: bool,
    /// Bytes of record history kept for late subscribers.
    pub history_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            fatal_exception_marker: FATAL_EXCEPTION_MARKER.to_string(),
            auto_continue: true,
            history_bytes: jdb_bridge_core::record_store::DEFAULT_HISTORY_BYTES,
        }
    }
}

/// Client error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Timed out after {timeout:?} of inactivity waiting for reply to `{command}`")]
    Timeout { command: String, timeout: Duration },
    #[error("A synchronous command is already waiting for its reply")]
    Busy,
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Session disposed")]
    Disposed,
    #[error("Operation not supported by jdb: {0}")]
    Unsupported(&'static str),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `start` has not completed.
    Created,
    /// Running, no synchronous command outstanding.
    Idle,
    /// Running, one synchronous command waiting for its reply.
    AwaitingSynchronousReply,
    /// jdb exited; commands are no-ops.
    Exited,
    /// Torn down. Terminal.
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Starting,
    Running,
    Exited,
    Disposed,
}

struct PendingCommand {
    token: Token,
    command: String,
    callback: Option<CommandCallback>,
    output: Vec<String>,
    failed: bool,
}

impl PendingCommand {
    fn complete(self, mut record: ResultRecord) -> (Option<CommandCallback>, ResultRecord) {
        record.token = self.token;
        record.output = self.output;
        record.class = if self.failed {
            ResultClass::Error
        } else {
            ResultClass::Done
        };
        (self.callback, record)
    }
}

struct Session {
    lifecycle: Lifecycle,
    next_token: Token,
    pending: VecDeque<PendingCommand>,
    sync_waiting: bool,
    event_owns_prompt: bool,
    transport: Option<Arc<dyn Transport>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl Session {
    const fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Created,
            next_token: Token::FIRST,
            pending: VecDeque::new(),
            sync_waiting: false,
            event_owns_prompt: false,
            transport: None,
            stop_tx: None,
        }
    }

    fn active_transport(&self) -> Option<Arc<dyn Transport>> {
        match self.lifecycle {
            Lifecycle::Running => self.transport.clone(),
            _ => None,
        }
    }

    fn remove_pending(&mut self, token: Token) -> Option<PendingCommand> {
        let index = self.pending.iter().position(|p| p.token == token)?;
        self.pending.remove(index)
    }

    /// Fold one record into session state.
    ///
    /// Returns the record to publish and, if it completed a command, that
    /// command's callback.
    fn apply(&mut self, record: Record) -> (Record, Option<CommandCallback>) {
        match record {
            Record::Result(result) => {
                if self.event_owns_prompt {
                    self.event_owns_prompt = false;
                    return (Record::Result(result), None);
                }
                match self.pending.pop_front() {
                    Some(head) => {
                        let (callback, result) = head.complete(result);
                        (Record::Result(result), callback)
                    }
                    None => (Record::Result(result), None),
                }
            }
            Record::Async(event) => {
                if event.is_stop() {
                    self.event_owns_prompt = true;
                }
                (Record::Async(event), None)
            }
            Record::Stream(text) => {
                if text.kind == StreamKind::Console && !self.event_owns_prompt {
                    if let Some(head) = self.pending.front_mut() {
                        head.failed |= text.is_error();
                        head.output.push(text.text.clone());
                    }
                }
                (Record::Stream(text), None)
            }
        }
    }

    /// End the session, handing back everything that still needs releasing.
    fn end(&mut self, lifecycle: Lifecycle) -> Teardown {
        self.lifecycle = lifecycle;
        self.event_owns_prompt = false;
        Teardown {
            transport: self.transport.take(),
            stop_tx: self.stop_tx.take(),
            pending: self.pending.drain(..).collect(),
        }
    }
}

struct Teardown {
    transport: Option<Arc<dyn Transport>>,
    stop_tx: Option<oneshot::Sender<()>>,
    pending: Vec<PendingCommand>,
}

impl Teardown {
    /// Resolve every outstanding command with an absent result.
    fn release_pending(self) -> Option<Arc<dyn Transport>> {
        if let Some(tx) = self.stop_tx {
            let _ = tx.send(());
        }
        for pending in self.pending {
            tracing::debug!(token = %pending.token, command = %pending.command, "Releasing pending command");
            if let Some(callback) = pending.callback {
                invoke(callback, pending.token, None);
            }
        }
        self.transport
    }
}

struct Inner {
    id: Uuid,
    config: ClientConfig,
    session: StdMutex<Session>,
    /// Serializes token registration with the transport write, so the
    /// pending queue order always matches the wire order.
    write_lock: Mutex<()>,
    activity: watch::Sender<Instant>,
    records: RecordStore,
}

impl Inner {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        self.activity.send_replace(Instant::now());
    }

    fn is_active(&self) -> bool {
        self.lock_session().active_transport().is_some()
    }

    async fn send_async(
        &self,
        command: &str,
        callback: Option<CommandCallback>,
    ) -> Result<Option<Token>, ClientError> {
        let _write = self.write_lock.lock().await;

        let (token, transport) = {
            let mut session = self.lock_session();
            let Some(transport) = session.active_transport() else {
                tracing::debug!(session = %self.id, command, "No active transport, ignoring command");
                return Ok(None);
            };
            let token = session.next_token;
            session.next_token = token.next();
            session.pending.push_back(PendingCommand {
                token,
                command: command.to_string(),
                callback,
                output: Vec::new(),
                failed: false,
            });
            (token, transport)
        };

        tracing::debug!(session = %self.id, %token, command, "SendAsyncCommand");

        if let Err(e) = transport.send_command(command).await {
            tracing::warn!(session = %self.id, %token, command, "Failed to write command: {e}");
            self.lock_session().remove_pending(token);
            return Err(e.into());
        }
        Ok(Some(token))
    }

    /// Wait for a reply, giving up only after `timeout` without any activity.
    async fn await_reply(
        &self,
        command: &str,
        mut reply: oneshot::Receiver<Option<ResultRecord>>,
        timeout: Duration,
    ) -> Result<Option<ResultRecord>, ClientError> {
        let activity = self.activity.subscribe();
        // Activity from before the call does not count against it.
        let started = Instant::now();
        let deadline = || (*activity.borrow()).max(started) + timeout;

        loop {
            tokio::select! {
                biased;
                result = &mut reply => {
                    // A dropped sender means the command was released.
                    return Ok(result.unwrap_or(None));
                }
                () = time::sleep_until(deadline()) => {
                    // Activity may have pushed the deadline out while we slept.
                    if Instant::now() >= deadline() {
                        tracing::warn!(session = %self.id, command, ?timeout, "Synchronous command timed out");
                        return Err(ClientError::Timeout {
                            command: command.to_string(),
                            timeout,
                        });
                    }
                }
            }
        }
    }

    fn publish(&self, record: Record, callback: Option<CommandCallback>) {
        let reply = match (&record, &callback) {
            (Record::Result(result), Some(_)) => Some(result.clone()),
            _ => None,
        };
        self.records.push(record);
        if let Some(callback) = callback {
            let token = reply.as_ref().map_or(Token::NONE, |r| r.token);
            invoke(callback, token, reply);
        }
    }
}

/// Run a completion callback. A panic is logged and contained.
fn invoke(callback: CommandCallback, token: Token, reply: Option<ResultRecord>) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(reply))).is_err() {
        tracing::error!(%token, "Command callback panicked");
    }
}

#[async_trait]
impl InboundHandler for Inner {
    async fn on_stdout(&self, line: &str, record: Option<Record>) {
        self.touch();
        let Some(record) = record else {
            return;
        };
        tracing::trace!(session = %self.id, line, "ProcessStdout");

        let (record, callback) = self.lock_session().apply(record);
        self.publish(record, callback);

        if self.config.auto_continue && line.contains(&self.config.fatal_exception_marker) {
            tracing::info!(session = %self.id, line, "Uncaught exception, continuing");
            if let Err(e) = self.send_async("cont", None).await {
                tracing::error!(session = %self.id, "Failed to continue after exception: {e}");
            }
        }
    }

    async fn on_stderr(&self, line: &str, record: Option<Record>) {
        self.touch();
        let Some(record) = record else {
            return;
        };
        tracing::debug!(session = %self.id, line, "ProcessStderr");

        let (record, callback) = self.lock_session().apply(record);
        self.publish(record, callback);
    }

    async fn on_exit(&self, code: Option<i32>) {
        self.touch();
        tracing::info!(session = %self.id, ?code, "ProcessExited");

        let teardown = {
            let mut session = self.lock_session();
            if session.lifecycle != Lifecycle::Running {
                return;
            }
            session.end(Lifecycle::Exited)
        };
        // The process is gone; dropping the handle is all that is left.
        drop(teardown.release_pending());
    }
}

/// Clears the synchronous slot when the wait ends, however it ends.
struct SyncSlot<'a> {
    inner: &'a Inner,
}

impl<'a> SyncSlot<'a> {
    fn claim(inner: &'a Inner) -> Result<Self, ClientError> {
        let mut session = inner.lock_session();
        if session.sync_waiting {
            return Err(ClientError::Busy);
        }
        session.sync_waiting = true;
        Ok(Self { inner })
    }
}

impl Drop for SyncSlot<'_> {
    fn drop(&mut self) {
        self.inner.lock_session().sync_waiting = false;
    }
}

/// Client for one jdb session.
///
/// At most one synchronous command may wait at a time; asynchronous commands
/// may be queued freely and complete in issue order.
pub struct JdbClient {
    inner: Arc<Inner>,
    launcher: Arc<dyn Launcher>,
    setup: SessionSetup,
}

impl JdbClient {
    /// Create a client that launches jdb as a child process.
    #[cfg(feature = "process")]
    #[must_use]
    pub fn new(setup: SessionSetup) -> Self {
        Self::with_launcher(
            setup,
            Arc::new(jdb_bridge_process::ProcessLauncher::new()),
            ClientConfig::default(),
        )
    }

    /// Create a client with a custom launcher and configuration.
    #[must_use]
    pub fn with_launcher(
        setup: SessionSetup,
        launcher: Arc<dyn Launcher>,
        config: ClientConfig,
    ) -> Self {
        let (activity, _) = watch::channel(Instant::now());
        let records = RecordStore::with_limit(config.history_bytes);
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                config,
                session: StdMutex::new(Session::new()),
                write_lock: Mutex::new(()),
                activity,
                records,
            }),
            launcher,
            setup,
        }
    }

    /// Launch jdb and start routing its output.
    ///
    /// Writes the startup script first. Must be called at most once.
    ///
    /// # Errors
    /// Returns error if the session was already started, the script cannot be
    /// written, or the launch fails.
    pub async fn start(&self) -> Result<(), ClientError> {
        {
            let mut session = self.inner.lock_session();
            match session.lifecycle {
                Lifecycle::Created => session.lifecycle = Lifecycle::Starting,
                Lifecycle::Disposed => return Err(ClientError::Disposed),
                _ => return Err(ClientError::AlreadyStarted),
            }
        }

        let launched = match self.launch().await {
            Ok(launched) => launched,
            Err(e) => {
                let mut session = self.inner.lock_session();
                if session.lifecycle == Lifecycle::Starting {
                    session.lifecycle = Lifecycle::Created;
                }
                return Err(e);
            }
        };
        let LaunchedTransport { transport, events } = launched;

        let (stop_tx, stop_rx) = oneshot::channel();
        self.inner.touch();
        {
            let mut session = self.inner.lock_session();
            if session.lifecycle != Lifecycle::Starting {
                drop(session);
                tracing::debug!(session = %self.inner.id, "Disposed while starting, shutting transport down");
                if let Err(e) = transport.shutdown().await {
                    tracing::warn!(session = %self.inner.id, "Failed to shut down transport: {e}");
                }
                return Err(ClientError::Disposed);
            }
            session.lifecycle = Lifecycle::Running;
            session.transport = Some(transport);
            session.stop_tx = Some(stop_tx);
        }

        drop(Router::new(Arc::clone(&self.inner)).spawn(events, stop_rx));
        tracing::info!(session = %self.inner.id, host = %self.setup.host, port = self.setup.port, "jdb session started");
        Ok(())
    }

    async fn launch(&self) -> Result<LaunchedTransport, ClientError> {
        self.setup.write_execution_script().await?;
        Ok(self.launcher.launch(&self.setup).await?)
    }

    /// Issue a command without waiting for its reply.
    ///
    /// Returns the command's token, or `None` without doing anything if no
    /// transport is active.
    ///
    /// # Errors
    /// Returns error if the transport write fails.
    pub async fn send_async_command(
        &self,
        command: &str,
        callback: Option<CommandCallback>,
    ) -> Result<Option<Token>, ClientError> {
        self.inner.send_async(command, callback).await
    }

    /// Issue a command and wait for its reply.
    ///
    /// The wait ends with [`ClientError::Timeout`] only after `timeout`
    /// passes with no output at all from jdb; any line extends it. Returns
    /// `Ok(None)` if no transport is active or jdb exits first.
    ///
    /// # Errors
    /// Returns `Busy` if another synchronous command is waiting, `Timeout`
    /// on inactivity, or a transport error if the write fails.
    pub async fn send_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<Option<ResultRecord>, ClientError> {
        if !self.inner.is_active() {
            return Ok(None);
        }

        let _slot = SyncSlot::claim(&self.inner)?;
        let (tx, rx) = oneshot::channel();
        let callback: CommandCallback = Box::new(move |record| {
            let _ = tx.send(record);
        });

        if self.inner.send_async(command, Some(callback)).await?.is_none() {
            return Ok(None);
        }
        self.inner.await_reply(command, rx, timeout).await
    }

    /// [`send_command`](Self::send_command) with the configured timeout.
    ///
    /// # Errors
    /// See [`send_command`](Self::send_command).
    pub async fn send(&self, command: &str) -> Result<Option<ResultRecord>, ClientError> {
        self.send_command(command, self.inner.config.command_timeout)
            .await
    }

    /// Resume the target.
    ///
    /// # Errors
    /// Returns error if the transport write fails.
    pub async fn continue_execution(&self) -> Result<(), ClientError> {
        self.send_async_command("cont", None).await.map(drop)
    }

    /// Not supported: jdb attaches at launch only.
    ///
    /// # Errors
    /// Always returns `Unsupported`.
    pub fn attach(&self) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("attach"))
    }

    /// Not supported: jdb cannot detach and stay running.
    ///
    /// # Errors
    /// Always returns `Unsupported`.
    pub fn detach(&self) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("detach"))
    }

    /// Not supported: use [`dispose`](Self::dispose).
    ///
    /// # Errors
    /// Always returns `Unsupported`.
    pub fn terminate(&self) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("terminate"))
    }

    /// Tear the session down.
    ///
    /// Sends `quit` on a best-effort basis, shuts the transport down, and
    /// resolves every outstanding command, including a waiting synchronous
    /// one, with an absent result. Safe to call at any time, any number of
    /// times.
    pub async fn dispose(&self) {
        if let Err(e) = self.inner.send_async("quit", None).await {
            tracing::debug!(session = %self.inner.id, "Failed to send quit: {e}");
        }

        let teardown = self.inner.lock_session().end(Lifecycle::Disposed);
        if let Some(transport) = teardown.release_pending() {
            if let Err(e) = transport.shutdown().await {
                tracing::warn!(session = %self.inner.id, "Failed to shut down transport: {e}");
            }
            tracing::info!(session = %self.inner.id, "jdb session disposed");
        }
    }

    /// Alias for [`dispose`](Self::dispose).
    pub async fn stop(&self) {
        self.dispose().await;
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        let session = self.inner.lock_session();
        match session.lifecycle {
            Lifecycle::Created | Lifecycle::Starting => SessionState::Created,
            Lifecycle::Running if session.sync_waiting => SessionState::AwaitingSynchronousReply,
            Lifecycle::Running => SessionState::Idle,
            Lifecycle::Exited => SessionState::Exited,
            Lifecycle::Disposed => SessionState::Disposed,
        }
    }

    /// Session identifier used in logs.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.inner.id
    }

    /// Token the next command will get.
    #[must_use]
    pub fn next_token(&self) -> Token {
        self.inner.lock_session().next_token
    }

    /// Number of commands still waiting for a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock_session().pending.len()
    }

    /// When jdb last produced output or exited.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.inner.activity.borrow()
    }

    /// Live records, in arrival order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Record> {
        self.inner.records.subscribe()
    }

    /// Retained records.
    #[must_use]
    pub fn history(&self) -> Vec<Record> {
        self.inner.records.history()
    }

    /// The record store, for streaming access.
    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.inner.records
    }

    /// Session setup.
    #[must_use]
    pub const fn setup(&self) -> &SessionSetup {
        &self.setup
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Drop for JdbClient {
    fn drop(&mut self) {
        // Ends the dispatch loop, which releases the transport with it.
        let stop_tx = self.inner.lock_session().stop_tx.take();
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
    }
}
