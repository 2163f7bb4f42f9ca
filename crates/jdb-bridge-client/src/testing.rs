//! In-memory transport for driving a [`JdbClient`](crate::JdbClient) without jdb.
//!
//! A [`ScriptedLauncher`] hands out a [`ScriptedTransport`] that records every
//! command written to it. The paired [`ScriptedHandle`] injects output and the
//! exit notification, and an optional responder answers commands as they are
//! written.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use jdb_bridge_core::{
    LaunchedTransport, Launcher, SessionSetup, Transport, TransportError, TransportEvent,
};
use tokio::sync::mpsc;

/// Produces the output jdb would print in reply to a command.
pub type Responder = Box<dyn Fn(&str) -> Vec<TransportEvent> + Send + Sync>;

struct Shared {
    events: mpsc::UnboundedSender<TransportEvent>,
    commands: Mutex<Vec<String>>,
    responder: Option<Responder>,
    fail_writes: AtomicBool,
    shutdowns: AtomicUsize,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        // The client may already have stopped listening.
        let _ = self.events.send(event);
    }
}

/// Transport that records commands instead of writing them to a process.
pub struct ScriptedTransport {
    shared: Arc<Shared>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_command(&self, command: &str) -> Result<(), TransportError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());

        if let Some(responder) = &self.shared.responder {
            for event in responder(command) {
                self.shared.emit(event);
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.shared.shutdowns.fetch_add(1, Ordering::SeqCst) == 0 {
            self.shared.emit(TransportEvent::Exited(None));
        }
        Ok(())
    }
}

/// Test-side control over a scripted session.
#[derive(Clone)]
pub struct ScriptedHandle {
    shared: Arc<Shared>,
}

impl ScriptedHandle {
    /// Inject a stdout line.
    pub fn emit_stdout(&self, line: impl Into<String>) {
        self.shared.emit(TransportEvent::stdout(line));
    }

    /// Inject a stderr line.
    pub fn emit_stderr(&self, line: impl Into<String>) {
        self.shared.emit(TransportEvent::stderr(line));
    }

    /// Report process exit.
    pub fn exit(&self, code: Option<i32>) {
        self.shared.emit(TransportEvent::Exited(code));
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Commands written so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times the transport was asked to shut down.
    #[must_use]
    pub fn shutdown_count(&self) -> usize {
        self.shared.shutdowns.load(Ordering::SeqCst)
    }
}

/// Launcher for a single scripted session.
pub struct ScriptedLauncher {
    shared: Arc<Shared>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    fail: bool,
}

impl ScriptedLauncher {
    /// A launcher whose transport only records commands.
    #[must_use]
    pub fn new() -> (Self, ScriptedHandle) {
        Self::build(None, false)
    }

    /// A launcher whose transport answers each command with `responder`.
    #[must_use]
    pub fn with_responder<F>(responder: F) -> (Self, ScriptedHandle)
    where
        F: Fn(&str) -> Vec<TransportEvent> + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(responder)), false)
    }

    /// A launcher that always fails to start.
    #[must_use]
    pub fn failing() -> (Self, ScriptedHandle) {
        Self::build(None, true)
    }

    fn build(responder: Option<Responder>, fail: bool) -> (Self, ScriptedHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            events: events_tx,
            commands: Mutex::new(Vec::new()),
            responder,
            fail_writes: AtomicBool::new(false),
            shutdowns: AtomicUsize::new(0),
        });
        let launcher = Self {
            shared: Arc::clone(&shared),
            events: Mutex::new(Some(events_rx)),
            fail,
        };
        (launcher, ScriptedHandle { shared })
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn launch(&self, _setup: &SessionSetup) -> Result<LaunchedTransport, TransportError> {
        if self.fail {
            return Err(TransportError::SpawnFailed("scripted launch failure".to_string()));
        }
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::Closed)?;

        Ok(LaunchedTransport {
            transport: Arc::new(ScriptedTransport {
                shared: Arc::clone(&self.shared),
            }),
            events,
        })
    }
}
