//! Core traits for launching and talking to a debugger process.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{SessionSetup, TransportEvent};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Session setup failed: {0}")]
    Setup(String),
    #[error("Transport is closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound half of a running debugger process.
///
/// Inbound traffic arrives separately as [`TransportEvent`]s.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one command line to the process, verbatim.
    async fn send_command(&self, command: &str) -> Result<(), TransportError>;

    /// Stop the process and release its resources. Idempotent.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// A started transport and the channel its events arrive on.
pub struct LaunchedTransport {
    /// Handle for writing commands.
    pub transport: Arc<dyn Transport>,
    /// stdout/stderr lines and the exit notification, in order.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Trait for starting debugger processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start a debugger process for the given session setup.
    async fn launch(&self, setup: &SessionSetup) -> Result<LaunchedTransport, TransportError>;
}
