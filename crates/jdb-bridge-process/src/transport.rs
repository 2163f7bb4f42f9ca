//! jdb child process transport.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use jdb_bridge_core::{LaunchedTransport, Launcher, SessionSetup, Transport, TransportError, TransportEvent};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    process::{ChildStdin, Command},
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    command::CommandBuilder,
    framing::LineFramer,
    locate::{locate_jdb, resolve_executable_path},
};

/// How long jdb gets to exit on its own after a shutdown request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Default limit for the port-forwarding step.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 4096;

/// Writes commands to a running jdb process.
///
/// Output and the exit notification arrive on the event channel returned by
/// [`ProcessTransport::spawn`].
pub struct ProcessTransport {
    stdin: Arc<Mutex<ChildStdin>>,
    shutdown_tx: StdMutex<Option<oneshot::Sender<()>>>,
}

impl ProcessTransport {
    /// Spawn `program` and start delivering its output.
    ///
    /// # Errors
    /// Returns error if the process cannot be started.
    pub fn spawn(
        program: &Path,
        args: &[String],
        working_dir: &Path,
    ) -> Result<LaunchedTransport, TransportError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .group_spawn()
            .map_err(|e| TransportError::SpawnFailed(format!("{}: {e}", program.display())))?;

        let stdin = child
            .inner()
            .stdin
            .take()
            .ok_or_else(|| TransportError::SpawnFailed("stdin not captured".to_string()))?;
        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| TransportError::SpawnFailed("stdout not captured".to_string()))?;
        let stderr = child
            .inner()
            .stderr
            .take()
            .ok_or_else(|| TransportError::SpawnFailed("stderr not captured".to_string()))?;

        tracing::info!(pid = child.id(), program = %program.display(), "Spawned jdb");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let stdout_task = tokio::spawn(read_stdout(stdout, events_tx.clone()));
        let stderr_task = tokio::spawn(read_stderr(stderr, events_tx.clone()));
        tokio::spawn(watch_exit(child, shutdown_rx, [stdout_task, stderr_task], events_tx));

        let transport = Self {
            stdin: Arc::new(Mutex::new(stdin)),
            shutdown_tx: StdMutex::new(Some(shutdown_tx)),
        };

        Ok(LaunchedTransport {
            transport: Arc::new(transport),
            events: events_rx,
        })
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn send_command(&self, command: &str) -> Result<(), TransportError> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        let tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            // The watcher is gone if the process already exited.
            let _ = tx.send(());
        }
        Ok(())
    }
}

async fn read_stdout<R>(stdout: R, events: mpsc::UnboundedSender<TransportEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break, // EOF
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    if events.send(TransportEvent::Stdout(line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!("Error reading jdb stdout: {e}");
                break;
            }
        }
    }

    if let Some(rest) = framer.finish() {
        let _ = events.send(TransportEvent::Stdout(rest));
    }
}

async fn read_stderr<R>(stderr: R, events: mpsc::UnboundedSender<TransportEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut buffer = String::new();

    loop {
        buffer.clear();
        match reader.read_line(&mut buffer).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let line = buffer.trim_end_matches(['\r', '\n']).to_string();
                if events.send(TransportEvent::Stderr(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Error reading jdb stderr: {e}");
                break;
            }
        }
    }
}

async fn watch_exit(
    mut child: AsyncGroupChild,
    shutdown_rx: oneshot::Receiver<()>,
    readers: [JoinHandle<()>; 2],
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = shutdown_rx => {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::debug!("jdb did not exit in time, killing process group");
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill jdb: {e}");
                    }
                    child.wait().await
                }
            }
        }
    };

    // Deliver every line before the exit notification.
    for reader in readers {
        let _ = reader.await;
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!("Failed to wait for jdb: {e}");
            None
        }
    };
    tracing::info!(?code, "jdb exited");
    let _ = events.send(TransportEvent::Exited(code));
}

/// Launches jdb as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    /// Limit for the port-forwarding command.
    pub forward_timeout: Duration,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self {
            forward_timeout: FORWARD_TIMEOUT,
        }
    }
}

impl ProcessLauncher {
    /// Create a launcher with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn forward_port(&self, argv: &[String]) -> Result<(), TransportError> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };
        let program: PathBuf = resolve_executable_path(program)
            .await
            .ok_or_else(|| TransportError::ExecutableNotFound(program.clone()))?;

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        let output = tokio::time::timeout(self.forward_timeout, child.wait_with_output())
            .await
            .map_err(|_| TransportError::Setup(format!("{} timed out", program.display())))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Setup(format!(
                "{} failed ({}): {}",
                program.display(),
                output.status,
                stderr.trim()
            )));
        }
        tracing::debug!(program = %program.display(), "Port forwarding ready");
        Ok(())
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, setup: &SessionSetup) -> Result<LaunchedTransport, TransportError> {
        if let Some(argv) = setup.port_forward.as_deref() {
            self.forward_port(argv).await?;
        }

        let program = locate_jdb(setup.jdk_root.as_deref()).await?;
        let parts = CommandBuilder::for_session(program, setup)
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        if let Ok(line) = parts.display() {
            tracing::debug!(command = %line, "Launching jdb");
        }

        ProcessTransport::spawn(&parts.program, &parts.args, setup.working_dir())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    async fn collect_until_exit(
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Vec<TransportEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = matches!(event, TransportEvent::Exited(_));
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_echoes_commands_and_reports_exit() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec![
            "-c".to_string(),
            "printf '> '; read line; echo \"got $line\"; echo oops >&2; exit 3".to_string(),
        ];
        let mut launched = ProcessTransport::spawn(Path::new("/bin/sh"), &args, dir.path()).unwrap();

        assert_eq!(
            launched.events.recv().await,
            Some(TransportEvent::Stdout(">".to_string()))
        );
        launched.transport.send_command("where").await.unwrap();

        let rest = collect_until_exit(&mut launched.events).await;
        assert!(rest.contains(&TransportEvent::Stdout("got where".to_string())));
        assert!(rest.contains(&TransportEvent::Stderr("oops".to_string())));
        assert_eq!(rest.last(), Some(&TransportEvent::Exited(Some(3))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let mut launched = ProcessTransport::spawn(Path::new("/bin/sh"), &args, dir.path()).unwrap();

        launched.transport.shutdown().await.unwrap();
        launched.transport.shutdown().await.unwrap();

        let events = collect_until_exit(&mut launched.events).await;
        assert!(matches!(events.last(), Some(TransportEvent::Exited(_))));
    }

    #[tokio::test]
    async fn test_failed_port_forward_is_reported() {
        let launcher = ProcessLauncher::new();
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "exit 1".to_string()];
        let result = launcher.forward_port(&argv).await;
        assert!(matches!(result, Err(TransportError::Setup(_))));
    }
}
