//! Line-oriented console over a jdb session.
//!
//! Run with: cargo run -p jdb-console -- --port 8700
//!
//! Each stdin line is sent as a synchronous command and its reply printed.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use jdb_bridge_client::{ClientError, JdbClient, SessionSetup};
use jdb_bridge_core::{Record, setup::DEFAULT_PORT};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Attach jdb to a JVM and drive it from the terminal
#[derive(Parser)]
#[command(name = "jdb-console")]
#[command(about = "Drive a jdb session one command at a time", long_about = None)]
struct Cli {
    /// Host the target JVM listens on
    #[arg(long, default_value = "localhost")]
    host: String,

    /// JDWP port of the target JVM
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// JDK installation to take jdb from
    #[arg(long)]
    jdk_root: Option<PathBuf>,

    /// Directory for the startup script and jdb's working directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Command to run at startup (repeatable)
    #[arg(short = 'x', long = "exec")]
    startup: Vec<String>,

    /// Inactivity timeout for each command, in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Print unsolicited events as they arrive
    #[arg(long)]
    events: bool,
}

impl Cli {
    fn setup(&self) -> SessionSetup {
        let mut setup = SessionSetup::new(self.host.clone(), self.port);
        if let Some(dir) = &self.cache_dir {
            setup = setup.cache_dir(dir);
        }
        if let Some(root) = &self.jdk_root {
            setup = setup.jdk_root(root);
        }
        for command in &self.startup {
            setup = setup.startup_command(command);
        }
        setup
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_millis(cli.timeout_ms);

    let client = JdbClient::new(cli.setup());
    client.start().await.context("failed to start jdb")?;

    if cli.events {
        let mut live = client.subscribe();
        tokio::spawn(async move {
            while let Ok(record) = live.recv().await {
                if let Record::Async(event) = record {
                    println!("* {}", event.text);
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        match client.send_command(command, timeout).await {
            Ok(Some(reply)) => {
                let text = reply.text();
                if !text.is_empty() {
                    println!("{text}");
                }
                if reply.is_error() {
                    tracing::warn!(token = %reply.token, "jdb rejected `{command}`");
                }
                println!("{}", reply.prompt);
            }
            Ok(None) => {
                println!("session ended");
                break;
            }
            Err(e @ ClientError::Timeout { .. }) => tracing::warn!("{e}"),
            Err(e) => {
                client.dispose().await;
                return Err(e.into());
            }
        }
    }

    client.dispose().await;
    Ok(())
}
