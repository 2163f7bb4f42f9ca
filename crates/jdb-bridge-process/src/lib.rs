//! Process transport for jdb.
//!
//! Provides:
//! - `ProcessLauncher` - Spawn jdb for a `SessionSetup`
//! - `ProcessTransport` - Write commands to a running jdb
//! - `LineFramer` - Split jdb output into lines, including bare prompts
//! - Command building and jdb location utilities

pub mod command;
pub mod framing;
pub mod locate;
pub mod transport;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use framing::LineFramer;
pub use locate::{locate_jdb, resolve_executable_path};
pub use transport::{ProcessLauncher, ProcessTransport};
