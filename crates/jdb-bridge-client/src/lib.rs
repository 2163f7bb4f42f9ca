//! Command bridge over a jdb session.
//!
//! Provides:
//! - `JdbClient` - Token allocation, synchronous waits with a sliding
//!   inactivity timeout, and recovery from unsolicited output
//! - `Router` - Classifies transport output into records
//! - `testing` - In-memory transport for exercising the client (`testing`
//!   feature)

pub mod client;
pub mod router;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{
    ClientConfig, ClientError, CommandCallback, DEFAULT_COMMAND_TIMEOUT, FATAL_EXCEPTION_MARKER,
    JdbClient, SessionState,
};
pub use jdb_bridge_core::{Record, ResultRecord, SessionSetup, Token};
pub use router::{InboundHandler, Router};
