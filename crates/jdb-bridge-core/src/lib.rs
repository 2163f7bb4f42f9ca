//! Core abstractions for driving a jdb session.
//!
//! This crate provides the fundamental building blocks:
//! - `Record` - Classified unit of debugger output
//! - `TransportEvent` - Typed notifications from the debugger process
//! - `SessionSetup` - Connection settings and startup script
//! - `RecordStore` - Broadcast + history of routed records
//! - Transport and Launcher traits

pub mod event;
pub mod record;
pub mod record_store;
pub mod setup;
pub mod traits;

pub use event::TransportEvent;
pub use record::{
    AsyncClass, AsyncRecord, Prompt, Record, ResultClass, ResultRecord, StopReason, StreamKind,
    StreamRecord, Token,
};
pub use record_store::RecordStore;
pub use setup::SessionSetup;
pub use traits::{LaunchedTransport, Launcher, Transport, TransportError};
