//! Notifications delivered by a transport.

/// One notification from the debugger process, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A line of standard output, without its terminator.
    Stdout(String),
    /// A line of standard error, without its terminator.
    Stderr(String),
    /// The process exited. Carries the exit code when one is available.
    Exited(Option<i32>),
}

impl TransportEvent {
    /// Create a stdout event.
    #[must_use]
    pub fn stdout<S: Into<String>>(line: S) -> Self {
        Self::Stdout(line.into())
    }

    /// Create a stderr event.
    #[must_use]
    pub fn stderr<S: Into<String>>(line: S) -> Self {
        Self::Stderr(line.into())
    }
}
