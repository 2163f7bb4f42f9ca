//! jdb command-line building.

use std::path::PathBuf;

use jdb_bridge_core::SessionSetup;
use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Extra arguments cannot be parsed: {0}")]
    InvalidArgs(String),
    #[error("Program path is empty")]
    EmptyProgram,
    #[error("Failed to quote command: {0}")]
    QuoteError(#[from] shlex::QuoteError),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Render as a single shell-quoted line, for logging.
    ///
    /// # Errors
    /// Returns error if an argument cannot be quoted.
    pub fn display(&self) -> Result<String, CommandBuildError> {
        let program = self.program.to_string_lossy();
        let words = std::iter::once(program.as_ref()).chain(self.args.iter().map(String::as_str));
        Ok(shlex::try_join(words)?)
    }
}

/// Builder for the jdb invocation.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// jdb executable.
    pub program: PathBuf,
    /// Arguments, in order.
    pub params: Vec<String>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            params: Vec::new(),
        }
    }

    /// Attach to a running VM through the given connector.
    #[must_use]
    pub fn connect<S: Into<String>>(mut self, connector: S) -> Self {
        self.params.push("-connect".to_string());
        self.params.push(connector.into());
        self
    }

    /// Append parameters.
    #[must_use]
    pub fn extend_params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params.extend(more.into_iter().map(Into::into));
        self
    }

    /// Append parameters given as one command-line string.
    ///
    /// # Errors
    /// Returns error if the string cannot be split.
    pub fn extend_command_line(self, line: &str) -> Result<Self, CommandBuildError> {
        let parts = split_command_line(line)?;
        Ok(self.extend_params(parts))
    }

    /// Build the invocation for a session.
    ///
    /// # Errors
    /// Returns error if the extra arguments are invalid.
    pub fn for_session<P: Into<PathBuf>>(
        program: P,
        setup: &SessionSetup,
    ) -> Result<CommandParts, CommandBuildError> {
        let mut builder = Self::new(program).connect(setup.connector());
        if let Some(extra) = setup.extra_args.as_deref() {
            builder = builder.extend_command_line(extra)?;
        }
        builder.build()
    }

    /// Build command parts.
    ///
    /// # Errors
    /// Returns error if the program is empty.
    pub fn build(self) -> Result<CommandParts, CommandBuildError> {
        if self.program.as_os_str().is_empty() {
            return Err(CommandBuildError::EmptyProgram);
        }
        Ok(CommandParts {
            program: self.program,
            args: self.params,
        })
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        Ok(winsplit::split(input))
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidArgs(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_session() {
        let setup = SessionSetup::new("localhost", 8700);
        let parts = CommandBuilder::for_session("/jdk/bin/jdb", &setup).unwrap();
        assert_eq!(parts.program, PathBuf::from("/jdk/bin/jdb"));
        assert_eq!(
            parts.args,
            vec![
                "-connect".to_string(),
                "com.sun.jdi.SocketAttach:hostname=localhost,port=8700".to_string()
            ]
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn test_extra_args_are_split() {
        let setup = SessionSetup::default().extra_args("-sourcepath '/my src' -J-Xmx256m");
        let parts = CommandBuilder::for_session("jdb", &setup).unwrap();
        assert_eq!(&parts.args[2..], ["-sourcepath", "/my src", "-J-Xmx256m"]);
        assert!(parts.display().unwrap().contains("'/my src'"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_unbalanced_quotes_rejected() {
        let setup = SessionSetup::default().extra_args("-sourcepath 'oops");
        assert!(matches!(
            CommandBuilder::for_session("jdb", &setup),
            Err(CommandBuildError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_empty_program() {
        assert!(matches!(
            CommandBuilder::new("").build(),
            Err(CommandBuildError::EmptyProgram)
        ));
    }
}
