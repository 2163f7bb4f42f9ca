//! Connection settings and startup script for a jdb session.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default JDWP port forwarded to the debuggee.
pub const DEFAULT_PORT: u16 = 8700;

/// Name of the startup script jdb reads from its working directory.
pub const SCRIPT_FILE_NAME: &str = "jdb.ini";

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("jdb-bridge")
}

/// Everything needed to launch jdb against a remote VM.
///
/// Hosts usually build this in code, but it also round-trips through serde
/// so it can come from a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSetup {
    /// Host the JDWP socket listens on.
    pub host: String,
    /// JDWP port.
    pub port: u16,
    /// Directory for the startup script; also jdb's working directory.
    pub cache_dir: PathBuf,
    /// JDK installation to take `bin/jdb` from.
    pub jdk_root: Option<PathBuf>,
    /// Extra jdb arguments, as a single command-line string.
    pub extra_args: Option<String>,
    /// Commands jdb runs at launch, one per line of the startup script.
    pub startup_commands: Vec<String>,
    /// Command run to completion before launch, e.g. `adb forward`.
    pub port_forward: Option<Vec<String>>,
}

impl Default for SessionSetup {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            cache_dir: default_cache_dir(),
            jdk_root: None,
            extra_args: None,
            startup_commands: Vec::new(),
            port_forward: None,
        }
    }
}

impl SessionSetup {
    /// Create a setup attaching to `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the cache directory.
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the JDK root.
    #[must_use]
    pub fn jdk_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.jdk_root = Some(root.into());
        self
    }

    /// Set extra jdb arguments.
    #[must_use]
    pub fn extra_args(mut self, args: impl Into<String>) -> Self {
        self.extra_args = Some(args.into());
        self
    }

    /// Add a startup command.
    #[must_use]
    pub fn startup_command(mut self, command: impl Into<String>) -> Self {
        self.startup_commands.push(command.into());
        self
    }

    /// Set the port-forwarding command.
    #[must_use]
    pub fn port_forward<I>(mut self, argv: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.port_forward = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Connector specification passed to `jdb -connect`.
    #[must_use]
    pub fn connector(&self) -> String {
        format!(
            "com.sun.jdi.SocketAttach:hostname={},port={}",
            self.host, self.port
        )
    }

    /// Lines of the startup script. Blank commands are skipped.
    #[must_use]
    pub fn execution_script(&self) -> Vec<String> {
        self.startup_commands
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Where the startup script is written.
    #[must_use]
    pub fn script_path(&self) -> PathBuf {
        self.cache_dir.join(SCRIPT_FILE_NAME)
    }

    /// Working directory for the jdb process.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Write the startup script, replacing any previous one.
    ///
    /// The script is ASCII, as jdb reads it.
    ///
    /// # Errors
    /// Returns `InvalidData` if a command is not ASCII, or an I/O error if the
    /// cache directory cannot be created or written.
    pub async fn write_execution_script(&self) -> Result<PathBuf, std::io::Error> {
        let lines = self.execution_script();
        if let Some(line) = lines.iter().find(|line| !line.is_ascii()) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("startup command is not ASCII: {line}"),
            ));
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let mut contents = String::new();
        for line in lines {
            contents.push_str(&line);
            contents.push('\n');
        }

        let path = self.script_path();
        tokio::fs::write(&path, contents).await?;
        tracing::debug!(path = %path.display(), "Wrote jdb startup script");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector() {
        let setup = SessionSetup::new("127.0.0.1", 8600);
        assert_eq!(
            setup.connector(),
            "com.sun.jdi.SocketAttach:hostname=127.0.0.1,port=8600"
        );
    }

    #[test]
    fn test_execution_script_skips_blank_lines() {
        let setup = SessionSetup::default()
            .startup_command("stop in com.example.Main.main")
            .startup_command("   ")
            .startup_command(" catch java.lang.Error ");
        assert_eq!(
            setup.execution_script(),
            vec!["stop in com.example.Main.main", "catch java.lang.Error"]
        );
    }

    #[tokio::test]
    async fn test_write_execution_script() {
        let dir = tempfile::tempdir().unwrap();
        let setup = SessionSetup::default()
            .cache_dir(dir.path().join("nested"))
            .startup_command("use /src")
            .startup_command("run");

        let path = setup.write_execution_script().await.unwrap();
        assert_eq!(path, dir.path().join("nested").join(SCRIPT_FILE_NAME));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "use /src\nrun\n");
    }

    #[tokio::test]
    async fn test_non_ascii_script_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let setup = SessionSetup::default()
            .cache_dir(dir.path())
            .startup_command("stop at Caf\u{e9}:12");

        let err = setup.write_execution_script().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(!setup.script_path().exists());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let setup: SessionSetup =
            serde_json::from_str(r#"{"port": 9000, "startup_commands": ["run"]}"#).unwrap();
        assert_eq!(setup.host, "localhost");
        assert_eq!(setup.port, 9000);
        assert_eq!(setup.startup_commands, vec!["run"]);
        assert!(setup.port_forward.is_none());
    }
}
