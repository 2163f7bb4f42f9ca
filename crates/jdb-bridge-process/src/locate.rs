//! Locating the jdb executable.

use std::path::{Path, PathBuf};

use jdb_bridge_core::TransportError;

/// File name of the jdb executable on this platform.
pub const JDB_EXECUTABLE: &str = if cfg!(windows) { "jdb.exe" } else { "jdb" };

/// Path of jdb inside a JDK installation.
#[must_use]
pub fn jdk_tool(jdk_root: &Path) -> PathBuf {
    jdk_root.join("bin").join(JDB_EXECUTABLE)
}

/// Resolve an executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute or containing a separator).
/// 2. The current process PATH via `which`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// Find jdb for a session.
///
/// Tries `<jdk_root>/bin/jdb`, then `$JAVA_HOME/bin/jdb`, then PATH.
///
/// # Errors
/// Returns `ExecutableNotFound` if none of them exist.
pub async fn locate_jdb(jdk_root: Option<&Path>) -> Result<PathBuf, TransportError> {
    let java_home = std::env::var_os("JAVA_HOME").map(PathBuf::from);

    for root in jdk_root.into_iter().chain(java_home.as_deref()) {
        let candidate = jdk_tool(root);
        if candidate.is_file() {
            return Ok(candidate);
        }
        tracing::debug!(candidate = %candidate.display(), "jdb not found under JDK root");
    }

    resolve_executable_path(JDB_EXECUTABLE)
        .await
        .ok_or_else(|| TransportError::ExecutableNotFound(JDB_EXECUTABLE.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_locate_under_jdk_root() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join(JDB_EXECUTABLE), b"").unwrap();

        let found = locate_jdb(Some(dir.path())).await.unwrap();
        assert_eq!(found, bin.join(JDB_EXECUTABLE));
    }

    #[tokio::test]
    async fn test_resolve_explicit_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope").join("jdb");
        assert!(
            resolve_executable_path(missing.to_str().unwrap())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_resolve_empty() {
        assert!(resolve_executable_path("  ").await.is_none());
    }
}
