//! Single instance lock using Unix socket.
//!
//! Two bots polling the same Telegram token would steal each other's
//! updates, so only one instance may run. The lock is a bound Unix socket,
//! which the OS releases when the process dies.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use thiserror::Error;

const SOCKET_NAME: &str = "homebot.sock";

/// Error types for instance lock operations.
#[derive(Debug, Error)]
pub enum InstanceLockError {
    /// Another instance is already running.
    #[error("another instance is already running")]
    AlreadyRunning,

    /// I/O error during lock acquisition.
    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Held for as long as the process should count as the running instance.
/// The socket file is removed on drop.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock at the default socket path.
    pub fn acquire() -> Result<Self, InstanceLockError> {
        Self::acquire_at(Self::socket_path())
    }

    /// Acquire the lock at `path`.
    pub fn acquire_at(path: PathBuf) -> Result<Self, InstanceLockError> {
        if path.exists() {
            // A socket nobody answers on was left behind by a killed process
            if UnixStream::connect(&path).is_ok() {
                return Err(InstanceLockError::AlreadyRunning);
            }
            let _ = std::fs::remove_file(&path);
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(InstanceLockError::AlreadyRunning),
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    /// Socket path inside `$XDG_RUNTIME_DIR`, or `/tmp`.
    pub fn socket_path() -> PathBuf {
        Self::socket_path_in(std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from))
    }

    fn socket_path_in(runtime_dir: Option<PathBuf>) -> PathBuf {
        runtime_dir
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(SOCKET_NAME)
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_uses_runtime_dir() {
        let path = InstanceLock::socket_path_in(Some(PathBuf::from("/run/user/1000")));
        assert_eq!(path, PathBuf::from("/run/user/1000/homebot.sock"));
    }

    #[test]
    fn test_socket_path_fallback_to_tmp() {
        assert_eq!(
            InstanceLock::socket_path_in(None),
            PathBuf::from("/tmp/homebot.sock")
        );
    }

    #[test]
    fn test_second_instance_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SOCKET_NAME);

        let lock = InstanceLock::acquire_at(path.clone()).unwrap();
        assert!(matches!(
            InstanceLock::acquire_at(path.clone()),
            Err(InstanceLockError::AlreadyRunning)
        ));

        drop(lock);
        assert!(!path.exists());
        assert!(InstanceLock::acquire_at(path).is_ok());
    }

    #[test]
    fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SOCKET_NAME);
        // bound and dropped without cleanup, like a killed process
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        assert!(InstanceLock::acquire_at(path).is_ok());
    }
}
