//! Error types for hosts-file synchronization.

use crate::record::RecordId;
use std::io;
use std::path::PathBuf;

/// Errors from reading or writing the backing file.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Windows reports a file held open by another writer as a sharing or lock
/// violation rather than a dedicated `ErrorKind`.
const ERROR_SHARING_VIOLATION: i32 = 32;
const ERROR_LOCK_VIOLATION: i32 = 33;

impl GatewayError {
    /// Whether the failure looks like another process holding the file
    /// mid-write, as opposed to something a retry is unlikely to fix.
    pub fn is_busy(&self) -> bool {
        let source = match self {
            GatewayError::Read { source, .. } | GatewayError::Write { source, .. } => source,
        };
        matches!(
            source.kind(),
            io::ErrorKind::WouldBlock
                | io::ErrorKind::Interrupted
                | io::ErrorKind::NotFound
                | io::ErrorKind::PermissionDenied
        ) || (cfg!(windows)
            && matches!(
                source.raw_os_error(),
                Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION)
            ))
    }
}

/// Errors surfaced by the synchronization core.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to watch {path:?}: {source}")]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },
    #[error("no record with id {0}")]
    UnknownRecord(RecordId),
    #[error("synchronization is already running")]
    AlreadyStarted,
}

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no hosts file path configured and none could be derived from the environment")]
    NoHostsPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_classification() {
        let busy = GatewayError::Read {
            path: PathBuf::from("/etc/hosts"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(busy.is_busy());

        let sharing = GatewayError::Read {
            path: PathBuf::from("hosts"),
            source: io::Error::from_raw_os_error(ERROR_SHARING_VIOLATION),
        };
        assert_eq!(sharing.is_busy(), cfg!(windows));

        let broken = GatewayError::Read {
            path: PathBuf::from("/etc/hosts"),
            source: io::Error::from(io::ErrorKind::InvalidData),
        };
        assert!(!broken.is_busy());
    }
}
