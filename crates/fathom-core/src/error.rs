//! Error taxonomy shared across the workspace.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by scanning, deletion and serialization.
///
/// Per-entry failures during a walk are never represented here: those become
/// node flags plus an error counter so a partial tree stays browsable. Only
/// whole-operation failures surface as `Error`.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested path does not exist.
    #[error("path not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Open or readdir refused by the OS.
    #[error("access denied: {}", path.display())]
    AccessDenied { path: PathBuf },

    /// Malformed options, remote target, or decoder name violation.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Deletion target outside the scan root.
    #[error("refusing to delete {}: outside scan root {}", path.display(), root.display())]
    ScopeViolation { path: PathBuf, root: PathBuf },

    /// Export file malformed, truncated, or carrying trailing garbage.
    #[error("malformed export: {message}")]
    Format { message: String },

    /// Remote protocol or network failure.
    #[error("remote transport: {message}")]
    Transport { message: String },

    /// Cancellation or deadline expiry.
    #[error("operation canceled")]
    Canceled,

    /// Scan target exists but is not a directory.
    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// Any other I/O failure, with path context.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Classify an I/O error, attaching path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::AccessDenied { path },
            _ => Self::Io { path, source },
        }
    }
}
