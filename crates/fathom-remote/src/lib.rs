//! Remote scanning for fathom.
//!
//! Produces the same tree shape as the local walker over an abstract
//! request/response file-transfer client. Disk usage is estimated from the
//! remote block size and the root is flagged accordingly. The transport that
//! backs [`RemoteFileClient`] — including authentication and host trust — is
//! an external collaborator.

mod client;
mod scanner;

pub use client::{RemoteDirEntry, RemoteFileClient, RemoteKind, RemoteStat};
pub use scanner::{clean_remote_path, RemoteScanner, DEFAULT_BLOCK_SIZE};

// Re-export the shared scan surface for convenience
pub use fathom_core::{Error, ScanOptions};
pub use fathom_scan::{Progress, ScanResult, ScanStatus};
