//! Abstract capability over a request/response file-transfer session.
//!
//! The walker only needs directory listings, stat records, link resolution
//! and canonicalization; establishing the session (and authenticating it) is
//! the transport's concern and lives outside this crate.

use std::time::SystemTime;

use async_trait::async_trait;

use fathom_core::Error;

/// Effective kind of a remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    File,
    Directory,
    Symlink,
    /// Devices, sockets, pipes and other irregular entries; never scanned.
    Special,
}

/// A remote stat record.
#[derive(Debug, Clone)]
pub struct RemoteStat {
    pub size: i64,
    pub mtime: SystemTime,
    pub kind: RemoteKind,
}

impl RemoteStat {
    pub fn is_dir(&self) -> bool {
        self.kind == RemoteKind::Directory
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone)]
pub struct RemoteDirEntry {
    /// Base name within the listed directory.
    pub name: String,
    /// The entry's own stat record (symlinks report themselves).
    pub stat: RemoteStat,
}

/// Client side of the file-transfer protocol, as consumed by the walker.
///
/// Paths are slash-delimited strings in the remote's namespace. Every method
/// is one protocol round-trip; implementations are expected to be safe to
/// call from many walker tasks at once.
#[async_trait]
pub trait RemoteFileClient: Send + Sync {
    /// List a directory.
    async fn read_directory(&self, path: &str) -> Result<Vec<RemoteDirEntry>, Error>;

    /// Stat a path, following symlinks.
    async fn stat(&self, path: &str) -> Result<RemoteStat, Error>;

    /// Read a symlink's target, which may be relative.
    async fn read_link(&self, path: &str) -> Result<String, Error>;

    /// Canonicalize a path on the remote side.
    async fn real_path(&self, path: &str) -> Result<String, Error>;

    /// Filesystem block size at `path`, when the protocol exposes it.
    /// The default declines, which makes the walker fall back to 4096.
    async fn stat_filesystem(&self, _path: &str) -> Result<Option<u64>, Error> {
        Ok(None)
    }
}
