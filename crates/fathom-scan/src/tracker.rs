//! Per-scan concurrent trackers: hardlink table and visited-directory set.

use std::path::{Path, PathBuf};

use dashmap::DashSet;

/// Identifies a file across filesystems by device and inode number.
///
/// Using the inode alone would cause false dedup on scans that cross
/// filesystem boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeKey {
    pub device: u64,
    pub inode: u64,
}

impl InodeKey {
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }
}

/// Tracks seen inodes so hardlinked files are counted once.
///
/// Exactly one sighting per `(device, inode)` carries the real sizes; every
/// later sighting becomes a zero-sized HARDLINK node.
#[derive(Debug, Default)]
pub struct InodeTracker {
    seen: DashSet<InodeKey>,
}

impl InodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an inode. Returns `true` on the first sighting.
    pub fn track(&self, key: InodeKey) -> bool {
        self.seen.insert(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Set of canonical directory paths already claimed for recursion.
///
/// Prevents double-walks and symlink cycles: whichever task claims a path
/// first recurses into it, every later appearance keeps its node but skips
/// the subtree.
#[derive(Debug, Default)]
pub struct VisitedDirs {
    seen: DashSet<PathBuf>,
}

impl VisitedDirs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim a canonical path. Returns `true` if this caller won.
    pub fn claim(&self, path: &Path) -> bool {
        self.seen.insert(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_inode_once() {
        let tracker = InodeTracker::new();
        let key = InodeKey::new(1, 42);
        assert!(tracker.track(key));
        assert!(!tracker.track(key));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_same_inode_different_device() {
        let tracker = InodeTracker::new();
        assert!(tracker.track(InodeKey::new(1, 42)));
        assert!(tracker.track(InodeKey::new(2, 42)));
    }

    #[test]
    fn test_claim_visited_dir() {
        let visited = VisitedDirs::new();
        assert!(visited.claim(Path::new("/a/b")));
        assert!(!visited.claim(Path::new("/a/b")));
        assert!(visited.claim(Path::new("/a/c")));
    }
}
