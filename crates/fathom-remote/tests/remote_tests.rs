use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use fathom_remote::{
    Error, RemoteDirEntry, RemoteFileClient, RemoteKind, RemoteScanner, RemoteStat, ScanOptions,
    ScanStatus,
};
use fathom_scan::{DirNode, NodeFlags, TreeNode};

/// In-memory stand-in for a file-transfer session.
#[derive(Default)]
struct MockFs {
    dirs: HashMap<String, Vec<RemoteDirEntry>>,
    stats: HashMap<String, RemoteStat>,
    links: HashMap<String, String>,
    block_size: Option<u64>,
    fail_dirs: HashSet<String>,
    list_delay: Option<Duration>,
}

fn stat(size: i64, kind: RemoteKind) -> RemoteStat {
    RemoteStat {
        size,
        mtime: SystemTime::UNIX_EPOCH,
        kind,
    }
}

fn entry(name: &str, size: i64, kind: RemoteKind) -> RemoteDirEntry {
    RemoteDirEntry {
        name: name.to_string(),
        stat: stat(size, kind),
    }
}

impl MockFs {
    fn resolve(&self, path: &str) -> String {
        let mut current = path.to_string();
        for _ in 0..8 {
            match self.links.get(&current) {
                Some(target) => current = target.clone(),
                None => break,
            }
        }
        current
    }
}

#[async_trait]
impl RemoteFileClient for MockFs {
    async fn read_directory(&self, path: &str) -> Result<Vec<RemoteDirEntry>, Error> {
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_dirs.contains(path) {
            return Err(Error::AccessDenied { path: path.into() });
        }
        self.dirs
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound { path: path.into() })
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat, Error> {
        let resolved = self.resolve(path);
        self.stats
            .get(&resolved)
            .cloned()
            .ok_or_else(|| Error::NotFound { path: path.into() })
    }

    async fn read_link(&self, path: &str) -> Result<String, Error> {
        self.links.get(path).cloned().ok_or_else(|| Error::InvalidInput {
            message: format!("not a symlink: {path}"),
        })
    }

    async fn real_path(&self, path: &str) -> Result<String, Error> {
        let resolved = self.resolve(path);
        if self.stats.contains_key(&resolved) {
            Ok(resolved)
        } else {
            Err(Error::NotFound { path: path.into() })
        }
    }

    async fn stat_filesystem(&self, _path: &str) -> Result<Option<u64>, Error> {
        Ok(self.block_size)
    }
}

fn find(dir: &Arc<DirNode>, name: &str) -> Option<TreeNode> {
    dir.snapshot_children()
        .into_iter()
        .find(|c| c.name() == name)
}

async fn run(fs: MockFs, path: &str, opts: ScanOptions) -> fathom_scan::ScanResult {
    RemoteScanner::new(Arc::new(fs))
        .scan(path, &opts, CancellationToken::new(), None)
        .await
        .expect("remote scan succeeded")
}

fn basic_fs() -> MockFs {
    let mut fs = MockFs::default();
    fs.stats.insert("/data".into(), stat(0, RemoteKind::Directory));
    fs.stats.insert("/data/a".into(), stat(5000, RemoteKind::File));
    fs.stats.insert("/data/sub".into(), stat(0, RemoteKind::Directory));
    fs.stats.insert("/data/sub/b".into(), stat(100, RemoteKind::File));
    fs.dirs.insert(
        "/data".into(),
        vec![
            entry("a", 5000, RemoteKind::File),
            entry("sub", 0, RemoteKind::Directory),
        ],
    );
    fs.dirs.insert(
        "/data/sub".into(),
        vec![entry("b", 100, RemoteKind::File)],
    );
    fs
}

#[tokio::test]
async fn test_remote_scan_estimates_usage() {
    let result = run(basic_fs(), "/data", ScanOptions::default()).await;
    assert_eq!(result.status, ScanStatus::Complete);

    let tree = result.root;
    assert!(tree.flags().contains(NodeFlags::USAGE_ESTIMATED));
    assert_eq!(tree.size(), 5100);

    // Default 4096-byte blocks: 5000 -> 8192, 100 -> 4096.
    let a = find(&tree, "a").unwrap();
    assert_eq!(a.usage(), 8192);
    let b = find(find(&tree, "sub").unwrap().as_dir().unwrap(), "b").unwrap();
    assert_eq!(b.usage(), 4096);
    assert_eq!(tree.usage(), 12288);
}

#[tokio::test]
async fn test_remote_scan_uses_reported_block_size() {
    let mut fs = basic_fs();
    fs.block_size = Some(512);

    let result = run(fs, "/data", ScanOptions::default()).await;
    let a = find(&result.root, "a").unwrap();
    // 5000 -> ten 512-byte blocks.
    assert_eq!(a.usage(), 5120);
}

#[tokio::test]
async fn test_remote_alias_dedup_on_resolved_path() {
    let mut fs = basic_fs();
    fs.links.insert("/data/ln".into(), "/data/a".into());
    fs.dirs.get_mut("/data").unwrap().push(entry("ln", 0, RemoteKind::Symlink));

    let opts = ScanOptions::builder().follow_symlinks(true).build().unwrap();
    let result = run(fs, "/data", opts).await;
    let tree = result.root;

    // "a" lists first and wins; the alias collapses to a zero-sized marker.
    let a = find(&tree, "a").unwrap();
    assert_eq!(a.size(), 5000);
    let ln = find(&tree, "ln").unwrap();
    assert!(ln.flags().contains(NodeFlags::SYMLINK));
    assert!(ln.flags().contains(NodeFlags::HARDLINK));
    assert_eq!(ln.size(), 0);
    assert_eq!(ln.usage(), 0);

    assert_eq!(tree.size(), 5100);
}

#[tokio::test]
async fn test_remote_symlink_kept_when_not_following() {
    let mut fs = basic_fs();
    fs.links.insert("/data/ln".into(), "/data/a".into());
    fs.dirs.get_mut("/data").unwrap().push(entry("ln", 11, RemoteKind::Symlink));

    let result = run(fs, "/data", ScanOptions::default()).await;
    let ln = find(&result.root, "ln").unwrap();
    assert!(ln.flags().contains(NodeFlags::SYMLINK));
    assert!(!ln.flags().contains(NodeFlags::HARDLINK));
    assert_eq!(ln.size(), 11);
}

#[tokio::test]
async fn test_remote_broken_symlink() {
    let mut fs = basic_fs();
    fs.links.insert("/data/dangling".into(), "/data/ghost".into());
    fs.dirs
        .get_mut("/data")
        .unwrap()
        .push(entry("dangling", 0, RemoteKind::Symlink));

    let opts = ScanOptions::builder().follow_symlinks(true).build().unwrap();
    let result = run(fs, "/data", opts).await;

    let node = find(&result.root, "dangling").unwrap();
    assert!(node.flags().contains(NodeFlags::SYMLINK));
    assert!(node.flags().contains(NodeFlags::ERROR));
    assert_eq!(node.size(), 0);
}

#[tokio::test]
async fn test_remote_symlinked_dir_inside_root_not_recursed() {
    let mut fs = basic_fs();
    fs.links.insert("/data/sublink".into(), "/data/sub".into());
    fs.dirs
        .get_mut("/data")
        .unwrap()
        .push(entry("sublink", 0, RemoteKind::Symlink));

    let opts = ScanOptions::builder().follow_symlinks(true).build().unwrap();
    let result = run(fs, "/data", opts).await;
    let tree = result.root;

    let link = find(&tree, "sublink").unwrap();
    assert!(link.flags().contains(NodeFlags::SYMLINK));
    assert_eq!(link.as_dir().unwrap().child_count(), 0);

    // sub/b counted exactly once.
    assert_eq!(tree.size(), 5100);
}

#[tokio::test]
async fn test_remote_unreadable_directory_flagged() {
    let mut fs = basic_fs();
    fs.fail_dirs.insert("/data/sub".into());

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let result = RemoteScanner::new(Arc::new(fs))
        .scan(
            "/data",
            &ScanOptions::default(),
            CancellationToken::new(),
            Some(tx),
        )
        .await
        .unwrap();

    assert_eq!(result.status, ScanStatus::Complete);
    let sub = find(&result.root, "sub").unwrap();
    assert!(sub.flags().contains(NodeFlags::ERROR));
    assert_eq!(sub.as_dir().unwrap().child_count(), 0);

    let mut last = None;
    while let Some(snapshot) = rx.recv().await {
        last = Some(snapshot);
    }
    assert!(last.expect("final snapshot").errors >= 1);
}

#[tokio::test]
async fn test_remote_hidden_and_excluded_filters() {
    let mut fs = basic_fs();
    fs.stats.insert("/data/.cache".into(), stat(0, RemoteKind::Directory));
    fs.dirs.insert("/data/.cache".into(), vec![]);
    fs.dirs.get_mut("/data").unwrap().push(entry(".cache", 0, RemoteKind::Directory));

    let opts = ScanOptions::builder()
        .show_hidden(false)
        .exclude_names(vec!["sub".to_string()])
        .build()
        .unwrap();
    let result = run(fs, "/data", opts).await;
    let tree = result.root;

    assert!(find(&tree, ".cache").is_none());
    assert!(find(&tree, "sub").is_none());
    assert_eq!(tree.size(), 5000);
}

#[tokio::test]
async fn test_remote_scan_timeout_reports_cancellation() {
    let mut fs = basic_fs();
    fs.list_delay = Some(Duration::from_millis(200));

    let opts = ScanOptions::builder()
        .scan_timeout(Duration::from_millis(20))
        .build()
        .unwrap();
    let result = run(fs, "/data", opts).await;

    assert_eq!(result.status, ScanStatus::Canceled);
}

#[tokio::test]
async fn test_remote_missing_root_fails() {
    let err = RemoteScanner::new(Arc::new(MockFs::default()))
        .scan(
            "/nowhere",
            &ScanOptions::default(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_remote_root_must_be_directory() {
    let mut fs = MockFs::default();
    fs.stats.insert("/file".into(), stat(3, RemoteKind::File));

    let err = RemoteScanner::new(Arc::new(fs))
        .scan("/file", &ScanOptions::default(), CancellationToken::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotADirectory { .. }));
}
