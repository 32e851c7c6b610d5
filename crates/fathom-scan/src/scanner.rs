//! Parallel local filesystem walker and scan coordinator.
//!
//! Concurrency follows a semaphore-with-synchronous-fallback scheme: each
//! discovered directory is scanned on a fresh task while permits last, and
//! inline on the current task once the semaphore is saturated. This bounds
//! outstanding tasks at the configured concurrency without ever queueing
//! blocked work, so wide trees cannot explode the task count.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use compact_str::CompactString;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use fathom_core::{is_within, DirNode, Error, FileNode, NodeFlags, ScanOptions, TreeNode};

use crate::progress::{spawn_publisher, Progress, ProgressCounters};
use crate::tracker::{InodeKey, InodeTracker, VisitedDirs};

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// The walk drained and aggregation ran.
    Complete,
    /// The walk was cancelled (or timed out); the tree is partial and its
    /// aggregated fields may under-report cancelled subtrees.
    Canceled,
}

/// A finished scan: the root of the tree plus the outcome.
#[derive(Debug)]
pub struct ScanResult {
    pub root: Arc<DirNode>,
    pub status: ScanStatus,
}

struct WalkContext {
    scan_root: std::path::PathBuf,
    opts: ScanOptions,
    exclude: HashSet<String>,
    semaphore: Arc<Semaphore>,
    tasks: TaskTracker,
    counters: Arc<ProgressCounters>,
    inodes: InodeTracker,
    visited: VisitedDirs,
    cancel: CancellationToken,
}

/// Scan a local directory tree.
///
/// Appends nodes into a fresh tree as they are discovered, reporting live
/// progress on `progress` (non-blocking; updates are dropped on
/// back-pressure). Once the walker drains, a single-threaded bottom-up pass
/// fills in per-directory size, usage and item count, and one final `done`
/// snapshot is emitted.
///
/// Per-entry failures are recovered locally as ERROR flags plus the error
/// counter; only an unusable root surfaces as `Err`. Cancellation returns the
/// partial tree with [`ScanStatus::Canceled`].
pub async fn scan(
    path: impl AsRef<std::path::Path>,
    opts: &ScanOptions,
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<Progress>>,
) -> Result<ScanResult, Error> {
    let path = path.as_ref();

    // Resolve root-level symlinks up front so the visited set and the
    // in-tree containment check operate on canonical paths.
    let root_path = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    let meta = tokio::fs::metadata(&root_path)
        .await
        .map_err(|e| Error::io(&root_path, e))?;
    if !meta.is_dir() {
        return Err(Error::NotADirectory { path: root_path });
    }

    if opts.disable_aggressive_gc {
        debug!("aggressive reclamation hint requested; nothing to tune here");
    }

    let concurrency = opts.effective_concurrency();
    info!(root = %root_path.display(), concurrency, "starting scan");

    let root = DirNode::new_root(
        root_path.to_string_lossy(),
        meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    );

    let ctx = Arc::new(WalkContext {
        scan_root: root_path.clone(),
        opts: opts.clone(),
        exclude: opts.exclude_set(),
        semaphore: Arc::new(Semaphore::new(concurrency)),
        tasks: TaskTracker::new(),
        counters: Arc::new(ProgressCounters::new()),
        inodes: InodeTracker::new(),
        visited: VisitedDirs::new(),
        cancel,
    });
    ctx.visited.claim(&root_path);

    let publisher_stop = CancellationToken::new();
    let publisher = progress
        .as_ref()
        .map(|tx| spawn_publisher(Arc::clone(&ctx.counters), tx.clone(), publisher_stop.clone()));

    scan_dir(Arc::clone(&ctx), root_path, Arc::clone(&root)).await;
    ctx.tasks.close();
    ctx.tasks.wait().await;

    let canceled = ctx.cancel.is_cancelled();
    if !canceled {
        root.aggregate_recursive(&ctx.cancel);
    }

    // The publisher never emits "done"; that snapshot is reserved for after
    // aggregation, and is sent exactly once below.
    publisher_stop.cancel();
    if let Some(handle) = publisher {
        let _ = handle.await;
    }
    if let Some(tx) = &progress {
        let _ = tx.try_send(ctx.counters.snapshot(true));
    }

    info!(
        errors = ctx.counters.errors(),
        canceled, "scan finished"
    );

    Ok(ScanResult {
        root,
        status: if canceled {
            ScanStatus::Canceled
        } else {
            ScanStatus::Complete
        },
    })
}

/// Scan one directory, appending children to `dir_node` and scheduling
/// subdirectory scans. Boxed because the recursion flows through spawned
/// futures.
fn scan_dir(
    ctx: Arc<WalkContext>,
    dir_path: std::path::PathBuf,
    dir_node: Arc<DirNode>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if ctx.cancel.is_cancelled() {
            return;
        }

        let mut entries = match tokio::fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!(path = %dir_path.display(), %err, "cannot open directory");
                dir_node.set_flags(NodeFlags::ERROR);
                ctx.counters.add_error();
                return;
            }
        };

        ctx.counters.add_dir();

        loop {
            if ctx.cancel.is_cancelled() {
                return;
            }

            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    debug!(path = %dir_path.display(), %err, "directory read failed");
                    dir_node.set_flags(NodeFlags::ERROR);
                    ctx.counters.add_error();
                    return;
                }
            };

            let name = CompactString::from(entry.file_name().to_string_lossy());

            if ctx.exclude.contains(name.as_str()) {
                continue;
            }
            if ctx.opts.skips_hidden(&name) {
                continue;
            }

            let full_path = dir_path.join(name.as_str());

            // Lstat: symlinks report their own metadata here.
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(err) => {
                    debug!(path = %full_path.display(), %err, "cannot stat entry");
                    ctx.counters.add_error();
                    continue;
                }
            };

            // Prefer the dirent kind; fall back to the stat record for
            // filesystems that report unknown types.
            let kind = match entry.file_type().await {
                Ok(kind) => kind,
                Err(_) => meta.file_type(),
            };

            // Devices, sockets, pipes and other irregular entries are
            // dropped entirely.
            if is_special(&kind) || is_special(&meta.file_type()) {
                continue;
            }

            if kind.is_dir() {
                let mut scan_path = full_path.clone();
                if ctx.opts.follow_symlinks {
                    if let Ok(resolved) = tokio::fs::canonicalize(&full_path).await {
                        scan_path = resolved;
                    }
                }

                let child = DirNode::new_child(
                    name,
                    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    NodeFlags::NONE,
                    &dir_node,
                );
                dir_node.append_child(TreeNode::Dir(Arc::clone(&child)));

                // Already claimed via another path: keep the node but skip
                // recursion so sizes are not double-counted.
                if !ctx.visited.claim(&scan_path) {
                    continue;
                }
                spawn_scan(&ctx, scan_path, child).await;
            } else if kind.is_symlink() && ctx.opts.follow_symlinks {
                scan_symlink(&ctx, &dir_node, name, &full_path).await;
            } else {
                // Regular file, or a symlink kept as-is when not following.
                let mut flags = if kind.is_symlink() {
                    NodeFlags::SYMLINK
                } else {
                    NodeFlags::NONE
                };

                let si = stat_info(&meta);

                // Hardlink dedup; with follow_symlinks on, even nlink==1
                // files participate so symlink aliases collapse onto one
                // counted node.
                if si.ok && (si.nlink > 1 || ctx.opts.follow_symlinks) {
                    if !ctx.inodes.track(InodeKey::new(si.device, si.inode)) {
                        flags |= NodeFlags::HARDLINK;
                        dir_node.append_child(TreeNode::File(FileNode::new(
                            name,
                            0,
                            0,
                            meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                            si.inode,
                            flags,
                            &dir_node,
                        )));
                        ctx.counters.add_file();
                        continue;
                    }
                }

                let size = meta.len();
                dir_node.append_child(TreeNode::File(FileNode::new(
                    name,
                    size as i64,
                    si.usage,
                    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    si.inode,
                    flags,
                    &dir_node,
                )));
                ctx.counters.add_file();
                ctx.counters.add_bytes(size);
            }
        }
    })
}

/// Handle a symlink entry with `follow_symlinks` on: resolve it, recurse
/// into out-of-tree directory targets, and dedup file targets through the
/// hardlink table.
async fn scan_symlink(
    ctx: &Arc<WalkContext>,
    dir_node: &Arc<DirNode>,
    name: CompactString,
    full_path: &std::path::Path,
) {
    let resolved = match tokio::fs::canonicalize(full_path).await {
        Ok(resolved) => resolved,
        Err(err) => {
            debug!(path = %full_path.display(), %err, "broken symlink");
            ctx.counters.add_error();
            dir_node.append_child(TreeNode::File(FileNode::broken_symlink(name, dir_node)));
            ctx.counters.add_file();
            return;
        }
    };
    let target = match tokio::fs::metadata(&resolved).await {
        Ok(target) => target,
        Err(err) => {
            debug!(path = %resolved.display(), %err, "cannot stat symlink target");
            ctx.counters.add_error();
            dir_node.append_child(TreeNode::File(FileNode::broken_symlink(name, dir_node)));
            ctx.counters.add_file();
            return;
        }
    };

    if is_special(&target.file_type()) {
        return;
    }

    if target.is_dir() {
        let child = DirNode::new_child(
            name,
            target.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            NodeFlags::SYMLINK,
            dir_node,
        );
        dir_node.append_child(TreeNode::Dir(Arc::clone(&child)));

        // Targets inside the scan root are reached by the normal traversal;
        // recursing here would double-count them.
        if is_within(&ctx.scan_root, &resolved) {
            return;
        }
        if !ctx.visited.claim(&resolved) {
            return;
        }
        spawn_scan(ctx, resolved, child).await;
        return;
    }

    // File target: the symlink may alias a file seen (or about to be seen)
    // under its real name, so dedup applies even when nlink == 1.
    let mut flags = NodeFlags::SYMLINK;
    let si = stat_info(&target);
    if si.ok && !ctx.inodes.track(InodeKey::new(si.device, si.inode)) {
        flags |= NodeFlags::HARDLINK;
        dir_node.append_child(TreeNode::File(FileNode::new(
            name,
            0,
            0,
            target.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            si.inode,
            flags,
            dir_node,
        )));
        ctx.counters.add_file();
        return;
    }

    let size = target.len();
    dir_node.append_child(TreeNode::File(FileNode::new(
        name,
        size as i64,
        si.usage,
        target.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        si.inode,
        flags,
        dir_node,
    )));
    ctx.counters.add_file();
    ctx.counters.add_bytes(size);
}

/// Schedule a subtree scan: on a fresh task while semaphore permits last,
/// inline on the current task otherwise.
async fn spawn_scan(ctx: &Arc<WalkContext>, path: std::path::PathBuf, dir: Arc<DirNode>) {
    match Arc::clone(&ctx.semaphore).try_acquire_owned() {
        Ok(permit) => {
            let task_ctx = Arc::clone(ctx);
            ctx.tasks.spawn(async move {
                let _permit = permit;
                scan_dir(task_ctx, path, dir).await;
            });
        }
        Err(_) => scan_dir(Arc::clone(ctx), path, dir).await,
    }
}

fn is_special(kind: &std::fs::FileType) -> bool {
    !kind.is_dir() && !kind.is_file() && !kind.is_symlink()
}

struct StatInfo {
    device: u64,
    inode: u64,
    nlink: u64,
    usage: i64,
    /// Whether platform stat fields were available.
    ok: bool,
}

#[cfg(unix)]
fn stat_info(meta: &std::fs::Metadata) -> StatInfo {
    use std::os::unix::fs::MetadataExt;
    StatInfo {
        device: meta.dev(),
        inode: meta.ino(),
        nlink: meta.nlink(),
        usage: (meta.blocks() as i64).saturating_mul(512),
        ok: true,
    }
}

#[cfg(not(unix))]
fn stat_info(meta: &std::fs::Metadata) -> StatInfo {
    // No inode information: estimate usage from the length in 512-byte
    // blocks and opt out of hardlink dedup.
    StatInfo {
        device: 0,
        inode: 0,
        nlink: 1,
        usage: (meta.len().div_ceil(512) * 512) as i64,
        ok: false,
    }
}
