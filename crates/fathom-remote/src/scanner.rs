//! Remote walker: builds the same tree shape as the local scanner over a
//! request/response file-transfer client.
//!
//! Three deliberate differences from the local walk: disk usage is estimated
//! from a filesystem block size (the protocol exposes no block counts), file
//! dedup is keyed on canonical resolved paths instead of `(device, inode)`,
//! and an optional scan-level deadline expires as cancellation.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use fathom_core::{clean_path, is_within, DirNode, Error, FileNode, NodeFlags, ScanOptions, TreeNode};
use fathom_scan::{spawn_publisher, Progress, ProgressCounters, ScanResult, ScanStatus};

use crate::client::{RemoteDirEntry, RemoteFileClient, RemoteKind, RemoteStat};

/// Block size assumed when the remote filesystem does not report one.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

const DEFAULT_REMOTE_PATH: &str = ".";

/// Scans a remote filesystem through a [`RemoteFileClient`].
pub struct RemoteScanner {
    client: Arc<dyn RemoteFileClient>,
}

struct WalkContext {
    client: Arc<dyn RemoteFileClient>,
    scan_root: String,
    opts: ScanOptions,
    exclude: HashSet<String>,
    block_size: i64,
    semaphore: Arc<Semaphore>,
    tasks: TaskTracker,
    counters: Arc<ProgressCounters>,
    /// Canonical resolved paths of files already counted. The protocol does
    /// not expose reliable inode identity, so aliases collapse on paths.
    aliases: DashSet<String>,
    /// Canonical directory paths already claimed for recursion.
    visited: DashSet<String>,
    cancel: CancellationToken,
}

impl RemoteScanner {
    pub fn new(client: Arc<dyn RemoteFileClient>) -> Self {
        Self { client }
    }

    /// Scan `remote_path`, yielding the same tree shape and progress
    /// semantics as the local walker. The root node is flagged
    /// USAGE_ESTIMATED. An elapsed `scan_timeout` behaves exactly like
    /// cancellation: the partial tree comes back with
    /// [`ScanStatus::Canceled`].
    pub async fn scan(
        &self,
        remote_path: &str,
        opts: &ScanOptions,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<Progress>>,
    ) -> Result<ScanResult, Error> {
        // Fold the deadline into the cancellation token every task polls.
        let (cancel, deadline_task) = match opts.scan_timeout {
            Some(timeout) => {
                let child = cancel.child_token();
                let timer = child.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    timer.cancel();
                });
                (child, Some(handle))
            }
            None => (cancel, None),
        };

        let result = self.scan_inner(remote_path, opts, cancel, progress).await;
        if let Some(handle) = deadline_task {
            handle.abort();
        }
        result
    }

    async fn scan_inner(
        &self,
        remote_path: &str,
        opts: &ScanOptions,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<Progress>>,
    ) -> Result<ScanResult, Error> {
        let requested = if remote_path.trim().is_empty() {
            DEFAULT_REMOTE_PATH
        } else {
            remote_path
        };
        let mut root_path = clean_remote_path(requested);
        if let Ok(resolved) = self.client.real_path(&root_path).await {
            root_path = clean_remote_path(&resolved);
        }

        let root_stat = self.client.stat(&root_path).await?;
        if !root_stat.is_dir() {
            return Err(Error::NotADirectory {
                path: root_path.into(),
            });
        }

        let block_size = match self.client.stat_filesystem(&root_path).await {
            Ok(Some(size)) if size > 0 => size,
            _ => DEFAULT_BLOCK_SIZE,
        };
        info!(root = %root_path, block_size, "starting remote scan");

        let root = DirNode::new_root(root_path.as_str(), root_stat.mtime);
        root.set_flags(NodeFlags::USAGE_ESTIMATED);

        let ctx = Arc::new(WalkContext {
            client: Arc::clone(&self.client),
            scan_root: root_path.clone(),
            opts: opts.clone(),
            exclude: opts.exclude_set(),
            block_size: block_size as i64,
            semaphore: Arc::new(Semaphore::new(opts.effective_concurrency())),
            tasks: TaskTracker::new(),
            counters: Arc::new(ProgressCounters::new()),
            aliases: DashSet::new(),
            visited: DashSet::new(),
            cancel,
        });
        ctx.visited.insert(root_path.clone());

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

        publisher_stop.cancel();
        if let Some(handle) = publisher {
            let _ = handle.await;
        }
        if let Some(tx) = &progress {
            let _ = tx.try_send(ctx.counters.snapshot(true));
        }

        info!(errors = ctx.counters.errors(), canceled, "remote scan finished");

        Ok(ScanResult {
            root,
            status: if canceled {
                ScanStatus::Canceled
            } else {
                ScanStatus::Complete
            },
        })
    }
}

fn scan_dir(
    ctx: Arc<WalkContext>,
    dir_path: String,
    dir_node: Arc<DirNode>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if ctx.cancel.is_cancelled() {
            return;
        }

        let entries = match ctx.client.read_directory(&dir_path).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!(path = %dir_path, %err, "cannot list remote directory");
                dir_node.set_flags(NodeFlags::ERROR);
                ctx.counters.add_error();
                return;
            }
        };

        ctx.counters.add_dir();

        for entry in entries {
            if ctx.cancel.is_cancelled() {
                return;
            }

            if ctx.exclude.contains(&entry.name) {
                continue;
            }
            if ctx.opts.skips_hidden(&entry.name) {
                continue;
            }

            let full_path = join_remote(&dir_path, &entry.name);

            match entry.stat.kind {
                RemoteKind::Special => continue,
                RemoteKind::Symlink => scan_symlink(&ctx, &dir_node, &entry, &full_path).await,
                RemoteKind::Directory => {
                    let scan_path = match ctx.client.real_path(&full_path).await {
                        Ok(resolved) => clean_remote_path(&resolved),
                        Err(_) => full_path,
                    };

                    let child = DirNode::new_child(
                        entry.name.as_str(),
                        entry.stat.mtime,
                        NodeFlags::NONE,
                        &dir_node,
                    );
                    dir_node.append_child(TreeNode::Dir(Arc::clone(&child)));

                    if !ctx.visited.insert(scan_path.clone()) {
                        continue;
                    }
                    spawn_scan(&ctx, scan_path, child).await;
                }
                RemoteKind::File => {
                    if ctx.opts.follow_symlinks {
                        // Dedup plain files too: an alias seen through a
                        // symlink elsewhere must not count twice.
                        let key = match ctx.client.real_path(&full_path).await {
                            Ok(resolved) => clean_remote_path(&resolved),
                            Err(_) => full_path.clone(),
                        };
                        if !ctx.aliases.insert(key) {
                            append_file(
                                &ctx,
                                &dir_node,
                                &entry.name,
                                0,
                                entry.stat.mtime,
                                NodeFlags::HARDLINK,
                            );
                            continue;
                        }
                    }
                    append_file(
                        &ctx,
                        &dir_node,
                        &entry.name,
                        entry.stat.size,
                        entry.stat.mtime,
                        NodeFlags::NONE,
                    );
                }
            }
        }
    })
}

/// Handle a symlink listing entry.
async fn scan_symlink(
    ctx: &Arc<WalkContext>,
    dir_node: &Arc<DirNode>,
    entry: &RemoteDirEntry,
    full_path: &str,
) {
    if !ctx.opts.follow_symlinks {
        append_file(
            ctx,
            dir_node,
            &entry.name,
            entry.stat.size,
            entry.stat.mtime,
            NodeFlags::SYMLINK,
        );
        return;
    }

    let (resolved, target) = match resolve_symlink_target(ctx.client.as_ref(), full_path).await {
        Ok(resolved) => resolved,
        Err(err) => {
            debug!(path = %full_path, %err, "broken remote symlink");
            ctx.counters.add_error();
            dir_node.append_child(TreeNode::File(FileNode::broken_symlink(
                entry.name.as_str(),
                dir_node,
            )));
            ctx.counters.add_file();
            return;
        }
    };

    match target.kind {
        RemoteKind::Special => {}
        RemoteKind::Directory => {
            let child = DirNode::new_child(
                entry.name.as_str(),
                target.mtime,
                NodeFlags::SYMLINK,
                dir_node,
            );
            dir_node.append_child(TreeNode::Dir(Arc::clone(&child)));

            // Targets inside the scan root are covered by the normal
            // traversal.
            if is_within(Path::new(&ctx.scan_root), Path::new(&resolved)) {
                return;
            }
            if !ctx.visited.insert(resolved.clone()) {
                return;
            }
            spawn_scan(ctx, resolved, child).await;
        }
        RemoteKind::File | RemoteKind::Symlink => {
            if !ctx.aliases.insert(resolved) {
                append_file(
                    ctx,
                    dir_node,
                    &entry.name,
                    0,
                    target.mtime,
                    NodeFlags::SYMLINK | NodeFlags::HARDLINK,
                );
                return;
            }
            append_file(
                ctx,
                dir_node,
                &entry.name,
                target.size,
                target.mtime,
                NodeFlags::SYMLINK,
            );
        }
    }
}

fn append_file(
    ctx: &Arc<WalkContext>,
    dir_node: &Arc<DirNode>,
    name: &str,
    size: i64,
    mtime: std::time::SystemTime,
    flags: NodeFlags,
) {
    let usage = if flags.contains(NodeFlags::HARDLINK) {
        0
    } else {
        estimate_usage(size, ctx.block_size)
    };
    dir_node.append_child(TreeNode::File(FileNode::new(
        name, size, usage, mtime, 0, flags, dir_node,
    )));
    ctx.counters.add_file();
    if size > 0 {
        ctx.counters.add_bytes(size as u64);
    }
}

async fn spawn_scan(ctx: &Arc<WalkContext>, path: String, dir: Arc<DirNode>) {
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

/// Resolve a symlink to its canonical target path and stat record.
async fn resolve_symlink_target(
    client: &dyn RemoteFileClient,
    symlink_path: &str,
) -> Result<(String, RemoteStat), Error> {
    let mut target = client.read_link(symlink_path).await?;
    if !target.starts_with('/') {
        target = join_remote(parent_remote(symlink_path), &target);
    }
    target = clean_remote_path(&target);

    let resolved = clean_remote_path(&client.real_path(&target).await?);
    let stat = client.stat(&resolved).await?;
    Ok((resolved, stat))
}

/// Round `size` up to whole filesystem blocks.
fn estimate_usage(size: i64, block_size: i64) -> i64 {
    if size <= 0 || block_size <= 0 {
        return 0;
    }
    match size.checked_add(block_size - 1) {
        Some(padded) => (padded / block_size).saturating_mul(block_size),
        None => i64::MAX,
    }
}

/// Normalize a remote path: forward slashes, cleaned, never empty.
pub fn clean_remote_path(p: &str) -> String {
    if p.is_empty() {
        return DEFAULT_REMOTE_PATH.to_string();
    }
    let cleaned = clean_path(&p.replace('\\', "/"));
    if cleaned.is_empty() {
        DEFAULT_REMOTE_PATH.to_string()
    } else {
        cleaned
    }
}

fn join_remote(dir: &str, name: &str) -> String {
    clean_remote_path(&format!("{dir}/{name}"))
}

fn parent_remote(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}
