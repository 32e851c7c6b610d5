//! File and directory node types.
//!
//! The tree is built concurrently by walker tasks: children are appended under
//! a per-directory lock while derived fields (size, usage, item count) stay
//! untouched until a single-threaded bottom-up aggregation pass runs after the
//! walk drains. Parent links are `Weak` so the child vector remains the only
//! owning edge.

use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use compact_str::CompactString;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Special attributes of a node, stored as a bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    /// No special attributes.
    pub const NONE: NodeFlags = NodeFlags(0);
    /// The entry is (or was reached through) a symbolic link.
    pub const SYMLINK: NodeFlags = NodeFlags(1 << 0);
    /// The entry could not be fully read.
    pub const ERROR: NodeFlags = NodeFlags(1 << 1);
    /// The entry aliases an already-counted file; its sizes are zero.
    pub const HARDLINK: NodeFlags = NodeFlags(1 << 2);
    /// Disk usage is estimated rather than read from block counts.
    pub const USAGE_ESTIMATED: NodeFlags = NodeFlags(1 << 3);

    /// Check whether all bits of `other` are set.
    pub fn contains(self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bit representation.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Reconstruct from raw bits, dropping unknown ones.
    pub fn from_bits(bits: u8) -> Self {
        NodeFlags(bits & 0x0f)
    }
}

impl BitOr for NodeFlags {
    type Output = NodeFlags;

    fn bitor(self, rhs: NodeFlags) -> NodeFlags {
        NodeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for NodeFlags {
    fn bitor_assign(&mut self, rhs: NodeFlags) {
        self.0 |= rhs.0;
    }
}

/// A regular file, symlink, or other leaf entry.
///
/// Immutable once constructed; walkers fill in every field at creation time.
#[derive(Debug)]
pub struct FileNode {
    /// Base name, never a full path.
    pub name: CompactString,
    /// Apparent size in bytes.
    pub size: i64,
    /// Occupied storage in bytes.
    pub usage: i64,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Inode number for hardlink detection; zero when unavailable.
    pub inode: u64,
    pub flags: NodeFlags,
    parent: Weak<DirNode>,
}

impl FileNode {
    /// Create a file node under `parent`. The node is not appended; callers
    /// pass it to [`DirNode::append_child`] themselves.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<CompactString>,
        size: i64,
        usage: i64,
        mtime: SystemTime,
        inode: u64,
        flags: NodeFlags,
        parent: &Arc<DirNode>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            size,
            usage,
            mtime,
            inode,
            flags,
            parent: Arc::downgrade(parent),
        })
    }

    /// Placeholder for a symlink whose target could not be resolved.
    pub fn broken_symlink(name: impl Into<CompactString>, parent: &Arc<DirNode>) -> Arc<Self> {
        Self::new(
            name,
            0,
            0,
            SystemTime::UNIX_EPOCH,
            0,
            NodeFlags::SYMLINK | NodeFlags::ERROR,
            parent,
        )
    }

    /// Containing directory, if it is still alive.
    pub fn parent(&self) -> Option<Arc<DirNode>> {
        self.parent.upgrade()
    }

    /// Full path, reconstructed by walking parent links.
    pub fn path(&self) -> PathBuf {
        build_path(&self.parent, &self.name)
    }
}

/// A directory owning an ordered collection of children.
///
/// `size`, `usage` and `item_count` are derived: they are zero until
/// [`DirNode::aggregate`] (or the recursive variant) runs.
#[derive(Debug)]
pub struct DirNode {
    /// Base name; the root carries the absolute canonical path instead.
    pub name: CompactString,
    /// Last modification time.
    pub mtime: SystemTime,
    size: AtomicI64,
    usage: AtomicI64,
    item_count: AtomicI64,
    flags: AtomicU8,
    parent: Weak<DirNode>,
    children: RwLock<Vec<TreeNode>>,
}

impl DirNode {
    /// Create the root of a tree. `name` is the absolute canonical scan path.
    pub fn new_root(name: impl Into<CompactString>, mtime: SystemTime) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            mtime,
            size: AtomicI64::new(0),
            usage: AtomicI64::new(0),
            item_count: AtomicI64::new(0),
            flags: AtomicU8::new(0),
            parent: Weak::new(),
            children: RwLock::new(Vec::new()),
        })
    }

    /// Create a directory under `parent`. Like file nodes, the result is not
    /// appended automatically.
    pub fn new_child(
        name: impl Into<CompactString>,
        mtime: SystemTime,
        flags: NodeFlags,
        parent: &Arc<DirNode>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            mtime,
            size: AtomicI64::new(0),
            usage: AtomicI64::new(0),
            item_count: AtomicI64::new(0),
            flags: AtomicU8::new(flags.bits()),
            parent: Arc::downgrade(parent),
            children: RwLock::new(Vec::new()),
        })
    }

    /// Aggregated apparent size of the subtree.
    pub fn size(&self) -> i64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Aggregated disk usage of the subtree.
    pub fn usage(&self) -> i64 {
        self.usage.load(Ordering::Relaxed)
    }

    /// Total number of descendants.
    pub fn item_count(&self) -> i64 {
        self.item_count.load(Ordering::Relaxed)
    }

    pub fn flags(&self) -> NodeFlags {
        NodeFlags::from_bits(self.flags.load(Ordering::Relaxed))
    }

    /// Set additional flags. Safe to call from concurrent walker tasks.
    pub fn set_flags(&self, flags: NodeFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    /// Containing directory; `None` at the root.
    pub fn parent(&self) -> Option<Arc<DirNode>> {
        self.parent.upgrade()
    }

    /// Full path, reconstructed by walking parent links.
    pub fn path(&self) -> PathBuf {
        build_path(&self.parent, &self.name)
    }

    /// Append a child, preserving insertion order. Thread-safe under
    /// concurrent walkers.
    pub fn append_child(&self, child: TreeNode) {
        self.children.write().push(child);
    }

    /// A stable copy of the child list, decoupled from concurrent appenders.
    pub fn snapshot_children(&self) -> Vec<TreeNode> {
        self.children.read().clone()
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Detach the first child with the given name and propagate size updates
    /// up to the root. Returns whether a match was found.
    ///
    /// Requires exclusive access to the ancestor chain; callers must not run
    /// this while a walk is active.
    pub fn remove_child(&self, name: &str) -> bool {
        let removed = {
            let mut children = self.children.write();
            match children.iter().position(|c| c.name() == name) {
                Some(i) => {
                    children.remove(i);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.propagate_sizes();
        }
        removed
    }

    /// Recompute `size`, `usage` and `item_count` from the current children.
    /// All sums saturate against signed 64-bit overflow.
    pub fn aggregate(&self) {
        let mut size: i64 = 0;
        let mut usage: i64 = 0;
        let mut count: i64 = 0;
        {
            let children = self.children.read();
            for child in children.iter() {
                size = size.saturating_add(child.size());
                usage = usage.saturating_add(child.usage());
                if let TreeNode::Dir(d) = child {
                    count = count.saturating_add(d.item_count());
                }
                count = count.saturating_add(1);
            }
        }
        self.size.store(size, Ordering::Relaxed);
        self.usage.store(usage, Ordering::Relaxed);
        self.item_count.store(count, Ordering::Relaxed);
    }

    /// Post-order aggregation of the whole subtree. Children are aggregated
    /// before parents; stops early once `cancel` fires.
    ///
    /// Must only run after all concurrent writers have drained.
    pub fn aggregate_recursive(&self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        for child in self.snapshot_children() {
            if let TreeNode::Dir(dir) = child {
                dir.aggregate_recursive(cancel);
                if cancel.is_cancelled() {
                    return;
                }
            }
        }
        self.aggregate();
    }

    fn propagate_sizes(&self) {
        self.aggregate();
        let mut current = self.parent();
        while let Some(dir) = current {
            dir.aggregate();
            current = dir.parent();
        }
    }
}

/// Either kind of node, as stored in a directory's child list.
#[derive(Debug, Clone)]
pub enum TreeNode {
    File(Arc<FileNode>),
    Dir(Arc<DirNode>),
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::File(f) => &f.name,
            TreeNode::Dir(d) => &d.name,
        }
    }

    pub fn size(&self) -> i64 {
        match self {
            TreeNode::File(f) => f.size,
            TreeNode::Dir(d) => d.size(),
        }
    }

    pub fn usage(&self) -> i64 {
        match self {
            TreeNode::File(f) => f.usage,
            TreeNode::Dir(d) => d.usage(),
        }
    }

    pub fn mtime(&self) -> SystemTime {
        match self {
            TreeNode::File(f) => f.mtime,
            TreeNode::Dir(d) => d.mtime,
        }
    }

    pub fn flags(&self) -> NodeFlags {
        match self {
            TreeNode::File(f) => f.flags,
            TreeNode::Dir(d) => d.flags(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, TreeNode::Dir(_))
    }

    pub fn parent(&self) -> Option<Arc<DirNode>> {
        match self {
            TreeNode::File(f) => f.parent(),
            TreeNode::Dir(d) => d.parent(),
        }
    }

    pub fn path(&self) -> PathBuf {
        match self {
            TreeNode::File(f) => f.path(),
            TreeNode::Dir(d) => d.path(),
        }
    }

    pub fn as_dir(&self) -> Option<&Arc<DirNode>> {
        match self {
            TreeNode::Dir(d) => Some(d),
            TreeNode::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Arc<FileNode>> {
        match self {
            TreeNode::File(f) => Some(f),
            TreeNode::Dir(_) => None,
        }
    }
}

/// Reconstruct a full path by walking up the parent chain. Paths are derived
/// rather than stored: trees hold millions of nodes and a materialized path
/// per node would multiply memory by an order of magnitude.
fn build_path(parent: &Weak<DirNode>, name: &str) -> PathBuf {
    let mut parts: Vec<CompactString> = vec![CompactString::from(name)];
    let mut current = parent.upgrade();
    while let Some(dir) = current {
        parts.push(dir.name.clone());
        current = dir.parent();
    }
    let mut path = PathBuf::new();
    for part in parts.iter().rev() {
        path.push(part.as_str());
    }
    path
}
