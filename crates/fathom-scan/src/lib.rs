//! Local filesystem scanning engine for fathom.
//!
//! Builds the in-memory tree under bounded concurrency, detects hardlinks and
//! symlink aliasing, survives per-directory errors, and reports live
//! progress. The remote walker in `fathom-remote` reuses the progress
//! machinery and result types defined here.

mod progress;
mod scanner;
mod tracker;

pub use progress::{spawn_publisher, Progress, ProgressCounters, PROGRESS_INTERVAL};
pub use scanner::{scan, ScanResult, ScanStatus};
pub use tracker::{InodeKey, InodeTracker, VisitedDirs};

// Re-export core types for convenience
pub use fathom_core::{DirNode, Error, FileNode, NodeFlags, ScanOptions, TreeNode};
