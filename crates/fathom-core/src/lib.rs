//! Core types for fathom.
//!
//! This crate provides the tree data model shared by the local and remote
//! walkers, the path boundary helpers, scan options, and the workspace-wide
//! error taxonomy.

mod error;
mod node;
mod options;
mod paths;

pub use error::Error;
pub use node::{DirNode, FileNode, NodeFlags, TreeNode};
pub use options::{ScanOptions, ScanOptionsBuilder};
pub use paths::{clean_path, is_within, validate_entry_name};
