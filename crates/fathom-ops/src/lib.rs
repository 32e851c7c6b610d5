//! Filesystem operations for fathom: root-scoped deletion and the
//! export/import serializer.

mod delete;
mod export;
mod import;

pub use delete::{delete, delete_node};
pub use export::{export, STDOUT_SINK};
pub use import::import;

pub use fathom_core::Error;
