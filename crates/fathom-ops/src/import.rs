//! Decoder for the nested-array export format.
//!
//! Validates hostile input: depth-limited recursion, strict child
//! classification, entry-name validation, non-negative sizes, and no
//! trailing data after the top-level array. Derived directory fields are
//! recomputed bottom-up after decoding regardless of what the file claims.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::value::RawValue;
use tracing::info;

use fathom_core::{clean_path, validate_entry_name, DirNode, Error, FileNode, TreeNode};

use crate::export::ExportEntry;

/// Maximum directory nesting accepted from an import file.
pub(crate) const MAX_IMPORT_DEPTH: usize = 1000;

/// Load a tree from an export file.
pub fn import(path: &Path) -> Result<Arc<DirNode>, Error> {
    let data = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

    // serde_json rejects trailing non-whitespace input after the value.
    let elements: Vec<&RawValue> = serde_json::from_str(&data).map_err(|e| Error::Format {
        message: format!("invalid export document: {e}"),
    })?;
    if elements.len() < 4 {
        return Err(Error::Format {
            message: format!(
                "expected at least 4 top-level elements, got {}",
                elements.len()
            ),
        });
    }

    // elements[3] is the root directory array; later elements are ignored
    // for forward compatibility.
    let root = parse_dir(elements[3], None, 0)?;

    info!(path = %path.display(), items = root.item_count(), "imported scan");
    Ok(root)
}

fn parse_dir(
    data: &RawValue,
    parent: Option<&Arc<DirNode>>,
    depth: usize,
) -> Result<Arc<DirNode>, Error> {
    if depth >= MAX_IMPORT_DEPTH {
        return Err(Error::Format {
            message: format!("directory nesting exceeds maximum depth of {MAX_IMPORT_DEPTH}"),
        });
    }

    let elements: Vec<&RawValue> = serde_json::from_str(data.get()).map_err(|e| Error::Format {
        message: format!("directory is not an array: {e}"),
    })?;
    if elements.is_empty() {
        return Err(Error::Format {
            message: "empty directory array".to_string(),
        });
    }

    // Structs would happily decode from an array too; insist on an object.
    if first_byte(elements[0]) != Some(b'{') {
        return Err(Error::Format {
            message: "directory array must begin with an entry object".to_string(),
        });
    }
    let mut entry: ExportEntry =
        serde_json::from_str(elements[0].get()).map_err(|e| Error::Format {
            message: format!("cannot parse directory entry: {e}"),
        })?;

    // The root carries an absolute path; every other entry must be a plain
    // base name.
    match parent {
        Some(_) => validate_entry_name(&entry.name)?,
        None => entry.name = clean_path(&entry.name),
    }
    validate_size("directory asize", entry.asize)?;
    validate_size("directory dsize", entry.dsize)?;

    let dir = match parent {
        Some(parent) => DirNode::new_child(
            entry.name.as_str(),
            SystemTime::UNIX_EPOCH,
            entry.node_flags(),
            parent,
        ),
        None => {
            let root = DirNode::new_root(entry.name.as_str(), SystemTime::UNIX_EPOCH);
            root.set_flags(entry.node_flags());
            root
        }
    };

    for (index, child) in elements.iter().enumerate().skip(1) {
        match first_byte(child) {
            Some(b'[') => {
                let sub = parse_dir(child, Some(&dir), depth + 1)?;
                dir.append_child(TreeNode::Dir(sub));
            }
            Some(b'{') => {
                let file: ExportEntry =
                    serde_json::from_str(child.get()).map_err(|e| Error::Format {
                        message: format!("cannot parse file entry: {e}"),
                    })?;
                validate_entry_name(&file.name)?;
                validate_size("file asize", file.asize)?;
                validate_size("file dsize", file.dsize)?;

                dir.append_child(TreeNode::File(FileNode::new(
                    file.name.as_str(),
                    file.asize,
                    file.dsize,
                    SystemTime::UNIX_EPOCH,
                    file.ino,
                    file.node_flags(),
                    &dir,
                )));
            }
            _ => {
                return Err(Error::Format {
                    message: format!(
                        "unexpected child element at index {index}: expected array or object"
                    ),
                })
            }
        }
    }

    // Bottom-up: children were aggregated by their own parse_dir calls.
    dir.aggregate();
    Ok(dir)
}

fn first_byte(raw: &RawValue) -> Option<u8> {
    raw.get().trim_start().bytes().next()
}

fn validate_size(field: &str, value: i64) -> Result<(), Error> {
    if value < 0 {
        return Err(Error::Format {
            message: format!("{field} must be non-negative"),
        });
    }
    Ok(())
}
