//! Root-scoped removal of files, directories and symlinks.

use std::fs;
use std::path::Path;

use tracing::info;

use fathom_core::{is_within, Error, TreeNode};

/// Remove `target` from the filesystem, but only when it lies strictly below
/// `scan_root`. Directories are removed recursively; a symlink at the target
/// is removed as a link, never followed.
///
/// Symlinks are resolved on the *parent* directory while the final component
/// stays lexical: a path that traverses a symlinked directory cannot reach
/// outside the root, yet symlinks the user sees listed remain deletable.
pub fn delete(target: &Path, scan_root: &Path) -> Result<(), Error> {
    let abs_target = std::path::absolute(target).map_err(|e| Error::io(target, e))?;
    let abs_root = std::path::absolute(scan_root).map_err(|e| Error::io(scan_root, e))?;

    let scope_violation = || Error::ScopeViolation {
        path: abs_target.clone(),
        root: abs_root.clone(),
    };

    // A target without a parent or base component ("/", "..") can never be
    // strictly inside the root.
    let parent = abs_target.parent().ok_or_else(scope_violation)?;
    let base = abs_target.file_name().ok_or_else(scope_violation)?;

    let real_parent = fs::canonicalize(parent).map_err(|e| Error::io(parent, e))?;
    let real_root = fs::canonicalize(&abs_root).map_err(|e| Error::io(&abs_root, e))?;
    let real_target = real_parent.join(base);

    if real_target == real_root || !is_within(&real_root, &real_target) {
        return Err(scope_violation());
    }

    // Lstat: a symlink must be classified as a link, not as its target.
    let meta = fs::symlink_metadata(&real_target).map_err(|e| Error::io(&real_target, e))?;

    if meta.is_dir() {
        // remove_dir_all opens children relative to their parent without
        // following symlinks, so a directory swapped for a symlink mid-walk
        // cannot redirect the removal outside the tree.
        fs::remove_dir_all(&real_target).map_err(|e| Error::io(&real_target, e))?;
    } else {
        fs::remove_file(&real_target).map_err(|e| Error::io(&real_target, e))?;
    }

    info!(path = %real_target.display(), "deleted");
    Ok(())
}

/// Delete a node's filesystem entry and, on success, detach it from the
/// in-memory tree, propagating size updates to the root. The tree is left
/// untouched when the filesystem operation fails.
pub fn delete_node(node: &TreeNode, scan_root: &Path) -> Result<(), Error> {
    delete(&node.path(), scan_root)?;
    if let Some(parent) = node.parent() {
        parent.remove_child(node.name());
    }
    Ok(())
}
