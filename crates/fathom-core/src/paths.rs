//! Path boundary checks and name validation.
//!
//! These helpers guarantee that untrusted input — entry names from an export
//! file, paths produced by symlink resolution — cannot escape the scan root.

use std::path::Path;

use crate::error::Error;

/// True iff `target` is `root` or lies beneath it.
///
/// Both paths are compared component-wise, so `/tmp/R` does not contain
/// `/tmp/Rx`. Callers are expected to pass cleaned or canonical paths;
/// no symlink resolution happens here.
pub fn is_within(root: &Path, target: &Path) -> bool {
    target.starts_with(root)
}

/// Reject names that could escape the directory tree when joined to a path.
///
/// A valid entry name is non-empty, not `.` or `..`, contains no path
/// separator, and is equal to its own base component.
pub fn validate_entry_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidInput {
            message: "empty entry name".into(),
        });
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidInput {
            message: format!("invalid entry name: {name:?}"),
        });
    }
    if name.contains('/') {
        return Err(Error::InvalidInput {
            message: format!("entry name contains path separator: {name:?}"),
        });
    }
    #[cfg(windows)]
    if name.contains('\\') {
        return Err(Error::InvalidInput {
            message: format!("entry name contains path separator: {name:?}"),
        });
    }
    if Path::new(name).file_name().map(|f| f.to_string_lossy()) != Some(name.into()) {
        return Err(Error::InvalidInput {
            message: format!("entry name is not a simple filename: {name:?}"),
        });
    }
    Ok(())
}

/// Lexically clean a slash-delimited path.
///
/// Collapses repeated separators, drops `.` segments, resolves interior `..`
/// segments without ever escaping a rooted path, and preserves the leading
/// separator. Never introduces a `..` that was not in the input.
pub fn clean_path(p: &str) -> String {
    if p.is_empty() {
        return ".".to_string();
    }
    let rooted = p.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for segment in p.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
                // A ".." at the root of an absolute path is dropped.
            }
            seg => out.push(seg),
        }
    }
    let joined = out.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
