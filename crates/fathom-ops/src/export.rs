//! Streaming encoder for the nested-array export format.
//!
//! Format version 1: `[1, 0, {"progname":...,"progver":...,"timestamp":...},
//! root-array]`. Each directory is an array whose first element is an entry
//! object describing the directory itself; an object child is a file, an
//! array child is a subdirectory.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use fathom_core::{DirNode, Error, FileNode, NodeFlags, TreeNode};

pub(crate) const FORMAT_MAJOR: u32 = 1;
pub(crate) const FORMAT_MINOR: u32 = 0;
const PROGNAME: &str = "fathom";

/// Sentinel path selecting the stdout sink.
pub const STDOUT_SINK: &str = "-";

#[derive(Debug, Serialize)]
struct ExportHeader {
    progname: &'static str,
    progver: String,
    timestamp: u64,
}

/// One entry object of the export format. Every key but `name` is optional
/// on read; unknown keys are ignored for forward compatibility.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ExportEntry {
    pub name: String,
    #[serde(default)]
    pub asize: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub dsize: i64,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub ino: u64,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub nlink: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hlnkc: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_error: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub symlink: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub usage_estimated: bool,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

impl ExportEntry {
    fn new(name: &str, asize: i64, dsize: i64, ino: u64, flags: NodeFlags) -> Self {
        Self {
            name: name.to_string(),
            asize,
            dsize,
            ino,
            nlink: 0,
            hlnkc: flags.contains(NodeFlags::HARDLINK),
            read_error: flags.contains(NodeFlags::ERROR),
            symlink: flags.contains(NodeFlags::SYMLINK),
            usage_estimated: flags.contains(NodeFlags::USAGE_ESTIMATED),
        }
    }

    fn for_dir(dir: &DirNode) -> Self {
        Self::new(&dir.name, dir.size(), dir.usage(), 0, dir.flags())
    }

    fn for_file(file: &FileNode) -> Self {
        Self::new(&file.name, file.size, file.usage, file.inode, file.flags)
    }

    /// Node flags encoded in this entry.
    pub fn node_flags(&self) -> NodeFlags {
        let mut flags = NodeFlags::NONE;
        if self.hlnkc {
            flags |= NodeFlags::HARDLINK;
        }
        if self.read_error {
            flags |= NodeFlags::ERROR;
        }
        if self.symlink {
            flags |= NodeFlags::SYMLINK;
        }
        if self.usage_estimated {
            flags |= NodeFlags::USAGE_ESTIMATED;
        }
        flags
    }
}

/// Export the tree to `path`, or to stdout when `path` is `-`.
///
/// File sinks are written to a sibling temp file and atomically renamed on
/// success: the destination is always either absent, the pre-existing file,
/// or the new complete file — never a partial write.
pub fn export(root: &Arc<DirNode>, path: &str, version: &str) -> Result<(), Error> {
    if path == STDOUT_SINK {
        let stdout = io::stdout();
        let mut writer = BufWriter::new(stdout.lock());
        write_document(&mut writer, root, version).map_err(|e| Error::io(path, e))?;
        return writer.flush().map_err(|e| Error::io(path, e));
    }

    let dest = Path::new(path);
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // The temp file cleans itself up on early return.
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    {
        let mut writer = BufWriter::with_capacity(64 * 1024, tmp.as_file_mut());
        write_document(&mut writer, root, version).map_err(|e| Error::io(dest, e))?;
        writer.flush().map_err(|e| Error::io(dest, e))?;
    }

    if let Err(persist_err) = tmp.persist(dest) {
        // Some platforms cannot rename over an existing destination; drop it
        // and retry once, keeping the all-or-nothing guarantee.
        let tmp = persist_err.file;
        match fs::remove_file(dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(dest, e)),
        }
        tmp.persist(dest).map_err(|e| Error::io(dest, e.error))?;
    }

    info!(path, "exported scan");
    Ok(())
}

fn write_document<W: Write>(out: &mut W, root: &Arc<DirNode>, version: &str) -> io::Result<()> {
    let header = ExportHeader {
        progname: PROGNAME,
        progver: if version.is_empty() {
            "dev".to_string()
        } else {
            version.to_string()
        },
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    };

    write!(out, "[{FORMAT_MAJOR}, {FORMAT_MINOR}, ")?;
    serde_json::to_writer(&mut *out, &header).map_err(io::Error::from)?;
    out.write_all(b",\n")?;
    write_dir(out, root)?;
    out.write_all(b"\n]\n")
}

fn write_dir<W: Write>(out: &mut W, dir: &Arc<DirNode>) -> io::Result<()> {
    out.write_all(b"[")?;
    serde_json::to_writer(&mut *out, &ExportEntry::for_dir(dir)).map_err(io::Error::from)?;

    for child in dir.snapshot_children() {
        out.write_all(b",\n")?;
        match child {
            TreeNode::Dir(sub) => write_dir(out, &sub)?,
            TreeNode::File(file) => {
                serde_json::to_writer(&mut *out, &ExportEntry::for_file(&file))
                    .map_err(io::Error::from)?;
            }
        }
    }

    out.write_all(b"]")
}
