//! Absolute-path handling.
//!
//! `split_path` separates an absolute path into parent and leaf. `resolve`
//! walks the tree one component at a time: `/a/b/c` looks up `a` under the
//! root, `b` under `a`, `c` under `b`. Names match by exact bytes.

use crate::fs::Ext2Fs;
use e2kit_dir::live_entries;
use e2kit_error::{E2Error, Result};
use e2kit_types::{InodeNo, ROOT_INO};

/// Split an absolute path into `(parent_path, leaf_name)`.
///
/// Requires a leading `/`; a single trailing `/` is trimmed. `"/a/b/c"`
/// yields `("/a/b", "c")` and `"/x"` yields `("/", "x")`. The root itself
/// has no leaf and is rejected.
pub fn split_path(path: &str) -> Result<(String, String)> {
    if !path.starts_with('/') {
        return Err(E2Error::InvalidArgument(format!(
            "{path} is not an absolute path"
        )));
    }

    let trimmed = if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    };

    if trimmed == "/" {
        return Err(E2Error::InvalidArgument(
            "path has no final component".into(),
        ));
    }

    let cut = trimmed.rfind('/').unwrap_or(0);
    let (parent, leaf) = (&trimmed[..cut], &trimmed[cut + 1..]);
    if leaf.is_empty() {
        return Err(E2Error::InvalidArgument(format!(
            "{path} has an empty component"
        )));
    }

    let parent = if parent.is_empty() { "/" } else { parent };
    Ok((parent.to_owned(), leaf.to_owned()))
}

/// Look up `name` among the live entries of directory `dir`.
///
/// Scans the directory's direct blocks in pointer order and returns the
/// first match, or `None`.
pub fn lookup(fs: &Ext2Fs, dir: InodeNo, name: &[u8]) -> Result<Option<InodeNo>> {
    let inode = fs.inode(dir)?;
    if !inode.is_dir() {
        return Err(E2Error::NotDirectory(format!("inode {dir}")));
    }

    for block in inode.direct_blocks() {
        let entries = live_entries(fs.block(block)?, block.0)?;
        if let Some(entry) = entries.iter().find(|e| e.name == name) {
            return Ok(Some(InodeNo(entry.inode)));
        }
    }
    Ok(None)
}

/// Resolve an absolute path to an inode, component by component.
pub fn resolve(fs: &Ext2Fs, path: &str) -> Result<InodeNo> {
    if !path.starts_with('/') {
        return Err(E2Error::InvalidArgument(format!(
            "{path} is not an absolute path"
        )));
    }

    let mut current = InodeNo(ROOT_INO);
    for component in path.split('/').filter(|c| !c.is_empty()) {
        let inode = fs.inode(current)?;
        if !inode.is_dir() {
            return Err(E2Error::NotDirectory(component.to_owned()));
        }
        current = lookup(fs, current, component.as_bytes())?
            .ok_or_else(|| E2Error::NotFound(path.to_owned()))?;
    }
    Ok(current)
}
