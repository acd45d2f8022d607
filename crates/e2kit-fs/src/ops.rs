//! The file operations: make-directory, copy-in, link, remove, restore.
//!
//! Every operation shares the same preamble: split the absolute path,
//! resolve the parent component-wise, require it to be a directory, then
//! require the leaf present or absent as the verb demands. Metadata is
//! sequenced allocate → write → publish, so an interrupted run leaves only
//! inconsistencies the checker can repair.

use crate::fs::{Ext2Fs, blocks_for_len};
use crate::path::{lookup, resolve, split_path};
use e2kit_alloc::{
    allocate_block, allocate_inode, bitmap_get, claim_block, claim_inode, free_block, free_inode,
};
use e2kit_dir::{
    Tombstone, find_tombstone, init_block, insert_into_block, remove_from_block, splice_tombstone,
    write_entry_at,
};
use e2kit_error::{E2Error, Result};
use e2kit_ondisk::{FileType, GroupDesc, Inode, S_IFDIR, S_IFLNK, S_IFREG};
use e2kit_types::{BLOCK_SIZE, BlockNo, DIRECT_BLOCKS, InodeNo};
use std::path::Path;
use tracing::{info, warn};

impl Ext2Fs {
    /// Resolve the parent directory of `path` and return it with the leaf.
    fn resolve_parent(&self, path: &str) -> Result<(InodeNo, String)> {
        let (parent_path, leaf) = split_path(path)?;
        let parent = resolve(self, &parent_path)?;
        if !self.inode(parent)?.is_dir() {
            return Err(E2Error::NotDirectory(parent_path));
        }
        Ok((parent, leaf))
    }

    /// Insert a directory entry into `parent`.
    ///
    /// Tries the last allocated block first; when its slack cannot hold the
    /// entry, a fresh block goes into the next `i_block` slot and the
    /// parent grows by one block.
    fn insert_entry(
        &mut self,
        parent: InodeNo,
        ino: InodeNo,
        name: &[u8],
        file_type: FileType,
    ) -> Result<()> {
        let layout = *self.layout();
        let mut pinode = self.inode(parent)?;

        let last_slot = (0..DIRECT_BLOCKS).rev().find(|&i| pinode.block[i] != 0);
        if let Some(slot) = last_slot {
            let block = BlockNo(pinode.block[slot]);
            if insert_into_block(self.block_mut(block)?, block.0, ino.0, name, file_type)? {
                return Ok(());
            }
            if slot + 1 >= DIRECT_BLOCKS {
                return Err(E2Error::NoSpace);
            }
            let fresh = allocate_block(self.bytes_mut(), &layout)?;
            init_block(self.block_mut(fresh)?, ino.0, name, file_type)?;
            pinode.block[slot + 1] = fresh.0;
            pinode.size += BLOCK_SIZE as u32;
            self.write_inode(parent, &pinode)?;
            return Ok(());
        }

        // A directory without any data blocks should not occur, but is
        // recoverable.
        let fresh = allocate_block(self.bytes_mut(), &layout)?;
        init_block(self.block_mut(fresh)?, ino.0, name, file_type)?;
        pinode.block[0] = fresh.0;
        pinode.size += BLOCK_SIZE as u32;
        self.write_inode(parent, &pinode)
    }

    /// Create the directory named by an absolute path.
    pub fn make_directory(&mut self, path: &str) -> Result<InodeNo> {
        let (parent, leaf) = self.resolve_parent(path)?;
        if lookup(self, parent, leaf.as_bytes())?.is_some() {
            return Err(E2Error::Exists(path.to_owned()));
        }

        let layout = *self.layout();
        let ino = allocate_inode(self.bytes_mut(), &layout)?;
        let block = allocate_block(self.bytes_mut(), &layout)?;

        let mut inode = Inode::new_at(Self::now());
        inode.mode = S_IFDIR;
        inode.size = BLOCK_SIZE as u32;
        inode.links_count = 2; // "." plus the entry in the parent
        inode.blocks = 1;
        inode.block[0] = block.0;
        self.write_inode(ino, &inode)?;

        let data = self.block_mut(block)?;
        data.fill(0);
        write_entry_at(data, 0, ino.0, b".", FileType::Directory, 12)?;
        write_entry_at(
            data,
            12,
            parent.0,
            b"..",
            FileType::Directory,
            (BLOCK_SIZE - 12) as u16,
        )?;

        self.insert_entry(parent, ino, leaf.as_bytes(), FileType::Directory)?;

        // the child's ".." references the parent
        let mut pinode = self.inode(parent)?;
        pinode.links_count += 1;
        self.write_inode(parent, &pinode)?;

        let gd = self.group_desc()?;
        GroupDesc::set_used_dirs_count(self.bytes_mut(), gd.used_dirs_count + 1)?;

        info!(%path, %ino, "created directory");
        Ok(ino)
    }

    /// Copy a regular file from the host filesystem into the image.
    pub fn copy_in(&mut self, host_path: &Path, path: &str) -> Result<InodeNo> {
        let metadata = std::fs::metadata(host_path)
            .map_err(|_| E2Error::NotFound(host_path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(E2Error::NotFound(format!(
                "{} is not a regular file",
                host_path.display()
            )));
        }

        let (parent, leaf) = self.resolve_parent(path)?;
        if lookup(self, parent, leaf.as_bytes())?.is_some() {
            return Err(E2Error::Exists(path.to_owned()));
        }

        let size = metadata.len();
        let blocks_needed = blocks_for_len(size);
        if blocks_needed > DIRECT_BLOCKS as u64 {
            return Err(E2Error::NoSpace);
        }
        let gd = self.group_desc()?;
        if blocks_needed > u64::from(gd.free_blocks_count) {
            return Err(E2Error::NoSpace);
        }

        let data = std::fs::read(host_path)?;
        let layout = *self.layout();
        let ino = allocate_inode(self.bytes_mut(), &layout)?;

        let mut inode = Inode::new_at(Self::now());
        inode.mode = S_IFREG;
        inode.size = size as u32;
        inode.links_count = 1;
        inode.blocks = blocks_needed as u32;

        for chunk_no in 0..blocks_needed as usize {
            let block = allocate_block(self.bytes_mut(), &layout)?;
            inode.block[chunk_no] = block.0;

            let start = chunk_no * BLOCK_SIZE;
            let end = data.len().min(start + BLOCK_SIZE);
            let target = self.block_mut(block)?;
            target.fill(0);
            if start < data.len() {
                target[..end - start].copy_from_slice(&data[start..end]);
            }
        }

        self.write_inode(ino, &inode)?;
        self.insert_entry(parent, ino, leaf.as_bytes(), FileType::Regular)?;

        info!(host = %host_path.display(), %path, %ino, size, "copied file in");
        Ok(ino)
    }

    /// Create a hard or symbolic link at `dst` for `src`.
    pub fn link(&mut self, src: &str, dst: &str, symbolic: bool) -> Result<InodeNo> {
        let src_ino = resolve(self, src)?;
        let (parent, leaf) = self.resolve_parent(dst)?;
        if lookup(self, parent, leaf.as_bytes())?.is_some() {
            return Err(E2Error::Exists(dst.to_owned()));
        }

        if symbolic {
            let target = src.as_bytes();
            let blocks_needed = blocks_for_len(target.len() as u64);
            if blocks_needed > DIRECT_BLOCKS as u64 {
                return Err(E2Error::NoSpace);
            }
            let gd = self.group_desc()?;
            if blocks_needed > u64::from(gd.free_blocks_count) {
                return Err(E2Error::NoSpace);
            }

            let layout = *self.layout();
            let ino = allocate_inode(self.bytes_mut(), &layout)?;

            let mut inode = Inode::new_at(Self::now());
            inode.mode = S_IFLNK;
            inode.size = target.len() as u32;
            inode.links_count = 1;
            inode.blocks = blocks_needed as u32;

            for chunk_no in 0..blocks_needed as usize {
                let block = allocate_block(self.bytes_mut(), &layout)?;
                inode.block[chunk_no] = block.0;

                let start = chunk_no * BLOCK_SIZE;
                let end = target.len().min(start + BLOCK_SIZE);
                let data = self.block_mut(block)?;
                data.fill(0);
                if start < target.len() {
                    data[..end - start].copy_from_slice(&target[start..end]);
                }
            }

            self.write_inode(ino, &inode)?;
            self.insert_entry(parent, ino, leaf.as_bytes(), FileType::Symlink)?;

            info!(%src, %dst, %ino, "created symbolic link");
            return Ok(ino);
        }

        let mut sinode = self.inode(src_ino)?;
        if sinode.is_dir() {
            return Err(E2Error::IsDirectory(src.to_owned()));
        }
        sinode.links_count += 1;
        self.write_inode(src_ino, &sinode)?;
        self.insert_entry(parent, src_ino, leaf.as_bytes(), FileType::Regular)?;

        info!(%src, %dst, ino = %src_ino, "created hard link");
        Ok(src_ino)
    }

    /// Remove a file or link. Directories cannot be removed.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let (parent, leaf) = self.resolve_parent(path)?;
        let target = lookup(self, parent, leaf.as_bytes())?
            .ok_or_else(|| E2Error::NotFound(path.to_owned()))?;

        let mut tinode = self.inode(target)?;
        match tinode.file_type() {
            Some(FileType::Directory) => return Err(E2Error::IsDirectory(path.to_owned())),
            Some(_) => {}
            None => {
                return Err(E2Error::Corrupt {
                    block: 0,
                    detail: format!("inode {target} has no recognizable mode"),
                });
            }
        }

        let pinode = self.inode(parent)?;
        let mut removed = None;
        for block in pinode.direct_blocks() {
            if let Some(r) = remove_from_block(self.block_mut(block)?, block.0, leaf.as_bytes())? {
                removed = Some(r);
                break;
            }
        }
        if removed.is_none() {
            return Err(E2Error::NotFound(path.to_owned()));
        }

        tinode.links_count -= 1;
        if tinode.links_count == 0 {
            tinode.dtime = Self::now();
            self.write_inode(target, &tinode)?;

            let layout = *self.layout();
            free_inode(self.bytes_mut(), &layout, target)?;
            for block in tinode.direct_blocks() {
                free_block(self.bytes_mut(), &layout, block)?;
            }
        } else {
            self.write_inode(target, &tinode)?;
        }

        info!(%path, ino = %target, links = tinode.links_count, "removed entry");
        Ok(())
    }

    /// Bring back a removed file whose tombstone still lies in the parent
    /// directory's slack.
    pub fn restore(&mut self, path: &str) -> Result<InodeNo> {
        let (parent, leaf) = self.resolve_parent(path)?;
        if lookup(self, parent, leaf.as_bytes())?.is_some() {
            return Err(E2Error::Exists(path.to_owned()));
        }

        let pinode = self.inode(parent)?;
        let mut found: Option<(BlockNo, Tombstone)> = None;
        for block in pinode.direct_blocks() {
            if let Some(tomb) = find_tombstone(self.block(block)?, block.0, leaf.as_bytes())? {
                found = Some((block, tomb));
                break;
            }
        }
        let (block, tomb) = found
            .ok_or_else(|| E2Error::NotFound(format!("{path}: no recoverable entry")))?;

        let layout = *self.layout();
        let target = InodeNo(tomb.inode);
        if target.0 > layout.inodes_count {
            return Err(E2Error::Corrupt {
                block: block.0,
                detail: format!("tombstone references out-of-range inode {target}"),
            });
        }

        if bitmap_get(
            &self.bytes()[layout.inode_bitmap_range()],
            target.index(),
        ) {
            return Err(E2Error::NotFound(format!(
                "{path}: inode {target} has been reused, not recoverable"
            )));
        }
        let mut tinode = self.inode(target)?;
        if tinode.dtime == 0 {
            return Err(E2Error::NotFound(format!(
                "{path}: inode {target} was never deleted, not recoverable"
            )));
        }

        claim_inode(self.bytes_mut(), &layout, target)?;
        for data_block in tinode.direct_blocks() {
            if bitmap_get(
                &self.bytes()[layout.block_bitmap_range()],
                data_block.0 - 1,
            ) {
                // Another file owns this block now; leave the bit and the
                // counters alone rather than corrupt them.
                warn!(%data_block, "restored file shares a reallocated block");
                continue;
            }
            claim_block(self.bytes_mut(), &layout, data_block)?;
        }

        tinode.links_count += 1;
        tinode.dtime = 0;
        tinode.mtime = Self::now();
        self.write_inode(target, &tinode)?;

        splice_tombstone(self.block_mut(block)?, block.0, &tomb)?;

        info!(%path, ino = %target, "restored entry");
        Ok(target)
    }
}
