//! The five-rule consistency checker.
//!
//! Rule order: counter reconciliation (bitmaps are authoritative), then a
//! tree walk from the root applying, per live entry: entry-type vs inode
//! mode, inode-bitmap allocation, deletion-time clear, and data-block
//! bitmap allocation. The checker never fails on an inconsistency; it
//! repairs, records, and keeps going, and a second run finds nothing.

use crate::fs::Ext2Fs;
use e2kit_alloc::{bitmap_count_free, bitmap_get, bitmap_set};
use e2kit_dir::live_entries;
use e2kit_error::Result;
use e2kit_ondisk::{FileType, GroupDesc, Superblock};
use e2kit_types::{InodeNo, ROOT_INO};
use serde::Serialize;
use std::collections::BTreeSet;

/// Everything one checker run repaired.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    /// One human-readable line per repair.
    pub fixes: Vec<String>,
    /// Total inconsistency count; counter repairs contribute their absolute
    /// delta, every other fix contributes one.
    pub total_fixed: u32,
}

impl CheckReport {
    fn record(&mut self, weight: u32, message: String) {
        self.fixes.push(message);
        self.total_fixed += weight;
    }

    /// The closing line the tool prints.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.total_fixed > 0 {
            format!("{} file system inconsistencies repaired!", self.total_fixed)
        } else {
            "No file system inconsistencies detected!".to_owned()
        }
    }
}

/// Run all five rules and return the repair report.
pub fn check(fs: &mut Ext2Fs) -> Result<CheckReport> {
    let mut report = CheckReport {
        fixes: Vec::new(),
        total_fixed: 0,
    };
    check_counters(fs, &mut report)?;
    check_tree(fs, &mut report)?;
    Ok(report)
}

/// Rule 1: both free counters in both structures must equal the number of
/// zero bits in the corresponding bitmap.
fn check_counters(fs: &mut Ext2Fs, report: &mut CheckReport) -> Result<()> {
    let layout = *fs.layout();
    let sb = fs.superblock()?;
    let gd = fs.group_desc()?;

    let actual_free_inodes = bitmap_count_free(
        &fs.bytes()[layout.inode_bitmap_range()],
        layout.inodes_count,
    );
    let actual_free_blocks = bitmap_count_free(
        &fs.bytes()[layout.block_bitmap_range()],
        layout.blocks_count,
    );

    if sb.free_inodes_count != actual_free_inodes {
        let diff = sb.free_inodes_count.abs_diff(actual_free_inodes);
        Superblock::set_free_inodes_count(fs.bytes_mut(), actual_free_inodes)?;
        report.record(
            diff,
            format!(
                "Fixed: superblock's free inodes counter was off by {diff} compared to the bitmap"
            ),
        );
    }
    if u32::from(gd.free_inodes_count) != actual_free_inodes {
        let diff = u32::from(gd.free_inodes_count).abs_diff(actual_free_inodes);
        GroupDesc::set_free_inodes_count(fs.bytes_mut(), actual_free_inodes as u16)?;
        report.record(
            diff,
            format!(
                "Fixed: block group's free inodes counter was off by {diff} compared to the bitmap"
            ),
        );
    }
    if sb.free_blocks_count != actual_free_blocks {
        let diff = sb.free_blocks_count.abs_diff(actual_free_blocks);
        Superblock::set_free_blocks_count(fs.bytes_mut(), actual_free_blocks)?;
        report.record(
            diff,
            format!(
                "Fixed: superblock's free blocks counter was off by {diff} compared to the bitmap"
            ),
        );
    }
    if u32::from(gd.free_blocks_count) != actual_free_blocks {
        let diff = u32::from(gd.free_blocks_count).abs_diff(actual_free_blocks);
        GroupDesc::set_free_blocks_count(fs.bytes_mut(), actual_free_blocks as u16)?;
        report.record(
            diff,
            format!(
                "Fixed: block group's free blocks counter was off by {diff} compared to the bitmap"
            ),
        );
    }
    Ok(())
}

fn dec_free_inode_counters(fs: &mut Ext2Fs) -> Result<()> {
    let sb = fs.superblock()?;
    let gd = fs.group_desc()?;
    Superblock::set_free_inodes_count(fs.bytes_mut(), sb.free_inodes_count.saturating_sub(1))?;
    GroupDesc::set_free_inodes_count(fs.bytes_mut(), gd.free_inodes_count.saturating_sub(1))?;
    Ok(())
}

fn dec_free_block_counters(fs: &mut Ext2Fs) -> Result<()> {
    let sb = fs.superblock()?;
    let gd = fs.group_desc()?;
    Superblock::set_free_blocks_count(fs.bytes_mut(), sb.free_blocks_count.saturating_sub(1))?;
    GroupDesc::set_free_blocks_count(fs.bytes_mut(), gd.free_blocks_count.saturating_sub(1))?;
    Ok(())
}

/// Rules 2–5, applied to every live entry reachable from the root.
fn check_tree(fs: &mut Ext2Fs, report: &mut CheckReport) -> Result<()> {
    let layout = *fs.layout();
    let mut visited: BTreeSet<u32> = BTreeSet::new();
    let mut pending = vec![InodeNo(ROOT_INO)];

    while let Some(dir) = pending.pop() {
        if !visited.insert(dir.0) {
            continue;
        }
        let dinode = fs.inode(dir)?;

        for block in dinode.direct_blocks() {
            let entries = live_entries(fs.block(block)?, block.0)?;
            for entry in entries {
                if entry.inode > layout.inodes_count {
                    continue;
                }
                let ino = InodeNo(entry.inode);
                let mut inode = fs.inode(ino)?;

                // Rule 2: the entry's file_type must agree with i_mode.
                if let Some(implied) = FileType::from_mode(inode.mode) {
                    if entry.file_type != implied.as_raw() {
                        fs.block_mut(block)?[entry.offset + 7] = implied.as_raw();
                        report.record(
                            1,
                            format!("Fixed: Entry type vs inode mismatch: inode [{ino}]"),
                        );
                    }
                }

                // Rule 3: a referenced inode must be marked allocated.
                if !bitmap_get(
                    &fs.bytes()[layout.inode_bitmap_range()],
                    ino.index(),
                ) {
                    bitmap_set(
                        &mut fs.bytes_mut()[layout.inode_bitmap_range()],
                        ino.index(),
                    );
                    dec_free_inode_counters(fs)?;
                    report.record(1, format!("Fixed: inode [{ino}] not marked as in-use"));
                }

                // Rule 4: a referenced inode is live; dtime must be zero.
                if inode.dtime != 0 {
                    inode.dtime = 0;
                    fs.write_inode(ino, &inode)?;
                    report.record(
                        1,
                        format!("Fixed: valid inode marked for deletion: [{ino}]"),
                    );
                }

                // Rule 5: its data blocks must be marked allocated.
                let mut fixed_blocks = 0_u32;
                for data_block in inode.direct_blocks() {
                    if data_block.0 > layout.blocks_count {
                        continue;
                    }
                    if !bitmap_get(
                        &fs.bytes()[layout.block_bitmap_range()],
                        data_block.0 - 1,
                    ) {
                        bitmap_set(
                            &mut fs.bytes_mut()[layout.block_bitmap_range()],
                            data_block.0 - 1,
                        );
                        dec_free_block_counters(fs)?;
                        fixed_blocks += 1;
                    }
                }
                if fixed_blocks > 0 {
                    report.record(
                        1,
                        format!(
                            "Fixed: {fixed_blocks} in-use data blocks not marked in data bitmap for inode: [{ino}]"
                        ),
                    );
                }

                if inode.is_dir() && !entry.is_dot() && !entry.is_dotdot() {
                    pending.push(ino);
                }
            }
        }
    }
    Ok(())
}
