//! Read-only diagnostic dump.
//!
//! Collects the superblock counts, group-descriptor fields, both bitmaps,
//! the interesting inodes, and every directory block's decoded entries
//! into a serializable report, then renders it in the classic text shape.

use crate::fs::Ext2Fs;
use e2kit_alloc::bitmap_get;
use e2kit_dir::parse_block;
use e2kit_error::Result;
use e2kit_ondisk::FileType;
use e2kit_types::{InodeNo, ROOT_INO};
use serde::Serialize;
use std::io;

#[derive(Debug, Clone, Serialize)]
pub struct DumpReport {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub group: GroupSummary,
    /// Bit 0 leftmost, a space every 8 bits.
    pub block_bitmap: String,
    pub inode_bitmap: String,
    pub inodes: Vec<InodeSummary>,
    pub directory_blocks: Vec<DirBlockSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks: u16,
    pub free_inodes: u16,
    pub used_dirs: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct InodeSummary {
    pub ino: u32,
    /// `f`, `d`, `l`, or `?` when the mode is unrecognizable.
    pub kind: char,
    pub size: u32,
    pub links: u16,
    pub blocks: u32,
    pub direct: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirBlockSummary {
    pub block: u32,
    pub ino: u32,
    pub entries: Vec<EntrySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub kind: char,
    pub name: String,
}

fn bitmap_string(bitmap: &[u8], count: u32) -> String {
    let mut out = String::new();
    for bit in 0..count {
        if bit > 0 && bit % 8 == 0 {
            out.push(' ');
        }
        out.push(if bitmap_get(bitmap, bit) { '1' } else { '0' });
    }
    out
}

/// Dump rule: the root inode always, anything past the reserved range only
/// when it has a size.
fn wanted(ino: u32, size: u32, first_ino: u32) -> bool {
    ino == ROOT_INO || (ino >= first_ino && size > 0)
}

/// Collect the dump without printing anything.
pub fn dump(fs: &Ext2Fs) -> Result<DumpReport> {
    let layout = *fs.layout();
    let sb = fs.superblock()?;
    let gd = fs.group_desc()?;
    let bytes = fs.bytes();

    let mut inodes = Vec::new();
    let mut directory_blocks = Vec::new();

    for ino in 1..=layout.inodes_count {
        let ino = InodeNo(ino);
        let inode = fs.inode(ino)?;
        if !wanted(ino.0, inode.size, layout.first_ino) {
            continue;
        }

        let kind = inode.file_type().map_or('?', FileType::letter);
        inodes.push(InodeSummary {
            ino: ino.0,
            kind,
            size: inode.size,
            links: inode.links_count,
            blocks: inode.blocks,
            direct: inode.direct_blocks().map(|b| b.0).collect(),
        });

        if inode.is_dir() {
            for block in inode.direct_blocks() {
                let entries = parse_block(fs.block(block)?, block.0)?
                    .into_iter()
                    .map(|e| EntrySummary {
                        inode: e.inode,
                        rec_len: e.rec_len,
                        name_len: e.name.len() as u8,
                        kind: e.file_type().map_or('?', FileType::letter),
                        name: e.name_str(),
                    })
                    .collect();
                directory_blocks.push(DirBlockSummary {
                    block: block.0,
                    ino: ino.0,
                    entries,
                });
            }
        }
    }

    Ok(DumpReport {
        inodes_count: sb.inodes_count,
        blocks_count: sb.blocks_count,
        group: GroupSummary {
            block_bitmap: gd.block_bitmap,
            inode_bitmap: gd.inode_bitmap,
            inode_table: gd.inode_table,
            free_blocks: gd.free_blocks_count,
            free_inodes: gd.free_inodes_count,
            used_dirs: gd.used_dirs_count,
        },
        block_bitmap: bitmap_string(&bytes[layout.block_bitmap_range()], layout.blocks_count),
        inode_bitmap: bitmap_string(&bytes[layout.inode_bitmap_range()], layout.inodes_count),
        inodes,
        directory_blocks,
    })
}

/// Render a report in the classic text layout.
pub fn render(report: &DumpReport, out: &mut impl io::Write) -> io::Result<()> {
    writeln!(out, "Inodes: {}", report.inodes_count)?;
    writeln!(out, "Blocks: {}", report.blocks_count)?;
    writeln!(out, "Block group:")?;
    writeln!(out, "    block bitmap: {}", report.group.block_bitmap)?;
    writeln!(out, "    inode bitmap: {}", report.group.inode_bitmap)?;
    writeln!(out, "    inode table: {}", report.group.inode_table)?;
    writeln!(out, "    free blocks: {}", report.group.free_blocks)?;
    writeln!(out, "    free inodes: {}", report.group.free_inodes)?;
    writeln!(out, "    used_dirs: {}", report.group.used_dirs)?;
    writeln!(out, "Block bitmap: {}", report.block_bitmap)?;
    writeln!(out, "Inode bitmap: {}", report.inode_bitmap)?;

    writeln!(out)?;
    writeln!(out, "Inodes:")?;
    for inode in &report.inodes {
        writeln!(
            out,
            "[{}] type: {} size: {} links: {} blocks: {}",
            inode.ino, inode.kind, inode.size, inode.links, inode.blocks
        )?;
        let list = inode
            .direct
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "[{}] Blocks: {}", inode.ino, list)?;
    }

    writeln!(out)?;
    writeln!(out, "Directory Blocks:")?;
    for dir in &report.directory_blocks {
        writeln!(out, "   DIR BLOCK NUM: {} (for inode {})", dir.block, dir.ino)?;
        for entry in &dir.entries {
            writeln!(
                out,
                "Inode: {} rec_len: {} name_len: {} type= {} name={}",
                entry.inode, entry.rec_len, entry.name_len, entry.kind, entry.name
            )?;
        }
    }
    Ok(())
}
