#![forbid(unsafe_code)]
//! Block and inode allocation.
//!
//! Raw bit manipulation over the LSB-first allocation bitmaps, and the
//! first-fit allocator that keeps the free counters in the superblock and
//! group descriptor in step with every bit it flips.
//!
//! Numbering: inode bitmap bit `i` governs inode `i + 1`; block bitmap bit
//! `i` governs block `i + 1`. Inode allocation starts scanning at
//! `first_ino - 1` so reserved inodes are never handed out; block
//! allocation scans from bit 0.

use e2kit_error::{E2Error, Result};
use e2kit_ondisk::{GroupDesc, Layout, Superblock};
use e2kit_types::{BlockNo, InodeNo};
use tracing::debug;

// ── Bitmap operations ───────────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Count free (zero) bits in the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_count_free(bitmap: &[u8], count: u32) -> u32 {
    let mut free = 0_u32;
    for idx in 0..count {
        if !bitmap_get(bitmap, idx) {
            free += 1;
        }
    }
    free
}

/// Find the first free (zero) bit in `start..count`.
#[must_use]
pub fn bitmap_find_free(bitmap: &[u8], count: u32, start: u32) -> Option<u32> {
    (start..count).find(|&idx| !bitmap_get(bitmap, idx))
}

// ── Counter upkeep ──────────────────────────────────────────────────────────

fn adjust_inode_counters(image: &mut [u8], delta: i32) -> Result<()> {
    let sb = Superblock::parse_from_image(image)?;
    let gd = GroupDesc::parse_from_image(image)?;
    let sb_count = sb
        .free_inodes_count
        .checked_add_signed(delta)
        .ok_or_else(|| E2Error::Corrupt {
            block: 1,
            detail: "free inode counter underflow".into(),
        })?;
    let gd_count = u32::from(gd.free_inodes_count)
        .checked_add_signed(delta)
        .ok_or_else(|| E2Error::Corrupt {
            block: 2,
            detail: "free inode counter underflow".into(),
        })?;
    Superblock::set_free_inodes_count(image, sb_count)?;
    GroupDesc::set_free_inodes_count(image, gd_count as u16)?;
    Ok(())
}

fn adjust_block_counters(image: &mut [u8], delta: i32) -> Result<()> {
    let sb = Superblock::parse_from_image(image)?;
    let gd = GroupDesc::parse_from_image(image)?;
    let sb_count = sb
        .free_blocks_count
        .checked_add_signed(delta)
        .ok_or_else(|| E2Error::Corrupt {
            block: 1,
            detail: "free block counter underflow".into(),
        })?;
    let gd_count = u32::from(gd.free_blocks_count)
        .checked_add_signed(delta)
        .ok_or_else(|| E2Error::Corrupt {
            block: 2,
            detail: "free block counter underflow".into(),
        })?;
    Superblock::set_free_blocks_count(image, sb_count)?;
    GroupDesc::set_free_blocks_count(image, gd_count as u16)?;
    Ok(())
}

// ── Allocation ──────────────────────────────────────────────────────────────

/// Allocate the lowest free non-reserved inode.
///
/// First-fit from `first_ino`; sets the bitmap bit and decrements both free
/// counters. Deterministic, so callers and tests may rely on the ordering.
pub fn allocate_inode(image: &mut [u8], layout: &Layout) -> Result<InodeNo> {
    let range = layout.inode_bitmap_range();
    let bit = bitmap_find_free(
        &image[range.clone()],
        layout.inodes_count,
        layout.first_ino - 1,
    )
    .ok_or(E2Error::NoSpace)?;

    bitmap_set(&mut image[range], bit);
    adjust_inode_counters(image, -1)?;
    let ino = InodeNo(bit + 1);
    debug!(%ino, "allocated inode");
    Ok(ino)
}

/// Allocate the lowest free block.
pub fn allocate_block(image: &mut [u8], layout: &Layout) -> Result<BlockNo> {
    let range = layout.block_bitmap_range();
    let bit =
        bitmap_find_free(&image[range.clone()], layout.blocks_count, 0).ok_or(E2Error::NoSpace)?;

    bitmap_set(&mut image[range], bit);
    adjust_block_counters(image, -1)?;
    let block = BlockNo(bit + 1);
    debug!(%block, "allocated block");
    Ok(block)
}

fn check_inode_range(layout: &Layout, ino: InodeNo) -> Result<()> {
    if ino.0 == 0 || ino.0 > layout.inodes_count {
        return Err(E2Error::Corrupt {
            block: 0,
            detail: format!("inode {ino} is outside the inode table"),
        });
    }
    Ok(())
}

fn check_block_range(layout: &Layout, block: BlockNo) -> Result<()> {
    if block.0 == 0 || block.0 > layout.blocks_count {
        return Err(E2Error::Corrupt {
            block: block.0,
            detail: "block number is outside the block bitmap".into(),
        });
    }
    Ok(())
}

/// Re-claim a specific inode (restore path). The bit must be clear.
pub fn claim_inode(image: &mut [u8], layout: &Layout, ino: InodeNo) -> Result<()> {
    check_inode_range(layout, ino)?;
    let range = layout.inode_bitmap_range();
    if bitmap_get(&image[range.clone()], ino.index()) {
        return Err(E2Error::NotFound(format!("inode {ino} is already in use")));
    }
    bitmap_set(&mut image[range], ino.index());
    adjust_inode_counters(image, -1)
}

/// Re-claim a specific block (restore path). The bit must be clear.
pub fn claim_block(image: &mut [u8], layout: &Layout, block: BlockNo) -> Result<()> {
    check_block_range(layout, block)?;
    let range = layout.block_bitmap_range();
    if bitmap_get(&image[range.clone()], block.0 - 1) {
        return Err(E2Error::Corrupt {
            block: block.0,
            detail: "block is already marked in use".into(),
        });
    }
    bitmap_set(&mut image[range], block.0 - 1);
    adjust_block_counters(image, -1)
}

/// Release an inode: clear its bitmap bit and increment both free counters.
pub fn free_inode(image: &mut [u8], layout: &Layout, ino: InodeNo) -> Result<()> {
    check_inode_range(layout, ino)?;
    let range = layout.inode_bitmap_range();
    bitmap_clear(&mut image[range], ino.index());
    adjust_inode_counters(image, 1)?;
    debug!(%ino, "freed inode");
    Ok(())
}

/// Release a block: clear its bitmap bit and increment both free counters.
pub fn free_block(image: &mut [u8], layout: &Layout, block: BlockNo) -> Result<()> {
    check_block_range(layout, block)?;
    let range = layout.block_bitmap_range();
    bitmap_clear(&mut image[range], block.0 - 1);
    adjust_block_counters(image, 1)?;
    debug!(%block, "freed block");
    Ok(())
}
