//! Shared fixtures for the integration suites.

use e2kit_alloc::bitmap_count_free;
use e2kit_fs::{Ext2Fs, mkfs};
use e2kit_image::Image;
use e2kit_types::IMAGE_SIZE;
use std::io::Write;
use tempfile::NamedTempFile;

/// A freshly formatted in-memory filesystem.
pub fn fresh_fs() -> Ext2Fs {
    mkfs(Image::from_vec(vec![0; IMAGE_SIZE]).expect("image buffer")).expect("mkfs")
}

/// A host file filled with `len` bytes of a rolling pattern.
pub fn host_file(len: usize) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().expect("tempfile");
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    tmp.write_all(&data).expect("write host file");
    tmp.flush().expect("flush host file");
    tmp
}

/// Free counters in superblock and descriptor must both equal the number
/// of zero bits in the corresponding bitmap.
pub fn assert_counters_consistent(fs: &Ext2Fs) {
    let layout = *fs.layout();
    let sb = fs.superblock().expect("superblock");
    let gd = fs.group_desc().expect("group desc");

    let free_blocks = bitmap_count_free(
        fs.block(layout.block_bitmap).expect("block bitmap"),
        layout.blocks_count,
    );
    let free_inodes = bitmap_count_free(
        fs.block(layout.inode_bitmap).expect("inode bitmap"),
        layout.inodes_count,
    );

    assert_eq!(sb.free_blocks_count, free_blocks, "sb free blocks vs bitmap");
    assert_eq!(sb.free_inodes_count, free_inodes, "sb free inodes vs bitmap");
    assert_eq!(
        u32::from(gd.free_blocks_count),
        free_blocks,
        "gd free blocks vs bitmap"
    );
    assert_eq!(
        u32::from(gd.free_inodes_count),
        free_inodes,
        "gd free inodes vs bitmap"
    );
}
