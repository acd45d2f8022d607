//! Image formatting.
//!
//! Lays down the canonical 128 KiB single-group geometry: 128 blocks, 32
//! inodes, bitmaps at blocks 3 and 4, inode table at blocks 5–8, and the
//! root directory's data at block 9. Inodes 1–10 are reserved; allocation
//! starts at inode 11.

use crate::fs::Ext2Fs;
use e2kit_alloc::bitmap_set;
use e2kit_dir::write_entry_at;
use e2kit_error::Result;
use e2kit_image::Image;
use e2kit_ondisk::{FileType, GroupDesc, Inode, Layout, S_IFDIR, Superblock, write_inode};
use e2kit_types::{BLOCK_SIZE, EXT2_MAGIC, FIRST_INO, InodeNo, ROOT_INO, block_offset};

const INODES_COUNT: u32 = 32;
const BLOCKS_COUNT: u32 = 128;
const BLOCK_BITMAP_BLOCK: u32 = 3;
const INODE_BITMAP_BLOCK: u32 = 4;
const INODE_TABLE_BLOCK: u32 = 5;
const ROOT_DIR_BLOCK: u32 = 9;

/// Format `image` in place and return the open filesystem context.
pub fn mkfs(mut image: Image) -> Result<Ext2Fs> {
    image.as_mut_slice().fill(0);

    // Metadata occupies blocks 1..=9: superblock, descriptor, both bitmaps,
    // the 4-block inode table, and the root directory's data block.
    let reserved_blocks = ROOT_DIR_BLOCK;
    // Bit 127 fences off block 128, which the bitmap describes but the
    // 128-block image does not contain.
    let free_blocks = BLOCKS_COUNT - reserved_blocks - 1;
    let free_inodes = INODES_COUNT - (FIRST_INO - 1);

    let sb = Superblock {
        inodes_count: INODES_COUNT,
        blocks_count: BLOCKS_COUNT,
        free_blocks_count: free_blocks,
        free_inodes_count: free_inodes,
        first_data_block: 1,
        log_block_size: 0,
        blocks_per_group: BLOCKS_COUNT,
        inodes_per_group: INODES_COUNT,
        magic: EXT2_MAGIC,
        first_ino: FIRST_INO,
    };
    let gd = GroupDesc {
        block_bitmap: BLOCK_BITMAP_BLOCK,
        inode_bitmap: INODE_BITMAP_BLOCK,
        inode_table: INODE_TABLE_BLOCK,
        free_blocks_count: free_blocks as u16,
        free_inodes_count: free_inodes as u16,
        used_dirs_count: 1,
    };

    let bytes = image.as_mut_slice();
    sb.store_to_image(bytes)?;
    gd.store_to_image(bytes)?;

    let layout = Layout::new(&sb, &gd);

    {
        let range = layout.block_bitmap_range();
        let bitmap = &mut bytes[range];
        for bit in 0..reserved_blocks {
            bitmap_set(bitmap, bit);
        }
        bitmap_set(bitmap, BLOCKS_COUNT - 1);
    }
    {
        let range = layout.inode_bitmap_range();
        let bitmap = &mut bytes[range];
        for bit in 0..FIRST_INO - 1 {
            bitmap_set(bitmap, bit);
        }
    }

    let mut root = Inode::new_at(Ext2Fs::now());
    root.mode = S_IFDIR;
    root.size = BLOCK_SIZE as u32;
    root.links_count = 2; // "." and its own ".."
    root.blocks = 1;
    root.block[0] = ROOT_DIR_BLOCK;
    write_inode(bytes, &layout, InodeNo(ROOT_INO), &root)?;

    let start = block_offset(e2kit_types::BlockNo(ROOT_DIR_BLOCK));
    let root_block = &mut bytes[start..start + BLOCK_SIZE];
    write_entry_at(root_block, 0, ROOT_INO, b".", FileType::Directory, 12)?;
    write_entry_at(
        root_block,
        12,
        ROOT_INO,
        b"..",
        FileType::Directory,
        (BLOCK_SIZE - 12) as u16,
    )?;

    Ext2Fs::from_image(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2kit_alloc::{bitmap_count_free, bitmap_get};
    use e2kit_types::IMAGE_SIZE;

    fn fresh() -> Ext2Fs {
        mkfs(Image::from_vec(vec![0; IMAGE_SIZE]).expect("image")).expect("mkfs")
    }

    #[test]
    fn geometry_and_counters() {
        let fs = fresh();
        let sb = fs.superblock().expect("sb");
        let gd = fs.group_desc().expect("gd");
        assert_eq!(sb.inodes_count, 32);
        assert_eq!(sb.blocks_count, 128);
        assert_eq!(sb.first_ino, FIRST_INO);
        assert_eq!(gd.used_dirs_count, 1);

        // counters agree with the bitmaps
        let layout = *fs.layout();
        let bytes = fs.bytes();
        assert_eq!(
            bitmap_count_free(&bytes[layout.block_bitmap_range()], sb.blocks_count),
            sb.free_blocks_count
        );
        assert_eq!(
            bitmap_count_free(&bytes[layout.inode_bitmap_range()], sb.inodes_count),
            sb.free_inodes_count
        );
        assert_eq!(u32::from(gd.free_blocks_count), sb.free_blocks_count);
        assert_eq!(u32::from(gd.free_inodes_count), sb.free_inodes_count);
    }

    #[test]
    fn root_directory_shape() {
        let fs = fresh();
        let root = fs.inode(InodeNo(ROOT_INO)).expect("root");
        assert!(root.is_dir());
        assert_eq!(root.size, 1024);
        assert_eq!(root.links_count, 2);
        assert_eq!(root.block[0], ROOT_DIR_BLOCK);

        let entries = e2kit_dir::live_entries(
            fs.block(e2kit_types::BlockNo(ROOT_DIR_BLOCK)).expect("block"),
            ROOT_DIR_BLOCK,
        )
        .expect("entries");
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dot());
        assert!(entries[1].is_dotdot());
        assert_eq!(entries[0].inode, ROOT_INO);
        assert_eq!(entries[1].inode, ROOT_INO);
        assert_eq!(
            usize::from(entries[0].rec_len) + usize::from(entries[1].rec_len),
            BLOCK_SIZE
        );
    }

    #[test]
    fn reserved_bits_are_set() {
        let fs = fresh();
        let layout = *fs.layout();
        let bytes = fs.bytes();
        let block_bm = &bytes[layout.block_bitmap_range()];
        for bit in 0..9 {
            assert!(bitmap_get(block_bm, bit), "block bit {bit} should be set");
        }
        assert!(!bitmap_get(block_bm, 9));
        assert!(bitmap_get(block_bm, 127));

        let inode_bm = &bytes[layout.inode_bitmap_range()];
        for bit in 0..10 {
            assert!(bitmap_get(inode_bm, bit), "inode bit {bit} should be set");
        }
        assert!(!bitmap_get(inode_bm, 10));
    }
}
