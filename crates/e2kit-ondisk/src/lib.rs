#![forbid(unsafe_code)]
//! Typed views over the on-disk structures of a single-group ext2 image.
//!
//! Superblock, group descriptor, and inode records parse into owned structs
//! and store back to raw bytes with explicit little-endian accessors. The
//! mutating tools only ever rewrite whole 128-byte inode records and the
//! individual counter fields, so each struct carries a `store` and the
//! counters get targeted setters.

use e2kit_types::{
    BLOCK_SIZE, EXT2_MAGIC, FIRST_INO, GROUP_DESC_OFFSET, INODE_BLOCK_SLOTS, INODE_SIZE,
    SUPERBLOCK_OFFSET, BlockNo, InodeNo, ParseError, block_offset, ensure_slice,
    ensure_slice_mut, read_le_u16, read_le_u32, write_le_u16, write_le_u32,
};
use serde::{Deserialize, Serialize};

// ── File types and mode bits ────────────────────────────────────────────────

/// Format mask for `i_mode`.
pub const S_IFMT: u16 = 0xF000;
/// Regular file.
pub const S_IFREG: u16 = 0x8000;
/// Directory.
pub const S_IFDIR: u16 = 0x4000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0xA000;

/// Directory-entry `file_type` values.
const FT_REG_FILE: u8 = 1;
const FT_DIR: u8 = 2;
const FT_SYMLINK: u8 = 7;

/// File type as carried by both `i_mode` and directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

impl FileType {
    /// Decode a directory entry's `file_type` byte.
    #[must_use]
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            FT_REG_FILE => Some(Self::Regular),
            FT_DIR => Some(Self::Directory),
            FT_SYMLINK => Some(Self::Symlink),
            _ => None,
        }
    }

    /// Directory entry `file_type` byte for this type.
    #[must_use]
    pub fn as_raw(self) -> u8 {
        match self {
            Self::Regular => FT_REG_FILE,
            Self::Directory => FT_DIR,
            Self::Symlink => FT_SYMLINK,
        }
    }

    /// Decode an inode's `i_mode` format bits.
    ///
    /// Matches on the full format nibble; S_IFLNK shares bits with S_IFREG,
    /// so partial-mask tests misclassify symlinks.
    #[must_use]
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(Self::Regular),
            S_IFDIR => Some(Self::Directory),
            S_IFLNK => Some(Self::Symlink),
            _ => None,
        }
    }

    /// `i_mode` format bits for this type.
    #[must_use]
    pub fn as_mode(self) -> u16 {
        match self {
            Self::Regular => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
        }
    }

    /// One-letter tag used by the dump tool: `f`, `d`, or `l`.
    #[must_use]
    pub fn letter(self) -> char {
        match self {
            Self::Regular => 'f',
            Self::Directory => 'd',
            Self::Symlink => 'l',
        }
    }
}

// ── Superblock ──────────────────────────────────────────────────────────────

const SB_INODES_COUNT: usize = 0x00;
const SB_BLOCKS_COUNT: usize = 0x04;
const SB_FREE_BLOCKS_COUNT: usize = 0x0C;
const SB_FREE_INODES_COUNT: usize = 0x10;
const SB_FIRST_DATA_BLOCK: usize = 0x14;
const SB_LOG_BLOCK_SIZE: usize = 0x18;
const SB_BLOCKS_PER_GROUP: usize = 0x20;
const SB_INODES_PER_GROUP: usize = 0x28;
const SB_MAGIC: usize = 0x38;
const SB_FIRST_INO: usize = 0x54;

/// Parsed superblock. Only the fields these tools read or repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub magic: u16,
    pub first_ino: u32,
}

impl Superblock {
    /// Parse from the 1024-byte superblock region.
    pub fn parse_region(region: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u16(region, SB_MAGIC)?;
        if magic != EXT2_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u32::from(EXT2_MAGIC),
                actual: u32::from(magic),
            });
        }

        let log_block_size = read_le_u32(region, SB_LOG_BLOCK_SIZE)?;
        if log_block_size != 0 {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "only 1024-byte blocks are supported",
            });
        }

        // Revision 0 images leave s_first_ino zeroed; the classic value
        // applies there.
        let raw_first_ino = read_le_u32(region, SB_FIRST_INO)?;
        let first_ino = if raw_first_ino == 0 {
            FIRST_INO
        } else {
            raw_first_ino
        };

        Ok(Self {
            inodes_count: read_le_u32(region, SB_INODES_COUNT)?,
            blocks_count: read_le_u32(region, SB_BLOCKS_COUNT)?,
            free_blocks_count: read_le_u32(region, SB_FREE_BLOCKS_COUNT)?,
            free_inodes_count: read_le_u32(region, SB_FREE_INODES_COUNT)?,
            first_data_block: read_le_u32(region, SB_FIRST_DATA_BLOCK)?,
            log_block_size,
            blocks_per_group: read_le_u32(region, SB_BLOCKS_PER_GROUP)?,
            inodes_per_group: read_le_u32(region, SB_INODES_PER_GROUP)?,
            magic,
            first_ino,
        })
    }

    /// Parse from a full image.
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let region = ensure_slice(image, SUPERBLOCK_OFFSET, BLOCK_SIZE)?;
        Self::parse_region(region)
    }

    /// Write every parsed field into the superblock region of `image`.
    pub fn store_to_image(&self, image: &mut [u8]) -> Result<(), ParseError> {
        let base = SUPERBLOCK_OFFSET;
        write_le_u32(image, base + SB_INODES_COUNT, self.inodes_count)?;
        write_le_u32(image, base + SB_BLOCKS_COUNT, self.blocks_count)?;
        write_le_u32(image, base + SB_FREE_BLOCKS_COUNT, self.free_blocks_count)?;
        write_le_u32(image, base + SB_FREE_INODES_COUNT, self.free_inodes_count)?;
        write_le_u32(image, base + SB_FIRST_DATA_BLOCK, self.first_data_block)?;
        write_le_u32(image, base + SB_LOG_BLOCK_SIZE, self.log_block_size)?;
        write_le_u32(image, base + SB_BLOCKS_PER_GROUP, self.blocks_per_group)?;
        write_le_u32(image, base + SB_INODES_PER_GROUP, self.inodes_per_group)?;
        write_le_u16(image, base + SB_MAGIC, self.magic)?;
        write_le_u32(image, base + SB_FIRST_INO, self.first_ino)?;
        Ok(())
    }

    /// Overwrite `s_free_blocks_count` in place.
    pub fn set_free_blocks_count(image: &mut [u8], value: u32) -> Result<(), ParseError> {
        write_le_u32(image, SUPERBLOCK_OFFSET + SB_FREE_BLOCKS_COUNT, value)
    }

    /// Overwrite `s_free_inodes_count` in place.
    pub fn set_free_inodes_count(image: &mut [u8], value: u32) -> Result<(), ParseError> {
        write_le_u32(image, SUPERBLOCK_OFFSET + SB_FREE_INODES_COUNT, value)
    }
}

// ── Group descriptor ────────────────────────────────────────────────────────

const GD_BLOCK_BITMAP: usize = 0x00;
const GD_INODE_BITMAP: usize = 0x04;
const GD_INODE_TABLE: usize = 0x08;
const GD_FREE_BLOCKS_COUNT: usize = 0x0C;
const GD_FREE_INODES_COUNT: usize = 0x0E;
const GD_USED_DIRS_COUNT: usize = 0x10;

/// Parsed block-group descriptor for the single group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl GroupDesc {
    pub fn parse_region(region: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            block_bitmap: read_le_u32(region, GD_BLOCK_BITMAP)?,
            inode_bitmap: read_le_u32(region, GD_INODE_BITMAP)?,
            inode_table: read_le_u32(region, GD_INODE_TABLE)?,
            free_blocks_count: read_le_u16(region, GD_FREE_BLOCKS_COUNT)?,
            free_inodes_count: read_le_u16(region, GD_FREE_INODES_COUNT)?,
            used_dirs_count: read_le_u16(region, GD_USED_DIRS_COUNT)?,
        })
    }

    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let region = ensure_slice(image, GROUP_DESC_OFFSET, 32)?;
        Self::parse_region(region)
    }

    pub fn store_to_image(&self, image: &mut [u8]) -> Result<(), ParseError> {
        let base = GROUP_DESC_OFFSET;
        write_le_u32(image, base + GD_BLOCK_BITMAP, self.block_bitmap)?;
        write_le_u32(image, base + GD_INODE_BITMAP, self.inode_bitmap)?;
        write_le_u32(image, base + GD_INODE_TABLE, self.inode_table)?;
        write_le_u16(image, base + GD_FREE_BLOCKS_COUNT, self.free_blocks_count)?;
        write_le_u16(image, base + GD_FREE_INODES_COUNT, self.free_inodes_count)?;
        write_le_u16(image, base + GD_USED_DIRS_COUNT, self.used_dirs_count)?;
        Ok(())
    }

    pub fn set_free_blocks_count(image: &mut [u8], value: u16) -> Result<(), ParseError> {
        write_le_u16(image, GROUP_DESC_OFFSET + GD_FREE_BLOCKS_COUNT, value)
    }

    pub fn set_free_inodes_count(image: &mut [u8], value: u16) -> Result<(), ParseError> {
        write_le_u16(image, GROUP_DESC_OFFSET + GD_FREE_INODES_COUNT, value)
    }

    pub fn set_used_dirs_count(image: &mut [u8], value: u16) -> Result<(), ParseError> {
        write_le_u16(image, GROUP_DESC_OFFSET + GD_USED_DIRS_COUNT, value)
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

const I_MODE: usize = 0x00;
const I_UID: usize = 0x02;
const I_SIZE: usize = 0x04;
const I_ATIME: usize = 0x08;
const I_CTIME: usize = 0x0C;
const I_MTIME: usize = 0x10;
const I_DTIME: usize = 0x14;
const I_GID: usize = 0x18;
const I_LINKS_COUNT: usize = 0x1A;
const I_BLOCKS: usize = 0x1C;
const I_FLAGS: usize = 0x20;
const I_BLOCK: usize = 0x28;
const I_GENERATION: usize = 0x64;
const I_FILE_ACL: usize = 0x68;
const I_DIR_ACL: usize = 0x6C;
const I_FADDR: usize = 0x70;

/// Parsed 128-byte inode record.
///
/// `blocks` counts 1024-byte filesystem blocks. Slots 12..15 of `block`
/// would be indirect pointers; these tools never populate or follow them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub mode: u16,
    pub uid: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    pub blocks: u32,
    pub flags: u32,
    pub block: [u32; INODE_BLOCK_SLOTS],
    pub generation: u32,
    pub file_acl: u32,
    pub dir_acl: u32,
    pub faddr: u32,
}

impl Inode {
    /// A zeroed record with creation times set, the state `init_inode`
    /// leaves behind before the operation fills in mode/size/links/blocks.
    #[must_use]
    pub fn new_at(now: u32) -> Self {
        Self {
            mode: 0,
            uid: 0,
            size: 0,
            atime: now,
            ctime: now,
            mtime: 0,
            dtime: 0,
            gid: 0,
            links_count: 0,
            blocks: 0,
            flags: 0,
            block: [0; INODE_BLOCK_SLOTS],
            generation: 0,
            file_acl: 0,
            dir_acl: 0,
            faddr: 0,
        }
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: INODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut block = [0_u32; INODE_BLOCK_SLOTS];
        for (slot, value) in block.iter_mut().enumerate() {
            *value = read_le_u32(bytes, I_BLOCK + slot * 4)?;
        }

        Ok(Self {
            mode: read_le_u16(bytes, I_MODE)?,
            uid: read_le_u16(bytes, I_UID)?,
            size: read_le_u32(bytes, I_SIZE)?,
            atime: read_le_u32(bytes, I_ATIME)?,
            ctime: read_le_u32(bytes, I_CTIME)?,
            mtime: read_le_u32(bytes, I_MTIME)?,
            dtime: read_le_u32(bytes, I_DTIME)?,
            gid: read_le_u16(bytes, I_GID)?,
            links_count: read_le_u16(bytes, I_LINKS_COUNT)?,
            blocks: read_le_u32(bytes, I_BLOCKS)?,
            flags: read_le_u32(bytes, I_FLAGS)?,
            block,
            generation: read_le_u32(bytes, I_GENERATION)?,
            file_acl: read_le_u32(bytes, I_FILE_ACL)?,
            dir_acl: read_le_u32(bytes, I_DIR_ACL)?,
            faddr: read_le_u32(bytes, I_FADDR)?,
        })
    }

    pub fn store_to_bytes(&self, bytes: &mut [u8]) -> Result<(), ParseError> {
        if bytes.len() < INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: INODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        write_le_u16(bytes, I_MODE, self.mode)?;
        write_le_u16(bytes, I_UID, self.uid)?;
        write_le_u32(bytes, I_SIZE, self.size)?;
        write_le_u32(bytes, I_ATIME, self.atime)?;
        write_le_u32(bytes, I_CTIME, self.ctime)?;
        write_le_u32(bytes, I_MTIME, self.mtime)?;
        write_le_u32(bytes, I_DTIME, self.dtime)?;
        write_le_u16(bytes, I_GID, self.gid)?;
        write_le_u16(bytes, I_LINKS_COUNT, self.links_count)?;
        write_le_u32(bytes, I_BLOCKS, self.blocks)?;
        write_le_u32(bytes, I_FLAGS, self.flags)?;
        for (slot, value) in self.block.iter().enumerate() {
            write_le_u32(bytes, I_BLOCK + slot * 4, *value)?;
        }
        write_le_u32(bytes, I_GENERATION, self.generation)?;
        write_le_u32(bytes, I_FILE_ACL, self.file_acl)?;
        write_le_u32(bytes, I_DIR_ACL, self.dir_acl)?;
        write_le_u32(bytes, I_FADDR, self.faddr)?;
        Ok(())
    }

    /// File type from the `i_mode` format bits.
    #[must_use]
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    /// The populated direct block pointers, in slot order.
    pub fn direct_blocks(&self) -> impl Iterator<Item = BlockNo> + '_ {
        self.block
            .iter()
            .take(e2kit_types::DIRECT_BLOCKS)
            .filter(|&&b| b != 0)
            .map(|&b| BlockNo(b))
    }

    /// Index of the first empty direct slot, if any.
    #[must_use]
    pub fn free_direct_slot(&self) -> Option<usize> {
        self.block
            .iter()
            .take(e2kit_types::DIRECT_BLOCKS)
            .position(|&b| b == 0)
    }
}

// ── Layout ──────────────────────────────────────────────────────────────────

/// Resolved byte layout of the single block group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub first_ino: u32,
    pub block_bitmap: BlockNo,
    pub inode_bitmap: BlockNo,
    pub inode_table: BlockNo,
}

impl Layout {
    #[must_use]
    pub fn new(sb: &Superblock, gd: &GroupDesc) -> Self {
        Self {
            inodes_count: sb.inodes_count,
            blocks_count: sb.blocks_count,
            first_ino: sb.first_ino,
            block_bitmap: BlockNo(gd.block_bitmap),
            inode_bitmap: BlockNo(gd.inode_bitmap),
            inode_table: BlockNo(gd.inode_table),
        }
    }

    /// Byte offset of inode `ino` in the inode table. Inode `n` lives at
    /// table index `n - 1`.
    pub fn inode_offset(&self, ino: InodeNo) -> Result<usize, ParseError> {
        if ino.0 == 0 || ino.0 > self.inodes_count {
            return Err(ParseError::InvalidField {
                field: "inode",
                reason: "inode number out of range",
            });
        }
        Ok(block_offset(self.inode_table) + ino.index() as usize * INODE_SIZE)
    }

    /// Byte range of the block bitmap.
    #[must_use]
    pub fn block_bitmap_range(&self) -> std::ops::Range<usize> {
        let start = block_offset(self.block_bitmap);
        start..start + BLOCK_SIZE
    }

    /// Byte range of the inode bitmap.
    #[must_use]
    pub fn inode_bitmap_range(&self) -> std::ops::Range<usize> {
        let start = block_offset(self.inode_bitmap);
        start..start + BLOCK_SIZE
    }
}

/// Read and parse inode `ino` from a full image.
pub fn read_inode(image: &[u8], layout: &Layout, ino: InodeNo) -> Result<Inode, ParseError> {
    let offset = layout.inode_offset(ino)?;
    Inode::parse_from_bytes(ensure_slice(image, offset, INODE_SIZE)?)
}

/// Store inode `ino` back into a full image.
pub fn write_inode(
    image: &mut [u8],
    layout: &Layout,
    ino: InodeNo,
    inode: &Inode,
) -> Result<(), ParseError> {
    let offset = layout.inode_offset(ino)?;
    inode.store_to_bytes(ensure_slice_mut(image, offset, INODE_SIZE)?)
}
