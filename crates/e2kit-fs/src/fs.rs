//! The open-filesystem context.
//!
//! Replaces the original tools' process-wide disk pointer with an explicit
//! value: every operation borrows the context, and the mapped buffer lives
//! exactly as long as it does.

use e2kit_error::{E2Error, Result};
use e2kit_image::Image;
use e2kit_ondisk::{GroupDesc, Inode, Layout, Superblock, read_inode, write_inode};
use e2kit_types::{BLOCK_SIZE, BlockNo, IMAGE_SIZE, INODE_SIZE, InodeNo};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// An open single-group ext2 image plus its resolved layout.
#[derive(Debug)]
pub struct Ext2Fs {
    image: Image,
    layout: Layout,
}

impl Ext2Fs {
    /// Open an image file and parse its superblock and group descriptor.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_image(Image::open(path)?)
    }

    /// Wrap an already-loaded image.
    ///
    /// Rejects descriptors whose bitmap or inode-table blocks fall outside
    /// the image; everything downstream indexes through them.
    pub fn from_image(image: Image) -> Result<Self> {
        let sb = Superblock::parse_from_image(image.as_slice())?;
        let gd = GroupDesc::parse_from_image(image.as_slice())?;

        let total_blocks = (IMAGE_SIZE / BLOCK_SIZE) as u32;
        for (field, block) in [
            ("block bitmap", gd.block_bitmap),
            ("inode bitmap", gd.inode_bitmap),
        ] {
            if block == 0 || block >= total_blocks {
                return Err(E2Error::Corrupt {
                    block,
                    detail: format!("{field} block is outside the image"),
                });
            }
        }
        let table_blocks = (sb.inodes_count as usize * INODE_SIZE).div_ceil(BLOCK_SIZE) as u32;
        if gd.inode_table == 0 || gd.inode_table + table_blocks > total_blocks {
            return Err(E2Error::Corrupt {
                block: gd.inode_table,
                detail: "inode table extends outside the image".into(),
            });
        }

        let layout = Layout::new(&sb, &gd);
        Ok(Self { image, layout })
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn superblock(&self) -> Result<Superblock> {
        Ok(Superblock::parse_from_image(self.image.as_slice())?)
    }

    pub fn group_desc(&self) -> Result<GroupDesc> {
        Ok(GroupDesc::parse_from_image(self.image.as_slice())?)
    }

    pub fn inode(&self, ino: InodeNo) -> Result<Inode> {
        Ok(read_inode(self.image.as_slice(), &self.layout, ino)?)
    }

    pub fn write_inode(&mut self, ino: InodeNo, inode: &Inode) -> Result<()> {
        Ok(write_inode(
            self.image.as_mut_slice(),
            &self.layout,
            ino,
            inode,
        )?)
    }

    pub fn block(&self, block: BlockNo) -> Result<&[u8]> {
        self.image.block(block)
    }

    pub fn block_mut(&mut self, block: BlockNo) -> Result<&mut [u8]> {
        self.image.block_mut(block)
    }

    /// Raw image bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.image.as_slice()
    }

    /// Mutable raw image bytes. The dump, checker, and test suites reach
    /// through this for regions smaller than a block.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.image.as_mut_slice()
    }

    /// Write the buffer back to the backing file.
    pub fn flush(&mut self) -> Result<()> {
        self.image.flush()
    }

    /// Give up the context and keep the raw image.
    #[must_use]
    pub fn into_image(self) -> Image {
        self.image
    }

    /// Wall-clock seconds for ctime/dtime/mtime stamps.
    #[must_use]
    pub(crate) fn now() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// Number of whole blocks a byte length occupies, with a one-block floor.
#[must_use]
pub(crate) fn blocks_for_len(len: u64) -> u64 {
    let blocks = len.div_ceil(BLOCK_SIZE as u64);
    blocks.max(1)
}
