#![forbid(unsafe_code)]
//! Directory-block entry codec.
//!
//! A directory block is a chain of variable-length entries whose `rec_len`
//! fields sum to exactly the block size. Insertion shrinks the terminal
//! entry to its real (4-byte aligned) size and drops the new entry into the
//! freed slack; removal extends the previous entry's `rec_len` over the
//! victim, leaving its bytes behind as a tombstone that `restore` can find
//! again by walking the hidden entries inside the slack.

use e2kit_error::{E2Error, Result};
use e2kit_ondisk::FileType;
use e2kit_types::{BLOCK_SIZE, read_le_u16, read_le_u32, write_le_u16, write_le_u32};
use serde::{Deserialize, Serialize};

/// Fixed header: inode (4) + rec_len (2) + name_len (1) + file_type (1).
pub const ENTRY_HEADER: usize = 8;

/// On-disk size consumed by an entry with an `n`-byte name, padded to a
/// 4-byte boundary.
#[must_use]
pub fn entry_real_size(name_len: u8) -> usize {
    (ENTRY_HEADER + usize::from(name_len) + 3) & !3
}

/// One slot in a directory block. `inode == 0` marks an empty slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub inode: u32,
    pub rec_len: u16,
    pub file_type: u8,
    pub name: Vec<u8>,
    /// Byte offset of this slot within its block.
    pub offset: usize,
}

impl DirEntry {
    /// Bytes this entry actually occupies; the rest of `rec_len` is slack.
    #[must_use]
    pub fn real_size(&self) -> usize {
        entry_real_size(self.name.len() as u8)
    }

    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Decoded `file_type`, if the raw byte is a known type.
    #[must_use]
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_raw(self.file_type)
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }
}

fn corrupt(block: u32, detail: &str) -> E2Error {
    E2Error::Corrupt {
        block,
        detail: detail.into(),
    }
}

/// Parse every slot of a directory block, empty slots included.
///
/// Validates the chain: each `rec_len` is at least the header size, a
/// multiple of 4, in bounds, and the final entry ends exactly at the block
/// boundary.
pub fn parse_block(block: &[u8], block_no: u32) -> Result<Vec<DirEntry>> {
    if block.len() != BLOCK_SIZE {
        return Err(corrupt(block_no, "directory block has wrong length"));
    }

    let mut entries = Vec::new();
    let mut offset = 0_usize;

    while offset < BLOCK_SIZE {
        if offset + ENTRY_HEADER > BLOCK_SIZE {
            return Err(corrupt(block_no, "directory entry header truncated at block end"));
        }
        let inode = read_le_u32(block, offset)?;
        let rec_len = read_le_u16(block, offset + 4)?;
        let name_len = block[offset + 6];
        let file_type = block[offset + 7];

        let rec_len_usize = usize::from(rec_len);
        if rec_len_usize < ENTRY_HEADER {
            return Err(corrupt(block_no, "directory entry rec_len below header size"));
        }
        if rec_len_usize % 4 != 0 {
            return Err(corrupt(block_no, "directory entry rec_len not 4-byte aligned"));
        }
        if offset + rec_len_usize > BLOCK_SIZE {
            return Err(corrupt(block_no, "directory entry extends past block end"));
        }
        if ENTRY_HEADER + usize::from(name_len) > rec_len_usize {
            return Err(corrupt(block_no, "directory entry name extends past rec_len"));
        }

        let name = block[offset + ENTRY_HEADER..offset + ENTRY_HEADER + usize::from(name_len)]
            .to_vec();
        entries.push(DirEntry {
            inode,
            rec_len,
            file_type,
            name,
            offset,
        });
        offset += rec_len_usize;
    }

    if offset != BLOCK_SIZE {
        return Err(corrupt(block_no, "directory entry chain does not cover the block"));
    }
    Ok(entries)
}

/// Parse a block and drop empty slots.
pub fn live_entries(block: &[u8], block_no: u32) -> Result<Vec<DirEntry>> {
    Ok(parse_block(block, block_no)?
        .into_iter()
        .filter(|e| e.inode != 0)
        .collect())
}

/// Write one entry at `offset` with an explicit `rec_len`.
pub fn write_entry_at(
    block: &mut [u8],
    offset: usize,
    inode: u32,
    name: &[u8],
    file_type: FileType,
    rec_len: u16,
) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(E2Error::InvalidArgument(format!(
            "entry name length {} out of range",
            name.len()
        )));
    }
    if offset + entry_real_size(name.len() as u8) > block.len()
        || offset + usize::from(rec_len) > block.len()
    {
        return Err(E2Error::InvalidArgument(format!(
            "entry at offset {offset} does not fit its block"
        )));
    }
    write_le_u32(block, offset, inode)?;
    write_le_u16(block, offset + 4, rec_len)?;
    block[offset + 6] = name.len() as u8;
    block[offset + 7] = file_type.as_raw();
    block[offset + ENTRY_HEADER..offset + ENTRY_HEADER + name.len()].copy_from_slice(name);
    Ok(())
}

/// Initialize a fresh directory data block with a single entry spanning the
/// whole block.
pub fn init_block(block: &mut [u8], inode: u32, name: &[u8], file_type: FileType) -> Result<()> {
    block.fill(0);
    write_entry_at(block, 0, inode, name, file_type, BLOCK_SIZE as u16)
}

/// Try to insert an entry into an existing directory block.
///
/// Returns `true` when the entry fit (the terminal entry's slack was large
/// enough, or the terminal slot was empty); `false` when the caller must
/// allocate a new block.
pub fn insert_into_block(
    block: &mut [u8],
    block_no: u32,
    inode: u32,
    name: &[u8],
    file_type: FileType,
) -> Result<bool> {
    let entries = parse_block(block, block_no)?;
    let last = entries
        .last()
        .ok_or_else(|| corrupt(block_no, "directory block has no entries"))?;

    let new_size = entry_real_size(name.len() as u8);

    if last.inode == 0 {
        // Empty terminal slot: take it over wholesale.
        if usize::from(last.rec_len) >= new_size {
            let (offset, rec_len) = (last.offset, last.rec_len);
            write_entry_at(block, offset, inode, name, file_type, rec_len)?;
            return Ok(true);
        }
        return Ok(false);
    }

    let last_real = last.real_size();
    let slack = usize::from(last.rec_len) - last_real;
    if slack < new_size {
        return Ok(false);
    }

    let last_offset = last.offset;
    write_le_u16(block, last_offset + 4, last_real as u16)?;
    write_entry_at(
        block,
        last_offset + last_real,
        inode,
        name,
        file_type,
        slack as u16,
    )?;
    Ok(true)
}

/// Outcome of removing an entry from one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedEntry {
    pub inode: u32,
    pub file_type: u8,
    /// True when the victim led its block and its `inode` field was zeroed
    /// in place instead of being folded into a predecessor's `rec_len`.
    pub was_head: bool,
}

/// Remove the named entry from a directory block, if present.
///
/// With a predecessor in the same block the victim is absorbed into the
/// predecessor's `rec_len` and its bytes survive as a tombstone. A victim
/// at the head of the block keeps its slot; only its `inode` field is
/// zeroed, which keeps the chain intact but forfeits restorability.
pub fn remove_from_block(block: &mut [u8], block_no: u32, name: &[u8]) -> Result<Option<RemovedEntry>> {
    let entries = parse_block(block, block_no)?;

    let mut prev: Option<&DirEntry> = None;
    for entry in &entries {
        if entry.inode != 0 && entry.name == name {
            let removed = RemovedEntry {
                inode: entry.inode,
                file_type: entry.file_type,
                was_head: prev.is_none(),
            };
            match prev {
                Some(p) => {
                    let merged = p.rec_len + entry.rec_len;
                    write_le_u16(block, p.offset + 4, merged)?;
                }
                None => {
                    write_le_u32(block, entry.offset, 0)?;
                }
            }
            return Ok(Some(removed));
        }
        prev = Some(entry);
    }
    Ok(None)
}

/// A recoverable entry found in the slack behind a live slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    /// Offset of the slot whose `rec_len` currently spans the tombstone.
    pub prev_offset: usize,
    /// Offset of the hidden entry itself.
    pub offset: usize,
    pub inode: u32,
    pub file_type: u8,
}

/// Scan the hidden entries inside each slot's slack for `name`.
///
/// Hidden entries sit between a slot's real size and its `rec_len`, chained
/// by their own real sizes. Entries whose `inode` was zeroed are skipped;
/// their identity is gone.
pub fn find_tombstone(block: &[u8], block_no: u32, name: &[u8]) -> Result<Option<Tombstone>> {
    let entries = parse_block(block, block_no)?;

    for entry in &entries {
        let gap_end = entry.offset + usize::from(entry.rec_len);
        let mut cursor = entry.offset + entry.real_size();

        while cursor + ENTRY_HEADER <= gap_end {
            let inode = read_le_u32(block, cursor)?;
            let name_len = block[cursor + 6];
            let file_type = block[cursor + 7];
            let real = entry_real_size(name_len);

            if cursor + ENTRY_HEADER + usize::from(name_len) > gap_end {
                break;
            }
            if inode != 0
                && &block[cursor + ENTRY_HEADER..cursor + ENTRY_HEADER + usize::from(name_len)]
                    == name
            {
                return Ok(Some(Tombstone {
                    prev_offset: entry.offset,
                    offset: cursor,
                    inode,
                    file_type,
                }));
            }
            if name_len == 0 {
                // Stale zeroes, not an entry chain; nothing more to find here.
                break;
            }
            cursor += real;
        }
    }
    Ok(None)
}

/// Splice a tombstone back into the live chain.
///
/// The covering slot's `rec_len` shrinks to end at the tombstone, and the
/// tombstone's `rec_len` takes over the remainder of the covering span.
pub fn splice_tombstone(block: &mut [u8], block_no: u32, tomb: &Tombstone) -> Result<()> {
    let prev_rec_len = read_le_u16(block, tomb.prev_offset + 4)?;
    let span_end = tomb.prev_offset + usize::from(prev_rec_len);
    if tomb.offset <= tomb.prev_offset || tomb.offset >= span_end {
        return Err(corrupt(block_no, "tombstone lies outside its covering slot"));
    }

    let gap = (tomb.offset - tomb.prev_offset) as u16;
    write_le_u16(block, tomb.prev_offset + 4, gap)?;
    write_le_u16(block, tomb.offset + 4, prev_rec_len - gap)?;
    Ok(())
}
