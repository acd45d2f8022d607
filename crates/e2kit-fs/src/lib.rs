#![forbid(unsafe_code)]
//! The semantic layer of e2kit.
//!
//! `Ext2Fs` owns a loaded image and exposes the file operations (`mkdir`,
//! copy-in, `ln`, `rm`, `restore`), the consistency checker, the read-only
//! dump, and the `mkfs` formatter. Path resolution is component-wise over
//! the directory tree.

mod check;
mod dump;
mod fs;
mod mkfs;
mod ops;
mod path;

pub use check::{CheckReport, check};
pub use dump::{
    DirBlockSummary, DumpReport, EntrySummary, GroupSummary, InodeSummary, dump, render,
};
pub use fs::Ext2Fs;
pub use mkfs::mkfs;
pub use path::{lookup, resolve, split_path};
