//! Checker and dump coverage: each repair class, idempotence, and the
//! dump report's shape.

mod common;

use common::{assert_counters_consistent, fresh_fs, host_file};
use e2kit_alloc::{bitmap_clear, bitmap_get};
use e2kit_dir::parse_block;
use e2kit_fs::{check, dump, render};
use e2kit_ondisk::{FileType, Superblock};
use e2kit_types::{BlockNo, InodeNo, ROOT_INO};

#[test]
fn clean_image_reports_nothing() {
    let mut fs = fresh_fs();
    let report = check(&mut fs).expect("check");
    assert_eq!(report.total_fixed, 0);
    assert!(report.fixes.is_empty());
    assert_eq!(report.summary(), "No file system inconsistencies detected!");
}

#[test]
fn counter_drift_is_repaired_with_its_magnitude() {
    let mut fs = fresh_fs();
    let sb = fs.superblock().expect("sb");
    Superblock::set_free_inodes_count(fs.bytes_mut(), sb.free_inodes_count + 3)
        .expect("corrupt counter");

    let report = check(&mut fs).expect("check");
    assert_eq!(report.total_fixed, 3);
    assert_eq!(report.fixes.len(), 1);
    assert_eq!(
        report.fixes[0],
        "Fixed: superblock's free inodes counter was off by 3 compared to the bitmap"
    );
    assert_eq!(report.summary(), "3 file system inconsistencies repaired!");
    assert_eq!(
        fs.superblock().expect("sb").free_inodes_count,
        sb.free_inodes_count
    );

    let second = check(&mut fs).expect("second run");
    assert_eq!(second.total_fixed, 0);
    assert_counters_consistent(&fs);
}

#[test]
fn entry_type_mismatch_is_rewritten_from_the_mode() {
    let mut fs = fresh_fs();
    let host = host_file(10);
    let ino = fs.copy_in(host.path(), "/hello.txt").expect("cp");

    // flip the entry's file_type byte to "directory"
    let root_block = BlockNo(fs.inode(InodeNo(ROOT_INO)).expect("root").block[0]);
    let offset = parse_block(fs.block(root_block).expect("block"), root_block.0)
        .expect("parse")
        .into_iter()
        .find(|e| e.name == b"hello.txt")
        .expect("entry")
        .offset;
    fs.block_mut(root_block).expect("block")[offset + 7] = FileType::Directory.as_raw();

    let report = check(&mut fs).expect("check");
    assert_eq!(report.total_fixed, 1);
    assert_eq!(
        report.fixes[0],
        format!("Fixed: Entry type vs inode mismatch: inode [{ino}]")
    );

    let entries = parse_block(fs.block(root_block).expect("block"), root_block.0).expect("parse");
    let entry = entries.iter().find(|e| e.name == b"hello.txt").expect("entry");
    assert_eq!(entry.file_type(), Some(FileType::Regular));

    assert_eq!(check(&mut fs).expect("second run").total_fixed, 0);
}

#[test]
fn cleared_inode_bit_is_reallocated() {
    let mut fs = fresh_fs();
    let host = host_file(10);
    let ino = fs.copy_in(host.path(), "/hello.txt").expect("cp");

    let range = fs.layout().inode_bitmap_range();
    bitmap_clear(&mut fs.bytes_mut()[range.clone()], ino.index());

    let report = check(&mut fs).expect("check");
    // two counter repairs (bitmap was authoritative) plus the allocation fix
    assert_eq!(report.total_fixed, 3);
    assert!(report
        .fixes
        .contains(&format!("Fixed: inode [{ino}] not marked as in-use")));
    assert!(bitmap_get(&fs.bytes()[range], ino.index()));

    assert_eq!(check(&mut fs).expect("second run").total_fixed, 0);
    assert_counters_consistent(&fs);
}

#[test]
fn stray_dtime_is_cleared() {
    let mut fs = fresh_fs();
    let host = host_file(10);
    let ino = fs.copy_in(host.path(), "/hello.txt").expect("cp");

    let mut inode = fs.inode(ino).expect("inode");
    inode.dtime = 1_234_567;
    fs.write_inode(ino, &inode).expect("write");

    let report = check(&mut fs).expect("check");
    assert_eq!(report.total_fixed, 1);
    assert_eq!(
        report.fixes[0],
        format!("Fixed: valid inode marked for deletion: [{ino}]")
    );
    assert_eq!(fs.inode(ino).expect("inode").dtime, 0);
    assert_eq!(check(&mut fs).expect("second run").total_fixed, 0);
}

#[test]
fn cleared_data_block_bits_are_reallocated() {
    let mut fs = fresh_fs();
    let host = host_file(1500);
    let ino = fs.copy_in(host.path(), "/hello.txt").expect("cp");
    let inode = fs.inode(ino).expect("inode");

    let range = fs.layout().block_bitmap_range();
    for block in inode.direct_blocks() {
        bitmap_clear(&mut fs.bytes_mut()[range.clone()], block.0 - 1);
    }

    let report = check(&mut fs).expect("check");
    // four counter units (two per structure) plus one block-allocation fix
    assert_eq!(report.total_fixed, 5);
    assert!(report.fixes.contains(&format!(
        "Fixed: 2 in-use data blocks not marked in data bitmap for inode: [{ino}]"
    )));
    for block in inode.direct_blocks() {
        assert!(bitmap_get(&fs.bytes()[range.clone()], block.0 - 1));
    }

    assert_eq!(check(&mut fs).expect("second run").total_fixed, 0);
    assert_counters_consistent(&fs);
}

#[test]
fn fixes_reach_into_subdirectories() {
    let mut fs = fresh_fs();
    let host = host_file(10);
    fs.make_directory("/sub").expect("mkdir");
    let ino = fs.copy_in(host.path(), "/sub/f").expect("cp");

    let mut inode = fs.inode(ino).expect("inode");
    inode.dtime = 99;
    fs.write_inode(ino, &inode).expect("write");

    let report = check(&mut fs).expect("check");
    assert_eq!(report.total_fixed, 1);
    assert_eq!(fs.inode(ino).expect("inode").dtime, 0);
}

#[test]
fn several_faults_repair_in_one_pass() {
    let mut fs = fresh_fs();
    let host = host_file(10);
    let ino = fs.copy_in(host.path(), "/a").expect("cp");

    let mut inode = fs.inode(ino).expect("inode");
    inode.dtime = 7;
    fs.write_inode(ino, &inode).expect("write");
    let range = fs.layout().inode_bitmap_range();
    bitmap_clear(&mut fs.bytes_mut()[range], ino.index());

    let report = check(&mut fs).expect("check");
    // counters (2) + allocation (1) + dtime (1)
    assert_eq!(report.total_fixed, 4);
    assert_eq!(check(&mut fs).expect("second run").total_fixed, 0);
    assert_counters_consistent(&fs);
}

#[test]
fn dump_reports_the_expected_shape() {
    let mut fs = fresh_fs();
    let host = host_file(1500);
    let ino = fs.copy_in(host.path(), "/hello.txt").expect("cp");
    fs.make_directory("/sub").expect("mkdir");

    let report = dump(&fs).expect("dump");
    assert_eq!(report.inodes_count, 32);
    assert_eq!(report.blocks_count, 128);
    assert_eq!(report.group.used_dirs, 2);

    // bit 0 leftmost, spaced every 8 bits
    assert!(report.block_bitmap.starts_with("11111111 1"));
    assert_eq!(report.block_bitmap.len(), 128 + 15);
    assert_eq!(report.inode_bitmap.len(), 32 + 3);

    let root = report.inodes.iter().find(|i| i.ino == ROOT_INO).expect("root");
    assert_eq!(root.kind, 'd');
    let file = report.inodes.iter().find(|i| i.ino == ino.0).expect("file");
    assert_eq!(file.kind, 'f');
    assert_eq!(file.size, 1500);
    assert_eq!(file.direct.len(), 2);

    let root_dir = report
        .directory_blocks
        .iter()
        .find(|d| d.ino == ROOT_INO)
        .expect("root dir block");
    let names: Vec<&str> = root_dir.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "hello.txt", "sub"]);

    let mut text = Vec::new();
    render(&report, &mut text).expect("render");
    let text = String::from_utf8(text).expect("utf8");
    assert!(text.contains("Inodes: 32"));
    assert!(text.contains("Blocks: 128"));
    assert!(text.contains("DIR BLOCK NUM:"));
    assert!(text.contains("name=hello.txt"));
}
