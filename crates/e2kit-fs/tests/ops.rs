//! End-to-end coverage for the file operations on freshly minted images.

mod common;

use common::{assert_counters_consistent, fresh_fs, host_file};
use e2kit_dir::live_entries;
use e2kit_error::E2Error;
use e2kit_fs::{lookup, resolve};
use e2kit_ondisk::{FileType, S_IFDIR, S_IFLNK, S_IFREG, S_IFMT};
use e2kit_types::{BLOCK_SIZE, BlockNo, InodeNo, ROOT_INO};

#[test]
fn mkdir_creates_directory_with_dot_entries() {
    let mut fs = fresh_fs();
    let root_links_before = fs.inode(InodeNo(ROOT_INO)).expect("root").links_count;
    let used_dirs_before = fs.group_desc().expect("gd").used_dirs_count;

    let ino = fs.make_directory("/foo").expect("mkdir /foo");

    assert_eq!(resolve(&fs, "/foo").expect("resolve"), ino);
    let inode = fs.inode(ino).expect("inode");
    assert_eq!(inode.mode & S_IFMT, S_IFDIR);
    assert_eq!(inode.size as usize, BLOCK_SIZE);
    assert_eq!(inode.links_count, 2);

    let root = fs.inode(InodeNo(ROOT_INO)).expect("root");
    assert_eq!(root.links_count, root_links_before + 1);
    assert_eq!(
        fs.group_desc().expect("gd").used_dirs_count,
        used_dirs_before + 1
    );

    let block = BlockNo(inode.block[0]);
    let entries = live_entries(fs.block(block).expect("dir block"), block.0).expect("entries");
    assert_eq!(entries.len(), 2);
    assert!(entries[0].is_dot());
    assert_eq!(entries[0].inode, ino.0);
    assert!(entries[1].is_dotdot());
    assert_eq!(entries[1].inode, ROOT_INO);
    assert_eq!(
        usize::from(entries[0].rec_len) + usize::from(entries[1].rec_len),
        BLOCK_SIZE
    );

    assert_counters_consistent(&fs);
}

#[test]
fn mkdir_nested_and_error_paths() {
    let mut fs = fresh_fs();
    fs.make_directory("/a").expect("mkdir /a");
    fs.make_directory("/a/b").expect("mkdir /a/b");
    assert!(resolve(&fs, "/a/b").is_ok());

    assert!(matches!(
        fs.make_directory("/a"),
        Err(E2Error::Exists(_))
    ));
    assert!(matches!(
        fs.make_directory("/missing/child"),
        Err(E2Error::NotFound(_))
    ));
    assert!(matches!(
        fs.make_directory("relative"),
        Err(E2Error::InvalidArgument(_))
    ));
    assert_counters_consistent(&fs);
}

#[test]
fn duplicate_names_resolve_per_directory() {
    // Same leaf name at two depths; component-wise resolution must keep
    // them apart.
    let mut fs = fresh_fs();
    fs.make_directory("/x").expect("mkdir /x");
    fs.make_directory("/x/x").expect("mkdir /x/x");
    let outer = resolve(&fs, "/x").expect("outer");
    let inner = resolve(&fs, "/x/x").expect("inner");
    assert_ne!(outer, inner);

    let parent_of_inner = lookup(&fs, outer, b"x").expect("lookup").expect("present");
    assert_eq!(parent_of_inner, inner);
}

#[test]
fn copy_in_two_block_file() {
    let mut fs = fresh_fs();
    let host = host_file(1500);
    let free_before = fs.superblock().expect("sb").free_blocks_count;

    let ino = fs.copy_in(host.path(), "/hello.txt").expect("cp");

    let inode = fs.inode(ino).expect("inode");
    assert_eq!(inode.mode & S_IFMT, S_IFREG);
    assert_eq!(inode.size, 1500);
    assert_eq!(inode.blocks, 2);
    assert_eq!(inode.links_count, 1);
    assert_ne!(inode.ctime, 0);

    let expected: Vec<u8> = (0..1500).map(|i| (i % 251) as u8).collect();
    let first = fs.block(BlockNo(inode.block[0])).expect("block 0");
    assert_eq!(&first[..], &expected[..BLOCK_SIZE]);
    let second = fs.block(BlockNo(inode.block[1])).expect("block 1");
    assert_eq!(&second[..1500 - BLOCK_SIZE], &expected[BLOCK_SIZE..]);
    // tail of the final block is zero-padded
    assert!(second[1500 - BLOCK_SIZE..].iter().all(|&b| b == 0));

    assert_eq!(
        fs.superblock().expect("sb").free_blocks_count,
        free_before - 2
    );
    assert_counters_consistent(&fs);
}

#[test]
fn copy_in_empty_file_takes_one_block() {
    let mut fs = fresh_fs();
    let host = host_file(0);
    let free_before = fs.superblock().expect("sb").free_blocks_count;

    let ino = fs.copy_in(host.path(), "/empty").expect("cp");
    let inode = fs.inode(ino).expect("inode");
    assert_eq!(inode.size, 0);
    assert_eq!(inode.blocks, 1);
    assert_ne!(inode.block[0], 0);
    assert_eq!(
        fs.superblock().expect("sb").free_blocks_count,
        free_before - 1
    );
}

#[test]
fn copy_in_error_paths() {
    let mut fs = fresh_fs();
    let host = host_file(10);

    assert!(matches!(
        fs.copy_in(std::path::Path::new("/no/such/host/file"), "/x"),
        Err(E2Error::NotFound(_))
    ));

    fs.copy_in(host.path(), "/x").expect("cp");
    assert!(matches!(
        fs.copy_in(host.path(), "/x"),
        Err(E2Error::Exists(_))
    ));

    // 13 blocks exceeds the direct-pointer limit
    let big = host_file(13 * BLOCK_SIZE);
    assert!(matches!(
        fs.copy_in(big.path(), "/big"),
        Err(E2Error::NoSpace)
    ));
    assert_counters_consistent(&fs);
}

#[test]
fn hard_link_shares_the_inode() {
    let mut fs = fresh_fs();
    let host = host_file(100);
    let ino = fs.copy_in(host.path(), "/hello.txt").expect("cp");

    let linked = fs.link("/hello.txt", "/world.txt", false).expect("ln");
    assert_eq!(linked, ino);
    assert_eq!(resolve(&fs, "/world.txt").expect("resolve"), ino);
    assert_eq!(fs.inode(ino).expect("inode").links_count, 2);
    assert_counters_consistent(&fs);
}

#[test]
fn symlink_stores_the_target_path() {
    let mut fs = fresh_fs();
    let host = host_file(100);
    let file_ino = fs.copy_in(host.path(), "/hello.txt").expect("cp");

    let link_ino = fs.link("/hello.txt", "/slink", true).expect("ln -s");
    assert_ne!(link_ino, file_ino);

    let inode = fs.inode(link_ino).expect("inode");
    assert_eq!(inode.mode & S_IFMT, S_IFLNK);
    assert_eq!(inode.size, 10);
    assert_eq!(inode.links_count, 1);

    let data = fs.block(BlockNo(inode.block[0])).expect("data block");
    assert_eq!(&data[..10], b"/hello.txt");

    // the directory entry carries the symlink type
    let root_block = BlockNo(fs.inode(InodeNo(ROOT_INO)).expect("root").block[0]);
    let entries =
        live_entries(fs.block(root_block).expect("root block"), root_block.0).expect("entries");
    let entry = entries.iter().find(|e| e.name == b"slink").expect("slink entry");
    assert_eq!(entry.file_type(), Some(FileType::Symlink));
    assert_counters_consistent(&fs);
}

#[test]
fn link_error_paths() {
    let mut fs = fresh_fs();
    fs.make_directory("/d").expect("mkdir");
    let host = host_file(10);
    fs.copy_in(host.path(), "/f").expect("cp");

    assert!(matches!(
        fs.link("/missing", "/l", false),
        Err(E2Error::NotFound(_))
    ));
    assert!(matches!(
        fs.link("/f", "/d", false),
        Err(E2Error::Exists(_))
    ));
    assert!(matches!(
        fs.link("/d", "/dlink", false),
        Err(E2Error::IsDirectory(_))
    ));
    // a symlink to a directory is allowed
    fs.link("/d", "/dlink", true).expect("ln -s dir");
    assert_counters_consistent(&fs);
}

#[test]
fn remove_and_restore_round_trip() {
    let mut fs = fresh_fs();
    let host = host_file(1500);
    let ino = fs.copy_in(host.path(), "/hello.txt").expect("cp");
    let blocks_before: Vec<u32> = fs.inode(ino).expect("inode").block.to_vec();
    let free_blocks_before = fs.superblock().expect("sb").free_blocks_count;

    fs.remove("/hello.txt").expect("rm");

    assert!(resolve(&fs, "/hello.txt").is_err());
    let removed = fs.inode(ino).expect("inode");
    assert_ne!(removed.dtime, 0);
    assert_eq!(removed.links_count, 0);
    // data and pointers survive for restoration
    assert_eq!(removed.block.to_vec(), blocks_before);
    assert_eq!(
        fs.superblock().expect("sb").free_blocks_count,
        free_blocks_before + 2
    );
    assert_counters_consistent(&fs);

    let restored_ino = fs.restore("/hello.txt").expect("restore");
    assert_eq!(restored_ino, ino);
    assert_eq!(resolve(&fs, "/hello.txt").expect("resolve"), ino);

    let restored = fs.inode(ino).expect("inode");
    assert_eq!(restored.dtime, 0);
    assert_eq!(restored.links_count, 1);
    assert_eq!(restored.block.to_vec(), blocks_before);
    assert_eq!(
        fs.superblock().expect("sb").free_blocks_count,
        free_blocks_before
    );
    assert_counters_consistent(&fs);
}

#[test]
fn remove_error_paths() {
    let mut fs = fresh_fs();
    fs.make_directory("/d").expect("mkdir");

    assert!(matches!(
        fs.remove("/missing"),
        Err(E2Error::NotFound(_))
    ));
    assert!(matches!(fs.remove("/d"), Err(E2Error::IsDirectory(_))));
}

#[test]
fn remove_one_hard_link_keeps_the_inode_live() {
    let mut fs = fresh_fs();
    let host = host_file(10);
    let ino = fs.copy_in(host.path(), "/f").expect("cp");
    fs.link("/f", "/g", false).expect("ln");

    fs.remove("/g").expect("rm /g");

    let inode = fs.inode(ino).expect("inode");
    assert_eq!(inode.links_count, 1);
    assert_eq!(inode.dtime, 0);
    assert!(resolve(&fs, "/f").is_ok());
    assert_counters_consistent(&fs);

    // the tombstoned name points at a live inode: not recoverable
    assert!(matches!(fs.restore("/g"), Err(E2Error::NotFound(_))));
}

#[test]
fn restore_fails_after_inode_reuse() {
    let mut fs = fresh_fs();
    let host_a = host_file(10);
    let host_b = host_file(20);
    // "a" sits behind "b" so its tombstone survives b's continued presence
    let a_ino = fs.copy_in(host_a.path(), "/a").expect("cp a");
    fs.copy_in(host_b.path(), "/b").expect("cp b");

    fs.remove("/a").expect("rm a");
    // first-fit hands a's inode to the next file
    let c_ino = fs.copy_in(host_a.path(), "/c").expect("cp c");
    assert_eq!(c_ino, a_ino);

    assert!(matches!(fs.restore("/a"), Err(E2Error::NotFound(_))));
}

#[test]
fn restore_fails_when_never_deleted() {
    let mut fs = fresh_fs();
    let host = host_file(10);
    let ino = fs.copy_in(host.path(), "/f").expect("cp");
    fs.remove("/f").expect("rm");

    // forge a zero dtime on the retired inode
    let mut inode = fs.inode(ino).expect("inode");
    inode.dtime = 0;
    fs.write_inode(ino, &inode).expect("write inode");

    assert!(matches!(fs.restore("/f"), Err(E2Error::NotFound(_))));
}

#[test]
fn restore_requires_the_name_to_be_absent() {
    let mut fs = fresh_fs();
    let host = host_file(10);
    fs.copy_in(host.path(), "/f").expect("cp");
    assert!(matches!(fs.restore("/f"), Err(E2Error::Exists(_))));
}

#[test]
fn directory_grows_into_a_second_block() {
    // Hard links add entries without consuming inodes, so one file can
    // push the root directory past its first block.
    let mut fs = fresh_fs();
    let host = host_file(10);
    let ino = fs.copy_in(host.path(), "/f").expect("cp");
    let root_size_before = fs.inode(InodeNo(ROOT_INO)).expect("root").size;

    for i in 0..70 {
        fs.link("/f", &format!("/link{i:03}"), false).expect("ln");
    }

    let root = fs.inode(InodeNo(ROOT_INO)).expect("root");
    assert_eq!(root.size, root_size_before + BLOCK_SIZE as u32);
    assert_ne!(root.block[1], 0);
    assert_eq!(fs.inode(ino).expect("inode").links_count, 71);

    for i in 0..70 {
        assert_eq!(
            resolve(&fs, &format!("/link{i:03}")).expect("resolve"),
            ino,
            "link{i:03}"
        );
    }
    assert_counters_consistent(&fs);
}

#[test]
fn head_of_block_removal_is_not_recoverable() {
    let mut fs = fresh_fs();
    let host = host_file(10);

    // fill the root's first block so the next entry heads block two
    fs.copy_in(host.path(), "/f").expect("cp");
    for i in 0..70 {
        fs.link("/f", &format!("/file{i:03}"), false).expect("ln");
    }
    let root = fs.inode(InodeNo(ROOT_INO)).expect("root");
    let second = BlockNo(root.block[1]);
    assert_ne!(second.0, 0);
    let head_name = live_entries(fs.block(second).expect("block"), second.0).expect("entries")[0]
        .name_str();

    fs.remove(&format!("/{head_name}")).expect("rm head");
    // the slot was zeroed in place: chain intact, block still owned
    let entries = live_entries(fs.block(second).expect("block"), second.0).expect("entries");
    assert!(entries.iter().all(|e| e.name_str() != head_name));
    let root_after = fs.inode(InodeNo(ROOT_INO)).expect("root");
    assert_eq!(root_after.block[1], second.0);

    assert!(matches!(
        fs.restore(&format!("/{head_name}")),
        Err(E2Error::NotFound(_))
    ));
    assert_counters_consistent(&fs);
}

#[test]
fn allocation_is_first_fit() {
    let mut fs = fresh_fs();
    let host = host_file(10);
    let first = fs.copy_in(host.path(), "/one").expect("cp one");
    let second = fs.copy_in(host.path(), "/two").expect("cp two");
    assert_eq!(second.0, first.0 + 1);

    fs.remove("/one").expect("rm one");
    let third = fs.copy_in(host.path(), "/three").expect("cp three");
    assert_eq!(third, first);
}
