use ipofs::{
    DiskImage, FileType, Filesystem, FsError, Inode, BLOCK_SIZE, DIRENTRY_SIZE,
    MODE_PROTECTED,
};
use proptest::prelude::*;
use std::io::Cursor;

type MemFs = Filesystem<Cursor<Vec<u8>>>;

const START_LBA: u64 = 2048;

/// 4 MiB zero-filled image formatted at the default MBR offset: a
/// 6144-block partition with 256 inodes.
fn fresh_fs() -> MemFs {
    let dev = DiskImage::new(Cursor::new(vec![0u8; 4 * 1024 * 1024]), START_LBA);
    Filesystem::format(dev, 256).unwrap()
}

/// Small image for the high-iteration property tests.
fn small_fs() -> MemFs {
    let dev = DiskImage::new(Cursor::new(vec![0u8; 300 * BLOCK_SIZE]), 4);
    Filesystem::format(dev, 64).unwrap()
}

fn inode_of(fs: &mut MemFs, path: &str) -> Inode {
    let ino = fs.resolve(path).unwrap();
    fs.read_inode(ino).unwrap()
}

fn block_is_allocated(fs: &mut MemFs, phys: u32) -> bool {
    let sb = *fs.superblock();
    assert!(phys >= sb.data_blocks_start && phys < sb.fs_size_blocks);
    fs.bitmap_get(sb.block_bitmap_start, phys - sb.data_blocks_start)
        .unwrap()
}

fn inode_is_allocated(fs: &mut MemFs, ino: u32) -> bool {
    let start = fs.superblock().inode_bitmap_start;
    fs.bitmap_get(start, ino - 1).unwrap()
}

fn snapshot(fs: &mut MemFs, blocks: u32) -> Vec<[u8; BLOCK_SIZE]> {
    (0..blocks)
        .map(|i| fs.device().read_block(i).unwrap())
        .collect()
}

#[test]
fn s1_format_then_ls_root_is_empty() {
    let mut fs = fresh_fs();
    assert!(fs.list_dir("/").unwrap().is_empty());
}

#[test]
fn format_is_bit_exact() {
    let mut fs = fresh_fs();

    let sb = *fs.superblock();
    assert_eq!(sb.fs_size_blocks, 6144);
    assert_eq!(sb.block_size, 512);
    assert_eq!(sb.inode_count, 256);
    assert_eq!(sb.inode_bitmap_start, 1);
    assert_eq!(sb.block_bitmap_start, 2);
    assert_eq!(sb.inode_table_start, 4);
    assert_eq!(sb.data_blocks_start, 42);

    // Block 0: magic, the seven fields, zero padding.
    let block0 = fs.device().read_block(0).unwrap();
    assert_eq!(&block0[..8], b"IPO_FS\x00\x00");
    assert_eq!(&block0[8..12], &6144u32.to_le_bytes());
    assert_eq!(&block0[16..20], &256u32.to_le_bytes());
    assert!(block0[36..].iter().all(|&b| b == 0));

    // Inode bitmap: bits 0 and 1 (root and /app), nothing else.
    let ibitmap = fs.device().read_block(1).unwrap();
    assert_eq!(ibitmap[0], 0b11);
    assert!(ibitmap[1..].iter().all(|&b| b == 0));

    // Block bitmap: all free.
    for b in 2..4 {
        let bbitmap = fs.device().read_block(b).unwrap();
        assert!(bbitmap.iter().all(|&b| b == 0));
    }

    // Inode table: slots 1 and 2 are zero-size directories with one link,
    // everything else untouched.
    let table0 = fs.device().read_block(4).unwrap();
    for slot in [0usize, 1] {
        let base = slot * 76;
        assert_eq!(&table0[base..base + 4], &1u32.to_le_bytes());
        assert_eq!(&table0[base + 4..base + 8], &0u32.to_le_bytes());
        assert_eq!(&table0[base + 8..base + 12], &1u32.to_le_bytes());
        assert!(table0[base + 12..base + 76].iter().all(|&b| b == 0));
    }
    assert!(table0[152..].iter().all(|&b| b == 0));
    for b in 5..42 {
        let block = fs.device().read_block(b).unwrap();
        assert!(block.iter().all(|&b| b == 0));
    }
}

#[test]
fn open_rejects_unformatted_image() {
    let dev = DiskImage::new(Cursor::new(vec![0u8; 4 * 1024 * 1024]), START_LBA);
    assert!(matches!(Filesystem::open(dev), Err(FsError::BadMagic)));
}

#[test]
fn format_rejects_tiny_partition() {
    let dev = DiskImage::new(Cursor::new(vec![0u8; 50 * BLOCK_SIZE]), 4);
    assert!(matches!(
        Filesystem::format(dev, 64),
        Err(FsError::TooSmall(46))
    ));
}

#[test]
fn s2_write_then_read() {
    let mut fs = fresh_fs();
    fs.mkdir("/app").unwrap();
    fs.write_text("/app/a.txt", "hello").unwrap();

    assert_eq!(fs.read_file("/app/a.txt").unwrap(), b"hello");
    assert_eq!(inode_of(&mut fs, "/app/a.txt").size, 5);
    assert_eq!(
        fs.list_dir("/app").unwrap(),
        vec![("a.txt".to_string(), FileType::File)]
    );
}

#[test]
fn s3_overwrite_shrink_frees_blocks() {
    let mut fs = fresh_fs();

    fs.put(&[7u8; 600], "x", Some("/x")).unwrap();
    let first = inode_of(&mut fs, "/x");
    assert!(first.direct[0] != 0 && first.direct[1] != 0);
    let spilled = first.direct[1];

    fs.put(&[9u8; 10], "x", Some("/x")).unwrap();
    let second = inode_of(&mut fs, "/x");
    assert_eq!(second.size, 10);
    assert!(second.direct[0] != 0);
    assert!(block_is_allocated(&mut fs, second.direct[0]));
    assert_eq!(second.direct[1..], [0, 0, 0, 0, 0]);
    assert!(!block_is_allocated(&mut fs, spilled));

    assert_eq!(fs.read_file("/x").unwrap(), [9u8; 10]);
}

#[test]
fn s4_rm_empty_dir_but_not_populated() {
    let mut fs = fresh_fs();

    fs.mkdir("/d").unwrap();
    fs.delete("/d").unwrap();
    assert!(matches!(fs.resolve("/d"), Err(FsError::NotFound(_))));

    fs.mkdir("/d2").unwrap();
    fs.write_text("/d2/f", "").unwrap();
    assert!(matches!(fs.delete("/d2"), Err(FsError::NotEmpty(_))));

    let ino = fs.resolve("/d2").unwrap();
    assert!(inode_is_allocated(&mut fs, ino));
    assert_eq!(fs.read_file("/d2/f").unwrap(), b"");
}

#[test]
fn s5_indirect_spill_layout() {
    let mut fs = fresh_fs();
    fs.put(&[3u8; 7 * BLOCK_SIZE], "spill", Some("/spill")).unwrap();

    let inode = inode_of(&mut fs, "/spill");
    assert!(inode.direct.iter().all(|&p| p != 0));
    assert!(inode.indirect != 0);
    assert_eq!(inode.double_indirect, 0);

    let iblock = fs.device().read_block(inode.indirect).unwrap();
    let ptr = u32::from_le_bytes([iblock[0], iblock[1], iblock[2], iblock[3]]);
    assert!(block_is_allocated(&mut fs, ptr));
    assert!(iblock[4..].iter().all(|&b| b == 0));
}

#[test]
fn s6_protected_inode_survives_delete() {
    let mut fs = fresh_fs();
    fs.write_text("/locked", "keep me").unwrap();

    let ino = fs.resolve("/locked").unwrap();
    let mut inode = fs.read_inode(ino).unwrap();
    inode.mode |= MODE_PROTECTED;
    fs.write_inode(ino, &inode).unwrap();

    assert!(matches!(fs.delete("/locked"), Err(FsError::Protected(_))));
    assert!(inode_is_allocated(&mut fs, ino));
    assert_eq!(fs.read_file("/locked").unwrap(), b"keep me");
}

#[test]
fn directory_invariants_hold() {
    let mut fs = fresh_fs();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    fs.write_text("/a/f", "z").unwrap();

    let a = fs.resolve("/a").unwrap();
    let b = fs.resolve("/a/b").unwrap();

    for ino in [1, a, b] {
        let size = fs.read_inode(ino).unwrap().size;
        assert_eq!(size % DIRENTRY_SIZE as u32, 0);

        let names: Vec<String> = fs.dir_entries(ino).unwrap().iter().map(|e| e.name()).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    // A fresh non-root directory starts with exactly "." and "..".
    let entries = fs.dir_entries(b).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name(), ".");
    assert_eq!(entries[0].ino(), b);
    assert_eq!(entries[1].name(), "..");
    assert_eq!(entries[1].ino(), a);
}

#[test]
fn double_indirect_roundtrip_and_reclaim() {
    let mut fs = fresh_fs();

    // 135 blocks: all 6 direct, the full single-indirect level, and one
    // block into the double-indirect level.
    let data: Vec<u8> = (0..135 * BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
    fs.put(&data, "big", Some("/big")).unwrap();
    assert_eq!(fs.read_file("/big").unwrap(), data);

    let ino = fs.resolve("/big").unwrap();
    let inode = fs.read_inode(ino).unwrap();
    assert!(inode.indirect != 0 && inode.double_indirect != 0);

    // Every reachable pointer names an allocated data-region block.
    let mut reachable = Vec::new();
    reachable.extend(inode.direct.iter().copied());
    reachable.push(inode.indirect);
    let iblock = fs.device().read_block(inode.indirect).unwrap();
    for slot in 0..128 {
        let ptr = u32::from_le_bytes(iblock[slot * 4..slot * 4 + 4].try_into().unwrap());
        if ptr != 0 {
            reachable.push(ptr);
        }
    }
    reachable.push(inode.double_indirect);
    let dblock = fs.device().read_block(inode.double_indirect).unwrap();
    for slot in 0..128 {
        let single = u32::from_le_bytes(dblock[slot * 4..slot * 4 + 4].try_into().unwrap());
        if single == 0 {
            continue;
        }
        reachable.push(single);
        let sblock = fs.device().read_block(single).unwrap();
        for inner in 0..128 {
            let ptr = u32::from_le_bytes(sblock[inner * 4..inner * 4 + 4].try_into().unwrap());
            if ptr != 0 {
                reachable.push(ptr);
            }
        }
    }
    assert_eq!(reachable.len(), 6 + 1 + 128 + 1 + 1 + 1);
    for phys in &reachable {
        assert!(block_is_allocated(&mut fs, *phys));
    }

    // Delete releases every one of them and zeroes the record.
    fs.delete("/big").unwrap();
    for phys in &reachable {
        assert!(!block_is_allocated(&mut fs, *phys));
    }
    assert!(!inode_is_allocated(&mut fs, ino));
    assert_eq!(fs.read_inode(ino).unwrap(), Inode::default());
}

#[test]
fn failed_operations_do_not_mutate() {
    let mut fs = fresh_fs();
    fs.mkdir("/app").unwrap();
    fs.write_text("/app/f", "data").unwrap();

    let meta_blocks = fs.superblock().data_blocks_start + 8;
    let before = snapshot(&mut fs, meta_blocks);

    assert!(matches!(fs.delete("/nope"), Err(FsError::NotFound(_))));
    assert!(matches!(
        fs.delete("/app/missing"),
        Err(FsError::NotFound(_))
    ));
    assert!(matches!(fs.mkdir("/app"), Err(FsError::AlreadyExists(_))));
    assert!(matches!(
        fs.list_dir("/app/f"),
        Err(FsError::NotADirectory(_))
    ));
    assert!(matches!(fs.read_file("/app"), Err(FsError::IsADirectory(_))));
    assert!(matches!(fs.resolve("relative"), Err(FsError::InvalidPath(_))));

    assert_eq!(snapshot(&mut fs, meta_blocks), before);
}

#[test]
fn write_text_keeps_old_blocks_on_shrink() {
    let mut fs = fresh_fs();

    fs.write_text("/w", &"y".repeat(600)).unwrap();
    let grown = inode_of(&mut fs, "/w");
    let spilled = grown.direct[1];
    assert!(spilled != 0);

    fs.write_text("/w", "tiny").unwrap();
    let shrunk = inode_of(&mut fs, "/w");
    assert_eq!(shrunk.size, 4);
    // The old second block is still referenced and still allocated:
    // write_text does not reclaim, only put does.
    assert_eq!(shrunk.direct[1], spilled);
    assert!(block_is_allocated(&mut fs, spilled));
    assert_eq!(fs.read_file("/w").unwrap(), b"tiny");
}

#[test]
fn put_into_directory_uses_source_name() {
    let mut fs = fresh_fs();
    fs.mkdir("/app").unwrap();

    fs.put(b"#!ipo", "run.sh", Some("/app")).unwrap();
    assert_eq!(fs.read_file("/app/run.sh").unwrap(), b"#!ipo");

    fs.put(b"top", "top.txt", None).unwrap();
    assert_eq!(fs.read_file("/top.txt").unwrap(), b"top");

    fs.put(b"dotted", "d.txt", Some(".")).unwrap();
    assert_eq!(fs.read_file("/d.txt").unwrap(), b"dotted");
}

#[test]
fn directory_grows_and_shrinks_across_blocks() {
    let mut fs = fresh_fs();

    // Ten 72-byte entries cross the first 512-byte boundary; the 8th entry
    // straddles it.
    for i in 0..10 {
        fs.write_text(&format!("/file{}", i), "x").unwrap();
    }

    let root = fs.read_inode(1).unwrap();
    assert_eq!(root.size, 720);
    assert!(root.direct[1] != 0);
    let second = root.direct[1];

    let names: Vec<String> = fs.dir_entries(1).unwrap().iter().map(|e| e.name()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("file{}", i)).collect();
    assert_eq!(names, expected);
    assert_eq!(fs.read_file("/file7").unwrap(), b"x");

    // Dropping below eight entries reclaims the second directory block and
    // zeroes its pointer.
    for i in 5..10 {
        fs.delete(&format!("/file{}", i)).unwrap();
    }
    let root = fs.read_inode(1).unwrap();
    assert_eq!(root.size, 360);
    assert_eq!(root.direct[1], 0);
    assert!(!block_is_allocated(&mut fs, second));
    assert_eq!(fs.read_file("/file3").unwrap(), b"x");
}

#[test]
fn mkdir_under_file_is_rejected() {
    let mut fs = fresh_fs();
    fs.write_text("/f", "x").unwrap();
    assert!(matches!(
        fs.mkdir("/f/sub"),
        Err(FsError::NotADirectory(_))
    ));
}

proptest! {
    #[test]
    fn put_then_read_roundtrip(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        name in "[a-z][a-z0-9]{0,11}",
    ) {
        let mut fs = small_fs();
        fs.put(&data, &name, None).unwrap();
        prop_assert_eq!(fs.read_file(&format!("/{}", name)).unwrap(), data);
    }

    #[test]
    fn write_text_roundtrip(
        text in "[ -~]{0,600}",
        name in "[a-z][a-z0-9]{0,11}",
    ) {
        let mut fs = small_fs();
        let path = format!("/{}", name);
        fs.write_text(&path, &text).unwrap();
        prop_assert_eq!(fs.read_file(&path).unwrap(), text.as_bytes());
    }
}
