use crate::error::FsError;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

type U32Le = U32<LittleEndian>;

pub const BLOCK_SIZE: usize = 512;
pub const MAGIC: &[u8] = b"IPO_FS";
pub const MAX_NAME: usize = 64;
pub const DIRECT_BLOCKS: usize = 6;
pub const INODE_SIZE: usize = 76;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
pub const DIRENTRY_SIZE: usize = 72;
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / 4;
pub const ROOT_INODE: u32 = 1;

/// Largest logical block index + 1 reachable through the pointer levels.
pub const MAX_FILE_BLOCKS: u32 =
    (DIRECT_BLOCKS + POINTERS_PER_BLOCK + POINTERS_PER_BLOCK * POINTERS_PER_BLOCK) as u32;

// Inode mode bits
pub const MODE_DIR: u32 = 0x1;
pub const MODE_FILE: u32 = 0x2;
pub const MODE_PROTECTED: u32 = 0x8000_0000;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, AsBytes, FromZeroes)]
struct RawSuperblock {
    magic: [u8; 8],
    fs_size_blocks: U32Le,
    block_size: U32Le,
    inode_count: U32Le,
    inode_bitmap_start: U32Le,
    block_bitmap_start: U32Le,
    inode_table_start: U32Le,
    data_blocks_start: U32Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub fs_size_blocks: u32,
    pub block_size: u32,
    pub inode_count: u32,
    pub inode_bitmap_start: u32,
    pub block_bitmap_start: u32,
    pub inode_table_start: u32,
    pub data_blocks_start: u32,
}

impl Superblock {
    /// Decode block 0 of the partition. The magic is compared with trailing
    /// NULs stripped.
    pub fn decode(block: &[u8]) -> Result<Self, FsError> {
        let raw = RawSuperblock::read_from_prefix(block).ok_or(FsError::BadMagic)?;

        let end = raw.magic.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        if &raw.magic[..end] != MAGIC {
            return Err(FsError::BadMagic);
        }

        Ok(Self {
            fs_size_blocks: raw.fs_size_blocks.get(),
            block_size: raw.block_size.get(),
            inode_count: raw.inode_count.get(),
            inode_bitmap_start: raw.inode_bitmap_start.get(),
            block_bitmap_start: raw.block_bitmap_start.get(),
            inode_table_start: raw.inode_table_start.get(),
            data_blocks_start: raw.data_blocks_start.get(),
        })
    }

    /// Encode as a full zero-padded block.
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut magic = [0u8; 8];
        magic[..MAGIC.len()].copy_from_slice(MAGIC);

        let raw = RawSuperblock {
            magic,
            fs_size_blocks: U32Le::new(self.fs_size_blocks),
            block_size: U32Le::new(self.block_size),
            inode_count: U32Le::new(self.inode_count),
            inode_bitmap_start: U32Le::new(self.inode_bitmap_start),
            block_bitmap_start: U32Le::new(self.block_bitmap_start),
            inode_table_start: U32Le::new(self.inode_table_start),
            data_blocks_start: U32Le::new(self.data_blocks_start),
        };

        let mut block = [0u8; BLOCK_SIZE];
        block[..core::mem::size_of::<RawSuperblock>()].copy_from_slice(raw.as_bytes());
        block
    }
}

// Revision 2 of the on-disk inode: a double-indirect pointer and 32 reserved
// bytes. Revision 1 images (no double-indirect field, 36 reserved bytes)
// decode as double_indirect == 0 since the extra bytes are zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, AsBytes, FromZeroes)]
struct RawInode {
    mode: U32Le,
    size: U32Le,
    links_count: U32Le,
    direct: [U32Le; DIRECT_BLOCKS],
    indirect: U32Le,
    double_indirect: U32Le,
    reserved: [u8; 32],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inode {
    pub mode: u32,
    pub size: u32,
    pub links_count: u32,
    pub direct: [u32; DIRECT_BLOCKS],
    pub indirect: u32,
    pub double_indirect: u32,
}

impl Inode {
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_DIR != 0
    }

    pub fn is_protected(&self) -> bool {
        self.mode & MODE_PROTECTED != 0
    }

    /// Decode a 72-byte table slot. `ino` is only used for error reporting.
    pub(crate) fn decode(bytes: &[u8], ino: u32) -> Result<Self, FsError> {
        let raw = RawInode::read_from_prefix(bytes).ok_or(FsError::CorruptInode(ino))?;
        if raw.reserved != [0u8; 32] {
            return Err(FsError::CorruptInode(ino));
        }

        Ok(Self {
            mode: raw.mode.get(),
            size: raw.size.get(),
            links_count: raw.links_count.get(),
            direct: raw.direct.map(|p| p.get()),
            indirect: raw.indirect.get(),
            double_indirect: raw.double_indirect.get(),
        })
    }

    pub(crate) fn encode(&self) -> [u8; INODE_SIZE] {
        let raw = RawInode {
            mode: U32Le::new(self.mode),
            size: U32Le::new(self.size),
            links_count: U32Le::new(self.links_count),
            direct: self.direct.map(U32Le::new),
            indirect: U32Le::new(self.indirect),
            double_indirect: U32Le::new(self.double_indirect),
            reserved: [0u8; 32],
        };

        let mut out = [0u8; INODE_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory = 1,
    File = 2,
}

impl FileType {
    pub fn from_raw(raw: u8) -> Self {
        if raw == FileType::Directory as u8 {
            FileType::Directory
        } else {
            FileType::File
        }
    }
}

// Fixed-size directory entry: inode, type tag, significant name length,
// 2 pad bytes, 64 name bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, AsBytes, FromZeroes)]
pub struct DirEntry {
    inode: U32Le,
    kind: u8,
    name_len: u8,
    padding: [u8; 2],
    name: [u8; MAX_NAME],
}

impl DirEntry {
    /// Names longer than 64 bytes are truncated.
    pub fn new(inode: u32, kind: FileType, name_str: &str) -> Self {
        let mut name = [0u8; MAX_NAME];
        let bytes = name_str.as_bytes();
        let len = bytes.len().min(MAX_NAME);
        name[..len].copy_from_slice(&bytes[..len]);

        Self {
            inode: U32Le::new(inode),
            kind: kind as u8,
            name_len: len as u8,
            padding: [0u8; 2],
            name,
        }
    }

    pub fn ino(&self) -> u32 {
        self.inode.get()
    }

    pub fn kind(&self) -> FileType {
        FileType::from_raw(self.kind)
    }

    pub fn name_bytes(&self) -> &[u8] {
        let len = (self.name_len as usize).min(MAX_NAME);
        &self.name[..len]
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }

    pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes)
    }
}
