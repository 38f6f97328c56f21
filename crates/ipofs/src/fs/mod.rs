use crate::device::{DiskImage, Medium};
use crate::error::FsError;
use crate::layout::{
    Inode, Superblock, BLOCK_SIZE, DIRECT_BLOCKS, INODES_PER_BLOCK, INODE_SIZE, MODE_DIR,
    POINTERS_PER_BLOCK,
};
use log::{error, info};

mod dir;
mod map;
mod ops;

use map::read_ptr;

/// Number of inode slots `format` creates by default.
pub const DEFAULT_INODE_COUNT: u32 = 256;

/// Smallest partition `format` accepts, in blocks.
const MIN_FS_BLOCKS: u32 = 100;

const BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;

/// A mounted IPO_FS filesystem.
///
/// Every operation goes straight to the backing image; there is no block
/// cache, and each block write is individually flushed.
pub struct Filesystem<M> {
    dev: DiskImage<M>,
    sb: Superblock,
}

impl<M: Medium> Filesystem<M> {
    /// Mount an existing filesystem from the image.
    pub fn open(mut dev: DiskImage<M>) -> Result<Self, FsError> {
        let block = dev.read_block(0)?;
        let sb = match Superblock::decode(&block) {
            Ok(sb) => sb,
            Err(e) => {
                error!("no IPO_FS superblock at start LBA {}", dev.start_lba());
                return Err(e);
            }
        };

        info!(
            "mounted IPO_FS: {} blocks, {} inodes",
            sb.fs_size_blocks, sb.inode_count
        );

        Ok(Self { dev, sb })
    }

    /// Create a fresh filesystem in the partition and mount it.
    ///
    /// Inodes 1 (root) and 2 (`/app`) are allocated as zero-size directories
    /// with no entries; `/app` is not linked under root.
    pub fn format(mut dev: DiskImage<M>, total_inodes: u32) -> Result<Self, FsError> {
        let disk_blocks = dev.total_blocks()?;
        let total_blocks = disk_blocks
            .saturating_sub(dev.start_lba())
            .min(u32::MAX as u64) as u32;
        if total_blocks < MIN_FS_BLOCKS {
            return Err(FsError::TooSmall(total_blocks));
        }

        // Layout: superblock, inode bitmap, block bitmap, inode table, data.
        let inode_bitmap_blocks = total_inodes.div_ceil(BITS_PER_BLOCK);
        let block_bitmap_blocks = total_blocks.div_ceil(BITS_PER_BLOCK);
        let inode_table_blocks = (total_inodes * INODE_SIZE as u32).div_ceil(BLOCK_SIZE as u32);

        let inode_bitmap_start = 1;
        let block_bitmap_start = inode_bitmap_start + inode_bitmap_blocks;
        let inode_table_start = block_bitmap_start + block_bitmap_blocks;
        let data_blocks_start = inode_table_start + inode_table_blocks;

        let sb = Superblock {
            fs_size_blocks: total_blocks,
            block_size: BLOCK_SIZE as u32,
            inode_count: total_inodes,
            inode_bitmap_start,
            block_bitmap_start,
            inode_table_start,
            data_blocks_start,
        };

        let mut fs = Self { dev, sb };
        fs.store_superblock()?;

        let zero = [0u8; BLOCK_SIZE];
        for i in inode_bitmap_start..data_blocks_start {
            fs.dev.write_block(i, &zero)?;
        }

        let dir = Inode {
            mode: MODE_DIR,
            links_count: 1,
            ..Inode::default()
        };
        fs.bitmap_set(inode_bitmap_start, 0, true)?;
        fs.write_inode(1, &dir)?;
        fs.bitmap_set(inode_bitmap_start, 1, true)?;
        fs.write_inode(2, &dir)?;

        info!(
            "formatted IPO_FS: {} blocks, {} inodes",
            total_blocks, total_inodes
        );

        Ok(fs)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Raw access to the underlying image (fixtures and inspection).
    pub fn device(&mut self) -> &mut DiskImage<M> {
        &mut self.dev
    }

    fn store_superblock(&mut self) -> Result<(), FsError> {
        let block = self.sb.encode();
        self.dev.write_block(0, &block)
    }

    // ===== Bitmaps =====

    /// Read bit `bit` of the bitmap starting at block `start`. Bits are
    /// LSB-first within each byte.
    pub fn bitmap_get(&mut self, start: u32, bit: u32) -> Result<bool, FsError> {
        let byte = bit / 8;
        let block = start + byte / BLOCK_SIZE as u32;
        let offset = (byte % BLOCK_SIZE as u32) as usize;

        let buf = self.dev.read_block(block)?;
        Ok((buf[offset] >> (bit % 8)) & 1 != 0)
    }

    pub fn bitmap_set(&mut self, start: u32, bit: u32, value: bool) -> Result<(), FsError> {
        let byte = bit / 8;
        let block = start + byte / BLOCK_SIZE as u32;
        let offset = (byte % BLOCK_SIZE as u32) as usize;

        let mut buf = self.dev.read_block(block)?;
        if value {
            buf[offset] |= 1 << (bit % 8);
        } else {
            buf[offset] &= !(1 << (bit % 8));
        }
        self.dev.write_block(block, &buf)
    }

    // ===== Inode table =====

    fn inode_location(&self, ino: u32) -> Result<(u32, usize), FsError> {
        if ino == 0 || ino > self.sb.inode_count {
            return Err(FsError::InvalidInode(ino));
        }

        let index = (ino - 1) as usize;
        let block = self.sb.inode_table_start + (index / INODES_PER_BLOCK) as u32;
        let offset = (index % INODES_PER_BLOCK) * INODE_SIZE;
        Ok((block, offset))
    }

    pub fn read_inode(&mut self, ino: u32) -> Result<Inode, FsError> {
        let (block, offset) = self.inode_location(ino)?;
        let buf = self.dev.read_block(block)?;
        Inode::decode(&buf[offset..offset + INODE_SIZE], ino)
    }

    /// Rewrite one table slot, preserving the neighboring inodes.
    pub fn write_inode(&mut self, ino: u32, inode: &Inode) -> Result<(), FsError> {
        let (block, offset) = self.inode_location(ino)?;
        let mut buf = self.dev.read_block(block)?;
        buf[offset..offset + INODE_SIZE].copy_from_slice(&inode.encode());
        self.dev.write_block(block, &buf)
    }

    // ===== Allocation =====

    /// First-fit scan of the inode bitmap. The new inode is zeroed on disk.
    pub fn allocate_inode(&mut self) -> Result<u32, FsError> {
        for bit in 0..self.sb.inode_count {
            if !self.bitmap_get(self.sb.inode_bitmap_start, bit)? {
                self.bitmap_set(self.sb.inode_bitmap_start, bit, true)?;
                self.write_inode(bit + 1, &Inode::default())?;
                return Ok(bit + 1);
            }
        }
        Err(FsError::NoSpace)
    }

    /// First-fit scan of the block bitmap. The new block is zeroed on disk;
    /// the mapper relies on fresh indirect blocks being all-zero.
    pub fn allocate_block(&mut self) -> Result<u32, FsError> {
        let span = self.sb.fs_size_blocks - self.sb.data_blocks_start;
        for bit in 0..span {
            if !self.bitmap_get(self.sb.block_bitmap_start, bit)? {
                self.bitmap_set(self.sb.block_bitmap_start, bit, true)?;
                let phys = self.sb.data_blocks_start + bit;
                self.dev.write_block(phys, &[0u8; BLOCK_SIZE])?;
                return Ok(phys);
            }
        }
        Err(FsError::NoSpace)
    }

    /// Clear a data block's bitmap bit. Pointers outside the data region are
    /// ignored.
    pub(crate) fn free_data_block(&mut self, phys: u32) -> Result<(), FsError> {
        if phys < self.sb.data_blocks_start || phys >= self.sb.fs_size_blocks {
            return Ok(());
        }
        self.bitmap_set(
            self.sb.block_bitmap_start,
            phys - self.sb.data_blocks_start,
            false,
        )
    }

    /// Free every block reachable from the inode: direct blocks (bounded by
    /// the current size), the single-indirect level, and the double-indirect
    /// levels, including the pointer blocks themselves. The inode's pointers
    /// are zeroed in memory; the caller persists the record.
    pub(crate) fn release_blocks(&mut self, inode: &mut Inode) -> Result<(), FsError> {
        let nblocks = inode.size.div_ceil(BLOCK_SIZE as u32) as usize;

        for i in 0..DIRECT_BLOCKS.min(nblocks) {
            if inode.direct[i] != 0 {
                self.free_data_block(inode.direct[i])?;
                inode.direct[i] = 0;
            }
        }

        if inode.indirect != 0 {
            let buf = self.dev.read_block(inode.indirect)?;
            for slot in 0..POINTERS_PER_BLOCK {
                let ptr = read_ptr(&buf, slot);
                if ptr != 0 {
                    self.free_data_block(ptr)?;
                }
            }
            self.free_data_block(inode.indirect)?;
            inode.indirect = 0;
        }

        if inode.double_indirect != 0 {
            let dbuf = self.dev.read_block(inode.double_indirect)?;
            for outer in 0..POINTERS_PER_BLOCK {
                let single = read_ptr(&dbuf, outer);
                if single == 0 {
                    continue;
                }

                let sbuf = self.dev.read_block(single)?;
                for inner in 0..POINTERS_PER_BLOCK {
                    let ptr = read_ptr(&sbuf, inner);
                    if ptr != 0 {
                        self.free_data_block(ptr)?;
                    }
                }
                self.free_data_block(single)?;
            }
            self.free_data_block(inode.double_indirect)?;
            inode.double_indirect = 0;
        }

        Ok(())
    }
}
