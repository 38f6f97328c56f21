use super::Filesystem;
use crate::device::Medium;
use crate::error::FsError;
use crate::layout::{Inode, DIRECT_BLOCKS, POINTERS_PER_BLOCK};

pub(crate) fn read_ptr(buf: &[u8], slot: usize) -> u32 {
    let i = slot * 4;
    u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]])
}

pub(crate) fn write_ptr(buf: &mut [u8], slot: usize, value: u32) {
    let i = slot * 4;
    buf[i..i + 4].copy_from_slice(&value.to_le_bytes());
}

impl<M: Medium> Filesystem<M> {
    /// Translate a logical block index of `inode` to a physical block
    /// number.
    ///
    /// With `alloc`, missing data blocks and missing indirect levels are
    /// allocated along the way; pointer blocks are written back immediately,
    /// but the mutated inode itself must be persisted by the caller. Without
    /// `alloc`, an unallocated slot (or an index past the last addressable
    /// block) yields `None`.
    pub fn map_block(
        &mut self,
        inode: &mut Inode,
        logical: u32,
        alloc: bool,
    ) -> Result<Option<u32>, FsError> {
        if (logical as usize) < DIRECT_BLOCKS {
            let slot = logical as usize;
            if inode.direct[slot] == 0 {
                if !alloc {
                    return Ok(None);
                }
                inode.direct[slot] = self.allocate_block()?;
            }
            return Ok(Some(inode.direct[slot]));
        }

        let index = logical as usize - DIRECT_BLOCKS;

        // Single indirect: one pointer block of 128 slots.
        if index < POINTERS_PER_BLOCK {
            if inode.indirect == 0 {
                if !alloc {
                    return Ok(None);
                }
                inode.indirect = self.allocate_block()?;
            }

            let mut buf = self.dev.read_block(inode.indirect)?;
            let ptr = read_ptr(&buf, index);
            if ptr != 0 {
                return Ok(Some(ptr));
            }
            if !alloc {
                return Ok(None);
            }

            let fresh = self.allocate_block()?;
            write_ptr(&mut buf, index, fresh);
            self.dev.write_block(inode.indirect, &buf)?;
            return Ok(Some(fresh));
        }

        // Double indirect: a pointer block of pointer blocks.
        let index = index - POINTERS_PER_BLOCK;
        if index >= POINTERS_PER_BLOCK * POINTERS_PER_BLOCK {
            // File too large.
            return if alloc { Err(FsError::NoSpace) } else { Ok(None) };
        }

        if inode.double_indirect == 0 {
            if !alloc {
                return Ok(None);
            }
            inode.double_indirect = self.allocate_block()?;
        }

        let outer = index / POINTERS_PER_BLOCK;
        let inner = index % POINTERS_PER_BLOCK;

        let mut dbuf = self.dev.read_block(inode.double_indirect)?;
        let mut single = read_ptr(&dbuf, outer);
        if single == 0 {
            if !alloc {
                return Ok(None);
            }
            single = self.allocate_block()?;
            write_ptr(&mut dbuf, outer, single);
            self.dev.write_block(inode.double_indirect, &dbuf)?;
        }

        let mut sbuf = self.dev.read_block(single)?;
        let ptr = read_ptr(&sbuf, inner);
        if ptr != 0 {
            return Ok(Some(ptr));
        }
        if !alloc {
            return Ok(None);
        }

        let fresh = self.allocate_block()?;
        write_ptr(&mut sbuf, inner, fresh);
        self.dev.write_block(single, &sbuf)?;
        Ok(Some(fresh))
    }

    /// Free the data block mapped at `logical` (if any) and zero the pointer
    /// slot that referenced it, so no pointer is left naming a freed block.
    /// Indirect blocks that become empty stay allocated.
    pub(crate) fn unmap_block(&mut self, inode: &mut Inode, logical: u32) -> Result<(), FsError> {
        if (logical as usize) < DIRECT_BLOCKS {
            let slot = logical as usize;
            if inode.direct[slot] != 0 {
                self.free_data_block(inode.direct[slot])?;
                inode.direct[slot] = 0;
            }
            return Ok(());
        }

        let index = logical as usize - DIRECT_BLOCKS;

        if index < POINTERS_PER_BLOCK {
            if inode.indirect == 0 {
                return Ok(());
            }
            let mut buf = self.dev.read_block(inode.indirect)?;
            let ptr = read_ptr(&buf, index);
            if ptr != 0 {
                self.free_data_block(ptr)?;
                write_ptr(&mut buf, index, 0);
                self.dev.write_block(inode.indirect, &buf)?;
            }
            return Ok(());
        }

        let index = index - POINTERS_PER_BLOCK;
        if index >= POINTERS_PER_BLOCK * POINTERS_PER_BLOCK || inode.double_indirect == 0 {
            return Ok(());
        }

        let dbuf = self.dev.read_block(inode.double_indirect)?;
        let single = read_ptr(&dbuf, index / POINTERS_PER_BLOCK);
        if single == 0 {
            return Ok(());
        }

        let inner = index % POINTERS_PER_BLOCK;
        let mut sbuf = self.dev.read_block(single)?;
        let ptr = read_ptr(&sbuf, inner);
        if ptr != 0 {
            self.free_data_block(ptr)?;
            write_ptr(&mut sbuf, inner, 0);
            self.dev.write_block(single, &sbuf)?;
        }
        Ok(())
    }
}
