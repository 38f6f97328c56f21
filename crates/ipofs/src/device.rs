use crate::error::FsError;
use crate::layout::BLOCK_SIZE;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Default partition offset in blocks (MBR partition 1).
pub const DEFAULT_START_LBA: u64 = 2048;

/// Backing storage for a disk image.
///
/// `sync` must force previously written data to durable storage.
pub trait Medium: Read + Write + Seek {
    fn sync(&mut self) -> io::Result<()>;
}

impl Medium for File {
    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_all()
    }
}

impl Medium for Cursor<Vec<u8>> {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Partition-relative 512-byte block I/O over a backing medium.
///
/// Block 0 lives at byte offset `start_lba * 512`; the image file is never
/// extended.
pub struct DiskImage<M> {
    medium: M,
    start_lba: u64,
}

impl<M: Medium> DiskImage<M> {
    pub fn new(medium: M, start_lba: u64) -> Self {
        Self { medium, start_lba }
    }

    pub fn start_lba(&self) -> u64 {
        self.start_lba
    }

    /// Size of the whole backing medium in blocks (not partition-relative).
    pub fn total_blocks(&mut self) -> Result<u64, FsError> {
        let len = self.medium.seek(SeekFrom::End(0))?;
        Ok(len / BLOCK_SIZE as u64)
    }

    fn seek_block(&mut self, index: u32) -> io::Result<()> {
        let offset = (self.start_lba + index as u64) * BLOCK_SIZE as u64;
        self.medium.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn read_block(&mut self, index: u32) -> Result<[u8; BLOCK_SIZE], FsError> {
        self.seek_block(index)?;

        let mut block = [0u8; BLOCK_SIZE];
        self.medium.read_exact(&mut block).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                FsError::ShortRead(index)
            } else {
                FsError::Io(e)
            }
        })?;

        Ok(block)
    }

    /// Write one full block and flush it to durable storage.
    pub fn write_block(&mut self, index: u32, data: &[u8]) -> Result<(), FsError> {
        if data.len() != BLOCK_SIZE {
            return Err(FsError::BadBlockSize(data.len()));
        }

        self.seek_block(index)?;
        self.medium.write_all(data)?;
        self.medium.sync()?;
        Ok(())
    }
}
