use super::Filesystem;
use crate::device::Medium;
use crate::error::FsError;
use crate::layout::{DirEntry, FileType, Inode, BLOCK_SIZE, DIRENTRY_SIZE};
use zerocopy::AsBytes;

impl<M: Medium> Filesystem<M> {
    /// Read the directory's entry area into one contiguous buffer, `size`
    /// rounded up to whole blocks. An unmapped block ends the scan.
    fn read_dir_buf(&mut self, inode: &Inode) -> Result<Vec<u8>, FsError> {
        let mut probe = *inode;
        let nblocks = inode.size.div_ceil(BLOCK_SIZE as u32);

        let mut buf = Vec::with_capacity(nblocks as usize * BLOCK_SIZE);
        for b in 0..nblocks {
            match self.map_block(&mut probe, b, false)? {
                Some(phys) => buf.extend_from_slice(&self.dev.read_block(phys)?),
                None => break,
            }
        }
        Ok(buf)
    }

    pub(crate) fn entries_of(&mut self, inode: &Inode) -> Result<Vec<DirEntry>, FsError> {
        let buf = self.read_dir_buf(inode)?;
        let nentries = (inode.size as usize / DIRENTRY_SIZE).min(buf.len() / DIRENTRY_SIZE);

        let mut entries = Vec::new();
        for i in 0..nentries {
            let offset = i * DIRENTRY_SIZE;
            if let Some(entry) = DirEntry::decode(&buf[offset..offset + DIRENTRY_SIZE]) {
                if entry.ino() != 0 {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Entries of a directory, in slot order, skipping unused slots.
    pub fn dir_entries(&mut self, dir_ino: u32) -> Result<Vec<DirEntry>, FsError> {
        let inode = self.read_inode(dir_ino)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(format!("inode {}", dir_ino)));
        }
        self.entries_of(&inode)
    }

    /// Linear scan for a name; first match wins (duplicates do not exist by
    /// invariant).
    pub fn find_entry(&mut self, dir_ino: u32, name: &str) -> Result<Option<DirEntry>, FsError> {
        Ok(self
            .dir_entries(dir_ino)?
            .into_iter()
            .find(|e| e.matches(name)))
    }

    /// Append an entry at byte offset `size`, allocating directory blocks as
    /// the write reaches them. Entries are packed densely, so one may
    /// straddle a block boundary (512 is not a multiple of 72).
    pub(crate) fn dir_add_entry(
        &mut self,
        dir_ino: u32,
        name: &str,
        ino: u32,
        kind: FileType,
    ) -> Result<(), FsError> {
        if self.find_entry(dir_ino, name)?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        let mut dir = self.read_inode(dir_ino)?;
        let entry = DirEntry::new(ino, kind, name);
        let bytes = entry.as_bytes();

        let mut offset = dir.size;
        let mut written = 0;
        while written < DIRENTRY_SIZE {
            let logical = offset / BLOCK_SIZE as u32;
            let rel = (offset % BLOCK_SIZE as u32) as usize;
            let n = (BLOCK_SIZE - rel).min(DIRENTRY_SIZE - written);

            let phys = self
                .map_block(&mut dir, logical, true)?
                .ok_or(FsError::NoSpace)?;
            let mut buf = self.dev.read_block(phys)?;
            buf[rel..rel + n].copy_from_slice(&bytes[written..written + n]);
            self.dev.write_block(phys, &buf)?;

            written += n;
            offset += n as u32;
        }

        dir.size += DIRENTRY_SIZE as u32;
        self.write_inode(dir_ino, &dir)
    }

    /// Remove the first entry matching `name`, compacting the survivors and
    /// reclaiming any directory blocks past the new end. Fails with no
    /// mutation when the name is absent.
    pub(crate) fn dir_remove_entry(&mut self, dir_ino: u32, name: &str) -> Result<(), FsError> {
        let mut dir = self.read_inode(dir_ino)?;
        if dir.size == 0 {
            return Err(FsError::NotFound(name.to_string()));
        }

        let buf = self.read_dir_buf(&dir)?;
        let nentries = (dir.size as usize / DIRENTRY_SIZE).min(buf.len() / DIRENTRY_SIZE);

        let mut rebuilt = Vec::with_capacity(buf.len());
        let mut found = false;
        for i in 0..nentries {
            let offset = i * DIRENTRY_SIZE;
            let chunk = &buf[offset..offset + DIRENTRY_SIZE];
            if !found {
                if let Some(entry) = DirEntry::decode(chunk) {
                    if entry.matches(name) {
                        found = true;
                        continue;
                    }
                }
            }
            rebuilt.extend_from_slice(chunk);
        }
        if !found {
            return Err(FsError::NotFound(name.to_string()));
        }

        let new_size = rebuilt.len() as u32;
        let old_blocks = dir.size.div_ceil(BLOCK_SIZE as u32);
        let new_blocks = new_size.div_ceil(BLOCK_SIZE as u32);

        for b in 0..new_blocks {
            let phys = self
                .map_block(&mut dir, b, true)?
                .ok_or(FsError::NoSpace)?;
            let start = b as usize * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(rebuilt.len());

            let mut block = [0u8; BLOCK_SIZE];
            block[..end - start].copy_from_slice(&rebuilt[start..end]);
            self.dev.write_block(phys, &block)?;
        }

        for b in new_blocks..old_blocks {
            self.unmap_block(&mut dir, b)?;
        }

        dir.size = new_size;
        self.write_inode(dir_ino, &dir)
    }
}
