use super::Filesystem;
use crate::device::Medium;
use crate::error::FsError;
use crate::layout::{
    DirEntry, FileType, Inode, BLOCK_SIZE, DIRENTRY_SIZE, MAX_FILE_BLOCKS, MODE_DIR, MODE_FILE,
    ROOT_INODE,
};
use crate::path;
use log::debug;
use zerocopy::AsBytes;

impl<M: Medium> Filesystem<M> {
    /// Resolve an absolute path to an inode number.
    pub fn resolve(&mut self, p: &str) -> Result<u32, FsError> {
        let norm = path::normalize(p);
        if norm == "/" {
            return Ok(ROOT_INODE);
        }
        if !norm.starts_with('/') {
            return Err(FsError::InvalidPath(p.to_string()));
        }

        let mut cur = ROOT_INODE;
        for name in norm.split('/').filter(|s| !s.is_empty()) {
            let inode = self.read_inode(cur)?;
            if !inode.is_dir() {
                return Err(FsError::NotADirectory(p.to_string()));
            }
            match self.find_entry(cur, name)? {
                Some(entry) => cur = entry.ino(),
                None => return Err(FsError::NotFound(p.to_string())),
            }
        }
        Ok(cur)
    }

    /// Resolve, mapping "does not exist" outcomes to `None`.
    fn resolve_opt(&mut self, p: &str) -> Result<Option<u32>, FsError> {
        match self.resolve(p) {
            Ok(ino) => Ok(Some(ino)),
            Err(FsError::NotFound(_) | FsError::InvalidPath(_) | FsError::NotADirectory(_)) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Parent inode and final component of a path. The root has no parent.
    pub fn parent_of(&mut self, p: &str) -> Result<(u32, String), FsError> {
        let (parent, name) =
            path::split_parent(p).ok_or_else(|| FsError::InvalidPath(p.to_string()))?;
        let ino = self.resolve(&parent)?;
        Ok((ino, name))
    }

    /// Names and types of a directory's entries.
    pub fn list_dir(&mut self, p: &str) -> Result<Vec<(String, FileType)>, FsError> {
        let ino = self.resolve(p)?;
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(p.to_string()));
        }

        Ok(self
            .entries_of(&inode)?
            .iter()
            .map(|e| (e.name(), e.kind()))
            .collect())
    }

    /// Whole contents of a file. An unmapped slot reads as zeros.
    pub fn read_file(&mut self, p: &str) -> Result<Vec<u8>, FsError> {
        let ino = self.resolve(p)?;
        let inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(FsError::IsADirectory(p.to_string()));
        }

        let mut probe = inode;
        let nblocks = inode.size.div_ceil(BLOCK_SIZE as u32);

        let mut data = Vec::with_capacity(nblocks as usize * BLOCK_SIZE);
        for b in 0..nblocks {
            match self.map_block(&mut probe, b, false)? {
                Some(phys) => data.extend_from_slice(&self.dev.read_block(phys)?),
                None => data.extend_from_slice(&[0u8; BLOCK_SIZE]),
            }
        }
        data.truncate(inode.size as usize);
        Ok(data)
    }

    /// Create a directory with `"."` and `".."` as its only entries and link
    /// it into its parent.
    pub fn mkdir(&mut self, p: &str) -> Result<(), FsError> {
        let (parent, name) = self.parent_of(p)?;
        if !self.read_inode(parent)?.is_dir() {
            return Err(FsError::NotADirectory(p.to_string()));
        }
        if self.find_entry(parent, &name)?.is_some() {
            return Err(FsError::AlreadyExists(p.to_string()));
        }

        let ino = self.allocate_inode()?;
        let block = self.allocate_block()?;

        let mut inode = Inode {
            mode: MODE_DIR,
            links_count: 2,
            ..Inode::default()
        };
        inode.direct[0] = block;
        inode.size = 2 * DIRENTRY_SIZE as u32;

        let dot = DirEntry::new(ino, FileType::Directory, ".");
        let dotdot = DirEntry::new(parent, FileType::Directory, "..");

        let mut buf = [0u8; BLOCK_SIZE];
        buf[..DIRENTRY_SIZE].copy_from_slice(dot.as_bytes());
        buf[DIRENTRY_SIZE..2 * DIRENTRY_SIZE].copy_from_slice(dotdot.as_bytes());
        self.dev.write_block(block, &buf)?;

        self.write_inode(ino, &inode)?;
        self.dir_add_entry(parent, &name, ino, FileType::Directory)
    }

    /// Create or overwrite a text file.
    ///
    /// Blocks past the new end are left allocated when the file shrinks;
    /// `put` is the operation that releases old content.
    pub fn write_text(&mut self, p: &str, text: &str) -> Result<(), FsError> {
        let (parent, name) = self.parent_of(p)?;

        let ino = match self.resolve_opt(p)? {
            Some(ino) => ino,
            None => self.create_file(parent, &name)?,
        };

        let mut inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(FsError::IsADirectory(p.to_string()));
        }

        let data = text.as_bytes();
        self.write_content(&mut inode, data)?;
        inode.size = data.len() as u32;
        self.write_inode(ino, &inode)
    }

    /// Copy host bytes into the image.
    ///
    /// `src_name` is the basename of the source file; it names the new entry
    /// whenever the destination is a directory. An existing file is
    /// overwritten: its old blocks are released and the zero-size inode is
    /// persisted before any new data is written.
    pub fn put(&mut self, data: &[u8], src_name: &str, dest: Option<&str>) -> Result<(), FsError> {
        let dest = match dest {
            None | Some("") | Some(".") | Some("./") => "/",
            Some(d) => d,
        };

        let (parent, name, target) = if dest == "/" {
            (ROOT_INODE, src_name.to_string(), None)
        } else {
            let (mut parent, mut name) = self.parent_of(dest)?;
            if name == "." || name == ".." {
                name = src_name.to_string();
            }

            let mut target = self.resolve_opt(dest)?;
            if let Some(ino) = target {
                if self.read_inode(ino)?.is_dir() {
                    parent = ino;
                    name = src_name.to_string();
                    target = None;
                }
            }
            (parent, name, target)
        };

        let ino = match target {
            Some(ino) => ino,
            None => self.create_file(parent, &name)?,
        };

        debug!("put: {} bytes into inode {}", data.len(), ino);

        let mut inode = self.read_inode(ino)?;
        self.release_blocks(&mut inode)?;
        inode.size = 0;
        self.write_inode(ino, &inode)?;

        self.write_content(&mut inode, data)?;
        inode.size = data.len() as u32;
        self.write_inode(ino, &inode)
    }

    /// Delete a file or an empty directory. Failures leave the image
    /// untouched.
    pub fn delete(&mut self, p: &str) -> Result<(), FsError> {
        let (parent, name) = self.parent_of(p)?;
        let entry = self
            .find_entry(parent, &name)?
            .ok_or_else(|| FsError::NotFound(p.to_string()))?;
        let ino = entry.ino();

        let mut inode = self.read_inode(ino)?;
        if inode.is_protected() {
            return Err(FsError::Protected(p.to_string()));
        }
        if inode.is_dir() && inode.size > 2 * DIRENTRY_SIZE as u32 {
            return Err(FsError::NotEmpty(p.to_string()));
        }

        self.dir_remove_entry(parent, &name)?;
        self.release_blocks(&mut inode)?;

        self.bitmap_set(self.sb.inode_bitmap_start, ino - 1, false)?;
        self.write_inode(ino, &Inode::default())?;

        debug!("deleted inode {} at {}", ino, p);
        Ok(())
    }

    fn create_file(&mut self, parent: u32, name: &str) -> Result<u32, FsError> {
        if !self.read_inode(parent)?.is_dir() {
            return Err(FsError::NotADirectory(name.to_string()));
        }

        let ino = self.allocate_inode()?;
        let inode = Inode {
            mode: MODE_FILE,
            links_count: 1,
            ..Inode::default()
        };
        self.write_inode(ino, &inode)?;
        self.dir_add_entry(parent, name, ino, FileType::File)?;
        Ok(ino)
    }

    /// Write `data` over the inode's blocks from logical index 0, allocating
    /// as needed; the last block is zero-padded. The caller persists the
    /// inode.
    fn write_content(&mut self, inode: &mut Inode, data: &[u8]) -> Result<(), FsError> {
        if data.len() > MAX_FILE_BLOCKS as usize * BLOCK_SIZE {
            return Err(FsError::NoSpace);
        }

        let nblocks = (data.len() as u32).div_ceil(BLOCK_SIZE as u32);
        for b in 0..nblocks {
            let phys = self
                .map_block(inode, b, true)?
                .ok_or(FsError::NoSpace)?;
            let start = b as usize * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(data.len());

            let mut block = [0u8; BLOCK_SIZE];
            block[..end - start].copy_from_slice(&data[start..end]);
            self.dev.write_block(phys, &block)?;
        }
        Ok(())
    }
}
