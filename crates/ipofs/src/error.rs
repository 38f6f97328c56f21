use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("short read at block {0}")]
    ShortRead(u32),

    #[error("bad block size: {0} bytes")]
    BadBlockSize(usize),

    #[error("not an IPO_FS image")]
    BadMagic,

    #[error("invalid inode number: {0}")]
    InvalidInode(u32),

    #[error("inode {0}: reserved bytes are not zero")]
    CorruptInode(u32),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("no space left on image")]
    NoSpace,

    #[error("protected: {0}")]
    Protected(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("image too small: {0} blocks")]
    TooSmall(u32),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
