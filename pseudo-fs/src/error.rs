//! Error taxonomy shared by every engine operation.

use thiserror::Error;

/// Outcome of a fallible filesystem operation.
pub type FsResult<T> = Result<T, FsError>;

/// Everything that can go wrong inside the engine.
///
/// Variants are kinds, not carriers of recovery logic: the shell maps each
/// kind to a user-facing label and keeps accepting commands.
#[derive(Debug, Error)]
pub enum FsError {
    /// A command was issued before any volume was formatted or opened.
    #[error("no filesystem loaded")]
    NoFilesystem,
    /// Malformed command input, e.g. an unparseable size literal.
    #[error("{0}")]
    InvalidArgument(String),
    /// A path, inode or directory entry does not exist.
    #[error("file or directory does not exist")]
    NotFound,
    /// A file was used where a directory is required.
    #[error("not a directory")]
    NotADirectory,
    /// A directory was used where a file is required.
    #[error("is a directory")]
    IsADirectory,
    /// The target directory already holds an entry with this name.
    #[error("name already exists in the directory")]
    AlreadyExists,
    /// `rmdir` on a directory that still has children.
    #[error("directory is not empty")]
    DirectoryNotEmpty,
    /// The directory cluster has no free slot left.
    #[error("directory has no free slot")]
    DirectoryFull,
    /// Not enough free data clusters for the payload.
    #[error("not enough free data clusters")]
    OutOfSpace,
    /// The inode bitmap is exhausted.
    #[error("no free inodes")]
    NoInodes,
    /// The payload needs more clusters than the pointer chain can address.
    #[error("file exceeds the addressing limit")]
    FileTooLarge,
    /// Empty or over-long directory entry name.
    #[error("invalid file name")]
    InvalidName,
    /// Read or write failure on the backing volume file.
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}
