//! A thin filesystem capability consumed by the backup and restore
//! pipelines (§9: "a thin filesystem interface exists solely for
//! testability; abstract it as a capability the pipelines consume").
//!
//! [`RealFilesystem`] delegates directly to the OS. [`memory::InMemoryFilesystem`]
//! is a test double with no real file descriptors, used by pipeline unit
//! tests that want to assert on tree shape without touching disk.

#![deny(unsafe_code)]

pub mod memory;
pub mod real;

use std::io::Read;
use std::path::Path;

use cairn_core::time::Timestamp;

pub use real::RealFilesystem;

/// Errors a [`Filesystem`] implementation may return.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No entry exists at the requested path.
    #[error("not found: {0}")]
    NotFound(String),
    /// The underlying I/O operation failed.
    #[error("filesystem io: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of filesystem entry, mirroring `repr::EntryKind`'s variants and
/// discriminant order so conversion between the two is infallible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A subdirectory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// A block device node.
    BlockDevice,
    /// A character device node.
    CharDevice,
    /// A named pipe (FIFO).
    NamedPipe,
    /// A Unix domain socket.
    Socket,
}

/// Everything the backup pipeline needs to know about one filesystem entry,
/// without following symlinks (an `lstat`, not a `stat`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Entry kind.
    pub kind: EntryKind,
    /// Permission bits, including setuid/setgid/sticky.
    pub permissions: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Modification time.
    pub mtime: Timestamp,
    /// Size in bytes; meaningful for regular files only.
    pub size: u64,
    /// Inode number.
    pub inode: u64,
    /// Containing device number.
    pub device: u64,
    /// Device number for block/char device entries; zero otherwise.
    pub device_number: i32,
    /// Symlink target; empty for non-symlinks.
    pub target: String,
}

/// The filesystem capability the backup and restore pipelines consume.
///
/// All paths are absolute or resolved relative to whatever root the
/// implementation was constructed with; this trait does not itself define
/// path-resolution semantics beyond what each method documents.
pub trait Filesystem: Send + Sync {
    /// `lstat` the entry at `path`.
    fn metadata(&self, path: &Path) -> Result<Metadata, Error>;

    /// List the names of `path`'s direct children, in no particular order
    /// (the backup pipeline sorts entries by name itself for determinism).
    fn read_dir(&self, path: &Path) -> Result<Vec<String>, Error>;

    /// Open a regular file for streamed, chunked reading.
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, Error>;

    /// Create `path` and every missing ancestor directory.
    fn create_dir_all(&self, path: &Path) -> Result<(), Error>;

    /// Create a new regular file at `path` and write its full contents.
    /// `path`'s parent is assumed to already exist.
    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), Error>;

    /// Create a symlink at `path` pointing at `target`.
    fn create_symlink(&self, path: &Path, target: &str) -> Result<(), Error>;

    /// Set `path`'s permission bits.
    fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), Error>;

    /// Set `path`'s modification time, without following a trailing symlink.
    fn set_mtime(&self, path: &Path, mtime: Timestamp) -> Result<(), Error>;
}
