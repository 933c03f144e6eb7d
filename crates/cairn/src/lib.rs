//! Content-addressed, encrypted, deduplicating backup engine.
//!
//! This crate is the façade over the engine's three core subsystems: the
//! layered [`blob_store`] stack, the parallel [`dag`] traversal engine, and
//! the backup/restore/verify pipelines built on top of both. A host binary
//! is expected to parse flags and credentials and call [`open_bucket`],
//! [`open_session`], and then [`Session::save`]/[`Session::restore`]/
//! [`Session::verify`].

#![deny(unsafe_code)]

mod backup;
mod restore;
mod verify;

pub use backup::BackupOptions;
pub use verify::VerifyOptions;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cairn_core::score::Score;
use cairn_core::time::Timestamp;
use object_store::Bucket;

/// Default worker count for the DAG engine, when a caller does not override
/// it. The pipelines are I/O-bound, so oversubscribing past the host's core
/// count is usually still a net win; this is a starting point, not a law.
const DEFAULT_WORKERS: usize = 8;

/// Default PBKDF2 iteration count used the first time a bucket is opened.
const DEFAULT_REGISTRY_ITERATIONS: u32 = kdf::DEFAULT_ITERATIONS;

/// Default chunk size for the file saver: 16 MiB.
const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Object-name prefix every blob is stored under, within a bucket shared
/// with the registry's own record (§4.3).
const BLOB_PREFIX: &str = "blobs/";

/// Errors raised by the top-level engine API. Wraps each inner crate's
/// error so a caller that doesn't need the distinction can match one type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The bucket's registry rejected the supplied password, or the
    /// registry record itself was unreadable.
    #[error("registry: {0}")]
    Registry(#[from] registry::Error),
    /// A blob store operation failed.
    #[error("blob store: {0}")]
    BlobStore(#[from] blob_store::Error),
    /// The backing object store failed.
    #[error("object store: {0}")]
    ObjectStore(#[from] object_store::Error),
    /// A filesystem operation failed.
    #[error("filesystem: {0}")]
    Filesystem(#[from] fs_vfs::Error),
    /// A blob failed to marshal or unmarshal.
    #[error("repr: {0}")]
    Repr(#[from] repr::Error),
    /// The DAG traversal failed (cycle, resolver error, or visitor error).
    /// Boxed: `dag::Error<Error>` would otherwise make this enum's size
    /// depend on itself.
    #[error("dag traversal: {0}")]
    Dag(Box<dag::Error<Error>>),
    /// The durable verification ledger could not be read or appended to.
    #[error("ledger: {0}")]
    Ledger(#[from] ledger::Error),
    /// An exclusion pattern was not a valid regular expression.
    #[error("invalid exclusion pattern: {0}")]
    InvalidExclude(#[from] regex::Error),
    /// A score named by a directory listing is not present in the known
    /// durable set.
    #[error("unknown score: {0}")]
    UnknownScore(Score),
    /// A symlink entry carried a non-empty score list.
    #[error("malformed symlink entry: {0} carries content scores")]
    MalformedSymlink(String),
    /// A directory entry carried no score for its listing.
    #[error("malformed directory entry: {0} carries no content score")]
    MalformedDirectoryEntry(String),
}

/// How to reach a bucket: either of the two test doubles this engine ships
/// with. The concrete cloud object-store client is outside this crate's
/// scope (§1) — a host binary wires its own `Bucket` implementation and
/// skips [`open_bucket`] entirely if it needs one.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// A process-local, non-durable bucket. Useful for tests and for
    /// one-shot operations that don't need to survive the process.
    Memory,
    /// A bucket backed by a directory tree on local disk, rooted at `root`.
    Disk {
        /// Directory the bucket's objects and metadata live under.
        root: PathBuf,
    },
}

/// Open a bucket named `bucket_name` under the given `credentials`.
///
/// `bucket_name` is folded into the disk bucket's root so that distinct
/// named buckets under the same `Credentials::Disk { root }` don't collide;
/// it is ignored for `Credentials::Memory`, which is always a fresh bucket.
pub fn open_bucket(credentials: Credentials, bucket_name: &str) -> Result<Arc<dyn Bucket>, Error> {
    match credentials {
        Credentials::Memory => Ok(Arc::new(object_store::memory::MemoryBucket::new())),
        Credentials::Disk { root } => {
            let bucket = object_store::disk::DiskBucket::open(root.join(bucket_name))?;
            Ok(Arc::new(bucket))
        }
    }
}

/// A saved backup root: its content score plus the root directory's own
/// permissions and mtime.
///
/// Every other entry's permissions and mtime live in its *parent*
/// listing (§4.8); the root has no parent listing of its own, so
/// [`Session::save`] captures them separately here for
/// [`Session::restore`] to reapply.
#[derive(Debug, Clone, Copy)]
pub struct RootHandle {
    /// The root directory listing's content score.
    pub score: Score,
    /// The source directory's own permission bits at save time.
    pub permissions: u32,
    /// The source directory's own modification time at save time.
    pub mtime: Timestamp,
}

/// An open backup session: a password-verified handle onto a bucket's blob
/// store, ready to drive the save/restore/verify pipelines.
pub struct Session {
    store: Arc<dyn blob_store::Store>,
    bucket: Arc<dyn Bucket>,
    prefix: String,
    filesystem: Arc<dyn fs_vfs::Filesystem>,
    workers: usize,
    chunk_size: usize,
}

/// Open a session against `bucket` with `password`.
///
/// On a bucket's first use this initializes its registry (salt plus a
/// password-verification token); on later sessions it re-derives the key
/// and rejects a wrong password with [`registry::Error::WrongPassword`]
/// before any data blob is touched (§4.4). Returns the session's blob
/// store, ready for [`Session::save`]/[`restore`](Session::restore)/
/// [`verify`](Session::verify).
pub fn open_session(bucket: Arc<dyn Bucket>, password: &[u8]) -> Result<Session, Error> {
    let key = registry::open_session(bucket.as_ref(), password, DEFAULT_REGISTRY_ITERATIONS)?;
    let store = blob_store::build(Arc::clone(&bucket), &key, BLOB_PREFIX)?;
    Ok(Session {
        store: Arc::new(store),
        bucket,
        prefix: BLOB_PREFIX.to_string(),
        filesystem: Arc::new(fs_vfs::RealFilesystem::new()),
        workers: DEFAULT_WORKERS,
        chunk_size: DEFAULT_CHUNK_SIZE,
    })
}

impl Session {
    /// Override the DAG engine's worker count (default: [`DEFAULT_WORKERS`]).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Override the file saver's chunk size (default: 16 MiB).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Use `filesystem` instead of the real OS filesystem — mainly for
    /// tests that want to assert on tree shape without touching disk.
    #[must_use]
    pub fn with_filesystem(mut self, filesystem: Arc<dyn fs_vfs::Filesystem>) -> Self {
        self.filesystem = filesystem;
        self
    }

    /// Walk `source_path`, saving every file and directory through the blob
    /// store, and return the root's handle.
    ///
    /// `excludes` are regular expressions matched against each entry's path
    /// relative to `source_path`; matching entries are skipped entirely.
    pub fn save(&self, source_path: &Path, excludes: &[String]) -> Result<RootHandle, Error> {
        let options = BackupOptions::new(excludes, self.chunk_size)?;
        backup::save(self.filesystem.as_ref(), self.store.as_ref(), source_path, &options)
    }

    /// Reconstruct the tree rooted at `root` under `dest_path`.
    ///
    /// Ownership (UID/GID) is never restored (§1 Non-goals); permissions
    /// and mtime are, including the root directory's own.
    pub fn restore(&self, root: RootHandle, dest_path: &Path) -> Result<(), Error> {
        restore::restore(
            self.filesystem.as_ref(),
            self.store.as_ref(),
            root,
            dest_path,
            self.workers,
        )
    }

    /// Certify every node reachable from `root_scores`, recording a
    /// `{time, node, children}` entry in the ledger at `ledger_path` for
    /// each newly-verified node.
    ///
    /// When `options.read_files` is set, file chunks are loaded and
    /// re-hashed (the checking layer does the re-hash); otherwise file
    /// nodes are only checked for presence in the known-scores set.
    pub fn verify(
        &self,
        root_scores: Vec<Score>,
        ledger_path: &Path,
        options: &VerifyOptions,
    ) -> Result<(), Error> {
        verify::verify(self.store.as_ref(), self.bucket.as_ref(), &self.prefix, root_scores, ledger_path, options, self.workers)
    }
}
