//! The narrow bucket contract the backup engine consumes.
//!
//! This crate defines only the contract (§6): `create_object`,
//! `read_object`, `list_objects`. The concrete cloud object-store client is
//! explicitly out of scope for this engine; [`memory::MemoryBucket`] and
//! [`disk::DiskBucket`] are test doubles used to exercise the full blob
//! store stack end-to-end without a network dependency.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

pub mod disk;
pub mod memory;

/// Errors a [`Bucket`] implementation may return.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No object exists under the requested name.
    #[error("not found")]
    NotFound,
    /// The caller-supplied CRC32C or MD5 did not match what the bucket
    /// computed from the received bytes — the implementation must verify
    /// these on receipt per the object store contract (§6).
    #[error("checksum mismatch on receipt")]
    ChecksumMismatch,
    /// Transient I/O failure talking to the backing store.
    #[error("object store io: {0}")]
    Io(#[from] std::io::Error),
}

/// A created or listed object's identity and side-channel checksums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Full object name (`<prefix><hex-score>` for blobs).
    pub name: String,
    /// Size in bytes of the stored (ciphertext) payload.
    pub size: u64,
    /// Hex-encoded CRC32C, as reported by the store.
    pub crc32c: String,
    /// Hex-encoded MD5, as reported by the store.
    pub md5: String,
    /// The metadata map the object was created with.
    pub metadata: HashMap<String, String>,
}

/// A page of [`list_objects`](Bucket::list_objects) results plus an opaque
/// continuation token for the next page, if any.
pub type ListPage = (Vec<ObjectRecord>, Option<String>);

/// The bucket capability the backup engine consumes.
///
/// Implementations must verify `expected_crc32c`/`expected_md5` against the
/// bytes they actually receive and fail rather than silently store
/// mismatched data — callers rely on this to catch corruption in flight.
pub trait Bucket: Send + Sync {
    /// Create an object. Fails with [`Error::ChecksumMismatch`] if the
    /// received bytes don't hash to the expected CRC32C/MD5.
    fn create_object(
        &self,
        name: &str,
        contents: &[u8],
        expected_crc32c: &str,
        expected_md5: &str,
        metadata: HashMap<String, String>,
    ) -> Result<ObjectRecord, Error>;

    /// Read an object's full contents back.
    fn read_object(&self, name: &str) -> Result<Vec<u8>, Error>;

    /// List objects whose name starts with `prefix`, resuming from
    /// `continuation` if given.
    fn list_objects(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage, Error>;
}

impl<B: Bucket + ?Sized> Bucket for Arc<B> {
    fn create_object(
        &self,
        name: &str,
        contents: &[u8],
        expected_crc32c: &str,
        expected_md5: &str,
        metadata: HashMap<String, String>,
    ) -> Result<ObjectRecord, Error> {
        (**self).create_object(name, contents, expected_crc32c, expected_md5, metadata)
    }

    fn read_object(&self, name: &str) -> Result<Vec<u8>, Error> {
        (**self).read_object(name)
    }

    fn list_objects(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage, Error> {
        (**self).list_objects(prefix, continuation)
    }
}

/// Hex-encoded CRC32C of `bytes`, as `create_object`'s `expected_crc32c`
/// side channel expects (§6).
#[must_use]
pub fn compute_crc32c_hex(bytes: &[u8]) -> String {
    hex::encode(crc32c::crc32c(bytes).to_be_bytes())
}

/// Hex-encoded MD5 of `bytes`, as `create_object`'s `expected_md5` side
/// channel expects (§6).
#[must_use]
pub fn compute_md5_hex(bytes: &[u8]) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
