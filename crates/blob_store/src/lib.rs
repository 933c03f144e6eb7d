//! Layered, content-addressed blob store.
//!
//! Four stores compose into one: deduplication (outermost), integrity
//! checking, authenticated encryption, and object-store persistence with
//! side-channel checksums (innermost). Each layer adds exactly one
//! property on top of the next:
//!
//! ```text
//! ExistingScores  — dedup: skip save() for scores already durable
//!   └─ Checking   — integrity: Score(plaintext) must match on save & load
//!        └─ Encrypting — confidentiality: AES-SIV over plaintext
//!             └─ ObjectStoreBacked — persistence: <prefix><hex-score> + CRC32C/MD5
//! ```
//!
//! Integrity is checked in the plaintext domain (`Score == SHA-1(plaintext)`);
//! the object-store layer's CRC32C/MD5 protect the ciphertext in flight and
//! at rest. Deduplication is free once the content-addressed score is
//! computed, since identical plaintext always encrypts to identical
//! ciphertext (§4.2) and so always maps to the same object name.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use cairn_core::score::Score;
use dashmap::DashSet;
use object_store::Bucket;

/// Errors raised while saving or loading a blob through the stack.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The bytes returned by the inner store do not hash to the requested
    /// score (corruption, or a caller asking for the wrong score).
    #[error("integrity error: stored bytes do not hash to the requested score")]
    Integrity,
    /// Decryption failed: wrong key, or the ciphertext was tampered with.
    #[error("crypto: {0}")]
    Crypto(#[from] crypter::Error),
    /// The backing object store failed.
    #[error("object store: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// A content-addressed key/value store over plaintext blobs.
///
/// Implementations are safe to call from multiple threads concurrently —
/// the DAG engine (§4.7) drives backup, restore, and verify with a bounded
/// worker pool, and every blob store operation may run on any worker.
pub trait Store: Send + Sync {
    /// Store a plaintext blob, returning its content score. Saving the same
    /// blob twice returns the same score without duplicating storage.
    fn save(&self, plaintext: &[u8]) -> Result<Score, Error>;

    /// Load a plaintext blob back by its score.
    fn load(&self, score: &Score) -> Result<Vec<u8>, Error>;
}

/// Innermost persistence layer: ciphertext in, ciphertext out, named and
/// checksummed for the bucket.
trait CiphertextStore: Send + Sync {
    fn save_ciphertext(&self, score: &Score, ciphertext: &[u8]) -> Result<Score, Error>;
    fn load_ciphertext(&self, score: &Score) -> Result<Vec<u8>, Error>;
}

/// Object-store-backed persistence. Blob names are `<prefix><hex-score>`;
/// every object carries three metadata keys (hex SHA-1 of the plaintext,
/// hex CRC32C and hex MD5 of the ciphertext).
pub struct ObjectStoreBacked<B: Bucket> {
    bucket: B,
    prefix: String,
}

impl<B: Bucket> ObjectStoreBacked<B> {
    /// Construct a layer backed by `bucket`, naming objects `<prefix><hex-score>`.
    pub fn new(bucket: B, prefix: impl Into<String>) -> Self {
        Self { bucket, prefix: prefix.into() }
    }

    fn object_name(&self, score: &Score) -> String {
        format!("{}{}", self.prefix, score.hex())
    }
}

impl<B: Bucket> CiphertextStore for ObjectStoreBacked<B> {
    fn save_ciphertext(&self, score: &Score, ciphertext: &[u8]) -> Result<Score, Error> {
        let crc32c = object_store::compute_crc32c_hex(ciphertext);
        let md5 = object_store::compute_md5_hex(ciphertext);
        let mut metadata = HashMap::new();
        metadata.insert("sha1".to_string(), score.hex());
        metadata.insert("crc32c".to_string(), crc32c.clone());
        metadata.insert("md5".to_string(), md5.clone());

        let name = self.object_name(score);
        let record = self.bucket.create_object(&name, ciphertext, &crc32c, &md5, metadata)?;

        // The bucket is contractually required to verify these before
        // accepting the write (§6); a mismatch here means the object store
        // itself is corrupt or misbehaving, not a recoverable condition.
        assert_eq!(record.crc32c, crc32c, "object store echoed back a different CRC32C than requested");
        assert_eq!(record.md5, md5, "object store echoed back a different MD5 than requested");

        Ok(*score)
    }

    fn load_ciphertext(&self, score: &Score) -> Result<Vec<u8>, Error> {
        let name = self.object_name(score);
        Ok(self.bucket.read_object(&name)?)
    }
}

/// Authenticated encryption. `save` computes the plaintext score, encrypts
/// deterministically, and forwards the ciphertext to the inner store under
/// that score's object name; `load` does the reverse.
pub struct Encrypting<S: CiphertextStore> {
    inner: S,
    crypter: Mutex<crypter::Crypter>,
}

impl<S: CiphertextStore> Encrypting<S> {
    /// Wrap `inner` with a crypter built from `key` (32/48/64 bytes).
    pub fn new(inner: S, key: &[u8]) -> Result<Self, Error> {
        Ok(Self { inner, crypter: Mutex::new(crypter::Crypter::new(key)?) })
    }
}

impl<S: CiphertextStore> Store for Encrypting<S> {
    fn save(&self, plaintext: &[u8]) -> Result<Score, Error> {
        let score = Score::compute(plaintext);
        let ciphertext = {
            let mut crypter = self.crypter.lock().expect("crypter mutex poisoned");
            crypter.encrypt(plaintext)?
        };
        self.inner.save_ciphertext(&score, &ciphertext)
    }

    fn load(&self, score: &Score) -> Result<Vec<u8>, Error> {
        let ciphertext = self.inner.load_ciphertext(score)?;
        let mut crypter = self.crypter.lock().expect("crypter mutex poisoned");
        Ok(crypter.decrypt(&ciphertext)?)
    }
}

/// Integrity checking, in the plaintext domain. After a save, the score the
/// inner store reports must match what was computed locally; after a load,
/// the returned plaintext must re-hash to the score the caller asked for.
pub struct Checking<S: Store> {
    inner: S,
}

impl<S: Store> Checking<S> {
    /// Wrap `inner` with a plaintext-domain integrity check.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Store> Store for Checking<S> {
    fn save(&self, plaintext: &[u8]) -> Result<Score, Error> {
        let local_score = Score::compute(plaintext);
        let returned_score = self.inner.save(plaintext)?;
        if returned_score != local_score {
            return Err(Error::Integrity);
        }
        Ok(local_score)
    }

    fn load(&self, score: &Score) -> Result<Vec<u8>, Error> {
        let plaintext = self.inner.load(score)?;
        if Score::compute(&plaintext) != *score {
            tracing::warn!(score = %score, "integrity check failed on load");
            return Err(Error::Integrity);
        }
        Ok(plaintext)
    }
}

/// Deduplication. Saving a score already known to be durable short-circuits
/// without touching the inner store; `load` is always forwarded.
pub struct ExistingScores<S: Store> {
    inner: S,
    known: DashSet<Score>,
}

impl<S: Store> ExistingScores<S> {
    /// Wrap `inner` with an empty dedup set.
    pub fn new(inner: S) -> Self {
        Self { inner, known: DashSet::new() }
    }

    /// Seed the dedup set from a prior session's durable scores.
    pub fn with_known_scores(inner: S, known: impl IntoIterator<Item = Score>) -> Self {
        let set = DashSet::new();
        for score in known {
            set.insert(score);
        }
        Self { inner, known: set }
    }
}

impl<S: Store> Store for ExistingScores<S> {
    fn save(&self, plaintext: &[u8]) -> Result<Score, Error> {
        let score = Score::compute(plaintext);
        if self.known.contains(&score) {
            return Ok(score);
        }
        let saved = self.inner.save(plaintext)?;
        self.known.insert(saved);
        Ok(saved)
    }

    fn load(&self, score: &Score) -> Result<Vec<u8>, Error> {
        self.inner.load(score)
    }
}

/// Assemble the full four-layer stack over `bucket`, deterministically
/// encrypted under `key` and named with `prefix`.
pub fn build<B: Bucket + 'static>(
    bucket: B,
    key: &[u8],
    prefix: impl Into<String>,
) -> Result<ExistingScores<Checking<Encrypting<ObjectStoreBacked<B>>>>, Error> {
    let object_store_layer = ObjectStoreBacked::new(bucket, prefix);
    let encrypting = Encrypting::new(object_store_layer, key)?;
    let checking = Checking::new(encrypting);
    Ok(ExistingScores::new(checking))
}

/// Write `plaintext`'s encrypted form directly under `score`'s object
/// name, bypassing both the content-addressing computation and the
/// checking layer's verification.
///
/// Content addressing makes a self-referencing or otherwise cyclic blob
/// graph impossible to produce honestly — a SHA-1 preimage would be
/// required. This exists only so tests can synthesize exactly that kind of
/// adversarial fixture "directly on the store" (§8 scenario 4), the way a
/// real deployment never could.
#[doc(hidden)]
pub fn save_raw_for_test<B: Bucket>(
    bucket: B,
    key: &[u8],
    prefix: impl Into<String>,
    score: &Score,
    plaintext: &[u8],
) -> Result<(), Error> {
    let layer = ObjectStoreBacked::new(bucket, prefix);
    let mut crypter = crypter::Crypter::new(key)?;
    let ciphertext = crypter.encrypt(plaintext)?;
    layer.save_ciphertext(score, &ciphertext)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::MemoryBucket;

    fn test_key() -> Vec<u8> {
        (0..32).collect()
    }

    fn test_stack() -> ExistingScores<Checking<Encrypting<ObjectStoreBacked<MemoryBucket>>>> {
        build(MemoryBucket::new(), &test_key(), "backup/").unwrap()
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = test_stack();
        let score = store.save(b"hello, world").unwrap();
        assert_eq!(store.load(&score).unwrap(), b"hello, world");
    }

    #[test]
    fn saving_twice_returns_same_score() {
        let store = test_stack();
        let a = store.save(b"dedup me").unwrap();
        let b = store.save(b"dedup me").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn score_is_the_plaintext_sha1() {
        let store = test_stack();
        let score = store.save(b"content addressed").unwrap();
        assert_eq!(score, Score::compute(b"content addressed"));
    }

    #[test]
    fn tampered_ciphertext_load_fails_with_crypto_error() {
        let key = test_key();
        let score = Score::compute(b"tamper target");
        let mut ciphertext = {
            let mut crypter = crypter::Crypter::new(&key).unwrap();
            crypter.encrypt(b"tamper target").unwrap()
        };
        ciphertext[0] ^= 0xFF;

        let mut meta = HashMap::new();
        meta.insert("sha1".to_string(), score.hex());
        let crc = object_store::compute_crc32c_hex(&ciphertext);
        let md5 = object_store::compute_md5_hex(&ciphertext);
        let corrupt_bucket = MemoryBucket::new();
        corrupt_bucket.create_object(&score.hex(), &ciphertext, &crc, &md5, meta).unwrap();
        let corrupt_store = Encrypting::new(ObjectStoreBacked::new(corrupt_bucket, ""), &key).unwrap();
        assert!(corrupt_store.load(&score).is_err());
    }

    proptest::proptest! {
        #[test]
        fn round_trip_prop(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..8192)) {
            let store = test_stack();
            let score = store.save(&bytes).unwrap();
            let back = store.load(&score).unwrap();
            proptest::prop_assert_eq!(back, bytes);
        }
    }
}
