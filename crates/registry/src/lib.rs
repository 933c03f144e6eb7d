//! Per-bucket registry: binds a salt and a password-verification token to a
//! bucket so a later session can reject a wrong password before decrypting
//! any data blob (§4.4).

#![deny(unsafe_code)]

use std::collections::HashMap;

use object_store::Bucket;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// The well-known object name the registry record lives at.
pub const REGISTRY_OBJECT_NAME: &str = "registry";

/// Plaintext whose successful decryption proves the session has the right
/// password. Fixed and well-known; never secret.
const VERIFICATION_PLAINTEXT: &[u8] = b"cairn-backup-registry-verification-v1";

const CURRENT_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const DERIVED_KEY_LEN: usize = 32;

/// Errors raised while opening or initializing a bucket's registry.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The password derived a key that failed to decrypt the stored
    /// verification ciphertext.
    #[error("wrong password")]
    WrongPassword,
    /// The stored registry record could not be parsed.
    #[error("malformed registry record: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The derived key had an unsupported length for the crypter.
    #[error("crypter: {0}")]
    Crypter(#[from] crypter::Error),
    /// The backing object store failed.
    #[error("object store: {0}")]
    ObjectStore(#[from] object_store::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryRecord {
    version: u32,
    #[serde(with = "hex_bytes")]
    salt: Vec<u8>,
    iterations: u32,
    key_len: usize,
    #[serde(with = "hex_bytes")]
    verification_ciphertext: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Open the session's key: load an existing registry record and verify the
/// password, or initialize a brand-new registry if the bucket has never
/// been used before.
///
/// Returns the derived key, ready to hand to the blob store's encrypting
/// layer. This cost is paid once per session, before any data blob is
/// touched.
pub fn open_session(
    bucket: &dyn Bucket,
    password: &[u8],
    iterations: u32,
) -> Result<Vec<u8>, Error> {
    match bucket.read_object(REGISTRY_OBJECT_NAME) {
        Ok(bytes) => load_and_verify(&bytes, password),
        Err(object_store::Error::NotFound) => initialize(bucket, password, iterations),
        Err(e) => Err(Error::ObjectStore(e)),
    }
}

fn load_and_verify(bytes: &[u8], password: &[u8]) -> Result<Vec<u8>, Error> {
    let record: RegistryRecord = serde_json::from_slice(bytes)?;
    let key = kdf::derive(password, &record.salt, record.iterations, record.key_len);
    let mut crypter = crypter::Crypter::new(&key)?;
    match crypter.decrypt(&record.verification_ciphertext) {
        Ok(plaintext) if plaintext == VERIFICATION_PLAINTEXT => Ok(key),
        _ => Err(Error::WrongPassword),
    }
}

fn initialize(bucket: &dyn Bucket, password: &[u8], iterations: u32) -> Result<Vec<u8>, Error> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = kdf::derive(password, &salt, iterations, DERIVED_KEY_LEN);
    let mut crypter = crypter::Crypter::new(&key)?;
    let verification_ciphertext = crypter.encrypt(VERIFICATION_PLAINTEXT)?;
    let record = RegistryRecord {
        version: CURRENT_VERSION,
        salt,
        iterations,
        key_len: DERIVED_KEY_LEN,
        verification_ciphertext,
    };
    let body = serde_json::to_vec(&record)?;
    let crc32c = object_store::compute_crc32c_hex(&body);
    let md5 = object_store::compute_md5_hex(&body);
    bucket.create_object(REGISTRY_OBJECT_NAME, &body, &crc32c, &md5, HashMap::new())?;
    tracing::info!(version = CURRENT_VERSION, "initialized new bucket registry");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::MemoryBucket;

    #[test]
    fn first_session_initializes_registry() {
        let bucket = MemoryBucket::new();
        let key = open_session(&bucket, b"hunter2", 10).unwrap();
        assert_eq!(key.len(), DERIVED_KEY_LEN);
    }

    #[test]
    fn second_session_same_password_reuses_key() {
        let bucket = MemoryBucket::new();
        let key1 = open_session(&bucket, b"hunter2", 10).unwrap();
        let key2 = open_session(&bucket, b"hunter2", 10).unwrap();
        assert_eq!(key1, key2);
    }

    #[test]
    fn wrong_password_is_rejected_before_any_blob_is_touched() {
        let bucket = MemoryBucket::new();
        open_session(&bucket, b"correct horse", 10).unwrap();
        let err = open_session(&bucket, b"wrong password", 10);
        assert!(matches!(err, Err(Error::WrongPassword)));
    }
}
