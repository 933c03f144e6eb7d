//! Deterministic authenticated encryption over arbitrary byte strings.
//!
//! Built on AES-SIV (RFC 5297): encrypting the same plaintext under the
//! same key always yields the same ciphertext, which lets the blob store's
//! encrypting layer (`blob_store`) reuse the plaintext score as a stable
//! content address across sessions. Authentication failures (wrong key,
//! tampered ciphertext) are reported as a distinct error so callers never
//! mistake corruption for a different problem.

#![deny(unsafe_code)]

use aes::{Aes128, Aes192, Aes256};
use aes_siv::siv::Siv;
use aes_siv::KeyInit;
use cmac::Cmac;
use zeroize::Zeroize;

/// Errors returned by [`Crypter`] construction and use.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The supplied key was not 32, 48, or 64 bytes.
    #[error("bad key length: expected 32, 48, or 64 bytes")]
    BadKeyLength,
    /// Decryption failed: wrong key or a tampered/corrupt ciphertext.
    #[error("not authentic: decryption failed")]
    NotAuthentic,
}

enum Inner {
    Aes128(Siv<Aes128, Cmac<Aes128>>),
    Aes192(Siv<Aes192, Cmac<Aes192>>),
    Aes256(Siv<Aes256, Cmac<Aes256>>),
}

/// Deterministic AES-SIV encrypter/decrypter over a fixed key.
///
/// Construction selects the AES variant by key length: 32 bytes selects
/// AES-128-SIV, 48 bytes AES-192-SIV, 64 bytes AES-256-SIV (SIV doubles
/// the underlying block cipher's key length to derive two independent
/// keys internally).
pub struct Crypter {
    inner: Inner,
}

impl Crypter {
    /// Construct a crypter from a 32/48/64-byte key.
    ///
    /// The key bytes are not retained beyond what the underlying cipher
    /// needs; the caller's buffer is left untouched (zeroizing a caller's
    /// buffer out from under them would be surprising), but any scratch
    /// copies this function makes are wiped before returning.
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        let inner = match key.len() {
            32 => {
                let mut buf = [0u8; 32];
                buf.copy_from_slice(key);
                let cipher = Siv::<Aes128, Cmac<Aes128>>::new((&buf).into());
                buf.zeroize();
                Inner::Aes128(cipher)
            }
            48 => {
                let mut buf = [0u8; 48];
                buf.copy_from_slice(key);
                let cipher = Siv::<Aes192, Cmac<Aes192>>::new((&buf).into());
                buf.zeroize();
                Inner::Aes192(cipher)
            }
            64 => {
                let mut buf = [0u8; 64];
                buf.copy_from_slice(key);
                let cipher = Siv::<Aes256, Cmac<Aes256>>::new((&buf).into());
                buf.zeroize();
                Inner::Aes256(cipher)
            }
            _ => return Err(Error::BadKeyLength),
        };
        Ok(Self { inner })
    }

    /// Encrypt `plaintext`. Deterministic: equal plaintext yields equal
    /// ciphertext under the same key.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let result = match &mut self.inner {
            Inner::Aes128(c) => c.encrypt(&[b""], plaintext),
            Inner::Aes192(c) => c.encrypt(&[b""], plaintext),
            Inner::Aes256(c) => c.encrypt(&[b""], plaintext),
        };
        result.map_err(|_| Error::NotAuthentic)
    }

    /// Decrypt `ciphertext`, returning `NotAuthentic` on any authentication
    /// failure (wrong key or a tampered byte anywhere in the ciphertext).
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let result = match &mut self.inner {
            Inner::Aes128(c) => c.decrypt(&[b""], ciphertext),
            Inner::Aes192(c) => c.decrypt(&[b""], ciphertext),
            Inner::Aes256(c) => c.decrypt(&[b""], ciphertext),
        };
        result.map_err(|_| Error::NotAuthentic)
    }
}
