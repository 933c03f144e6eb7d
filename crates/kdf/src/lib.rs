//! PBKDF2 (RFC 2898) key derivation, used once per session by `registry` to
//! turn a user's password and a stored salt into a crypter key.

#![deny(unsafe_code)]

use hmac::Hmac;
use sha1::Sha1;

/// Iteration count used when a bucket is first initialized.
///
/// New buckets should use this value; existing buckets carry their own
/// iteration count in the registry record (§4.4), so raising
/// this constant in a later release never breaks reading old backups.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Derive `key_len` bytes from `password` and `salt` using PBKDF2-HMAC-SHA1.
///
/// Pure function of its inputs: the same `(password, salt, iters, key_len)`
/// always yields the same output.
#[must_use]
pub fn derive(password: &[u8], salt: &[u8], iters: u32, key_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; key_len];
    pbkdf2::pbkdf2::<Hmac<Sha1>>(password, salt, iters, &mut out)
        .expect("key_len fits in PBKDF2's output size limit for HMAC-SHA1");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = derive(b"hunter2", b"somesalt", 1000, 32);
        let b = derive(b"hunter2", b"somesalt", 1000, 32);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn different_salts_differ() {
        let a = derive(b"hunter2", b"salt-a", 1000, 32);
        let b = derive(b"hunter2", b"salt-b", 1000, 32);
        assert_ne!(a, b);
    }

    #[test]
    fn different_passwords_differ() {
        let a = derive(b"hunter2", b"samesalt", 1000, 32);
        let b = derive(b"hunter3", b"samesalt", 1000, 32);
        assert_ne!(a, b);
    }

    /// RFC 6070 test vector #1 (PBKDF2-HMAC-SHA1).
    #[test]
    fn rfc6070_vector_1() {
        let out = derive(b"password", b"salt", 1, 20);
        assert_eq!(
            hex::encode(out),
            "0c60c80f961f0e71f3a9b524af6012062fe037a6"
        );
    }

    /// RFC 6070 test vector #2.
    #[test]
    fn rfc6070_vector_2() {
        let out = derive(b"password", b"salt", 2, 20);
        assert_eq!(
            hex::encode(out),
            "ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957"
        );
    }
}
