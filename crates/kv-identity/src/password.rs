//! Password-wrapped identity export
//!
//! A wrapped blob lets an account be recovered from a password alone. The
//! password is stretched with PBKDF2-HMAC-SHA-256 into an AES-256-GCM key
//! that wraps the signing key's 32-byte seed together with a freshly
//! generated 256-bit data key (used to encrypt `user`-space values). KDF
//! parameters travel with the blob so a future, stronger default iteration
//! count doesn't break old exports.
//!
//! Wire layout: `iterations(u32 BE) | salt(16) | iv(12) | ciphertext`.

use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;

/// PBKDF2 iteration count used for newly wrapped identities.
pub const DEFAULT_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const HEADER_LEN: usize = 4 + SALT_LEN + IV_LEN;

/// The two secrets a wrapped blob protects: the account's Ed25519 signing
/// key seed, and its private data key for `user`-space encryption.
pub struct UnwrappedSecrets {
    /// 32-byte Ed25519 signing key seed
    pub signing_key_seed: [u8; 32],
    /// 32-byte AES-256 key used to encrypt `user`-space values
    pub data_key: [u8; 32],
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Wrap `signing_key_seed` and `data_key` under `password`, returning the
/// blob to persist or export.
pub fn wrap(
    password: &str,
    signing_key_seed: &[u8; 32],
    data_key: &[u8; 32],
) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut iv);

    let wrapping_key = derive_key(password, &salt, DEFAULT_ITERATIONS);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&wrapping_key));

    let mut plaintext = Vec::with_capacity(64);
    plaintext.extend_from_slice(signing_key_seed);
    plaintext.extend_from_slice(data_key);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
        .map_err(|_| Error::MalformedBlob("encryption failed".into()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&DEFAULT_ITERATIONS.to_be_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unwrap a blob produced by [`wrap`], recovering the signing key seed and
/// data key. Fails with [`Error::WrongPassword`] if the password (or the
/// blob itself) doesn't check out.
pub fn unwrap(password: &str, blob: &[u8]) -> Result<UnwrappedSecrets> {
    if blob.len() < HEADER_LEN {
        return Err(Error::MalformedBlob("blob shorter than header".into()));
    }
    let iterations = u32::from_be_bytes(blob[0..4].try_into().unwrap());
    let salt = &blob[4..4 + SALT_LEN];
    let iv = &blob[4 + SALT_LEN..HEADER_LEN];
    let ciphertext = &blob[HEADER_LEN..];

    let wrapping_key = derive_key(password, salt, iterations);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&wrapping_key));

    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| Error::WrongPassword)?;

    if plaintext.len() != 64 {
        return Err(Error::MalformedBlob("unexpected plaintext length".into()));
    }

    let mut signing_key_seed = [0u8; 32];
    let mut data_key = [0u8; 32];
    signing_key_seed.copy_from_slice(&plaintext[0..32]);
    data_key.copy_from_slice(&plaintext[32..64]);
    Ok(UnwrappedSecrets {
        signing_key_seed,
        data_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrip() {
        let seed = [1u8; 32];
        let data_key = [2u8; 32];
        let blob = wrap("hunter2", &seed, &data_key).unwrap();
        let secrets = unwrap("hunter2", &blob).unwrap();
        assert_eq!(secrets.signing_key_seed, seed);
        assert_eq!(secrets.data_key, data_key);
    }

    #[test]
    fn wrong_password_fails() {
        let blob = wrap("correct", &[1u8; 32], &[2u8; 32]).unwrap();
        assert!(matches!(unwrap("incorrect", &blob), Err(Error::WrongPassword)));
    }

    #[test]
    fn truncated_blob_is_malformed() {
        let blob = wrap("pw", &[1u8; 32], &[2u8; 32]).unwrap();
        assert!(matches!(
            unwrap("pw", &blob[..HEADER_LEN - 1]),
            Err(Error::MalformedBlob(_))
        ));
    }

    #[test]
    fn each_wrap_uses_a_fresh_salt_and_iv() {
        let a = wrap("pw", &[1u8; 32], &[2u8; 32]).unwrap();
        let b = wrap("pw", &[1u8; 32], &[2u8; 32]).unwrap();
        assert_ne!(a, b);
    }
}
