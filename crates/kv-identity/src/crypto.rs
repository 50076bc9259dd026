//! Data-key sealing for `user`-space values.
//!
//! Wire layout: `iv(12) | ciphertext`. The IV is random per call, same
//! shape as [`crate::password`]'s wrapping blob but without the KDF header
//! since the data key itself is already uniformly random.

use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;

const IV_LEN: usize = 12;

/// Encrypt `plaintext` under `data_key` with a fresh random nonce.
pub fn seal(data_key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(data_key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .expect("AES-GCM encryption of a bounded plaintext cannot fail");
    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt bytes produced by [`seal`] under `data_key`.
pub fn unseal(data_key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < IV_LEN {
        return Err(Error::MalformedBlob("sealed value shorter than header".into()));
    }
    let (iv, ciphertext) = sealed.split_at(IV_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(data_key));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_unseal_roundtrips() {
        let key = [7u8; 32];
        let sealed = seal(&key, b"hello");
        assert_eq!(unseal(&key, &sealed).unwrap(), b"hello");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&[1u8; 32], b"hello");
        assert!(unseal(&[2u8; 32], &sealed).is_err());
    }

    #[test]
    fn each_seal_uses_a_fresh_nonce() {
        let key = [3u8; 32];
        assert_ne!(seal(&key, b"hello"), seal(&key, b"hello"));
    }
}
