//! Ed25519 keypair and signing identity

use crate::error::{Error, Result};
use crate::handle::{deterministic_suffix, handle};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

const DEFAULT_SUFFIX_DIGITS: u32 = 4;

/// A signing identity: an Ed25519 keypair, the display name it was signed
/// up with, and the private data key that seals its `user`-space values —
/// unreadable to anyone but its signer, even another peer holding the raw
/// envelope.
#[derive(Clone, Debug)]
pub struct Identity {
    signing_key: SigningKey,
    display_name: String,
    data_key: [u8; 32],
}

impl Identity {
    /// Generate a fresh random keypair and data key bound to `display_name`.
    pub fn generate(display_name: impl Into<String>) -> Self {
        let mut data_key = [0u8; 32];
        OsRng.fill_bytes(&mut data_key);
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            display_name: display_name.into(),
            data_key,
        }
    }

    /// Rebuild an identity from raw 32-byte signing-key seed and data-key
    /// bytes, as read back from an unwrapped password blob or imported
    /// export.
    pub fn from_bytes(display_name: impl Into<String>, seed: &[u8; 32], data_key: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
            display_name: display_name.into(),
            data_key,
        }
    }

    /// Generate keypairs until one's deterministic suffix matches
    /// `target_suffix` exactly, or give up after `max_attempts`. Returns
    /// the identity alongside how many attempts it took, 1-indexed.
    ///
    /// The suffix is derived from the public key, so the only way to land
    /// on a chosen one is brute-force search over random keypairs.
    pub fn generate_with_suffix(
        display_name: impl Into<String>,
        target_suffix: &str,
        max_attempts: usize,
    ) -> Result<(Self, usize)> {
        let display_name = display_name.into();
        let digits = target_suffix.len() as u32;
        for attempt in 1..=max_attempts {
            let signing_key = SigningKey::generate(&mut OsRng);
            let pk = signing_key.verifying_key().to_bytes();
            if deterministic_suffix(&pk, digits) == target_suffix {
                let mut data_key = [0u8; 32];
                OsRng.fill_bytes(&mut data_key);
                return Ok((
                    Self {
                        signing_key,
                        display_name,
                        data_key,
                    },
                    attempt,
                ));
            }
        }
        Err(Error::SuffixNotFound(max_attempts))
    }

    /// Raw 32-byte signing-key seed, for export/password-wrapping.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Raw 32-byte data key used to seal this identity's `user`-space
    /// values, for export/password-wrapping.
    pub fn data_key_bytes(&self) -> [u8; 32] {
        self.data_key
    }

    /// Raw 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// This identity's display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The account's display handle (`name#suffix`), using the default
    /// 4-digit suffix.
    pub fn handle(&self) -> String {
        handle(&self.display_name, &self.public_key_bytes())
    }

    /// Sign `message`, returning the 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature against a raw public key, without needing an
    /// `Identity` instance — used to check remote envelopes.
    pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
        let verifying_key = VerifyingKey::from_bytes(public_key)
            .map_err(|_| Error::InvalidKey("invalid public key bytes".into()))?;
        let sig = Signature::from_bytes(signature);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| Error::InvalidKey("signature verification failed".into()))
    }

    /// Seal `plaintext` under this identity's data key, for `user`-space
    /// values. See [`crate::crypto::seal`].
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        crate::crypto::seal(&self.data_key, plaintext)
    }

    /// Unseal bytes produced by [`Identity::seal`] using this identity's
    /// data key.
    pub fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        crate::crypto::unseal(&self.data_key, sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let id = Identity::generate("alice");
        let sig = id.sign(b"payload");
        assert!(Identity::verify(&id.public_key_bytes(), b"payload", &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let id = Identity::generate("alice");
        let sig = id.sign(b"payload");
        assert!(Identity::verify(&id.public_key_bytes(), b"different", &sig).is_err());
    }

    #[test]
    fn from_bytes_reproduces_same_keypair() {
        let id = Identity::generate("bob");
        let rebuilt = Identity::from_bytes("bob", &id.secret_bytes(), id.data_key_bytes());
        assert_eq!(id.public_key_bytes(), rebuilt.public_key_bytes());
    }

    #[test]
    fn seal_unseal_roundtrips() {
        let id = Identity::generate("alice");
        let sealed = id.seal(b"cake is a lie");
        assert_ne!(sealed, b"cake is a lie");
        assert_eq!(id.unseal(&sealed).unwrap(), b"cake is a lie");
    }

    #[test]
    fn unseal_fails_under_a_different_identity() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let sealed = alice.seal(b"secret");
        assert!(bob.unseal(&sealed).is_err());
    }

    #[test]
    fn handle_contains_display_name_and_suffix() {
        let id = Identity::generate("carol");
        let h = id.handle();
        assert!(h.starts_with("carol#"));
        assert_eq!(h.len(), "carol#".len() + 4);
    }

    #[test]
    fn custom_suffix_signup_finds_a_match() {
        // A 1-digit target is found quickly within a generous attempt budget.
        let (id, attempts) = Identity::generate_with_suffix("dave", "7", 100_000).unwrap();
        assert!(id.handle().ends_with('7'));
        assert!(attempts >= 1);
    }

    #[test]
    fn custom_suffix_signup_gives_up_after_max_attempts() {
        // A target suffix of the wrong digit width can never match, so this
        // exhausts the budget and reports it back in the error.
        let err = Identity::generate_with_suffix("dave", "not-a-digit-suffix", 10).unwrap_err();
        assert!(matches!(err, Error::SuffixNotFound(10)));
    }
}
