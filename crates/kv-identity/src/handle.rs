//! Deterministic handle suffixes
//!
//! A handle is `display_name + "#" + suffix`, where the suffix is derived
//! from the account's public key rather than chosen freely — this is what
//! lets any peer verify a handle claim is bound to the key that signed it,
//! without a central allocator.

use sha2::{Digest as _, Sha256};

/// Compute the deterministic suffix for `public_key`: the first 4 bytes of
/// `SHA-256(public_key)`, read as a big-endian u32, reduced mod `10^digits`
/// and zero-padded to `digits` characters.
pub fn deterministic_suffix(public_key: &[u8], digits: u32) -> String {
    let hash = Sha256::digest(public_key);
    let prefix = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
    let modulus = 10u32.pow(digits);
    let suffix = prefix % modulus;
    format!("{:0width$}", suffix, width = digits as usize)
}

/// Build the display handle for `display_name` bound to `public_key`, using
/// the default 4-digit suffix.
pub fn handle(display_name: &str, public_key: &[u8]) -> String {
    format!("{}#{}", display_name, deterministic_suffix(public_key, 4))
}

/// Split a handle into its display name and suffix, if it has the
/// `name#digits` shape.
pub fn parse_handle(handle: &str) -> Option<(&str, &str)> {
    let (name, suffix) = handle.rsplit_once('#')?;
    if name.is_empty() || suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((name, suffix))
}

/// Check that `handle` is validly bound to `public_key`: its suffix must
/// equal `deterministic_suffix(public_key, suffix.len())`.
pub fn verify_handle(handle: &str, public_key: &[u8]) -> bool {
    let Some((_, suffix)) = parse_handle(handle) else {
        return false;
    };
    deterministic_suffix(public_key, suffix.len() as u32) == suffix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_deterministic() {
        let pk = [7u8; 32];
        assert_eq!(deterministic_suffix(&pk, 4), deterministic_suffix(&pk, 4));
    }

    #[test]
    fn suffix_is_zero_padded() {
        for digits in [4, 5, 6] {
            let suffix = deterministic_suffix(&[0u8; 32], digits);
            assert_eq!(suffix.len(), digits as usize);
        }
    }

    #[test]
    fn different_keys_usually_differ() {
        let a = deterministic_suffix(&[1u8; 32], 4);
        let b = deterministic_suffix(&[2u8; 32], 4);
        assert_ne!(a, b);
    }

    #[test]
    fn handle_roundtrips_through_verify() {
        let pk = [3u8; 32];
        let h = handle("alice", &pk);
        assert!(verify_handle(&h, &pk));
        assert!(!verify_handle(&h, &[4u8; 32]));
    }

    #[test]
    fn parse_handle_rejects_malformed() {
        assert_eq!(parse_handle("noseparator"), None);
        assert_eq!(parse_handle("name#"), None);
        assert_eq!(parse_handle("name#abcd"), None);
        assert_eq!(parse_handle("#1234"), None);
        assert_eq!(parse_handle("name#1234"), Some(("name", "1234")));
    }
}
