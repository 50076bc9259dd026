//! Username and handle claim resolution
//!
//! A handle claim lives at `frozen/handles/{handle}` and is just an
//! [`Envelope`](crate::Envelope) admitted under the normal frozen rule,
//! plus one extra check: the handle's suffix must actually be the
//! deterministic suffix of the claiming key, so nobody can squat a handle
//! their key doesn't derive.
//!
//! A username, unlike a handle, isn't bound to a key by construction, so
//! multiple signers can each file a claim under
//! `all/claims/username/{username}/{pub_key}` and [`resolve_winner`] picks
//! the legitimate one: earliest `created_at` among valid, non-revoked
//! claims, tie-broken on signature bytes for determinism.

use kv_core::canonical;
use kv_core::codec::Value;
use kv_identity::{deterministic_suffix, parse_handle, Identity};

/// Validate that `handle` is a legal target for a `frozen/handles/*` claim
/// from `pub_key`: the suffix must be this key's deterministic suffix.
pub fn validate_handle_claim(handle: &str, pub_key: &[u8; 32]) -> bool {
    match parse_handle(handle) {
        Some((_, suffix)) => deterministic_suffix(pub_key, suffix.len() as u32) == suffix,
        None => false,
    }
}

/// A signed claim on a username, independent of the account's handle.
#[derive(Clone, Debug, PartialEq)]
pub struct UsernameClaim {
    /// The username being claimed
    pub username: String,
    /// Claimant's public key
    pub pub_key: [u8; 32],
    /// Milliseconds since the Unix epoch when the claim was filed
    pub created_at: u64,
    /// Whether the claimant has since revoked this claim
    pub revoked: bool,
    /// Signature over the claim's canonical fields
    pub signature: [u8; 64],
}

impl UsernameClaim {
    fn signing_bytes(username: &str, pub_key: &[u8; 32], created_at: u64, revoked: bool) -> Vec<u8> {
        let value = Value::Map(vec![
            ("username".into(), Value::Str(username.into())),
            ("pub_key".into(), Value::Bytes(pub_key.to_vec())),
            ("created_at".into(), Value::Int(created_at as i64)),
            ("revoked".into(), Value::Bool(revoked)),
        ]);
        canonical::canonical_bytes(&value).expect("claim fields always canonicalize")
    }

    /// File a new, non-revoked claim signed by `identity`.
    pub fn sign(identity: &Identity, username: impl Into<String>, created_at: u64) -> Self {
        let username = username.into();
        let pub_key = identity.public_key_bytes();
        let signature = identity.sign(&Self::signing_bytes(&username, &pub_key, created_at, false));
        Self {
            username,
            pub_key,
            created_at,
            revoked: false,
            signature,
        }
    }

    /// Produce a revocation of this claim, re-signed by the same identity.
    pub fn revoke(&self, identity: &Identity) -> Self {
        let signature = identity.sign(&Self::signing_bytes(
            &self.username,
            &self.pub_key,
            self.created_at,
            true,
        ));
        Self {
            revoked: true,
            signature,
            ..self.clone()
        }
    }

    /// Verify this claim's signature against its own `pub_key`.
    pub fn verify(&self) -> bool {
        let bytes = Self::signing_bytes(&self.username, &self.pub_key, self.created_at, self.revoked);
        Identity::verify(&self.pub_key, &bytes, &self.signature).is_ok()
    }

    /// Storage path this claim is published at, under `all/claims/username/`.
    pub fn storage_path(&self) -> String {
        format!(
            "claims/username/{}/{}",
            self.username,
            kv_core::Digest::of(&self.pub_key).to_b64()
        )
    }

    /// Encode as the [`Value`] shape stored as an envelope's application
    /// value, analogous to [`crate::Envelope::to_value`].
    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            ("username".into(), Value::Str(self.username.clone())),
            ("pub_key".into(), Value::Bytes(self.pub_key.to_vec())),
            ("created_at".into(), Value::Int(self.created_at as i64)),
            ("revoked".into(), Value::Bool(self.revoked)),
            ("signature".into(), Value::Bytes(self.signature.to_vec())),
        ])
    }

    /// Decode a claim from the shape produced by [`UsernameClaim::to_value`].
    pub fn from_value(value: &Value) -> std::result::Result<Self, crate::Error> {
        let Value::Map(entries) = value else {
            return Err(crate::Error::Malformed("unexpected field shape".into()));
        };
        let get = |name: &str| entries.iter().find(|(k, _)| k == name).map(|(_, v)| v);
        let username = match get("username") {
            Some(Value::Str(s)) => s.clone(),
            _ => return Err(crate::Error::Malformed("unexpected field shape".into())),
        };
        let pub_key = match get("pub_key") {
            Some(Value::Bytes(b)) if b.len() == 32 => {
                let mut buf = [0u8; 32];
                buf.copy_from_slice(b);
                buf
            }
            _ => return Err(crate::Error::Malformed("unexpected field shape".into())),
        };
        let created_at = match get("created_at") {
            Some(Value::Int(n)) if *n >= 0 => *n as u64,
            _ => return Err(crate::Error::Malformed("unexpected field shape".into())),
        };
        let revoked = match get("revoked") {
            Some(Value::Bool(b)) => *b,
            _ => return Err(crate::Error::Malformed("unexpected field shape".into())),
        };
        let signature = match get("signature") {
            Some(Value::Bytes(b)) if b.len() == 64 => {
                let mut buf = [0u8; 64];
                buf.copy_from_slice(b);
                buf
            }
            _ => return Err(crate::Error::Malformed("unexpected field shape".into())),
        };
        Ok(Self {
            username,
            pub_key,
            created_at,
            revoked,
            signature,
        })
    }
}

/// Resolve the winner among every claim filed for one username: the claim
/// with a valid signature, not revoked, with the earliest `created_at`;
/// ties broken by the lexicographically smallest signature so every peer
/// agrees regardless of arrival order.
pub fn resolve_winner(claims: &[UsernameClaim]) -> Option<&UsernameClaim> {
    claims
        .iter()
        .filter(|c| !c.revoked && c.verify())
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.signature.cmp(&b.signature))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_claim_validates_matching_suffix() {
        let id = Identity::generate("alice");
        let handle = id.handle();
        assert!(validate_handle_claim(&handle, &id.public_key_bytes()));
    }

    #[test]
    fn handle_claim_rejects_mismatched_suffix() {
        let id = Identity::generate("alice");
        assert!(!validate_handle_claim("alice#0000", &id.public_key_bytes()));
    }

    #[test]
    fn resolve_winner_picks_earliest_valid_claim() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let first = UsernameClaim::sign(&alice, "desired", 100);
        let second = UsernameClaim::sign(&bob, "desired", 200);
        let claims = [second, first.clone()];
        let winner = resolve_winner(&claims).unwrap();
        assert_eq!(winner.pub_key, first.pub_key);
    }

    #[test]
    fn resolve_winner_skips_revoked_claims() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let first = UsernameClaim::sign(&alice, "desired", 100);
        let revoked = first.revoke(&alice);
        let second = UsernameClaim::sign(&bob, "desired", 200);
        let claims = [revoked, second.clone()];
        let winner = resolve_winner(&claims).unwrap();
        assert_eq!(winner.pub_key, second.pub_key);
    }

    #[test]
    fn resolve_winner_ignores_forged_claims() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let mut forged = UsernameClaim::sign(&alice, "desired", 50);
        forged.username = "stolen".into();
        let legit = UsernameClaim::sign(&bob, "desired", 100);
        let claims = [forged, legit.clone()];
        let winner = resolve_winner(&claims).unwrap();
        assert_eq!(winner.pub_key, legit.pub_key);
    }

    #[test]
    fn resolve_winner_of_empty_set_is_none() {
        assert!(resolve_winner(&[]).is_none());
    }

    #[test]
    fn value_roundtrip_preserves_every_field() {
        let alice = Identity::generate("alice");
        let claim = UsernameClaim::sign(&alice, "desired", 100);
        let decoded = UsernameClaim::from_value(&claim.to_value()).unwrap();
        assert_eq!(decoded, claim);
    }

    #[test]
    fn value_roundtrip_preserves_a_revocation() {
        let alice = Identity::generate("alice");
        let claim = UsernameClaim::sign(&alice, "desired", 100).revoke(&alice);
        let decoded = UsernameClaim::from_value(&claim.to_value()).unwrap();
        assert!(decoded.revoked);
        assert!(decoded.verify());
    }

    #[test]
    fn tie_break_is_deterministic_on_signature_bytes() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let a = UsernameClaim::sign(&alice, "desired", 100);
        let b = UsernameClaim::sign(&bob, "desired", 100);
        let expected = if a.signature < b.signature { a.pub_key } else { b.pub_key };
        let claims = [a, b];
        let winner = resolve_winner(&claims).unwrap();
        assert_eq!(winner.pub_key, expected);
    }
}
