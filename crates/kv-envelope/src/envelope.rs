//! Signed write envelopes and per-space admission
//!
//! Every write that crosses a peer boundary is a signed envelope. Local
//! writes go straight into the trie; remote envelopes go through
//! [`merge`], which verifies the signature and applies the admission rule
//! for the envelope's [`Space`] before the caller is allowed to apply it.

use crate::error::{Error, Result};
use kv_core::canonical;
use kv_core::codec::Value;
use kv_identity::Identity;

/// Replay barrier for `frozen`-space admission: a candidate envelope older
/// than this many milliseconds relative to the local clock is rejected,
/// even if its signature is valid, so an attacker can't resurrect a
/// years-old signed claim against a handle that's since been reused.
pub const MAX_CLAIM_AGE_MS: u64 = 3_600_000;

/// The three data spaces, each with its own merge and admission rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Space {
    /// Public, mutable, last-write-wins by timestamp.
    All,
    /// Public, immutable: first write at a path wins, subsequent writes to
    /// the same path are rejected.
    Frozen,
    /// Private to the signer: every other signer's write is rejected.
    User,
}

impl Space {
    /// The storage path prefix this space's entries live under.
    pub fn prefix(self) -> &'static str {
        match self {
            Space::All => "all",
            Space::Frozen => "frozen",
            Space::User => "user",
        }
    }
}

/// A signed write record.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Which data space this write targets
    pub space: Space,
    /// The path within that space, not including the space prefix
    pub path: String,
    /// Ref-key into the value store, or `None` for a tombstone (delete)
    pub value_ref: Option<String>,
    /// Signer's raw Ed25519 public key
    pub pub_key: [u8; 32],
    /// Milliseconds since the Unix epoch, as observed by the signer
    pub timestamp: u64,
    /// Ed25519 signature over [`Envelope::signing_bytes`]
    pub signature: [u8; 64],
}

impl Envelope {
    /// Build and sign an envelope with `identity`.
    pub fn sign(
        identity: &Identity,
        space: Space,
        path: impl Into<String>,
        value_ref: Option<String>,
        timestamp: u64,
    ) -> Self {
        let path = path.into();
        let pub_key = identity.public_key_bytes();
        let unsigned = UnsignedFields {
            space,
            path: &path,
            value_ref: value_ref.as_deref(),
            pub_key: &pub_key,
            timestamp,
        };
        let signature = identity.sign(&unsigned.signing_bytes());
        Self {
            space,
            path,
            value_ref,
            pub_key,
            timestamp,
            signature,
        }
    }

    fn signing_bytes(&self) -> Vec<u8> {
        UnsignedFields {
            space: self.space,
            path: &self.path,
            value_ref: self.value_ref.as_deref(),
            pub_key: &self.pub_key,
            timestamp: self.timestamp,
        }
        .signing_bytes()
    }

    /// Verify this envelope's signature against its own `pub_key`.
    pub fn verify(&self) -> Result<()> {
        Identity::verify(&self.pub_key, &self.signing_bytes(), &self.signature)
            .map_err(|_| Error::SignatureInvalid)
    }

    /// The full storage path, including the space prefix.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.space.prefix(), self.path)
    }

    /// Encode this envelope as a tagged [`Value`], the shape it's stored
    /// and put on the wire as (not to be confused with the narrower
    /// [`Envelope::signing_bytes`], which omits the signature itself).
    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            ("space".into(), Value::Str(self.space.prefix().into())),
            ("path".into(), Value::Str(self.path.clone())),
            (
                "value_ref".into(),
                match &self.value_ref {
                    Some(v) => Value::Str(v.clone()),
                    None => Value::Null,
                },
            ),
            ("pub_key".into(), Value::Bytes(self.pub_key.to_vec())),
            ("timestamp".into(), Value::Int(self.timestamp as i64)),
            ("signature".into(), Value::Bytes(self.signature.to_vec())),
        ])
    }

    /// Decode an envelope from the `Value` shape produced by
    /// [`Envelope::to_value`].
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Map(entries) = value else {
            return Err(Error::Malformed("unexpected field shape".into()));
        };
        let get = |name: &str| entries.iter().find(|(k, _)| k == name).map(|(_, v)| v);
        let space = match get("space") {
            Some(Value::Str(s)) if s == "all" => Space::All,
            Some(Value::Str(s)) if s == "frozen" => Space::Frozen,
            Some(Value::Str(s)) if s == "user" => Space::User,
            _ => return Err(Error::Malformed("unexpected field shape".into())),
        };
        let path = match get("path") {
            Some(Value::Str(s)) => s.clone(),
            _ => return Err(Error::Malformed("unexpected field shape".into())),
        };
        let value_ref = match get("value_ref") {
            Some(Value::Str(s)) => Some(s.clone()),
            Some(Value::Null) => None,
            _ => return Err(Error::Malformed("unexpected field shape".into())),
        };
        let pub_key = match get("pub_key") {
            Some(Value::Bytes(b)) if b.len() == 32 => {
                let mut buf = [0u8; 32];
                buf.copy_from_slice(b);
                buf
            }
            _ => return Err(Error::Malformed("unexpected field shape".into())),
        };
        let timestamp = match get("timestamp") {
            Some(Value::Int(n)) if *n >= 0 => *n as u64,
            _ => return Err(Error::Malformed("unexpected field shape".into())),
        };
        let signature = match get("signature") {
            Some(Value::Bytes(b)) if b.len() == 64 => {
                let mut buf = [0u8; 64];
                buf.copy_from_slice(b);
                buf
            }
            _ => return Err(Error::Malformed("unexpected field shape".into())),
        };
        Ok(Self {
            space,
            path,
            value_ref,
            pub_key,
            timestamp,
            signature,
        })
    }
}

struct UnsignedFields<'a> {
    space: Space,
    path: &'a str,
    value_ref: Option<&'a str>,
    pub_key: &'a [u8; 32],
    timestamp: u64,
}

impl UnsignedFields<'_> {
    fn signing_bytes(&self) -> Vec<u8> {
        let value = Value::Map(vec![
            ("space".into(), Value::Str(self.space.prefix().into())),
            ("path".into(), Value::Str(self.path.into())),
            (
                "value_ref".into(),
                match self.value_ref {
                    Some(v) => Value::Str(v.into()),
                    None => Value::Null,
                },
            ),
            ("pub_key".into(), Value::Bytes(self.pub_key.to_vec())),
            ("timestamp".into(), Value::Int(self.timestamp as i64)),
        ]);
        // A Map's signing form never fails to canonicalize: the only
        // fallible path in canonical_bytes is float normalization, and
        // envelope fields are never floats.
        canonical::canonical_bytes(&value).expect("envelope fields always canonicalize")
    }
}

/// `user`-space paths are namespaced under the owner's public key so
/// ownership can be checked without consulting existing state:
/// `{base64(pub_key)}/{rest}`.
pub fn user_space_path(pub_key: &[u8; 32], rest: &str) -> String {
    format!("{}/{}", kv_core::Digest::of(pub_key).to_b64(), rest)
}

fn verify_user_ownership(envelope: &Envelope) -> Result<()> {
    let owner_prefix = format!("{}/", kv_core::Digest::of(&envelope.pub_key).to_b64());
    if envelope.path.starts_with(&owner_prefix) {
        Ok(())
    } else {
        Err(Error::Forged)
    }
}

/// Decide whether `candidate` should replace `existing` under the
/// admission rule for its space. Returns `Ok(true)` if the candidate wins
/// and the caller should apply it, `Ok(false)` if it's a no-op (e.g. an
/// older duplicate in `all`/`user` space — not an error, just stale),
/// and `Err` for an outright rejection (bad signature, immutable-space
/// conflict, or a claim past the replay barrier).
pub fn merge(existing: Option<&Envelope>, candidate: &Envelope, now_ms: u64) -> Result<bool> {
    candidate.verify()?;

    match candidate.space {
        Space::Frozen => {
            if existing.is_some() {
                return Err(Error::Immutable(candidate.path.clone()));
            }
            if now_ms.saturating_sub(candidate.timestamp) > MAX_CLAIM_AGE_MS {
                return Err(Error::Replay);
            }
            Ok(true)
        }
        Space::User => {
            verify_user_ownership(candidate)?;
            Ok(wins_by_lww(existing, candidate))
        }
        Space::All => Ok(wins_by_lww(existing, candidate)),
    }
}

fn wins_by_lww(existing: Option<&Envelope>, candidate: &Envelope) -> bool {
    match existing {
        None => true,
        Some(e) => match candidate.timestamp.cmp(&e.timestamp) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            // Deterministic tie-break so every peer converges on the same
            // winner even if two signers wrote at the exact same millisecond.
            std::cmp::Ordering::Equal => candidate.signature > e.signature,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_roundtrip_preserves_every_field() {
        let id = Identity::generate("alice");
        let env = Envelope::sign(&id, Space::All, "notes/1", Some("v:1".into()), 42);
        let decoded = Envelope::from_value(&env.to_value()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn value_roundtrip_preserves_tombstone() {
        let id = Identity::generate("alice");
        let env = Envelope::sign(&id, Space::All, "notes/1", None, 42);
        let decoded = Envelope::from_value(&env.to_value()).unwrap();
        assert_eq!(decoded.value_ref, None);
    }

    fn signed(identity: &Identity, space: Space, path: &str, ts: u64) -> Envelope {
        Envelope::sign(identity, space, path, Some("v:x".into()), ts)
    }

    #[test]
    fn verify_accepts_own_signature() {
        let id = Identity::generate("alice");
        let env = signed(&id, Space::All, "notes/1", 100);
        assert!(env.verify().is_ok());
    }

    #[test]
    fn verify_rejects_tampered_path() {
        let id = Identity::generate("alice");
        let mut env = signed(&id, Space::All, "notes/1", 100);
        env.path = "notes/2".into();
        assert!(env.verify().is_err());
    }

    #[test]
    fn all_space_merge_is_last_write_wins() {
        let id = Identity::generate("alice");
        let old = signed(&id, Space::All, "k", 100);
        let new = signed(&id, Space::All, "k", 200);
        assert_eq!(merge(Some(&old), &new, 1_000_000).unwrap(), true);
        assert_eq!(merge(Some(&new), &old, 1_000_000).unwrap(), false);
    }

    #[test]
    fn frozen_space_rejects_second_write() {
        let id = Identity::generate("alice");
        let first = signed(&id, Space::Frozen, "handles/alice#1234", 100);
        let second = signed(&id, Space::Frozen, "handles/alice#1234", 200);
        assert!(matches!(
            merge(Some(&first), &second, 300),
            Err(Error::Immutable(_))
        ));
    }

    #[test]
    fn frozen_space_accepts_first_write_within_replay_window() {
        let id = Identity::generate("alice");
        let env = signed(&id, Space::Frozen, "handles/alice#1234", 1000);
        assert_eq!(merge(None, &env, 1000 + MAX_CLAIM_AGE_MS - 1).unwrap(), true);
    }

    #[test]
    fn frozen_space_rejects_stale_claim_past_replay_barrier() {
        let id = Identity::generate("alice");
        let env = signed(&id, Space::Frozen, "handles/alice#1234", 1000);
        assert!(matches!(
            merge(None, &env, 1000 + MAX_CLAIM_AGE_MS + 1),
            Err(Error::Replay)
        ));
    }

    #[test]
    fn user_space_rejects_writes_outside_owner_prefix() {
        let id = Identity::generate("alice");
        let other = Identity::generate("mallory");
        let forged_path = user_space_path(&other.public_key_bytes(), "secret");
        let env = signed(&id, Space::User, &forged_path, 100);
        assert!(matches!(merge(None, &env, 100), Err(Error::Forged)));
    }

    #[test]
    fn user_space_accepts_owner_writes() {
        let id = Identity::generate("alice");
        let path = user_space_path(&id.public_key_bytes(), "secret");
        let env = signed(&id, Space::User, &path, 100);
        assert_eq!(merge(None, &env, 100).unwrap(), true);
    }
}
