//! Tagged wire messages for the sync protocol
//!
//! Messages are encoded with the shared [`kv_core::codec`] (not the
//! canonical form — these never get signed as a whole, only the
//! [`kv_envelope::Envelope`] carried inside `PushEnvelope` is). Each
//! variant round-trips through a tagged `Value::Map` with a `"type"`
//! discriminant, the same shape the envelope and claim types use for
//! their own signing payloads.

use crate::error::{Error, Result};
use kv_core::codec::{self, Value};
use kv_core::Digest;
use kv_envelope::{Envelope, Space};

/// Which public space a sync exchange concerns. `user` space is never
/// broadcast to other accounts; it only ever moves between a single
/// account's own devices via direct [`Message::PushEnvelope`] delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncSpace {
    /// The `all` space
    All,
    /// The `frozen` space
    Frozen,
}

impl SyncSpace {
    fn as_str(self) -> &'static str {
        match self {
            SyncSpace::All => "all",
            SyncSpace::Frozen => "frozen",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(SyncSpace::All),
            "frozen" => Ok(SyncSpace::Frozen),
            other => Err(Error::MalformedMessage(format!("unknown space {other}"))),
        }
    }
}

/// A sync protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Opening exchange: announce identity and current roots for each
    /// publicly-synced space.
    Handshake {
        /// Sender's public key
        pub_key: [u8; 32],
        /// Current root digest of the sender's `all` space, if non-empty
        all_root: Option<Digest>,
        /// Current root digest of the sender's `frozen` space, if non-empty
        frozen_root: Option<Digest>,
    },
    /// Ask the peer to begin a pull exchange for one space.
    RequestSync {
        /// The space to sync
        space: SyncSpace,
    },
    /// Ask for one trie node's encoded bytes by digest.
    RequestNode {
        /// The node's digest
        digest: Digest,
    },
    /// Answer to [`Message::RequestNode`]; `node` is `None` if the peer has
    /// no node at that digest (shouldn't happen for an honest peer, but the
    /// protocol tolerates it as a dangling-reference signal).
    ResponseNode {
        /// The digest that was requested
        digest: Digest,
        /// The node's encoded bytes
        node: Option<Vec<u8>>,
    },
    /// Ask for one value blob by its content-addressed ref-key.
    RequestValue {
        /// The value store ref-key
        ref_key: String,
    },
    /// Answer to [`Message::RequestValue`].
    ResponseValue {
        /// The ref-key that was requested
        ref_key: String,
        /// The value's encoded bytes
        value: Option<Vec<u8>>,
    },
    /// Deliver a signed write, either as part of reconciliation or a
    /// push-on-write broadcast.
    PushEnvelope {
        /// The envelope being delivered
        envelope: Envelope,
    },
    /// Signal that a pull exchange for one space has finished.
    SyncComplete {
        /// The space that finished syncing
        space: SyncSpace,
    },
    /// Register interest in a pattern on the peer's event stream.
    Subscribe {
        /// Caller-assigned subscription id, echoed back on matching events
        id: u64,
        /// The pattern text
        pattern: String,
    },
    /// Cancel a previously registered subscription.
    Unsubscribe {
        /// The subscription id to cancel
        id: u64,
    },
    /// A subscribed-to event, pushed by the peer.
    Event {
        /// Which subscription this event matched
        subscription_id: u64,
        /// Full storage path of the write
        path: String,
        /// The writer's public key
        pub_key: [u8; 32],
        /// The new value ref, or `None` for a delete
        value_ref: Option<String>,
    },
    /// A generic request/response pair, for protocol extensions that don't
    /// need a dedicated variant.
    Request {
        /// Caller-assigned request id
        id: u64,
        /// Opaque request body
        body: Vec<u8>,
    },
    /// Answer to [`Message::Request`].
    Response {
        /// The request id this answers
        id: u64,
        /// Opaque response body
        body: Vec<u8>,
    },
}

fn digest_opt_to_value(d: Option<Digest>) -> Value {
    match d {
        Some(d) => Value::Bytes(d.0.to_vec()),
        None => Value::Null,
    }
}

fn value_to_digest_opt(v: &Value) -> Result<Option<Digest>> {
    match v {
        Value::Null => Ok(None),
        Value::Bytes(b) if b.len() == 32 => {
            let mut buf = [0u8; 32];
            buf.copy_from_slice(b);
            Ok(Some(Digest(buf)))
        }
        _ => Err(Error::MalformedMessage("expected 32-byte digest".into())),
    }
}

fn field<'a>(entries: &'a [(String, Value)], name: &str) -> Result<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v)
        .ok_or_else(|| Error::MalformedMessage(format!("missing field {name}")))
}

fn as_str(v: &Value) -> Result<&str> {
    match v {
        Value::Str(s) => Ok(s),
        _ => Err(Error::MalformedMessage("expected string".into())),
    }
}

fn as_bytes32(v: &Value) -> Result<[u8; 32]> {
    match v {
        Value::Bytes(b) if b.len() == 32 => {
            let mut buf = [0u8; 32];
            buf.copy_from_slice(b);
            Ok(buf)
        }
        _ => Err(Error::MalformedMessage("expected 32-byte key".into())),
    }
}

fn as_bytes64(v: &Value) -> Result<[u8; 64]> {
    match v {
        Value::Bytes(b) if b.len() == 64 => {
            let mut buf = [0u8; 64];
            buf.copy_from_slice(b);
            Ok(buf)
        }
        _ => Err(Error::MalformedMessage("expected 64-byte signature".into())),
    }
}

fn as_u64(v: &Value) -> Result<u64> {
    match v {
        Value::Int(n) if *n >= 0 => Ok(*n as u64),
        _ => Err(Error::MalformedMessage("expected non-negative integer".into())),
    }
}

fn as_bytes(v: &Value) -> Result<Vec<u8>> {
    match v {
        Value::Bytes(b) => Ok(b.clone()),
        _ => Err(Error::MalformedMessage("expected bytes".into())),
    }
}

fn opt_str(v: &Value) -> Result<Option<String>> {
    match v {
        Value::Null => Ok(None),
        Value::Str(s) => Ok(Some(s.clone())),
        _ => Err(Error::MalformedMessage("expected string or null".into())),
    }
}

fn opt_bytes(v: &Value) -> Result<Option<Vec<u8>>> {
    match v {
        Value::Null => Ok(None),
        Value::Bytes(b) => Ok(Some(b.clone())),
        _ => Err(Error::MalformedMessage("expected bytes or null".into())),
    }
}

impl Message {
    /// Encode this message to its wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        codec::encode(&self.to_value())
    }

    /// Decode a message from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value = codec::decode(bytes)?;
        Self::from_value(&value)
    }

    fn to_value(&self) -> Value {
        let (ty, mut fields): (&str, Vec<(String, Value)>) = match self {
            Message::Handshake {
                pub_key,
                all_root,
                frozen_root,
            } => (
                "handshake",
                vec![
                    ("pub_key".into(), Value::Bytes(pub_key.to_vec())),
                    ("all_root".into(), digest_opt_to_value(*all_root)),
                    ("frozen_root".into(), digest_opt_to_value(*frozen_root)),
                ],
            ),
            Message::RequestSync { space } => (
                "request_sync",
                vec![("space".into(), Value::Str(space.as_str().into()))],
            ),
            Message::RequestNode { digest } => (
                "request_node",
                vec![("digest".into(), Value::Bytes(digest.0.to_vec()))],
            ),
            Message::ResponseNode { digest, node } => (
                "response_node",
                vec![
                    ("digest".into(), Value::Bytes(digest.0.to_vec())),
                    (
                        "node".into(),
                        match node {
                            Some(b) => Value::Bytes(b.clone()),
                            None => Value::Null,
                        },
                    ),
                ],
            ),
            Message::RequestValue { ref_key } => (
                "request_value",
                vec![("ref_key".into(), Value::Str(ref_key.clone()))],
            ),
            Message::ResponseValue { ref_key, value } => (
                "response_value",
                vec![
                    ("ref_key".into(), Value::Str(ref_key.clone())),
                    (
                        "value".into(),
                        match value {
                            Some(b) => Value::Bytes(b.clone()),
                            None => Value::Null,
                        },
                    ),
                ],
            ),
            Message::PushEnvelope { envelope } => (
                "push_envelope",
                vec![("envelope".into(), envelope.to_value())],
            ),
            Message::SyncComplete { space } => (
                "sync_complete",
                vec![("space".into(), Value::Str(space.as_str().into()))],
            ),
            Message::Subscribe { id, pattern } => (
                "subscribe",
                vec![
                    ("id".into(), Value::Int(*id as i64)),
                    ("pattern".into(), Value::Str(pattern.clone())),
                ],
            ),
            Message::Unsubscribe { id } => {
                ("unsubscribe", vec![("id".into(), Value::Int(*id as i64))])
            }
            Message::Event {
                subscription_id,
                path,
                pub_key,
                value_ref,
            } => (
                "event",
                vec![
                    ("subscription_id".into(), Value::Int(*subscription_id as i64)),
                    ("path".into(), Value::Str(path.clone())),
                    ("pub_key".into(), Value::Bytes(pub_key.to_vec())),
                    (
                        "value_ref".into(),
                        match value_ref {
                            Some(v) => Value::Str(v.clone()),
                            None => Value::Null,
                        },
                    ),
                ],
            ),
            Message::Request { id, body } => (
                "request",
                vec![
                    ("id".into(), Value::Int(*id as i64)),
                    ("body".into(), Value::Bytes(body.clone())),
                ],
            ),
            Message::Response { id, body } => (
                "response",
                vec![
                    ("id".into(), Value::Int(*id as i64)),
                    ("body".into(), Value::Bytes(body.clone())),
                ],
            ),
        };
        let mut entries = vec![("type".to_string(), Value::Str(ty.into()))];
        entries.append(&mut fields);
        Value::Map(entries)
    }

    fn from_value(value: &Value) -> Result<Self> {
        let Value::Map(entries) = value else {
            return Err(Error::MalformedMessage("expected top-level map".into()));
        };
        let ty = as_str(field(entries, "type")?)?;
        Ok(match ty {
            "handshake" => Message::Handshake {
                pub_key: as_bytes32(field(entries, "pub_key")?)?,
                all_root: value_to_digest_opt(field(entries, "all_root")?)?,
                frozen_root: value_to_digest_opt(field(entries, "frozen_root")?)?,
            },
            "request_sync" => Message::RequestSync {
                space: SyncSpace::parse(as_str(field(entries, "space")?)?)?,
            },
            "request_node" => Message::RequestNode {
                digest: value_to_digest_opt(field(entries, "digest")?)?
                    .ok_or_else(|| Error::MalformedMessage("null digest".into()))?,
            },
            "response_node" => Message::ResponseNode {
                digest: value_to_digest_opt(field(entries, "digest")?)?
                    .ok_or_else(|| Error::MalformedMessage("null digest".into()))?,
                node: opt_bytes(field(entries, "node")?)?,
            },
            "request_value" => Message::RequestValue {
                ref_key: as_str(field(entries, "ref_key")?)?.to_string(),
            },
            "response_value" => Message::ResponseValue {
                ref_key: as_str(field(entries, "ref_key")?)?.to_string(),
                value: opt_bytes(field(entries, "value")?)?,
            },
            "push_envelope" => Message::PushEnvelope {
                envelope: Envelope::from_value(field(entries, "envelope")?)
                    .map_err(|e| Error::MalformedMessage(e.to_string()))?,
            },
            "sync_complete" => Message::SyncComplete {
                space: SyncSpace::parse(as_str(field(entries, "space")?)?)?,
            },
            "subscribe" => Message::Subscribe {
                id: as_u64(field(entries, "id")?)?,
                pattern: as_str(field(entries, "pattern")?)?.to_string(),
            },
            "unsubscribe" => Message::Unsubscribe {
                id: as_u64(field(entries, "id")?)?,
            },
            "event" => Message::Event {
                subscription_id: as_u64(field(entries, "subscription_id")?)?,
                path: as_str(field(entries, "path")?)?.to_string(),
                pub_key: as_bytes32(field(entries, "pub_key")?)?,
                value_ref: opt_str(field(entries, "value_ref")?)?,
            },
            "request" => Message::Request {
                id: as_u64(field(entries, "id")?)?,
                body: as_bytes(field(entries, "body")?)?,
            },
            "response" => Message::Response {
                id: as_u64(field(entries, "id")?)?,
                body: as_bytes(field(entries, "body")?)?,
            },
            other => return Err(Error::MalformedMessage(format!("unknown message type {other}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_identity::Identity;

    fn roundtrip(msg: Message) {
        let encoded = msg.encode();
        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn handshake_roundtrips() {
        roundtrip(Message::Handshake {
            pub_key: [1u8; 32],
            all_root: Some(Digest::of(b"root")),
            frozen_root: None,
        });
    }

    #[test]
    fn request_and_response_node_roundtrip() {
        roundtrip(Message::RequestNode {
            digest: Digest::of(b"node"),
        });
        roundtrip(Message::ResponseNode {
            digest: Digest::of(b"node"),
            node: Some(vec![1, 2, 3]),
        });
        roundtrip(Message::ResponseNode {
            digest: Digest::of(b"node"),
            node: None,
        });
    }

    #[test]
    fn push_envelope_roundtrips() {
        let id = Identity::generate("alice");
        let envelope = Envelope::sign(&id, Space::All, "notes/1", Some("v:1".into()), 42);
        roundtrip(Message::PushEnvelope { envelope });
    }

    #[test]
    fn sync_complete_roundtrips_each_space() {
        roundtrip(Message::SyncComplete { space: SyncSpace::All });
        roundtrip(Message::SyncComplete {
            space: SyncSpace::Frozen,
        });
    }

    #[test]
    fn subscribe_and_event_roundtrip() {
        roundtrip(Message::Subscribe {
            id: 7,
            pattern: "all/notes/*".into(),
        });
        roundtrip(Message::Event {
            subscription_id: 7,
            path: "all/notes/1".into(),
            pub_key: [2u8; 32],
            value_ref: Some("v:1".into()),
        });
    }

    #[test]
    fn decoding_unknown_type_fails() {
        let bytes = codec::encode(&Value::Map(vec![(
            "type".into(),
            Value::Str("bogus".into()),
        )]));
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn decoding_missing_field_fails() {
        let bytes = codec::encode(&Value::Map(vec![(
            "type".into(),
            Value::Str("request_node".into()),
        )]));
        assert!(Message::decode(&bytes).is_err());
    }
}
