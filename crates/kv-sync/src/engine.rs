//! Sync session: handshake, recursive pull, and envelope admission
//!
//! A [`SyncSession`] drives one exchange with a connected peer over a
//! [`Transport`]. Pulling a space is two passes: first the trie structure
//! (nodes, fetched breadth-first from the remote root down, skipping any
//! digest already present locally), then — once [`kv_trie::TrieEngine::diff`]
//! says which paths actually changed — the value blobs those paths need.
//! Every trie leaf stores a ref-key to a *signed envelope*, not the
//! application value directly, so pulling a value is itself two levels: the
//! envelope blob, then (if it isn't a tombstone) the application value its
//! own `value_ref` points to. That's what lets [`kv_envelope::merge`]
//! compare the full existing envelope — timestamp, signer, signature —
//! against the candidate without a separate side channel.

use crate::error::{Error, Result};
use crate::message::{Message, SyncSpace};
use kv_core::Digest;
use kv_envelope::Envelope;
use kv_net::Transport;
use kv_store::ValueStore;
use kv_trie::{TrieEngine, TrieNode};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives one sync exchange with a connected peer over `T`.
pub struct SyncSession<T: Transport> {
    transport: T,
    trie: Arc<TrieEngine>,
    values: Arc<ValueStore>,
    request_timeout: Duration,
}

impl<T: Transport> SyncSession<T> {
    /// Build a session with the default per-request timeout.
    pub fn new(transport: T, trie: Arc<TrieEngine>, values: Arc<ValueStore>) -> Self {
        Self::with_timeout(transport, trie, values, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build a session with a custom per-request timeout.
    pub fn with_timeout(
        transport: T,
        trie: Arc<TrieEngine>,
        values: Arc<ValueStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            trie,
            values,
            request_timeout,
        }
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        self.transport.send(message.encode()).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message> {
        let bytes = tokio::time::timeout(self.request_timeout, self.transport.recv())
            .await
            .map_err(|_| Error::Unavailable)??
            .ok_or(Error::Disconnected)?;
        Message::decode(&bytes)
    }

    /// Exchange handshakes, returning the peer's announced identity and
    /// roots.
    pub async fn handshake(
        &mut self,
        pub_key: [u8; 32],
        all_root: Option<Digest>,
        frozen_root: Option<Digest>,
    ) -> Result<([u8; 32], Option<Digest>, Option<Digest>)> {
        self.send(&Message::Handshake {
            pub_key,
            all_root,
            frozen_root,
        })
        .await?;
        match self.recv().await? {
            Message::Handshake {
                pub_key,
                all_root,
                frozen_root,
            } => Ok((pub_key, all_root, frozen_root)),
            other => Err(unexpected("handshake", &other)),
        }
    }

    /// Pull every node and value reachable from `remote_root` that isn't
    /// already present locally, apply each changed path's envelope through
    /// [`kv_envelope::merge`] against `local_root`, and return the
    /// resulting local root.
    pub async fn pull_space(
        &mut self,
        space: SyncSpace,
        local_root: Option<Digest>,
        remote_root: Option<Digest>,
        now_ms: u64,
    ) -> Result<Option<Digest>> {
        self.send(&Message::RequestSync { space }).await?;

        if let Some(root) = remote_root {
            self.pull_nodes(root).await?;
        }

        match self.recv().await? {
            Message::SyncComplete { space: s } if s == space => {}
            other => return Err(unexpected("sync_complete", &other)),
        }

        let diff = self.trie.diff(local_root, remote_root)?;
        let mut root = local_root;
        for entry in diff {
            // `new_value_ref: None` means the remote trie has no envelope at
            // all at this path, not a signed delete (a delete is itself an
            // envelope, with its own `value_ref: None`). There's no
            // signature backing an outright absence, so it's not something
            // to apply — the remote may simply not have learned this path
            // yet.
            let Some(candidate_ref) = entry.new_value_ref else {
                continue;
            };
            let candidate = self.pull_envelope(&candidate_ref).await?;
            let existing = match &entry.old_value_ref {
                Some(old_ref) => Some(self.pull_envelope(old_ref).await?),
                None => None,
            };
            if kv_envelope::merge(existing.as_ref(), &candidate, now_ms)? {
                root = self.trie.put(root, &entry.key, Some(candidate_ref))?;
            }
        }
        Ok(root)
    }

    /// Breadth-first pull of every node in the subtree rooted at `digest`
    /// not already stored locally.
    async fn pull_nodes(&mut self, digest: Digest) -> Result<()> {
        let mut pending = vec![digest];
        while let Some(d) = pending.pop() {
            if self.trie.has_node(d)? {
                continue;
            }
            self.send(&Message::RequestNode { digest: d }).await?;
            let bytes = match self.recv().await? {
                Message::ResponseNode { digest: rd, node } if rd == d => node.ok_or_else(|| {
                    Error::MalformedMessage(format!("peer has no node {}", d.to_b64()))
                })?,
                other => return Err(unexpected("response_node", &other)),
            };
            let node = TrieNode::decode(&bytes)?;
            self.trie.import_node(&bytes)?;
            pending.extend(node.children.iter().map(|(_, child)| *child));
        }
        Ok(())
    }

    /// Fetch (if missing) and decode the envelope at `ref_key`, also
    /// pulling the application value it points to.
    async fn pull_envelope(&mut self, ref_key: &str) -> Result<Envelope> {
        self.pull_value(ref_key).await?;
        let bytes = self
            .values
            .value_bytes(ref_key)?
            .ok_or_else(|| Error::MalformedMessage(format!("missing envelope blob {ref_key}")))?;
        let envelope = Envelope::from_value(&kv_core::codec::decode(&bytes)?)?;
        if let Some(inner_ref) = &envelope.value_ref {
            self.pull_value(inner_ref).await?;
        }
        Ok(envelope)
    }

    /// Fetch one value blob by ref-key if not already stored locally.
    async fn pull_value(&mut self, ref_key: &str) -> Result<()> {
        if self.values.has_value(ref_key)? {
            return Ok(());
        }
        self.send(&Message::RequestValue {
            ref_key: ref_key.to_string(),
        })
        .await?;
        match self.recv().await? {
            Message::ResponseValue { ref_key: rk, value } if rk == ref_key => {
                let bytes = value.ok_or_else(|| {
                    Error::MalformedMessage(format!("peer has no value {ref_key}"))
                })?;
                self.values.import_value(&bytes)?;
                Ok(())
            }
            other => Err(unexpected("response_value", &other)),
        }
    }

    /// Answer the peer's requests until it signals `sync_complete` for
    /// `space`, the mirror side of [`SyncSession::pull_space`]. Serves
    /// `RequestNode`/`RequestValue` out of local storage.
    pub async fn serve_space(&mut self, space: SyncSpace) -> Result<()> {
        loop {
            match self.recv().await? {
                Message::RequestNode { digest } => {
                    let node = self.trie.node_bytes(digest)?;
                    self.send(&Message::ResponseNode { digest, node }).await?;
                }
                Message::RequestValue { ref_key } => {
                    let value = self.values.value_bytes(&ref_key)?;
                    self.send(&Message::ResponseValue { ref_key, value }).await?;
                }
                Message::RequestSync { space: s } if s == space => {
                    self.send(&Message::SyncComplete { space }).await?;
                    return Ok(());
                }
                other => return Err(unexpected("request_node/request_value/request_sync", &other)),
            }
        }
    }

    /// Push one signed write to the peer, used for push-on-write broadcast
    /// and for moving `user`-space writes directly between one account's
    /// own devices.
    pub async fn push_envelope(&mut self, envelope: Envelope) -> Result<()> {
        self.send(&Message::PushEnvelope { envelope }).await
    }

    /// After a sync exchange finishes, keep receiving envelopes pushed
    /// directly rather than pulled — `user`-space writes never flow
    /// through [`SyncSession::pull_space`], only [`Message::PushEnvelope`]
    /// — until the peer disconnects or goes quiet for one request timeout.
    /// Each envelope is handed to `on_envelope` for the caller to verify
    /// and admit.
    pub async fn serve_pushes(&mut self, mut on_envelope: impl FnMut(Envelope)) -> Result<()> {
        loop {
            match self.recv().await {
                Ok(Message::PushEnvelope { envelope }) => on_envelope(envelope),
                Ok(other) => return Err(unexpected("push_envelope", &other)),
                Err(Error::Disconnected) | Err(Error::Unavailable) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume this session, returning the underlying transport.
    pub fn into_transport(self) -> T {
        self.transport
    }
}

fn unexpected(expected: &str, got: &Message) -> Error {
    Error::MalformedMessage(format!("expected {expected}, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_identity::Identity;
    use kv_net::MemoryChannel;
    use kv_store::MemoryAdapter;

    fn session(transport: MemoryChannel) -> SyncSession<MemoryChannel> {
        let trie = Arc::new(TrieEngine::new(Arc::new(MemoryAdapter::new())));
        let values = Arc::new(ValueStore::new(Arc::new(MemoryAdapter::new())));
        SyncSession::new(transport, trie, values)
    }

    fn shared_session(
        transport: MemoryChannel,
        trie: Arc<TrieEngine>,
        values: Arc<ValueStore>,
    ) -> SyncSession<MemoryChannel> {
        SyncSession::new(transport, trie, values)
    }

    #[tokio::test]
    async fn handshake_round_trips_roots() {
        let (a, b) = MemoryChannel::pair();
        let mut sa = session(a);
        let mut sb = session(b);

        let root = Digest::of(b"root");
        let client = tokio::spawn(async move {
            sa.handshake([1u8; 32], Some(root), None).await.unwrap()
        });
        let (peer_key, all_root, frozen_root) = sb.handshake([2u8; 32], None, None).await.unwrap();
        assert_eq!(peer_key, [1u8; 32]);
        assert_eq!(all_root, Some(root));
        assert_eq!(frozen_root, None);

        let (client_peer_key, ..) = client.await.unwrap();
        assert_eq!(client_peer_key, [2u8; 32]);
    }

    #[tokio::test]
    async fn pull_space_replicates_a_single_write() {
        let id = Identity::generate("alice");
        let server_trie = Arc::new(TrieEngine::new(Arc::new(MemoryAdapter::new())));
        let server_values = Arc::new(ValueStore::new(Arc::new(MemoryAdapter::new())));

        let app_value_ref = server_values
            .put(&kv_core::codec::Value::Str("hello".into()))
            .unwrap();
        let envelope = Envelope::sign(
            &id,
            kv_envelope::Space::All,
            "notes/1",
            Some(app_value_ref),
            1_000,
        );
        let envelope_ref = server_values.put(&envelope.to_value()).unwrap();
        let remote_root = server_trie
            .put(None, "notes/1", Some(envelope_ref))
            .unwrap();

        let (client_transport, server_transport) = MemoryChannel::pair();
        let mut client = session(client_transport);
        let mut server = shared_session(server_transport, server_trie, server_values);

        let server_task = tokio::spawn(async move {
            server.serve_space(SyncSpace::All).await.unwrap();
        });

        let new_root = client
            .pull_space(SyncSpace::All, None, remote_root, 2_000)
            .await
            .unwrap();
        server_task.await.unwrap();

        let pulled_envelope_ref = client.trie.get(new_root, "notes/1").unwrap().unwrap();
        let pulled_envelope =
            Envelope::from_value(&kv_core::codec::decode(
                &client.values.value_bytes(&pulled_envelope_ref).unwrap().unwrap(),
            ).unwrap())
            .unwrap();
        assert_eq!(pulled_envelope.pub_key, id.public_key_bytes());
        let pulled_app_value = client
            .values
            .get(pulled_envelope.value_ref.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(pulled_app_value, kv_core::codec::Value::Str("hello".into()));
    }

    #[tokio::test]
    async fn pull_space_on_empty_remote_is_a_no_op() {
        let (client_transport, server_transport) = MemoryChannel::pair();
        let mut client = session(client_transport);
        let mut server = session(server_transport);

        let server_task =
            tokio::spawn(async move { server.serve_space(SyncSpace::All).await.unwrap() });
        let root = client.pull_space(SyncSpace::All, None, None, 0).await.unwrap();
        server_task.await.unwrap();
        assert_eq!(root, None);
    }

    #[tokio::test]
    async fn serve_pushes_delivers_envelopes_until_disconnect() {
        let id = Identity::generate("alice");
        let (client_transport, server_transport) = MemoryChannel::pair();
        let mut client = session(client_transport);
        let mut server = session(server_transport);

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received2 = received.clone();
        let server_task = tokio::spawn(async move {
            server
                .serve_pushes(move |envelope| received2.lock().unwrap().push(envelope))
                .await
                .unwrap();
        });

        let first = Envelope::sign(&id, kv_envelope::Space::User, "u/a", Some("v:1".into()), 1);
        let second = Envelope::sign(&id, kv_envelope::Space::User, "u/b", Some("v:2".into()), 2);
        client.push_envelope(first.clone()).await.unwrap();
        client.push_envelope(second.clone()).await.unwrap();
        drop(client);

        server_task.await.unwrap();
        assert_eq!(received.lock().unwrap().as_slice(), [first, second]);
    }
}
