//! The coordinator: the public API surface a client embeds.
//!
//! One [`Coordinator`] owns the three data-space tries (`all`, `frozen`,
//! `user`), the shared value store, the event dispatcher, and whatever
//! peer connections are currently open. Every write and read that touches
//! the trie or the roots goes through a single `tokio::sync::Mutex<State>`:
//! a coordinator serializes its own mutations rather than trying to make
//! the trie itself concurrent.

use crate::error::{Error, Result};
use crate::head_writer::HeadWriter;
use kv_core::codec::{self, Value};
use kv_core::Digest;
use kv_envelope::{resolve_winner, user_space_path, Envelope, Space, UsernameClaim};
use kv_events::{Dispatcher, Event, Pattern};
use kv_identity::Identity;
use kv_net::TcpTransport;
use kv_store::{StorageAdapter, ValueStore};
use kv_sync::{SyncSession, SyncSpace};
use kv_trie::TrieEngine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{info, warn};

const DEFAULT_GET_TIMEOUT: Duration = Duration::from_secs(2);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as u64
}

/// Options governing a [`Coordinator::put`] call.
#[derive(Clone, Copy, Debug)]
pub struct PutOptions {
    /// Which data space to write into
    pub space: Space,
    /// If set, broadcast the write but never persist it to the trie —
    /// for ephemeral, high-frequency writes nobody needs to replay later
    pub volatile: bool,
    /// If set, skip the local event dispatch this write would otherwise
    /// trigger (it is still synced/broadcast like any other write)
    pub silent: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            space: Space::All,
            volatile: false,
            silent: false,
        }
    }
}

/// Options governing a [`Coordinator::get`] call.
#[derive(Clone, Copy, Debug)]
pub struct GetOptions {
    /// Which data space to read from
    pub space: Space,
    /// If the path isn't found locally, wait (up to `timeout`) for a
    /// matching write to arrive before giving up
    pub wait_for_sync: bool,
    /// How long to wait when `wait_for_sync` is set
    pub timeout: Duration,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            space: Space::All,
            wait_for_sync: false,
            timeout: DEFAULT_GET_TIMEOUT,
        }
    }
}

/// Result of [`Coordinator::signup`].
#[derive(Clone, Debug)]
pub struct SignupResult {
    /// The new account's raw public key
    pub public_key: [u8; 32],
    /// The new account's display handle (`name#suffix`)
    pub handle: String,
}

/// Result of [`Coordinator::signup_with_suffix`].
#[derive(Clone, Debug)]
pub struct SignupWithSuffixResult {
    /// The new account's raw public key
    pub public_key: [u8; 32],
    /// The new account's display handle, ending in the requested suffix
    pub handle: String,
    /// How many keypairs were generated before one matched
    pub attempts: usize,
}

/// Snapshot of the coordinator's current connectivity, for diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct CoordinatorStats {
    /// Number of peers with an open sync connection
    pub connected_peers: usize,
    /// Number of registered event subscriptions
    pub subscriptions: usize,
}

#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    display_name: String,
    /// Hex-encoded password-wrapped blob (`kv_identity::password::wrap` output)
    wrapped: String,
}

struct State {
    identity: Option<Identity>,
    all_root: Option<Digest>,
    frozen_root: Option<Digest>,
    user_root: Option<Digest>,
    closed: bool,
}

impl State {
    fn root(&self, space: Space) -> Option<Digest> {
        match space {
            Space::All => self.all_root,
            Space::Frozen => self.frozen_root,
            Space::User => self.user_root,
        }
    }

    fn root_mut(&mut self, space: Space) -> &mut Option<Digest> {
        match space {
            Space::All => &mut self.all_root,
            Space::Frozen => &mut self.frozen_root,
            Space::User => &mut self.user_root,
        }
    }
}

/// The coordinator public API: identity lifecycle, reads/writes across the
/// three data spaces, username claims, and peer sync.
pub struct Coordinator {
    adapter: Arc<dyn StorageAdapter>,
    trie: Arc<TrieEngine>,
    values: Arc<ValueStore>,
    dispatcher: Arc<Dispatcher>,
    head_writer: Arc<HeadWriter>,
    state: AsyncMutex<State>,
    connections: AsyncMutex<HashMap<[u8; 32], SyncSession<TcpTransport>>>,
}

impl Coordinator {
    /// Open a coordinator over `adapter`, restoring whatever roots were
    /// last flushed by [`HeadWriter`].
    pub fn open(adapter: Arc<dyn StorageAdapter>) -> Result<Self> {
        let trie = Arc::new(TrieEngine::new(adapter.clone()));
        let values = Arc::new(ValueStore::new(adapter.clone()));
        let dispatcher = Dispatcher::new();
        let head_writer = HeadWriter::spawn(adapter.clone());
        let all_root = HeadWriter::load(adapter.as_ref(), "all")?;
        let frozen_root = HeadWriter::load(adapter.as_ref(), "frozen")?;
        let user_root = HeadWriter::load(adapter.as_ref(), "user")?;
        Ok(Self {
            adapter,
            trie,
            values,
            dispatcher,
            head_writer,
            state: AsyncMutex::new(State {
                identity: None,
                all_root,
                frozen_root,
                user_root,
                closed: false,
            }),
            connections: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Flush pending head writes and release the underlying storage.
    /// Subsequent calls return `Error::Closed`.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.closed = true;
        self.head_writer.close()?;
        self.values.close()?;
        Ok(())
    }

    fn ensure_open(&self, state: &State) -> Result<()> {
        if state.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    async fn require_identity(&self, state: &State) -> Result<Identity> {
        state.identity.clone().ok_or(Error::NotAuthenticated)
    }

    fn resolve_path(identity: &Identity, space: Space, key: &str) -> String {
        match space {
            Space::User => user_space_path(&identity.public_key_bytes(), key),
            Space::All | Space::Frozen => key.to_string(),
        }
    }

    /// Store an application value, sealing it first if it belongs to
    /// `user` space. `all`/`frozen` values are handed to the value store
    /// as-is; only `user`-space values need the raw-bytes detour through
    /// `Value::Bytes` that sealing requires.
    fn store_app_value(&self, identity: &Identity, space: Space, value: &Value) -> Result<String> {
        if space == Space::User {
            let sealed = identity.seal(&codec::encode(value));
            Ok(self.values.put(&Value::Bytes(sealed))?)
        } else {
            Ok(self.values.put(value)?)
        }
    }

    /// Load an application value back, unsealing it first if it belongs
    /// to `user` space.
    fn load_app_value(&self, identity: Option<&Identity>, space: Space, value_ref: &str) -> Result<Value> {
        let stored = self
            .values
            .get(value_ref)?
            .ok_or_else(|| Error::InvalidEncoding(format!("missing value {value_ref}")))?;
        if space != Space::User {
            return Ok(stored);
        }
        let Value::Bytes(sealed) = stored else {
            return Err(Error::InvalidEncoding("sealed value not stored as bytes".into()));
        };
        let identity = identity.ok_or(Error::NotAuthenticated)?;
        let plaintext = identity.unseal(&sealed).map_err(Error::from)?;
        Ok(codec::decode(&plaintext)?)
    }

    // ---- identity lifecycle ----------------------------------------

    fn load_identity_record(&self) -> Result<Option<IdentityRecord>> {
        match self.adapter.get("_identity")? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn persist_identity(&self, identity: &Identity, password: &str) -> Result<()> {
        let blob = kv_identity::password::wrap(password, &identity.secret_bytes(), &identity.data_key_bytes())
            .map_err(Error::from)?;
        let record = IdentityRecord {
            display_name: identity.display_name().to_string(),
            wrapped: hex::encode(blob),
        };
        self.adapter.force_put("_identity", &serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Create a brand-new account, claim its deterministic handle, and log
    /// in as it.
    pub async fn signup(&self, display_name: impl Into<String>, password: &str) -> Result<SignupResult> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        let identity = Identity::generate(display_name);
        self.persist_identity(&identity, password)?;
        let handle = identity.handle();
        self.file_handle_claim(&mut state, &identity, &handle)?;
        let public_key = identity.public_key_bytes();
        state.identity = Some(identity);
        Ok(SignupResult { public_key, handle })
    }

    /// Like [`Coordinator::signup`], but keeps generating keypairs until
    /// one's handle ends in `target_suffix`, reporting how many attempts
    /// it took.
    pub async fn signup_with_suffix(
        &self,
        display_name: impl Into<String>,
        password: &str,
        target_suffix: &str,
        max_attempts: usize,
    ) -> Result<SignupWithSuffixResult> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        let (identity, attempts) = Identity::generate_with_suffix(display_name, target_suffix, max_attempts)
            .map_err(Error::from)?;
        self.persist_identity(&identity, password)?;
        let handle = identity.handle();
        self.file_handle_claim(&mut state, &identity, &handle)?;
        let public_key = identity.public_key_bytes();
        state.identity = Some(identity);
        Ok(SignupWithSuffixResult {
            public_key,
            handle,
            attempts,
        })
    }

    fn file_handle_claim(&self, state: &mut State, identity: &Identity, handle: &str) -> Result<()> {
        let path = format!("handles/{handle}");
        let app_value = Value::Bytes(identity.public_key_bytes().to_vec());
        // Silent: signup's own handle claim has no local subscriber yet to
        // notify, and there's nobody else to tell before the account
        // exists for other peers to see.
        self.apply_local_write(state, identity, Space::Frozen, &path, Some(app_value), true)?;
        Ok(())
    }

    /// Unlock a previously created account with its password.
    pub async fn login(&self, password: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        let record = self.load_identity_record()?.ok_or(Error::NotAuthenticated)?;
        let blob = hex::decode(&record.wrapped).map_err(|e| Error::IdentityIntegrity(e.to_string()))?;
        let secrets = kv_identity::password::unwrap(password, &blob).map_err(Error::from)?;
        let identity = Identity::from_bytes(record.display_name, &secrets.signing_key_seed, secrets.data_key);
        state.identity = Some(identity);
        Ok(())
    }

    /// Forget the currently logged-in identity. Subsequent calls that
    /// require authentication fail until [`Coordinator::login`] again.
    pub async fn logout(&self) {
        self.state.lock().await.identity = None;
    }

    /// Whether an identity is currently logged in.
    pub async fn is_logged_in(&self) -> bool {
        self.state.lock().await.identity.is_some()
    }

    /// Re-wrap the logged-in identity's secrets under a new password,
    /// after confirming `old_password` still unlocks the current blob.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let state = self.state.lock().await;
        self.ensure_open(&state)?;
        let identity = self.require_identity(&state).await?;
        let record = self.load_identity_record()?.ok_or(Error::NotAuthenticated)?;
        let blob = hex::decode(&record.wrapped).map_err(|e| Error::IdentityIntegrity(e.to_string()))?;
        kv_identity::password::unwrap(old_password, &blob).map_err(Error::from)?;
        self.persist_identity(&identity, new_password)?;
        Ok(())
    }

    /// Export the logged-in identity as a portable, password-protected
    /// backup string.
    pub async fn export_identity(&self, password: &str) -> Result<String> {
        use base64::Engine;
        let state = self.state.lock().await;
        let identity = self.require_identity(&state).await?;
        let blob = kv_identity::password::wrap(password, &identity.secret_bytes(), &identity.data_key_bytes())
            .map_err(Error::from)?;
        let record = IdentityRecord {
            display_name: identity.display_name().to_string(),
            wrapped: hex::encode(blob),
        };
        let json = serde_json::to_vec(&record)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    /// Restore an identity from a backup produced by
    /// [`Coordinator::export_identity`], persist it locally, and log in.
    pub async fn import_identity(&self, backup: &str, password: &str) -> Result<()> {
        use base64::Engine;
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        let json = base64::engine::general_purpose::STANDARD
            .decode(backup)
            .map_err(|e| Error::MalformedBackup(e.to_string()))?;
        let record: IdentityRecord =
            serde_json::from_slice(&json).map_err(|e| Error::MalformedBackup(e.to_string()))?;
        let blob = hex::decode(&record.wrapped).map_err(|e| Error::MalformedBackup(e.to_string()))?;
        let secrets = kv_identity::password::unwrap(password, &blob).map_err(Error::from)?;
        let identity = Identity::from_bytes(record.display_name.clone(), &secrets.signing_key_seed, secrets.data_key);
        self.adapter.force_put("_identity", &serde_json::to_vec(&record)?)?;
        state.identity = Some(identity);
        Ok(())
    }

    // ---- reads and writes -------------------------------------------

    fn load_envelope(&self, ref_key: &str) -> Result<Envelope> {
        let value = self
            .values
            .get(ref_key)?
            .ok_or_else(|| Error::InvalidEncoding(format!("missing envelope {ref_key}")))?;
        Ok(Envelope::from_value(&value).map_err(Error::from)?)
    }

    /// Apply a locally-authored write through the normal admission path:
    /// encode (and, for `user` space, seal) the value, sign an envelope,
    /// check it against whatever's already at that path via
    /// [`kv_envelope::merge`], and — if admitted — store it and advance
    /// the space's root. Returns the envelope actually applied so the
    /// caller can broadcast it, or `None` if admission said the write was
    /// a stale no-op.
    fn apply_local_write(
        &self,
        state: &mut State,
        identity: &Identity,
        space: Space,
        path: &str,
        app_value: Option<Value>,
        silent: bool,
    ) -> Result<Option<Envelope>> {
        let value_ref = match &app_value {
            Some(v) => Some(self.store_app_value(identity, space, v)?),
            None => None,
        };
        let envelope = Envelope::sign(identity, space, path, value_ref, now_ms());

        let current_root = state.root(space);
        let existing = match self.trie.get(current_root, path)? {
            Some(r) => Some(self.load_envelope(&r)?),
            None => None,
        };
        let admitted = kv_envelope::merge(existing.as_ref(), &envelope, now_ms()).map_err(Error::from)?;
        if !admitted {
            return Ok(None);
        }

        let envelope_ref = self.values.put(&envelope.to_value())?;
        let new_root = self.trie.put(current_root, path, Some(envelope_ref))?;
        *state.root_mut(space) = new_root;
        self.head_writer.record(space.prefix(), new_root)?;

        if !silent {
            self.dispatcher.dispatch(&Event {
                space,
                path: path.to_string(),
                pub_key: identity.public_key_bytes(),
                value_ref: envelope.value_ref.clone(),
            });
        }
        Ok(Some(envelope))
    }

    /// Write `value` at `key` under `opts.space`.
    pub async fn put(&self, key: &str, value: Option<Value>, opts: PutOptions) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        let identity = self.require_identity(&state).await?;
        let path = Self::resolve_path(&identity, opts.space, key);

        if opts.volatile {
            let value_ref = match &value {
                Some(v) => Some(self.store_app_value(&identity, opts.space, v)?),
                None => None,
            };
            let envelope = Envelope::sign(&identity, opts.space, &path, value_ref.clone(), now_ms());
            if !opts.silent {
                self.dispatcher.dispatch(&Event {
                    space: opts.space,
                    path,
                    pub_key: identity.public_key_bytes(),
                    value_ref,
                });
            }
            drop(state);
            self.broadcast(envelope).await;
            return Ok(());
        }

        let applied = self.apply_local_write(&mut state, &identity, opts.space, &path, value, opts.silent)?;
        drop(state);
        if let Some(envelope) = applied {
            self.broadcast(envelope).await;
        }
        Ok(())
    }

    async fn read_local(&self, space: Space, path: &str) -> Result<Option<Value>> {
        let (root, identity) = {
            let state = self.state.lock().await;
            (state.root(space), state.identity.clone())
        };
        let Some(envelope_ref) = self.trie.get(root, path)? else {
            return Ok(None);
        };
        let envelope = self.load_envelope(&envelope_ref)?;
        let Some(value_ref) = &envelope.value_ref else {
            return Ok(None);
        };
        Ok(Some(self.load_app_value(identity.as_ref(), space, value_ref)?))
    }

    async fn wait_for_event(&self, space: Space, path: &str, viewer: Option<[u8; 32]>, timeout: Duration) {
        let full_path = format!("{}/{}", space.prefix(), path);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let id = self.dispatcher.subscribe(Pattern::Exact(full_path), viewer, move |_event| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        });
        let _ = tokio::time::timeout(timeout, rx).await;
        self.dispatcher.unsubscribe(id);
    }

    /// Read the value at `key` under `opts.space`, optionally waiting for
    /// a sync to deliver it if it isn't present yet.
    pub async fn get(&self, key: &str, opts: GetOptions) -> Result<Option<Value>> {
        let (path, viewer) = {
            let state = self.state.lock().await;
            self.ensure_open(&state)?;
            match opts.space {
                Space::User => {
                    let identity = self.require_identity(&state).await?;
                    (Self::resolve_path(&identity, opts.space, key), Some(identity.public_key_bytes()))
                }
                Space::All | Space::Frozen => (key.to_string(), None),
            }
        };

        if let Some(value) = self.read_local(opts.space, &path).await? {
            return Ok(Some(value));
        }
        if opts.wait_for_sync {
            self.wait_for_event(opts.space, &path, viewer, opts.timeout).await;
            if let Some(value) = self.read_local(opts.space, &path).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    // ---- username claims ---------------------------------------------

    fn load_username_claims(&self, all_root: Option<Digest>, username: &str) -> Result<Vec<UsernameClaim>> {
        let prefix = format!("claims/username/{username}/");
        let entries = self.trie.list_prefix(all_root, &prefix)?;
        let mut claims = Vec::with_capacity(entries.len());
        for (_, envelope_ref) in entries {
            let envelope = self.load_envelope(&envelope_ref)?;
            let Some(value_ref) = &envelope.value_ref else { continue };
            let value = self
                .values
                .get(value_ref)?
                .ok_or_else(|| Error::InvalidEncoding("missing claim value".into()))?;
            claims.push(UsernameClaim::from_value(&value).map_err(Error::from)?);
        }
        Ok(claims)
    }

    /// File a claim on `username`. Succeeds even if the claim doesn't win
    /// (another, earlier claim stays in force); returns
    /// `Error::HandleTaken` in that case so the caller knows not to treat
    /// the username as theirs.
    pub async fn claim_username(&self, username: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        let identity = self.require_identity(&state).await?;
        let claim = UsernameClaim::sign(&identity, username, now_ms());
        let path = claim.storage_path();
        let applied = self.apply_local_write(&mut state, &identity, Space::All, &path, Some(claim.to_value()), false)?;
        let all_root = state.all_root;
        drop(state);
        if let Some(envelope) = applied {
            self.broadcast(envelope).await;
        }

        let claims = self.load_username_claims(all_root, username)?;
        match resolve_winner(&claims) {
            Some(winner) if winner.pub_key == identity.public_key_bytes() => Ok(()),
            Some(_) => Err(Error::HandleTaken(username.to_string())),
            None => Ok(()),
        }
    }

    /// Resolve `username` to its current owner's public key, if claimed.
    pub async fn whois(&self, username: &str) -> Result<Option<[u8; 32]>> {
        let all_root = {
            let state = self.state.lock().await;
            self.ensure_open(&state)?;
            state.all_root
        };
        let claims = self.load_username_claims(all_root, username)?;
        Ok(resolve_winner(&claims).map(|c| c.pub_key))
    }

    /// Revoke the logged-in identity's own claim on `username`.
    pub async fn revoke_username(&self, username: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        let identity = self.require_identity(&state).await?;
        let own_path = format!("claims/username/{username}/{}", Digest::of(&identity.public_key_bytes()).to_b64());
        let existing_ref = self
            .trie
            .get(state.all_root, &own_path)?
            .ok_or_else(|| Error::InvalidArgument(format!("no claim filed for {username}")))?;
        let existing_envelope = self.load_envelope(&existing_ref)?;
        let existing_value_ref = existing_envelope
            .value_ref
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument(format!("claim for {username} already revoked")))?;
        let existing_claim_value = self
            .values
            .get(existing_value_ref)?
            .ok_or_else(|| Error::InvalidEncoding("missing claim value".into()))?;
        let existing_claim = UsernameClaim::from_value(&existing_claim_value).map_err(Error::from)?;
        let revoked = existing_claim.revoke(&identity);

        let applied =
            self.apply_local_write(&mut state, &identity, Space::All, &own_path, Some(revoked.to_value()), false)?;
        drop(state);
        if let Some(envelope) = applied {
            self.broadcast(envelope).await;
        }
        Ok(())
    }

    // ---- peer sync -----------------------------------------------------

    async fn broadcast(&self, envelope: Envelope) {
        let mut connections = self.connections.lock().await;
        for (peer, session) in connections.iter_mut() {
            if let Err(e) = session.push_envelope(envelope.clone()).await {
                warn!(peer = %hex::encode(peer), error = %e, "push_envelope to connected peer failed");
            }
        }
    }

    /// Admit a remotely pushed envelope, absorbing admission failures
    /// rather than propagating them: a rejected or stale push
    /// is logged and dropped, never surfaced to whoever is driving sync.
    async fn admit_remote_envelope(&self, envelope: Envelope) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let space = envelope.space;
        let path = envelope.path.clone();
        let current_root = state.root(space);

        let existing = match self.trie.get(current_root, &path) {
            Ok(Some(r)) => match self.load_envelope(&r) {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!(error = %e, "failed to load existing envelope, dropping pushed write");
                    return;
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "trie lookup failed, dropping pushed write");
                return;
            }
        };

        match kv_envelope::merge(existing.as_ref(), &envelope, now_ms()) {
            Ok(true) => {
                let envelope_ref = match self.values.put(&envelope.to_value()) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "failed to store pushed envelope");
                        return;
                    }
                };
                let new_root = match self.trie.put(current_root, &path, Some(envelope_ref)) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "failed to advance trie root for pushed write");
                        return;
                    }
                };
                *state.root_mut(space) = new_root;
                if let Err(e) = self.head_writer.record(space.prefix(), new_root) {
                    warn!(error = %e, "head persistence failed for pushed write");
                }
                let event = Event {
                    space,
                    path,
                    pub_key: envelope.pub_key,
                    value_ref: envelope.value_ref.clone(),
                };
                drop(state);
                self.dispatcher.dispatch(&event);
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "pushed envelope rejected by admission rule"),
        }
    }

    async fn sync_one(&self, session: &mut SyncSession<TcpTransport>) -> Result<()> {
        let (our_pub_key, our_all, our_frozen) = {
            let state = self.state.lock().await;
            (
                state.identity.as_ref().map(|i| i.public_key_bytes()).unwrap_or([0u8; 32]),
                state.all_root,
                state.frozen_root,
            )
        };
        let (_, remote_all, remote_frozen) = session.handshake(our_pub_key, our_all, our_frozen).await?;

        for (space, sync_space, remote_root) in [
            (Space::All, SyncSpace::All, remote_all),
            (Space::Frozen, SyncSpace::Frozen, remote_frozen),
        ] {
            let local_root = { self.state.lock().await.root(space) };
            match session.pull_space(sync_space, local_root, remote_root, now_ms()).await {
                Ok(new_root) => {
                    let mut state = self.state.lock().await;
                    *state.root_mut(space) = new_root;
                    self.head_writer.record(space.prefix(), new_root)?;
                }
                Err(kv_sync::Error::Envelope(e)) => {
                    warn!(error = %e, space = space.prefix(), "sync admission rejected an entry, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Open an outbound sync connection to `addr`, exchange handshakes,
    /// and keep the session around for future [`Coordinator::sync`] calls.
    /// Returns the peer's public key.
    pub async fn connect(&self, addr: SocketAddr) -> Result<[u8; 32]> {
        let stream = TcpStream::connect(addr).await?;
        let transport = TcpTransport::new(stream);
        let mut session = SyncSession::new(transport, self.trie.clone(), self.values.clone());
        let (our_pub_key, our_all, our_frozen) = {
            let state = self.state.lock().await;
            (
                state.identity.as_ref().map(|i| i.public_key_bytes()).unwrap_or([0u8; 32]),
                state.all_root,
                state.frozen_root,
            )
        };
        let (peer_key, _, _) = session.handshake(our_pub_key, our_all, our_frozen).await?;
        self.connections.lock().await.insert(peer_key, session);
        Ok(peer_key)
    }

    /// Pull and admit whatever's new from one already-connected peer.
    pub async fn sync(&self, peer: [u8; 32]) -> Result<()> {
        let mut connections = self.connections.lock().await;
        let session = connections
            .get_mut(&peer)
            .ok_or_else(|| Error::InvalidArgument("not connected to that peer".into()))?;
        self.sync_one(session).await
    }

    /// Sync with every currently connected peer, logging (rather than
    /// failing on) any single peer's sync error.
    pub async fn sync_all(&self) -> Result<()> {
        let peers: Vec<[u8; 32]> = self.connections.lock().await.keys().copied().collect();
        for peer in peers {
            if let Err(e) = self.sync(peer).await {
                warn!(peer = %hex::encode(peer), error = %e, "sync with peer failed");
            }
        }
        Ok(())
    }

    /// Serve one inbound connection: mirror `all`/`frozen` sync, then keep
    /// admitting directly pushed (`user`-space) envelopes until the peer
    /// disconnects.
    async fn handle_incoming(&self, stream: TcpStream) -> Result<()> {
        let transport = TcpTransport::new(stream);
        let mut session = SyncSession::new(transport, self.trie.clone(), self.values.clone());
        let (our_pub_key, our_all, our_frozen) = {
            let state = self.state.lock().await;
            (
                state.identity.as_ref().map(|i| i.public_key_bytes()).unwrap_or([0u8; 32]),
                state.all_root,
                state.frozen_root,
            )
        };
        session.handshake(our_pub_key, our_all, our_frozen).await?;

        for sync_space in [SyncSpace::All, SyncSpace::Frozen] {
            match session.serve_space(sync_space).await {
                Ok(()) => {}
                Err(kv_sync::Error::Disconnected) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }

        let mut pushed = Vec::new();
        session.serve_pushes(|envelope| pushed.push(envelope)).await?;
        for envelope in pushed {
            self.admit_remote_envelope(envelope).await;
        }
        Ok(())
    }

    /// Register `callback` on every future event matching `pattern`, as
    /// the currently logged-in identity's viewer (or no viewer, if logged
    /// out — `user`-space events then never reach it).
    pub async fn subscribe(&self, pattern: Pattern, callback: impl Fn(&Event) + Send + Sync + 'static) -> u64 {
        let viewer = self.state.lock().await.identity.as_ref().map(|i| i.public_key_bytes());
        self.dispatcher.subscribe(pattern, viewer, callback)
    }

    /// Cancel a subscription by id.
    pub fn unsubscribe(&self, id: u64) {
        self.dispatcher.unsubscribe(id);
    }

    /// Current connectivity and subscription counts.
    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            connected_peers: self.connections.lock().await.len(),
            subscriptions: self.dispatcher.len(),
        }
    }

    /// Accept and serve inbound sync connections on `listen` until
    /// `shutdown` fires.
    pub async fn run(self: &Arc<Self>, listen: SocketAddr, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(listen).await?;
        info!(addr = %listen, "kv-node listening for sync connections");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_incoming(stream).await {
                            warn!(peer = %peer_addr, error = %e, "inbound sync session failed");
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!("shutting down sync listener");
                    return Ok(());
                }
            }
        }
    }
}
