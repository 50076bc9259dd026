//! Batched head-pointer persistence.
//!
//! The trie root for each space changes on every write, but fsyncing it
//! after every single `put` would make the coordinator's write latency the
//! storage adapter's write latency. Writes are batched: a flush happens
//! immediately once [`FLUSH_BATCH_SIZE`] roots have changed since the last
//! one, or after [`FLUSH_IDLE_DELAY`] of inactivity, whichever comes first.
//! `close()` is the one path that must flush unconditionally — losing the
//! last few writes on an unclean shutdown is an acceptable tradeoff; losing
//! them on a clean `close()` is not.

use kv_core::Digest;
use kv_store::StorageAdapter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const FLUSH_BATCH_SIZE: usize = 5;
const FLUSH_IDLE_DELAY: Duration = Duration::from_millis(50);

fn head_key(space: &str) -> String {
    format!("head:{space}")
}

/// Coalesces root-digest updates for `all`/`frozen`/`user` into batched
/// writes against a [`StorageAdapter`].
pub struct HeadWriter {
    adapter: Arc<dyn StorageAdapter>,
    pending: Mutex<HashMap<&'static str, Option<Digest>>>,
    dirty_since_flush: AtomicUsize,
    shutdown_tx: broadcast::Sender<()>,
}

impl HeadWriter {
    /// Build a head writer over `adapter` and spawn its idle-flush task.
    pub fn spawn(adapter: Arc<dyn StorageAdapter>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let writer = Arc::new(Self {
            adapter,
            pending: Mutex::new(HashMap::new()),
            dirty_since_flush: AtomicUsize::new(0),
            shutdown_tx,
        });

        let background = writer.clone();
        let mut shutdown_rx = background.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_IDLE_DELAY);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = background.flush() {
                            tracing::warn!(error = %e, "idle head flush failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        writer
    }

    /// Read back the persisted root for `space`, or `None` if nothing has
    /// ever been flushed for it (including anything still only pending).
    pub fn load(adapter: &dyn StorageAdapter, space: &'static str) -> kv_store::Result<Option<Digest>> {
        match adapter.get(&head_key(space))? {
            Some(bytes) if bytes.is_empty() => Ok(None),
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                Ok(Digest::from_b64(&text))
            }
            None => Ok(None),
        }
    }

    /// Record a new root for `space`. Flushes immediately once
    /// [`FLUSH_BATCH_SIZE`] updates have accumulated; otherwise the update
    /// waits for the idle-flush task or an explicit [`HeadWriter::flush`].
    pub fn record(&self, space: &'static str, root: Option<Digest>) -> kv_store::Result<()> {
        self.pending.lock().insert(space, root);
        if self.dirty_since_flush.fetch_add(1, Ordering::SeqCst) + 1 >= FLUSH_BATCH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Write every pending head update to the adapter now.
    pub fn flush(&self) -> kv_store::Result<()> {
        let pending: Vec<(&'static str, Option<Digest>)> = {
            let mut guard = self.pending.lock();
            guard.drain().collect()
        };
        if pending.is_empty() {
            return Ok(());
        }
        let entries: Vec<(String, Vec<u8>)> = pending
            .into_iter()
            .map(|(space, root)| {
                let bytes = match root {
                    Some(d) => d.to_b64().into_bytes(),
                    None => Vec::new(),
                };
                (head_key(space), bytes)
            })
            .collect();
        self.adapter.batch_put(&entries)?;
        self.dirty_since_flush.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Flush any pending updates and stop the idle-flush background task.
    /// Safe to call more than once.
    pub fn close(&self) -> kv_store::Result<()> {
        let _ = self.shutdown_tx.send(());
        self.flush()
    }
}
