//! Pattern-subscribed event dispatch with per-space access control
//!
//! `all` and `frozen` events are public: every matching subscription sees
//! them. `user`-space events are private — they're only delivered to a
//! subscription whose `viewer` is the same public key that owns the path,
//! so one account's subscriptions can never observe another account's
//! private writes even if the pattern would otherwise match.

use crate::pattern::Pattern;
use kv_envelope::Space;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A single observed write, as delivered to subscribers.
#[derive(Clone, Debug)]
pub struct Event {
    /// Which space the write landed in
    pub space: Space,
    /// The path within that space (no space prefix)
    pub path: String,
    /// The writer's public key
    pub pub_key: [u8; 32],
    /// The new value ref, or `None` if this event is a delete
    pub value_ref: Option<String>,
}

impl Event {
    /// Full storage path, including the space prefix, that subscription
    /// patterns are matched against.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.space.prefix(), self.path)
    }
}

struct Subscription {
    id: u64,
    pattern: Pattern,
    /// The identity this subscription was registered on behalf of. `None`
    /// subscriptions (e.g. a server-side sync listener) see only
    /// public (`all`/`frozen`) events.
    viewer: Option<[u8; 32]>,
    callback: Box<dyn Fn(&Event) + Send + Sync>,
}

/// Registry of pattern subscriptions and the dispatch entry point.
#[derive(Default)]
pub struct Dispatcher {
    subs: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Build an empty dispatcher.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `callback` to fire on every future event matching
    /// `pattern`, visible to `viewer` (pass `None` for a subscription with
    /// no owning identity, which only ever sees public events). Returns a
    /// subscription id for [`Dispatcher::unsubscribe`].
    pub fn subscribe(
        &self,
        pattern: Pattern,
        viewer: Option<[u8; 32]>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subs.lock().push(Subscription {
            id,
            pattern,
            viewer,
            callback: Box::new(callback),
        });
        id
    }

    /// Remove a subscription by id. No-op if the id is unknown (already
    /// unsubscribed, or never existed).
    pub fn unsubscribe(&self, id: u64) {
        self.subs.lock().retain(|s| s.id != id);
    }

    /// Deliver `event` to every subscription whose pattern matches and
    /// whose access rule permits it.
    pub fn dispatch(&self, event: &Event) {
        let full_path = event.full_path();
        for sub in self.subs.lock().iter() {
            if event.space == Space::User && sub.viewer != Some(event.pub_key) {
                continue;
            }
            if sub.pattern.matches(&full_path) {
                (sub.callback)(event);
            }
        }
    }

    /// Number of currently registered subscriptions.
    pub fn len(&self) -> usize {
        self.subs.lock().len()
    }

    /// True if there are no subscriptions registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(space: Space, path: &str, pub_key: [u8; 32]) -> Event {
        Event {
            space,
            path: path.into(),
            pub_key,
            value_ref: Some("v:1".into()),
        }
    }

    #[test]
    fn matching_pattern_fires_callback() {
        let d = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        d.subscribe(Pattern::glob("all/notes/*"), None, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        d.dispatch(&event(Space::All, "notes/1", [0u8; 32]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_matching_pattern_does_not_fire() {
        let d = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        d.subscribe(Pattern::Exact("all/notes/1".into()), None, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        d.dispatch(&event(Space::All, "notes/2", [0u8; 32]));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn user_space_events_only_reach_the_owner() {
        let d = Dispatcher::new();
        let owner = [1u8; 32];
        let stranger_hits = Arc::new(AtomicUsize::new(0));
        let owner_hits = Arc::new(AtomicUsize::new(0));

        let s = stranger_hits.clone();
        d.subscribe(Pattern::glob("user/*"), Some([2u8; 32]), move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let o = owner_hits.clone();
        d.subscribe(Pattern::glob("user/*"), Some(owner), move |_| {
            o.fetch_add(1, Ordering::SeqCst);
        });

        d.dispatch(&event(Space::User, "secret", owner));
        assert_eq!(stranger_hits.load(Ordering::SeqCst), 0);
        assert_eq!(owner_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn public_events_reach_viewerless_subscriptions() {
        let d = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        d.subscribe(Pattern::glob("frozen/*"), None, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        d.dispatch(&event(Space::Frozen, "handles/alice#1234", [9u8; 32]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let d = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = d.subscribe(Pattern::glob("all/*"), None, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        d.unsubscribe(id);
        d.dispatch(&event(Space::All, "notes/1", [0u8; 32]));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
