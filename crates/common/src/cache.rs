//! Identity-keyed asset cache with background loading.
//!
//! Media handles and decoded audio buffers are loaded off the tick path and
//! looked up by entity id. Entries move `Loading -> Ready | Failed` exactly
//! once; a populated entry is never replaced, only evicted when its entity
//! leaves the timeline.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::error::NeoncutResult;

enum Entry<T> {
    /// Waiting for the load tagged with this generation.
    Loading(u64),
    Ready(T),
    Failed,
}

struct Loaded<T> {
    id: String,
    generation: u64,
    result: NeoncutResult<T>,
}

/// Cache of assets keyed by entity id.
pub struct AssetCache<T> {
    label: &'static str,
    entries: HashMap<String, Entry<T>>,
    next_generation: u64,
    tx: Sender<Loaded<T>>,
    rx: Receiver<Loaded<T>>,
}

impl<T: Send + 'static> AssetCache<T> {
    /// Create an empty cache. `label` tags log lines ("media", "audio", ...).
    pub fn new(label: &'static str) -> Self {
        let (tx, rx) = channel();
        Self {
            label,
            entries: HashMap::new(),
            next_generation: 0,
            tx,
            rx,
        }
    }

    /// Start loading `id` on a worker thread unless it is already known.
    /// Returns `true` if a load was started.
    pub fn request<F>(&mut self, id: &str, load: F) -> bool
    where
        F: FnOnce() -> NeoncutResult<T> + Send + 'static,
    {
        if self.entries.contains_key(id) {
            return false;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        self.entries.insert(id.to_string(), Entry::Loading(generation));

        let tx = self.tx.clone();
        let key = id.to_string();
        let label = self.label;
        let spawned = std::thread::Builder::new()
            .name(format!("{label}-load"))
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(load))
                    .unwrap_or_else(|_| {
                        Err(crate::error::NeoncutError::decode("loader panicked"))
                    });
                // The cache may have been dropped while loading.
                let _ = tx.send(Loaded {
                    id: key,
                    generation,
                    result,
                });
            });
        if let Err(e) = spawned {
            tracing::warn!(cache = label, id, error = %e, "Failed to spawn loader thread");
            self.entries.insert(id.to_string(), Entry::Failed);
        }
        true
    }

    /// Insert an already-loaded asset. Ignored when `id` is already present.
    pub fn insert_ready(&mut self, id: &str, value: T) {
        self.entries
            .entry(id.to_string())
            .or_insert(Entry::Ready(value));
    }

    /// Move finished background loads into the cache. Returns how many
    /// entries settled.
    pub fn poll(&mut self) -> usize {
        let mut settled = 0;
        while let Ok(loaded) = self.rx.try_recv() {
            if self.accept(loaded) {
                settled += 1;
            }
        }
        settled
    }

    /// Block until no entry is loading.
    pub fn wait_idle(&mut self) {
        while self.pending() > 0 {
            match self.rx.recv() {
                Ok(loaded) => {
                    self.accept(loaded);
                }
                Err(_) => break,
            }
        }
    }

    /// Store a finished load if its entry still waits for that generation.
    /// Results for evicted entries, or for an earlier request of an id that
    /// was evicted and requested again, are dropped.
    fn accept(&mut self, loaded: Loaded<T>) -> bool {
        let Loaded {
            id,
            generation,
            result,
        } = loaded;
        match self.entries.get(&id) {
            Some(Entry::Loading(waiting)) if *waiting == generation => {}
            _ => {
                tracing::trace!(cache = self.label, id = %id, generation, "Dropped stale load");
                return false;
            }
        }
        let state = self.settle(&id, result);
        self.entries.insert(id, state);
        true
    }

    /// Ready asset for `id`, if any.
    pub fn get(&self, id: &str) -> Option<&T> {
        match self.entries.get(id) {
            Some(Entry::Ready(value)) => Some(value),
            _ => None,
        }
    }

    /// Mutable access to a ready asset.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        match self.entries.get_mut(id) {
            Some(Entry::Ready(value)) => Some(value),
            _ => None,
        }
    }

    /// Number of entries still loading.
    pub fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|state| matches!(state, Entry::Loading(_)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every entry whose id is not in `live`. Returns the evicted ids.
    pub fn retain_ids(&mut self, live: &HashSet<&str>) -> Vec<String> {
        let evicted: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &evicted {
            self.entries.remove(id);
            tracing::debug!(cache = self.label, id = %id, "Evicted asset");
        }
        evicted
    }

    fn settle(&self, id: &str, result: NeoncutResult<T>) -> Entry<T> {
        match result {
            Ok(value) => {
                tracing::debug!(cache = self.label, id, "Asset ready");
                Entry::Ready(value)
            }
            Err(e) => {
                tracing::warn!(cache = self.label, id, error = %e, "Asset failed to load");
                Entry::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NeoncutError;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn test_background_load_settles_after_poll() {
        let mut cache: AssetCache<u32> = AssetCache::new("test");
        assert!(cache.request("a", || Ok(7)));
        assert!(!cache.request("a", || Ok(8)));
        cache.wait_idle();
        assert_eq!(cache.get("a"), Some(&7));
    }

    #[test]
    fn test_failed_load_is_not_retried() {
        let mut cache: AssetCache<u32> = AssetCache::new("test");
        cache.request("bad", || Err(NeoncutError::decode("corrupt")));
        cache.wait_idle();
        assert!(cache.get("bad").is_none());
        assert_eq!(cache.len(), 1);
        assert!(!cache.request("bad", || Ok(1)));
        assert_eq!(cache.pending(), 0);
    }

    #[test]
    fn test_ready_entries_are_never_replaced() {
        let mut cache: AssetCache<&'static str> = AssetCache::new("test");
        cache.insert_ready("x", "first");
        cache.insert_ready("x", "second");
        assert!(!cache.request("x", || Ok("third")));
        assert_eq!(cache.get("x"), Some(&"first"));
    }

    #[test]
    fn test_retain_evicts_removed_entities() {
        let mut cache: AssetCache<u32> = AssetCache::new("test");
        cache.insert_ready("keep", 1);
        cache.insert_ready("drop", 2);
        let live: HashSet<&str> = ["keep"].into_iter().collect();
        let evicted = cache.retain_ids(&live);
        assert_eq!(evicted, vec!["drop".to_string()]);
        assert_eq!(cache.get("keep"), Some(&1));
        assert!(cache.get("drop").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_result_for_evicted_entry_is_dropped() {
        let mut cache: AssetCache<u32> = AssetCache::new("test");
        cache.request("gone", || Ok(3));
        cache.retain_ids(&HashSet::new());
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(cache.poll(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_load_after_rerequest_is_dropped() {
        let mut cache: AssetCache<&'static str> = AssetCache::new("test");

        // The first load is held until the id has been evicted and requested
        // again.
        let (release_tx, release_rx) = sync_channel::<()>(0);
        cache.request("clip", move || {
            let _ = release_rx.recv();
            Ok("old")
        });
        cache.retain_ids(&HashSet::new());

        let (second_tx, second_rx) = sync_channel::<()>(0);
        assert!(cache.request("clip", move || {
            let _ = second_rx.recv();
            Ok("new")
        }));

        release_tx.send(()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(cache.poll(), 0);
        assert!(cache.get("clip").is_none());
        assert_eq!(cache.pending(), 1);

        second_tx.send(()).unwrap();
        cache.wait_idle();
        assert_eq!(cache.get("clip"), Some(&"new"));
    }
}
