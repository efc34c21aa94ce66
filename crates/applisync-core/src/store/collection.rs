// ── Reactive record collection ──
//
// Concurrent storage keyed by appliance id, with two levels of change
// notification: a per-record `watch` for observers of one appliance and a
// collection-wide snapshot `watch` for observers of the whole set.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::model::ApplianceId;

struct Slot<T> {
    record: Arc<T>,
    watch: watch::Sender<Arc<T>>,
}

/// A reactive collection of immutable records.
///
/// Every accepted mutation stores a brand-new `Arc<T>`; existing `Arc`s
/// handed to observers are never mutated. The snapshot is rebuilt after the
/// per-key guard is released, so readers never see a half-applied update.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    by_id: DashMap<ApplianceId, Slot<T>>,

    /// Bumped on every mutation that notifies.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation for efficient subscription.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_id: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace a record. Returns `true` if the id was new.
    pub(crate) fn insert(&self, id: ApplianceId, record: T) -> bool {
        let record = Arc::new(record);
        let is_new = match self.by_id.entry(id) {
            Entry::Occupied(mut slot) => {
                let slot = slot.get_mut();
                slot.record = Arc::clone(&record);
                slot.watch.send_replace(record);
                false
            }
            Entry::Vacant(vacant) => {
                let (watch, _) = watch::channel(Arc::clone(&record));
                vacant.insert(Slot { record, watch });
                true
            }
        };

        self.publish();
        is_new
    }

    /// Apply `f` to a private copy of the record, then install the copy.
    ///
    /// `f` returns its own result plus whether observers should be woken.
    /// The copy is installed either way, so silent bookkeeping (e.g. a
    /// `last_seen` bump) is still visible to the next reader.
    pub(crate) fn update<R>(&self, id: &ApplianceId, f: impl FnOnce(&mut T) -> (R, bool)) -> Option<R> {
        let (result, notify) = {
            let mut slot = self.by_id.get_mut(id)?;
            let mut next = (*slot.record).clone();
            let (result, notify) = f(&mut next);

            let next = Arc::new(next);
            slot.record = Arc::clone(&next);
            slot.watch.send_if_modified(|current| {
                *current = next;
                notify
            });
            (result, notify)
        };

        if notify {
            self.publish();
        } else {
            self.refresh_snapshot_silently();
        }
        Some(result)
    }

    /// Remove a record. Its per-record watchers see the channel close.
    pub(crate) fn remove(&self, id: &ApplianceId) -> Option<Arc<T>> {
        let removed = self.by_id.remove(id).map(|(_, slot)| slot.record);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    pub(crate) fn get(&self, id: &ApplianceId) -> Option<Arc<T>> {
        self.by_id.get(id).map(|slot| Arc::clone(&slot.record))
    }

    /// Watch a single record. `None` if the id is not tracked.
    pub(crate) fn watch(&self, id: &ApplianceId) -> Option<watch::Receiver<Arc<T>>> {
        self.by_id.get(id).map(|slot| slot.watch.subscribe())
    }

    pub(crate) fn contains(&self, id: &ApplianceId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn ids(&self) -> Vec<ApplianceId> {
        self.by_id.iter().map(|r| r.key().clone()).collect()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn collect(&self) -> Vec<Arc<T>> {
        self.by_id.iter().map(|r| Arc::clone(&r.record)).collect()
    }

    /// Rebuild the snapshot, wake subscribers, and bump the version.
    fn publish(&self) {
        // Rebuilding inside the closure serializes concurrent publishers
        // on the watch lock, so the last writer always wins with the
        // newest view.
        self.snapshot.send_modify(|snap| *snap = Arc::new(self.collect()));
        self.version.send_modify(|v| *v += 1);
    }

    /// Rebuild the snapshot without waking subscribers.
    fn refresh_snapshot_silently(&self) {
        self.snapshot.send_if_modified(|snap| {
            *snap = Arc::new(self.collect());
            false
        });
    }
}
