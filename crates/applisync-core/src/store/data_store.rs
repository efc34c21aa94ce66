// ── Central appliance store ──
//
// Thread-safe storage for every tracked appliance. Readers get immutable
// `Arc<ApplianceRecord>` snapshots; writers go through the merge helpers
// below so that revision, last_seen, and notifications stay consistent.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};

use applisync_api::ApplianceDetails;

use super::collection::EntityCollection;
use crate::merge::deep_merge;
use crate::model::{ApplianceId, ApplianceRecord, Connectivity, PropertyPath, leaf_paths};
use crate::stream::ApplianceStream;

const CHANGE_CHANNEL_SIZE: usize = 256;

// ── Change notifications ─────────────────────────────────────────────

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum UpdateSource {
    Setup,
    Pull,
    Push,
    Listing,
}

/// Broadcast whenever an appliance's observable state actually changes.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub appliance_id: ApplianceId,
    /// Leaf paths of `reported` whose value changed. Empty for
    /// connectivity-only or details-only changes.
    pub changed: Vec<PropertyPath>,
    /// Set when connectivity moved to a new value.
    pub connectivity: Option<Connectivity>,
    pub source: UpdateSource,
    pub revision: u64,
}

/// Result of merging a partial state into one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub changed: Vec<PropertyPath>,
    pub revision: u64,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

// ── ApplianceStore ───────────────────────────────────────────────────

/// Reactive store for all tracked appliances.
pub struct ApplianceStore {
    pub(crate) appliances: EntityCollection<ApplianceRecord>,
    changes: broadcast::Sender<Arc<StateChange>>,
    pub(crate) last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
    pub(crate) last_push_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl ApplianceStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        let (last_full_refresh, _) = watch::channel(None);
        let (last_push_event, _) = watch::channel(None);

        Self {
            appliances: EntityCollection::new(),
            changes,
            last_full_refresh,
            last_push_event,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &ApplianceId) -> Option<Arc<ApplianceRecord>> {
        self.appliances.get(id)
    }

    pub fn contains(&self, id: &ApplianceId) -> bool {
        self.appliances.contains(id)
    }

    pub fn ids(&self) -> Vec<ApplianceId> {
        self.appliances.ids()
    }

    pub fn len(&self) -> usize {
        self.appliances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appliances.len() == 0
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<ApplianceRecord>>> {
        self.appliances.snapshot()
    }

    pub fn version(&self) -> u64 {
        self.appliances.version()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self) -> ApplianceStream {
        ApplianceStream::new(self.appliances.subscribe())
    }

    pub fn watch_appliance(&self, id: &ApplianceId) -> Option<watch::Receiver<Arc<ApplianceRecord>>> {
        self.appliances.watch(id)
    }

    pub fn changes(&self) -> broadcast::Receiver<Arc<StateChange>> {
        self.changes.subscribe()
    }

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    pub fn last_push_event(&self) -> Option<DateTime<Utc>> {
        *self.last_push_event.borrow()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Track a new appliance (or replace one wholesale).
    pub fn insert(&self, record: ApplianceRecord, source: UpdateSource) -> bool {
        let id = record.id.clone();
        let changed = leaf_paths(&record.reported);
        let connectivity = Some(record.connectivity);
        let revision = record.revision;

        let is_new = self.appliances.insert(id.clone(), record);
        self.emit(StateChange {
            appliance_id: id,
            changed,
            connectivity,
            source,
            revision,
        });
        is_new
    }

    /// Deep-merge a partial reported state.
    ///
    /// `last_seen` always moves forward, even for a duplicate heartbeat;
    /// the revision and notifications only move when a value changed.
    /// Returns `None` if the appliance is not tracked.
    pub fn merge_reported(
        &self,
        id: &ApplianceId,
        partial: &Map<String, Value>,
        source: UpdateSource,
        at: DateTime<Utc>,
    ) -> Option<MergeOutcome> {
        let outcome = self.appliances.update(id, |record| {
            let changed = deep_merge(&mut record.reported, partial);
            record.last_seen = Some(at);
            let notify = !changed.is_empty();
            if notify {
                record.revision += 1;
            }
            (
                MergeOutcome {
                    changed,
                    revision: record.revision,
                },
                notify,
            )
        })?;

        if source == UpdateSource::Push {
            self.last_push_event.send_replace(Some(at));
        }
        if !outcome.is_noop() {
            self.emit(StateChange {
                appliance_id: id.clone(),
                changed: outcome.changed.clone(),
                connectivity: None,
                source,
                revision: outcome.revision,
            });
        }
        Some(outcome)
    }

    /// Record a connectivity observation. Returns the previous value, or
    /// `None` if the appliance is not tracked. `Unknown` never overwrites a
    /// known state.
    pub fn set_connectivity(
        &self,
        id: &ApplianceId,
        connectivity: Connectivity,
        source: UpdateSource,
    ) -> Option<Connectivity> {
        let (previous, revision) = self.appliances.update(id, |record| {
            let previous = record.connectivity;
            let moved = connectivity != Connectivity::Unknown && connectivity != previous;
            if moved {
                record.connectivity = connectivity;
                record.revision += 1;
            }
            ((previous, moved.then_some(record.revision)), moved)
        })?;

        if let Some(revision) = revision {
            self.emit(StateChange {
                appliance_id: id.clone(),
                changed: Vec::new(),
                connectivity: Some(connectivity),
                source,
                revision,
            });
        }
        Some(previous)
    }

    /// Fill identity and capabilities from a details response, turning a
    /// placeholder into a full record.
    pub fn apply_details(&self, id: &ApplianceId, details: &ApplianceDetails) -> bool {
        let revision = self.appliances.update(id, |record| {
            let info = &details.appliance_info;
            let model = info.model_or_pnc(id.as_str());
            let brand = info.brand.clone();

            let changed = record.placeholder
                || record.capabilities != details.capabilities
                || record.model != model
                || record.brand != brand;
            if changed {
                record.model = model;
                record.brand = brand;
                record.capabilities = details.capabilities.clone();
                record.placeholder = false;
                record.revision += 1;
            }
            (changed.then_some(record.revision), changed)
        });

        match revision {
            Some(Some(revision)) => {
                self.emit(StateChange {
                    appliance_id: id.clone(),
                    changed: Vec::new(),
                    connectivity: None,
                    source: UpdateSource::Pull,
                    revision,
                });
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, id: &ApplianceId) -> Option<Arc<ApplianceRecord>> {
        self.appliances.remove(id)
    }

    pub(crate) fn mark_full_refresh(&self, at: DateTime<Utc>) {
        self.last_full_refresh.send_replace(Some(at));
    }

    fn emit(&self, change: StateChange) {
        // No receivers is fine.
        let _ = self.changes.send(Arc::new(change));
    }
}

impl Default for ApplianceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    fn store_with(id: &str) -> ApplianceStore {
        let store = ApplianceStore::new();
        let mut record = ApplianceRecord::placeholder(id.into(), Some("Dryer".into()), Some("TD".into()));
        record.connectivity = Connectivity::Connected;
        store.insert(record, UpdateSource::Setup);
        store
    }

    #[test]
    fn merge_publishes_new_arc_and_change() {
        let store = store_with("A1");
        let id = ApplianceId::from("A1");
        let mut changes = store.changes();
        let before = store.get(&id).unwrap();

        let outcome = store
            .merge_reported(&id, &object(json!({ "timeToEnd": 600 })), UpdateSource::Push, Utc::now())
            .unwrap();

        let after = store.get(&id).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(before.reported.is_empty());
        assert_eq!(after.reported["timeToEnd"], 600);
        assert_eq!(outcome.changed, vec![PropertyPath::from("timeToEnd")]);

        let change = changes.try_recv().unwrap();
        assert_eq!(change.source, UpdateSource::Push);
        assert_eq!(change.revision, after.revision);
    }

    #[test]
    fn duplicate_heartbeat_updates_last_seen_silently() {
        let store = store_with("A1");
        let id = ApplianceId::from("A1");
        let partial = object(json!({ "doorState": "CLOSED" }));
        let first = Utc::now();

        store.merge_reported(&id, &partial, UpdateSource::Push, first).unwrap();
        let revision = store.get(&id).unwrap().revision;
        let mut changes = store.changes();
        let mut watcher = store.watch_appliance(&id).unwrap();
        watcher.mark_unchanged();

        let later = first + chrono::TimeDelta::seconds(30);
        let outcome = store.merge_reported(&id, &partial, UpdateSource::Push, later).unwrap();

        assert!(outcome.is_noop());
        let record = store.get(&id).unwrap();
        assert_eq!(record.revision, revision);
        assert_eq!(record.last_seen, Some(later));
        assert!(changes.try_recv().is_err());
        assert!(!watcher.has_changed().unwrap());
        assert_eq!(store.last_push_event(), Some(later));
    }

    #[test]
    fn merge_into_unknown_appliance_is_none() {
        let store = ApplianceStore::new();
        assert!(
            store
                .merge_reported(&"ghost".into(), &Map::new(), UpdateSource::Pull, Utc::now())
                .is_none()
        );
    }

    #[test]
    fn unknown_connectivity_does_not_overwrite() {
        let store = store_with("A1");
        let id = ApplianceId::from("A1");

        let previous = store.set_connectivity(&id, Connectivity::Unknown, UpdateSource::Pull);
        assert_eq!(previous, Some(Connectivity::Connected));
        assert_eq!(store.get(&id).unwrap().connectivity, Connectivity::Connected);

        store.set_connectivity(&id, Connectivity::Disconnected, UpdateSource::Pull);
        assert!(store.get(&id).unwrap().is_disconnected());
    }

    #[test]
    fn details_fill_placeholder() {
        let store = store_with("944188772_00:31862190-443E07363DAB");
        let id = ApplianceId::from("944188772_00:31862190-443E07363DAB");
        let details: ApplianceDetails = serde_json::from_value(json!({
            "applianceInfo": { "brand": "Electrolux", "model": "Unknown" },
            "capabilities": { "cavityLight": { "access": "readwrite", "type": "boolean" } }
        }))
        .unwrap();

        assert!(store.apply_details(&id, &details));
        let record = store.get(&id).unwrap();
        assert!(!record.placeholder);
        assert_eq!(record.model.as_deref(), Some("944188772"));
        assert!(record.capabilities.contains_key("cavityLight"));

        // Same details again: nothing to do.
        assert!(!store.apply_details(&id, &details));
    }
}
