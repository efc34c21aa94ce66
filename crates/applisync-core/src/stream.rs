// ── Appliance roster subscription ──
//
// The set of tracked appliances as a sequence of immutable snapshots. A new
// snapshot is published whenever any record is inserted, replaced or
// removed.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;

use crate::model::{ApplianceId, ApplianceRecord};

pub type Snapshot = Arc<Vec<Arc<ApplianceRecord>>>;

/// Snapshot of every tracked appliance plus notification of the next one.
pub struct ApplianceStream {
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl ApplianceStream {
    pub(crate) fn new(mut receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// The snapshot seen last, by creation or by [`changed`](Self::changed).
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn get(&self, id: &ApplianceId) -> Option<&Arc<ApplianceRecord>> {
        self.current.iter().find(|record| &record.id == id)
    }

    pub fn ids(&self) -> Vec<ApplianceId> {
        self.current.iter().map(|record| record.id.clone()).collect()
    }

    /// Appliances currently reported as reachable.
    pub fn connected(&self) -> usize {
        self.current
            .iter()
            .filter(|record| !record.is_disconnected())
            .count()
    }

    /// Wait for the next snapshot. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        self.current = self.receiver.borrow_and_update().clone();
        Some(Arc::clone(&self.current))
    }

    /// Every snapshot from now on, starting with the latest one.
    pub fn into_stream(self) -> impl Stream<Item = Snapshot> {
        WatchStream::new(self.receiver)
    }
}
