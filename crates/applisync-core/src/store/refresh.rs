// ── Listing reconciliation ──
//
// Applies a fresh appliance listing to the store. New appliances are
// reported back for setup; appliances gone from the listing are pruned,
// except disconnected ones, which keep their last known state so they
// reappear intact when they come back online.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use applisync_api::ApplianceSummary;

use super::{ApplianceStore, UpdateSource};
use crate::model::{ApplianceId, Connectivity};

/// What a listing changed.
#[derive(Debug, Default)]
pub(crate) struct ListingPlan {
    /// Listed but not tracked yet. The caller sets them up.
    pub added: Vec<ApplianceSummary>,
    pub purged: Vec<ApplianceId>,
    /// Missing from the listing but kept because they were offline.
    pub preserved: Vec<ApplianceId>,
}

impl ApplianceStore {
    pub(crate) fn apply_listing(&self, listing: &[ApplianceSummary]) -> ListingPlan {
        let mut plan = ListingPlan::default();

        if listing.is_empty() && !self.is_empty() {
            warn!(
                tracked = self.len(),
                "appliance listing came back empty, keeping tracked appliances"
            );
            plan.preserved = self.ids();
            return plan;
        }

        let listed: HashSet<&str> = listing.iter().map(|s| s.appliance_id.as_str()).collect();

        for id in self.ids() {
            if listed.contains(id.as_str()) {
                continue;
            }
            match self.get(&id) {
                Some(record) if record.is_disconnected() => {
                    debug!(appliance = %id, "missing from listing while offline, preserving");
                    plan.preserved.push(id);
                }
                _ => {
                    info!(appliance = %id, "appliance no longer listed, removing");
                    self.remove(&id);
                    plan.purged.push(id);
                }
            }
        }

        for summary in listing {
            let id = ApplianceId::from(summary.appliance_id.as_str());
            if self.contains(&id) {
                let connectivity = Connectivity::from_vendor(summary.connection_state.as_deref());
                self.set_connectivity(&id, connectivity, UpdateSource::Listing);
            } else {
                plan.added.push(summary.clone());
            }
        }

        plan
    }
}
