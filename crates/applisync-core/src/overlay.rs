// ── Optimistic write overlay ──
//
// After a command is accepted, reads return the commanded value until the
// appliance confirms or contradicts it, or until the override expires.
// An update that simply omits the property leaves the override alone.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::model::{ApplianceId, PropertyPath};

pub const DEFAULT_OVERLAY_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Override {
    value: Value,
    applied_at: Instant,
}

/// How an authoritative observation resolved a pending override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Confirmed,
    Contradicted,
    /// Nothing pending for that property.
    NoOverride,
}

/// Per-(appliance, property) optimistic values.
pub struct OptimisticOverlay {
    entries: DashMap<(ApplianceId, PropertyPath), Override>,
    ttl: Duration,
}

impl OptimisticOverlay {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Store an accepted command's normalized value.
    pub fn record(&self, appliance: &ApplianceId, property: &PropertyPath, value: Value) {
        self.entries.insert(
            (appliance.clone(), property.clone()),
            Override {
                value,
                applied_at: Instant::now(),
            },
        );
    }

    /// The value reads should show: the override while it is live,
    /// otherwise `authoritative`.
    pub fn overlay(
        &self,
        appliance: &ApplianceId,
        property: &PropertyPath,
        authoritative: Option<Value>,
    ) -> Option<Value> {
        let key = (appliance.clone(), property.clone());
        match self.entries.get(&key) {
            None => return authoritative,
            Some(entry) if entry.applied_at.elapsed() < self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        debug!(appliance = %appliance, property = %property, "optimistic value expired unconfirmed");
        self.entries.remove(&key);
        authoritative
    }

    /// Feed an authoritative value for `property`. Any pending override is
    /// cleared: a matching value confirms it, a different value wins over it.
    pub fn observe(
        &self,
        appliance: &ApplianceId,
        property: &PropertyPath,
        authoritative: &Value,
    ) -> Observation {
        let Some((_, pending)) = self.entries.remove(&(appliance.clone(), property.clone())) else {
            return Observation::NoOverride;
        };

        if &pending.value == authoritative {
            debug!(appliance = %appliance, property = %property, "optimistic value confirmed");
            Observation::Confirmed
        } else {
            debug!(
                appliance = %appliance,
                property = %property,
                expected = %pending.value,
                actual = %authoritative,
                "optimistic value contradicted, keeping reported value"
            );
            Observation::Contradicted
        }
    }

    pub fn discard(&self, appliance: &ApplianceId, property: &PropertyPath) {
        self.entries.remove(&(appliance.clone(), property.clone()));
    }

    pub fn discard_appliance(&self, appliance: &ApplianceId) {
        self.entries.retain(|(id, _), _| id != appliance);
    }

    /// Drop every expired override. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, o| o.applied_at.elapsed() < self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OptimisticOverlay {
    fn default() -> Self {
        Self::new(DEFAULT_OVERLAY_TTL)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ids() -> (ApplianceId, PropertyPath) {
        ("O1".into(), "targetTemperatureC".into())
    }

    #[tokio::test(start_paused = true)]
    async fn override_shown_until_contradicted() {
        let overlay = OptimisticOverlay::default();
        let (id, prop) = ids();
        overlay.record(&id, &prop, json!(30));

        assert_eq!(overlay.overlay(&id, &prop, Some(json!(20))), Some(json!(30)));

        assert_eq!(overlay.observe(&id, &prop, &json!(45)), Observation::Contradicted);
        assert_eq!(overlay.overlay(&id, &prop, Some(json!(45))), Some(json!(45)));
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_clears_override() {
        let overlay = OptimisticOverlay::default();
        let (id, prop) = ids();
        overlay.record(&id, &prop, json!(30));

        assert_eq!(overlay.observe(&id, &prop, &json!(30)), Observation::Confirmed);
        assert!(overlay.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_for_other_property_keeps_override() {
        let overlay = OptimisticOverlay::default();
        let (id, prop) = ids();
        overlay.record(&id, &prop, json!(30));

        let other = PropertyPath::from("doorState");
        assert_eq!(overlay.observe(&id, &other, &json!("OPEN")), Observation::NoOverride);
        assert_eq!(overlay.overlay(&id, &prop, Some(json!(20))), Some(json!(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn override_expires_after_ttl() {
        let overlay = OptimisticOverlay::new(Duration::from_secs(60));
        let (id, prop) = ids();
        overlay.record(&id, &prop, json!(30));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(overlay.overlay(&id, &prop, Some(json!(20))), Some(json!(30)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(overlay.overlay(&id, &prop, Some(json!(20))), Some(json!(20)));
        assert!(overlay.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let overlay = OptimisticOverlay::new(Duration::from_secs(60));
        overlay.record(&"A".into(), &"x".into(), json!(1));
        tokio::time::advance(Duration::from_secs(61)).await;
        overlay.record(&"B".into(), &"x".into(), json!(2));

        assert_eq!(overlay.purge_expired(), 1);
        assert_eq!(overlay.len(), 1);
    }
}
