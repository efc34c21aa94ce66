// ── Appliance domain type ──
//
// One record per tracked appliance. Records are immutable once shared:
// the store clones, mutates, and republishes a fresh `Arc` on every
// update, so a reference held by an observer never changes under it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::identity::{ApplianceId, PropertyPath};

/// Whether the vendor last reported the appliance as reachable.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Connectivity {
    Connected,
    Disconnected,
    #[default]
    Unknown,
}

impl Connectivity {
    /// Interpret a vendor `connectionState` / `connectivityState` string.
    pub fn from_vendor(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if s.eq_ignore_ascii_case("connected") => Self::Connected,
            Some(s) if s.eq_ignore_ascii_case("disconnected") => Self::Disconnected,
            _ => Self::Unknown,
        }
    }
}

/// An appliance as the coordinator currently knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplianceRecord {
    pub id: ApplianceId,
    pub name: Option<String>,
    /// Family code from the listing (`OV`, `TD`, `WM`, `AC`, ...).
    pub family: Option<String>,
    pub model: Option<String>,
    pub brand: Option<String>,
    pub connectivity: Connectivity,
    /// Last known reported state, deep-merged from pulls and pushes.
    pub reported: Map<String, Value>,
    /// Capability schema from the details endpoint.
    pub capabilities: Map<String, Value>,
    /// Last time any authoritative data arrived, even if nothing changed.
    pub last_seen: Option<DateTime<Utc>>,
    /// Bumped whenever `reported`, `capabilities`, or `connectivity` changes.
    pub revision: u64,
    /// Created from the listing alone because details could not be fetched.
    pub placeholder: bool,
}

impl ApplianceRecord {
    /// A minimal record for an appliance whose details are not yet known.
    pub fn placeholder(id: ApplianceId, name: Option<String>, family: Option<String>) -> Self {
        Self {
            id,
            name,
            family,
            model: None,
            brand: None,
            connectivity: Connectivity::Unknown,
            reported: Map::new(),
            capabilities: Map::new(),
            last_seen: None,
            revision: 0,
            placeholder: true,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn reported_value(&self, path: &PropertyPath) -> Option<&Value> {
        path.lookup(&self.reported)
    }

    pub fn is_disconnected(&self) -> bool {
        self.connectivity == Connectivity::Disconnected
    }

    /// Remote-control status from reported state, if the appliance reports
    /// one. Values look like `ENABLED`, `NOT_SAFETY_RELEVANT_ENABLED`, or
    /// `TEMPORARY_LOCKED`; anything mentioning `DISABLED` counts as off.
    pub fn remote_control_enabled(&self) -> Option<bool> {
        let raw = self.reported.get("remoteControl")?;
        match raw {
            Value::Bool(b) => Some(*b),
            Value::String(s) => {
                let upper = s.to_ascii_uppercase();
                Some(upper.contains("ENABLED") && !upper.contains("DISABLED"))
            }
            _ => None,
        }
    }
}
