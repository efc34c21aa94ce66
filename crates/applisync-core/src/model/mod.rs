// ── Domain model ──

mod appliance;
mod identity;

pub use appliance::{ApplianceRecord, Connectivity};
pub use identity::{ApplianceId, PropertyPath, leaf_paths};
