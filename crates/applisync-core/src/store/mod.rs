// ── Appliance state store ──

pub(crate) mod collection;
mod data_store;
pub(crate) mod refresh;

pub use data_store::{ApplianceStore, MergeOutcome, StateChange, UpdateSource};
