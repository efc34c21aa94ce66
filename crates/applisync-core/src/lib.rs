//! State coordination between `applisync-api` and consumers (CLI, automations).
//!
//! - **[`Coordinator`]**: lifecycle facade. [`start()`](Coordinator::start)
//!   discovers appliances and fetches their details and state, then spawns
//!   periodic refresh, the live-update listener with its renewal task, and
//!   the command processor.
//!
//! - **[`ApplianceStore`]**: reactive storage built on `DashMap` +
//!   `tokio::sync::watch`. Every accepted change produces a new record
//!   `Arc`, so consumers can compare by pointer.
//!
//! - **[`CapabilityResolver`]**: program-dependent constraints. The active
//!   program decides which controls are writable and within which bounds.
//!
//! - **[`Command`]**: typed writes routed through an `mpsc` channel to the
//!   coordinator's processor, pre-flight checked and classified on failure.
//!
//! - **[`OptimisticOverlay`]**: accepted command values shown until the
//!   appliance confirms or contradicts them.

pub mod capability;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod merge;
pub mod model;
pub mod overlay;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use capability::{CapabilityResolver, PropertyCapability, Resolution, ResolutionSource};
pub use command::{Command, CommandOutcome};
pub use config::CoordinatorConfig;
pub use coordinator::{ConnectionState, Coordinator, RefreshReport};
pub use error::{CommandRejection, CoreError, RejectionKind};
pub use overlay::OptimisticOverlay;
pub use store::{ApplianceStore, MergeOutcome, StateChange, UpdateSource};
pub use stream::ApplianceStream;

pub use model::{ApplianceId, ApplianceRecord, Connectivity, PropertyPath};
