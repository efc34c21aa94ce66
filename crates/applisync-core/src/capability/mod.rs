// ── Capability resolution ──
//
// Program-dependent constraints: where the active program lives, which
// overrides apply to it, and how command values are normalized against
// the result.

pub mod format;
pub mod locate;
mod resolver;
mod schema;

pub use locate::{LocatorChain, ProgramLocation};
pub use resolver::{CLAMP_DISABLED_CONTROLS, CapabilityResolver, Resolution, ResolutionSource};
pub use schema::PropertyCapability;
