// ── Coordinator tuning ──
//
// How often and how patiently the coordinator talks to the vendor. The
// binary builds this from the profile; core never reads config files.

use std::time::Duration;

use applisync_api::ReconnectConfig;

use crate::overlay::DEFAULT_OVERLAY_TTL;

/// Runtime settings for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Full refresh period. Zero disables the periodic task.
    pub refresh_interval: Duration,
    /// Per-call budget for details/state during setup.
    pub setup_call_timeout: Duration,
    /// Budget for the whole setup pass.
    pub setup_total_timeout: Duration,
    /// Per-appliance budget for state fetches after setup.
    pub state_fetch_timeout: Duration,

    /// Run the live-update listener at all.
    pub push_enabled: bool,
    /// Restart the listener on this period to keep the session fresh.
    /// Zero disables renewal.
    pub push_renewal_interval: Duration,
    /// Consecutive failed renewals before backing off.
    pub push_renewal_failure_limit: u32,
    pub push_renewal_backoff: Duration,
    /// How long a renewal waits for the new stream to come up.
    pub push_connect_timeout: Duration,
    /// Minimum spacing between reconnect-triggered listener restarts.
    pub push_restart_cooldown: Duration,
    pub reconnect: ReconnectConfig,

    /// Delay before re-fetching an appliance whose cycle is about to end.
    pub deferred_refresh_delay: Duration,
    pub max_deferred_refreshes: usize,

    pub manual_sync_cooldown: Duration,
    pub overlay_ttl: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(6 * 3600),
            setup_call_timeout: Duration::from_secs(12),
            setup_total_timeout: Duration::from_secs(30),
            state_fetch_timeout: Duration::from_secs(15),
            push_enabled: true,
            push_renewal_interval: Duration::from_secs(2 * 3600),
            push_renewal_failure_limit: 5,
            push_renewal_backoff: Duration::from_secs(300),
            push_connect_timeout: Duration::from_secs(30),
            push_restart_cooldown: Duration::from_secs(15 * 60),
            reconnect: ReconnectConfig::default(),
            deferred_refresh_delay: Duration::from_secs(70),
            max_deferred_refreshes: 5,
            manual_sync_cooldown: Duration::from_secs(60),
            overlay_ttl: DEFAULT_OVERLAY_TTL,
        }
    }
}
