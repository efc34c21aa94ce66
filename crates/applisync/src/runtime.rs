//! Profile → client → coordinator wiring.

use std::sync::Arc;

use applisync_api::{CloudClient, CredentialManager, CredentialSink, TokenEndpoint};
use applisync_config::{
    ProfileCredentialSink, base_url, config_path, coordinator_config, load_config_from,
    renewal_policy, resolve_credentials, transport_config,
};
use applisync_core::Coordinator;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// How long the coordinator will live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Long-running: live updates, renewal, periodic refresh.
    Daemon,
    /// One command, then exit. No listener, no background refresh.
    Oneshot,
}

/// Build a coordinator for the selected profile. Renewed credentials are
/// written back to where the profile keeps them.
pub fn build_coordinator(global: &GlobalOpts, mode: Mode) -> Result<Coordinator, CliError> {
    let path = global.config.clone().unwrap_or_else(config_path);
    let cfg = load_config_from(&path)?;
    let (name, profile) = cfg.profile(global.profile.as_deref())?;

    let credentials = resolve_credentials(profile, &name)?;
    let base = base_url(profile)?;
    let transport = transport_config(profile, &cfg.defaults);

    let renewer = Arc::new(TokenEndpoint::new(&base, &transport)?);
    let sink: Arc<dyn CredentialSink> = Arc::new(ProfileCredentialSink::new(
        name.clone(),
        profile.credential_store,
        path,
    ));
    let manager = Arc::new(CredentialManager::new(
        credentials,
        renewer,
        Some(sink),
        renewal_policy(profile),
    ));
    let client = Arc::new(CloudClient::new(&base, &transport, manager)?);

    let mut config = coordinator_config(profile, &cfg.defaults);
    if mode == Mode::Oneshot {
        config.push_enabled = false;
        config.refresh_interval = std::time::Duration::ZERO;
    }

    tracing::debug!(profile = %name, base_url = %base, ?mode, "coordinator configured");
    Ok(Coordinator::from_client(config, client))
}
