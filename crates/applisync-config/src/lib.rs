//! Shared configuration for the applisync binary and embedders.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! persistence of renewed credentials, and translation to the runtime
//! configs of `applisync-api` and `applisync-core`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use applisync_api::{
    CredentialSet, CredentialSink, DEFAULT_BASE_URL, RenewalPolicy, TransportConfig,
};
use applisync_core::CoordinatorConfig;

const KEYRING_SERVICE: &str = "applisync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no {secret} configured for profile '{profile}'")]
    NoCredentials { profile: String, secret: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile, falling back to `default_profile` when `name` is
    /// `None`. Returns the resolved name alongside.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        self.profiles
            .get(&name)
            .map(|p| (name.clone(), p))
            .ok_or(ConfigError::UnknownProfile { profile: name })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Full refresh period in seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    #[serde(default = "default_push_enabled")]
    pub push_enabled: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            refresh_interval: default_refresh_interval(),
            push_enabled: default_push_enabled(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_refresh_interval() -> u64 {
    6 * 3600
}
fn default_push_enabled() -> bool {
    true
}

/// Where renewed credentials are written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStore {
    /// Plaintext in this config file.
    #[default]
    File,
    /// The OS keyring, service `applisync`.
    Keyring,
}

/// A named vendor account.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// API base URL. Defaults to the vendor's production endpoint.
    pub base_url: Option<String>,

    /// Override per-request timeout (seconds).
    pub timeout: Option<u64>,

    /// Override connect timeout (seconds).
    pub connect_timeout: Option<u64>,

    /// Override full refresh period (seconds). `0` disables it.
    pub refresh_interval: Option<u64>,

    /// Override live updates on/off.
    pub push_enabled: Option<bool>,

    /// Listener renewal period (seconds). `0` disables renewal.
    pub push_renewal_interval: Option<u64>,

    /// Minimum spacing between manual syncs (seconds).
    pub manual_sync_cooldown: Option<u64>,

    /// Renew the access token this many seconds before it expires.
    pub token_margin: Option<u64>,

    #[serde(default)]
    pub credential_store: CredentialStore,

    /// API key (plaintext; prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    pub access_token: Option<String>,
    pub access_token_env: Option<String>,

    pub refresh_token: Option<String>,
    pub refresh_token_env: Option<String>,

    /// Expiry of `access_token`, written on every renewal.
    pub token_expires_at: Option<DateTime<Utc>>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "applisync", "applisync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("applisync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load defaults, then `path`, then `APPLISYNC_`-prefixed environment
/// variables (`APPLISYNC_PROFILES__HOME__BASE_URL=...`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("APPLISYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Read only the file layer, for rewriting it without baking
/// environment overrides in.
fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Where secrets are looked up besides the config file itself.
pub trait SecretLookup {
    fn env(&self, name: &str) -> Option<String>;
    fn keyring(&self, profile: &str, entry: &str) -> Option<String>;
}

/// Process environment and the OS keyring.
pub struct SystemSecrets;

impl SecretLookup for SystemSecrets {
    fn env(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn keyring(&self, profile: &str, entry: &str) -> Option<String> {
        keyring::Entry::new(KEYRING_SERVICE, &format!("{profile}/{entry}"))
            .and_then(|e| e.get_password())
            .ok()
    }
}

fn resolve_secret(
    lookup: &dyn SecretLookup,
    profile_name: &str,
    env_name: Option<&str>,
    keyring_entry: &str,
    plaintext: Option<&str>,
) -> Result<SecretString, ConfigError> {
    // 1. Env var named by the profile
    if let Some(value) = env_name.and_then(|name| lookup.env(name)) {
        return Ok(SecretString::from(value));
    }

    // 2. System keyring
    if let Some(value) = lookup.keyring(profile_name, keyring_entry) {
        return Ok(SecretString::from(value));
    }

    // 3. Plaintext in config
    if let Some(value) = plaintext {
        return Ok(SecretString::from(value.to_owned()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
        secret: keyring_entry.into(),
    })
}

/// Resolve the profile's credential set from env, keyring, then file.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<CredentialSet, ConfigError> {
    resolve_credentials_with(profile, profile_name, &SystemSecrets)
}

pub fn resolve_credentials_with(
    profile: &Profile,
    profile_name: &str,
    lookup: &dyn SecretLookup,
) -> Result<CredentialSet, ConfigError> {
    let api_key = resolve_secret(
        lookup,
        profile_name,
        profile.api_key_env.as_deref(),
        "api-key",
        profile.api_key.as_deref(),
    )?;
    let access_token = resolve_secret(
        lookup,
        profile_name,
        profile.access_token_env.as_deref(),
        "access-token",
        profile.access_token.as_deref(),
    )?;
    let refresh_token = resolve_secret(
        lookup,
        profile_name,
        profile.refresh_token_env.as_deref(),
        "refresh-token",
        profile.refresh_token.as_deref(),
    )?;

    Ok(CredentialSet::new(
        access_token,
        refresh_token,
        api_key,
        profile.token_expires_at,
    ))
}

// ── Runtime translation ─────────────────────────────────────────────

/// The profile's API base URL, validated.
pub fn base_url(profile: &Profile) -> Result<String, ConfigError> {
    let raw = profile.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: "base_url".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(ConfigError::Validation {
            field: "base_url".into(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url.to_string())
}

pub fn transport_config(profile: &Profile, defaults: &Defaults) -> TransportConfig {
    let base = TransportConfig::default();
    TransportConfig {
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        connect_timeout: profile
            .connect_timeout
            .map_or(base.connect_timeout, Duration::from_secs),
        ..base
    }
}

pub fn renewal_policy(profile: &Profile) -> RenewalPolicy {
    let base = RenewalPolicy::default();
    RenewalPolicy {
        safety_margin: profile
            .token_margin
            .map_or(base.safety_margin, Duration::from_secs),
        ..base
    }
}

/// Build a `CoordinatorConfig` from a profile and the global defaults.
pub fn coordinator_config(profile: &Profile, defaults: &Defaults) -> CoordinatorConfig {
    let base = CoordinatorConfig::default();
    CoordinatorConfig {
        refresh_interval: Duration::from_secs(
            profile.refresh_interval.unwrap_or(defaults.refresh_interval),
        ),
        push_enabled: profile.push_enabled.unwrap_or(defaults.push_enabled),
        push_renewal_interval: profile
            .push_renewal_interval
            .map_or(base.push_renewal_interval, Duration::from_secs),
        manual_sync_cooldown: profile
            .manual_sync_cooldown
            .map_or(base.manual_sync_cooldown, Duration::from_secs),
        ..base
    }
}

// ── Credential persistence ──────────────────────────────────────────

/// Writes renewed credentials back where the profile keeps them.
pub struct ProfileCredentialSink {
    profile: String,
    store: CredentialStore,
    path: PathBuf,
}

impl ProfileCredentialSink {
    pub fn new(profile: impl Into<String>, store: CredentialStore, path: impl Into<PathBuf>) -> Self {
        Self {
            profile: profile.into(),
            store,
            path: path.into(),
        }
    }

    fn write(&self, credentials: &CredentialSet) -> Result<(), ConfigError> {
        match self.store {
            CredentialStore::Keyring => {
                for (entry, secret) in [
                    ("access-token", &credentials.access_token),
                    ("refresh-token", &credentials.refresh_token),
                ] {
                    keyring::Entry::new(KEYRING_SERVICE, &format!("{}/{entry}", self.profile))?
                        .set_password(secret.expose_secret())?;
                }
                debug!(profile = %self.profile, "credentials stored in keyring");
            }
            CredentialStore::File => {
                let mut config = read_file(&self.path)?;
                let profile = config.profiles.entry(self.profile.clone()).or_default();
                profile.access_token = Some(credentials.access_token.expose_secret().to_owned());
                profile.refresh_token = Some(credentials.refresh_token.expose_secret().to_owned());
                profile.token_expires_at = Some(credentials.expires_at);
                save_config_to(&self.path, &config)?;
                info!(
                    profile = %self.profile,
                    path = %self.path.display(),
                    expires_at = %credentials.expires_at,
                    "renewed credentials written to config"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialSink for ProfileCredentialSink {
    async fn persist(&self, credentials: &CredentialSet) -> Result<(), applisync_api::Error> {
        self.write(credentials)
            .map_err(|e| applisync_api::Error::Persistence(e.to_string()))
    }
}
