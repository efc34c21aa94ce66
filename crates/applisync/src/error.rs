//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use applisync_config::ConfigError;
use applisync_core::{CoreError, RejectionKind};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const RATE_LIMITED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(applisync::auth_failed),
        help(
            "The stored tokens were rejected.\n\
             Authorize again in the vendor's developer portal and update the\n\
             access and refresh tokens of this profile (config file or keyring)."
        )
    )]
    AuthFailed { message: String },

    #[error("No {secret} configured for profile '{profile}'")]
    #[diagnostic(
        code(applisync::no_credentials),
        help(
            "Set it in the profile, in the keyring entry 'applisync/{profile}/{secret}',\n\
             or through the environment variable the profile names."
        )
    )]
    NoCredentials { profile: String, secret: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(applisync::profile_not_found),
        help("Add a [profiles.{name}] table to {path}")
    )]
    ProfileNotFound { name: String, path: String },

    #[error("Configuration error: {0}")]
    #[diagnostic(code(applisync::config))]
    Config(String),

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(applisync::validation))]
    Validation { field: String, reason: String },

    // ── Appliances ───────────────────────────────────────────────────

    #[error("Appliance '{appliance}' not found")]
    #[diagnostic(
        code(applisync::not_found),
        help("Run: applisync status to list tracked appliances")
    )]
    NotFound { appliance: String },

    #[error("Command rejected ({kind}): {message}")]
    #[diagnostic(code(applisync::rejected))]
    Rejected { kind: RejectionKind, message: String },

    #[error("Sync is cooling down, retry in {seconds}s")]
    #[diagnostic(code(applisync::cooldown))]
    Cooldown { seconds: u64 },

    // ── Vendor ───────────────────────────────────────────────────────

    #[error("Could not reach the vendor API: {message}")]
    #[diagnostic(
        code(applisync::connection_failed),
        help("Check network connectivity; the vendor cloud may be briefly unavailable.")
    )]
    Connection { message: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(code(applisync::timeout))]
    Timeout { seconds: u64 },

    #[error("API error ({code}): {message}")]
    #[diagnostic(code(applisync::api_error))]
    Api { code: String, message: String },

    #[error("Internal error: {0}")]
    #[diagnostic(code(applisync::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(applisync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Rejected {
                kind: RejectionKind::RateLimited,
                ..
            }
            | Self::Cooldown { .. } => exit_code::RATE_LIMITED,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Connection { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationError { message, .. } => Self::AuthFailed { message },
            CoreError::TransientNetworkError { message } => Self::Connection { message },
            CoreError::Disconnected => Self::Connection {
                message: "coordinator is not running".into(),
            },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::CommandRejected(rejection) => Self::Rejected {
                kind: rejection.kind,
                message: rejection.message,
            },
            CoreError::ApplianceNotFound { appliance_id } => Self::NotFound {
                appliance: appliance_id.to_string(),
            },
            CoreError::Api {
                status,
                code,
                message,
            } => Self::Api {
                code: code.unwrap_or_else(|| status.to_string()),
                message,
            },
            CoreError::SyncCooldown { remaining_secs } => Self::Cooldown {
                seconds: remaining_secs,
            },
            CoreError::Config { message } => Self::Config(message),
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile, secret } => {
                Self::NoCredentials { profile, secret }
            }
            ConfigError::UnknownProfile { profile } => Self::ProfileNotFound {
                name: profile,
                path: applisync_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<applisync_api::Error> for CliError {
    fn from(err: applisync_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
