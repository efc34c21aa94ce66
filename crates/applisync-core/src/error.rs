// ── Core error types ──
//
// User-facing errors from applisync-core. Consumers never see raw HTTP
// bodies: the `From<applisync_api::Error>` impl folds transport failures
// into the four-way taxonomy (authentication, transient, rejection,
// local), and command failures go through `command::rejection::classify`.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::model::ApplianceId;

// ── Command rejections ───────────────────────────────────────────────

/// Why the vendor (or our own pre-flight check) refused a command.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectionKind {
    RemoteControlDisabled,
    ApplianceOffline,
    RateLimited,
    Validation,
    InvalidStep,
    TypeMismatch,
    TemporarilyLocked,
    ProgramRestriction,
    FoodProbeNotInserted,
    DoorOpen,
    ApplianceBusy,
    ControlsLocked,
    Other,
}

impl RejectionKind {
    /// Fixed, user-presentable explanation.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::RemoteControlDisabled => {
                "Remote control is disabled. Enable it on the appliance's control panel."
            }
            Self::ApplianceOffline => {
                "Appliance is offline. Check that it is powered on and connected."
            }
            Self::RateLimited => "Too many commands sent. Wait a moment and try again.",
            Self::Validation => "The value is not valid for this appliance right now.",
            Self::InvalidStep => "The value does not match the allowed step size.",
            Self::TypeMismatch => "The value has the wrong type for this setting.",
            Self::TemporarilyLocked => {
                "Appliance is temporarily locked. Wait for it to finish its current operation."
            }
            Self::ProgramRestriction => "This setting is not supported by the current program.",
            Self::FoodProbeNotInserted => "Insert the food probe before using this setting.",
            Self::DoorOpen => "Close the appliance door and try again.",
            Self::ApplianceBusy => "Appliance is busy. Wait for the current cycle to finish.",
            Self::ControlsLocked => "Controls are locked. Disable child lock on the appliance.",
            Self::Other => "The appliance rejected the command.",
        }
    }
}

/// A structured command rejection, with the vendor's raw fields kept
/// verbatim for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRejection {
    pub kind: RejectionKind,
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub detail: Option<String>,
}

impl CommandRejection {
    /// A rejection raised locally, before anything was sent.
    pub fn local(kind: RejectionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
            detail: None,
        }
    }
}

impl fmt::Display for CommandRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)?;
        if let Some(ref detail) = self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

// ── CoreError ────────────────────────────────────────────────────────

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Credential flow ──────────────────────────────────────────────
    /// Renewal failed. When `reauth_required` is set the user must
    /// authorize again before anything else can work.
    #[error("Authentication failed: {message}")]
    AuthenticationError {
        message: String,
        reauth_required: bool,
    },

    // ── Transient ────────────────────────────────────────────────────
    #[error("Network error (will retry): {message}")]
    TransientNetworkError { message: String },

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Commands ─────────────────────────────────────────────────────
    #[error("Command rejected: {0}")]
    CommandRejected(CommandRejection),

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Appliance not found: {appliance_id}")]
    ApplianceNotFound { appliance_id: ApplianceId },

    #[error("Appliance API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Coordinator is not running")]
    Disconnected,

    #[error("Manual sync is rate limited, try again in {remaining_secs}s")]
    SyncCooldown { remaining_secs: u64 },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// `true` when only a new user authorization can resolve this.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationError {
                reauth_required: true,
                ..
            }
        )
    }

    /// `true` for failures that the next cycle is expected to fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientNetworkError { .. } | Self::Timeout { .. }
        )
    }

    pub fn rejection(&self) -> Option<&CommandRejection> {
        match self {
            Self::CommandRejected(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn rejected(kind: RejectionKind, message: impl Into<String>) -> Self {
        Self::CommandRejected(CommandRejection::local(kind, message))
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<applisync_api::Error> for CoreError {
    fn from(err: applisync_api::Error) -> Self {
        use applisync_api::Error as ApiError;

        match err {
            ApiError::Authentication { message } | ApiError::RenewalRejected { message } => {
                Self::AuthenticationError {
                    message,
                    reauth_required: true,
                }
            }
            ApiError::RenewalExhausted { attempts, message } => Self::AuthenticationError {
                message: format!("renewal failed after {attempts} attempts: {message}"),
                reauth_required: false,
            },
            ApiError::Transport(ref e) if e.is_timeout() => Self::Timeout { timeout_secs: 0 },
            ApiError::Transport(e) => Self::TransientNetworkError {
                message: e.to_string(),
            },
            ApiError::Timeout { timeout_secs } => Self::Timeout { timeout_secs },
            ApiError::Stream(message) => Self::TransientNetworkError { message },
            ApiError::Api {
                status,
                code,
                message,
                ..
            } if status >= 500 => Self::TransientNetworkError {
                message: format!("HTTP {status}: {message}{}", code.map(|c| format!(" [{c}]")).unwrap_or_default()),
            },
            ApiError::Api {
                status,
                code,
                message,
                ..
            } => Self::Api {
                status,
                code,
                message,
            },
            ApiError::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::Tls(message) => Self::Config {
                message: format!("TLS error: {message}"),
            },
            ApiError::Deserialization { message, .. } => {
                Self::Internal(format!("unexpected response shape: {message}"))
            }
            ApiError::Persistence(message) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_refresh_token_requires_reauth() {
        let err = CoreError::from(applisync_api::Error::RenewalRejected {
            message: "invalid_grant".into(),
        });
        assert!(err.requires_reauth());
        assert!(!err.is_transient());
    }

    #[test]
    fn exhausted_renewal_does_not_require_reauth() {
        let err = CoreError::from(applisync_api::Error::RenewalExhausted {
            attempts: 3,
            message: "timeout".into(),
        });
        assert!(matches!(
            err,
            CoreError::AuthenticationError {
                reauth_required: false,
                ..
            }
        ));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = CoreError::from(applisync_api::Error::Api {
            status: 502,
            code: None,
            message: "Bad Gateway".into(),
            detail: None,
        });
        assert!(err.is_transient());
    }

    #[test]
    fn rejection_display_includes_detail() {
        let rejection = CommandRejection {
            kind: RejectionKind::DoorOpen,
            message: RejectionKind::DoorOpen.user_message().into(),
            status: Some(406),
            code: None,
            detail: Some("Door is open".into()),
        };
        let rendered = CoreError::CommandRejected(rejection).to_string();
        assert!(rendered.contains("door_open"));
        assert!(rendered.contains("Door is open"));
    }
}
