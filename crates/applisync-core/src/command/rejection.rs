// ── Command failure classification ──
//
// Maps a dispatcher error onto the user-facing taxonomy. Order matters:
// authentication first, then the vendor error code, then the HTTP status,
// with detail phrases refining whichever matched.

use applisync_api::Error as ApiError;

use crate::error::{CommandRejection, CoreError, RejectionKind};

const REMOTE_CONTROL_PHRASES: &[&str] = &[
    "remote control disabled",
    "remote control not enabled",
    "remote control is not enabled",
    "remote control not active",
    "remote control is not active",
    "remote control off",
    "rc disabled",
    "rc not enabled",
    "rc not active",
];

const PROGRAM_PHRASES: &[&str] = &[
    "not supported by program",
    "program does not allow",
    "not allowed in current program",
    "program restriction",
    "not available for this program",
    "program not supported",
];

const FOOD_PROBE_PHRASES: &[&str] = &[
    "food probe not inserted",
    "probe not inserted",
    "food probe not detected",
    "probe not detected",
    "food probe required",
    "probe required",
];

const DOOR_PHRASES: &[&str] = &[
    "door open",
    "door is open",
    "close door",
    "door must be closed",
    "door not closed",
];

const BUSY_PHRASES: &[&str] = &[
    "appliance busy",
    "appliance running",
    "cycle in progress",
    "operation in progress",
    "appliance active",
    "cannot change while running",
];

const LOCK_PHRASES: &[&str] = &[
    "child lock active",
    "child lock enabled",
    "safety lock active",
    "safety lock enabled",
    "control locked",
    "controls locked",
];

fn kind_from_code(code: &str) -> Option<RejectionKind> {
    match code.to_ascii_uppercase().as_str() {
        "REMOTE_CONTROL_DISABLED" | "RC_DISABLED" | "REMOTE_CONTROL_NOT_ACTIVE" => {
            Some(RejectionKind::RemoteControlDisabled)
        }
        "APPLIANCE_OFFLINE" | "DEVICE_OFFLINE" | "CONNECTION_LOST" => {
            Some(RejectionKind::ApplianceOffline)
        }
        "RATE_LIMIT_EXCEEDED" | "RATE_LIMIT" | "TOO_MANY_REQUESTS" => {
            Some(RejectionKind::RateLimited)
        }
        "COMMAND_VALIDATION_ERROR" | "VALIDATION_ERROR" | "INVALID_COMMAND" => {
            Some(RejectionKind::Validation)
        }
        _ => None,
    }
}

fn kind_from_status(status: u16) -> Option<RejectionKind> {
    match status {
        403 => Some(RejectionKind::RemoteControlDisabled),
        406 => Some(RejectionKind::Validation),
        429 => Some(RejectionKind::RateLimited),
        503 => Some(RejectionKind::ApplianceOffline),
        _ => None,
    }
}

fn kind_from_detail(detail: &str) -> Option<RejectionKind> {
    let lower = detail.to_ascii_lowercase();
    let any = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

    if lower.contains("invalid step") {
        Some(RejectionKind::InvalidStep)
    } else if lower.contains("type mismatch") {
        Some(RejectionKind::TypeMismatch)
    } else if any(REMOTE_CONTROL_PHRASES) {
        Some(RejectionKind::RemoteControlDisabled)
    } else if lower.contains("temporary_locked") || lower.contains("temporary lock") {
        Some(RejectionKind::TemporarilyLocked)
    } else if any(PROGRAM_PHRASES) {
        Some(RejectionKind::ProgramRestriction)
    } else if any(FOOD_PROBE_PHRASES) {
        Some(RejectionKind::FoodProbeNotInserted)
    } else if any(DOOR_PHRASES) {
        Some(RejectionKind::DoorOpen)
    } else if any(BUSY_PHRASES) {
        Some(RejectionKind::ApplianceBusy)
    } else if any(LOCK_PHRASES) {
        Some(RejectionKind::ControlsLocked)
    } else {
        None
    }
}

/// Classify a failed command dispatch. `step` is the resolved step of
/// the property, quoted back in invalid-step messages.
pub fn classify(err: ApiError, step: Option<f64>) -> CoreError {
    if err.is_auth_failure() {
        return CoreError::from(err);
    }
    if err.status() == Some(401) {
        return CoreError::AuthenticationError {
            message: err.to_string(),
            reauth_required: false,
        };
    }

    let (status, code, message, detail) = match err {
        ApiError::Api {
            status,
            code,
            message,
            detail,
        } => (status, code, message, detail),
        other => {
            return match CoreError::from(other) {
                transient @ (CoreError::TransientNetworkError { .. }
                | CoreError::Timeout { .. }) => transient,
                other => CoreError::CommandRejected(CommandRejection {
                    kind: RejectionKind::Other,
                    message: other.to_string(),
                    status: None,
                    code: None,
                    detail: None,
                }),
            };
        }
    };

    // A validation error whose text talks about remote control is really
    // a remote-control rejection.
    let text = detail.as_deref().unwrap_or(&message);
    let validation_about_rc = code
        .as_deref()
        .is_some_and(|c| c.eq_ignore_ascii_case("COMMAND_VALIDATION_ERROR"))
        && text.to_ascii_lowercase().contains("remote control");

    let base = code
        .as_deref()
        .and_then(kind_from_code)
        .or_else(|| kind_from_status(status));
    let kind = if validation_about_rc {
        RejectionKind::RemoteControlDisabled
    } else {
        kind_from_detail(text).or(base).unwrap_or(RejectionKind::Other)
    };

    let user_message = match (kind, step) {
        (RejectionKind::InvalidStep, Some(step)) => {
            format!("This appliance requires increments of {step}.")
        }
        (RejectionKind::Other, _) => message.clone(),
        _ => kind.user_message().to_owned(),
    };

    CoreError::CommandRejected(CommandRejection {
        kind,
        message: user_message,
        status: Some(status),
        code,
        detail,
    })
}
