// ── Command API ──
//
// All writes flow through the `Command` enum. The coordinator's processor
// task runs pre-flight checks against the cached record, normalizes the
// value, builds the vendor body, and dispatches it exactly once.

pub mod rejection;

use serde::Serialize;
use serde_json::Value;

use crate::capability::{PropertyCapability, Resolution, format};
use crate::error::{CoreError, RejectionKind};
use crate::model::{ApplianceId, ApplianceRecord, PropertyPath};

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandOutcome, CoreError>>,
}

/// All write operations against an appliance.
#[derive(Debug, Clone)]
pub enum Command {
    /// Set one property, e.g. `userSelections/antiCreaseValue` to `60`.
    SetProperty {
        appliance: ApplianceId,
        property: PropertyPath,
        value: Value,
    },
}

/// What an accepted command did. `value` is the normalized value that was
/// sent and is now shown optimistically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub appliance: ApplianceId,
    pub property: PropertyPath,
    pub value: Value,
}

// ── Pre-flight ───────────────────────────────────────────────────────

/// Local checks that would make the vendor reject the command anyway.
/// Returns the normalized value on success.
pub(crate) fn prepare(
    record: &ApplianceRecord,
    property: &PropertyPath,
    resolution: &Resolution,
    value: Value,
) -> Result<Value, CoreError> {
    if record.is_disconnected() {
        return Err(CoreError::rejected(
            RejectionKind::ApplianceOffline,
            RejectionKind::ApplianceOffline.user_message(),
        ));
    }

    if record.remote_control_enabled() == Some(false) {
        return Err(CoreError::rejected(
            RejectionKind::RemoteControlDisabled,
            RejectionKind::RemoteControlDisabled.user_message(),
        ));
    }

    if resolution.is_program_disabled() {
        return Err(CoreError::rejected(
            RejectionKind::ProgramRestriction,
            format!("{property} is not supported by the current program"),
        ));
    }

    let capability = PropertyCapability::lookup(&record.capabilities, property);
    let numeric = capability
        .as_ref()
        .is_some_and(|c| c.is_numeric(property));
    if numeric {
        if let Some(requested) = format::as_number(&value) {
            if !resolution.contains(requested) {
                return Err(CoreError::rejected(
                    RejectionKind::Validation,
                    format!(
                        "{property} must be between {} and {}, got {requested}",
                        resolution.min, resolution.max
                    ),
                ));
            }
        }
    }

    format::normalize(capability.as_ref(), resolution, property, value)
}

/// Build the vendor body for a property write. Writes under
/// `userSelections` carry the active `programUID` alongside.
pub(crate) fn build_body(record: &ApplianceRecord, property: &PropertyPath, value: Value) -> Value {
    let mut body = property.nest(value);

    if property.parent() == Some("userSelections") && property.leaf() != "programUID" {
        let program = record
            .reported_value(&PropertyPath::from("userSelections/programUID"))
            .and_then(Value::as_str);
        if let (Some(program), Some(Value::Object(selections))) =
            (program, body.get_mut("userSelections"))
        {
            selections.insert("programUID".into(), Value::from(program));
        }
    }

    Value::Object(body)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::capability::CapabilityResolver;
    use crate::model::Connectivity;

    fn dryer() -> ApplianceRecord {
        let mut record = ApplianceRecord::placeholder("D1".into(), None, Some("TD".into()));
        record.placeholder = false;
        record.connectivity = Connectivity::Connected;
        record.capabilities = json!({
            "userSelections/antiCreaseValue": { "access": "readwrite", "type": "number", "min": 30, "max": 120, "step": 30 },
            "userSelections/programUID": {
                "access": "readwrite",
                "values": {
                    "COTTON_PR_COTTONSECO": {
                        "userSelections/antiCreaseValue": { "min": 30, "max": 120, "step": 30 }
                    },
                    "SHOES_PR_RUNNINGSHOES": {
                        "userSelections/antiCreaseValue": { "disabled": true },
                        "userSelections/drynessValue": { "min": 1, "max": 3 }
                    }
                }
            }
        })
        .as_object()
        .unwrap()
        .clone();
        record.reported = json!({
            "remoteControl": "ENABLED",
            "userSelections": { "programUID": "COTTON_PR_COTTONSECO", "antiCreaseValue": 30 }
        })
        .as_object()
        .unwrap()
        .clone();
        record
    }

    fn check(record: &ApplianceRecord, property: &str, value: Value) -> Result<Value, CoreError> {
        let property = PropertyPath::from(property);
        let resolution = CapabilityResolver::new().resolve(record, &property);
        prepare(record, &property, &resolution, value)
    }

    fn kind(result: Result<Value, CoreError>) -> RejectionKind {
        result.unwrap_err().rejection().unwrap().kind
    }

    #[test]
    fn user_selection_body_carries_program() {
        let record = dryer();
        let body = build_body(&record, &"userSelections/antiCreaseValue".into(), json!(60));
        assert_eq!(
            body,
            json!({ "userSelections": { "antiCreaseValue": 60, "programUID": "COTTON_PR_COTTONSECO" } })
        );
    }

    #[test]
    fn flat_body_is_single_key() {
        let body = build_body(&dryer(), &"cavityLight".into(), json!(true));
        assert_eq!(body, json!({ "cavityLight": true }));
    }

    #[test]
    fn valid_value_is_normalized() {
        assert_eq!(check(&dryer(), "userSelections/antiCreaseValue", json!(65)).unwrap(), json!(60));
    }

    #[test]
    fn out_of_range_is_validation() {
        assert_eq!(
            kind(check(&dryer(), "userSelections/antiCreaseValue", json!(500))),
            RejectionKind::Validation
        );
    }

    #[test]
    fn offline_appliance_rejected() {
        let mut record = dryer();
        record.connectivity = Connectivity::Disconnected;
        assert_eq!(
            kind(check(&record, "userSelections/antiCreaseValue", json!(60))),
            RejectionKind::ApplianceOffline
        );
    }

    #[test]
    fn remote_control_disabled_rejected() {
        let mut record = dryer();
        record.reported.insert("remoteControl".into(), json!("DISABLED"));
        assert_eq!(
            kind(check(&record, "userSelections/antiCreaseValue", json!(60))),
            RejectionKind::RemoteControlDisabled
        );
    }

    #[test]
    fn program_disabled_property_rejected() {
        let mut record = dryer();
        record.reported.insert(
            "userSelections".into(),
            json!({ "programUID": "SHOES_PR_RUNNINGSHOES" }),
        );
        assert_eq!(
            kind(check(&record, "userSelections/antiCreaseValue", json!(30))),
            RejectionKind::ProgramRestriction
        );
    }
}
