// ── Command value normalization ──
//
// Converts a caller-supplied value into the protocol form the vendor
// expects for a property. The overlay stores this normalized form too, so
// an authoritative echo compares equal.

use serde_json::Value;
use tracing::warn;

use super::resolver::Resolution;
use super::schema::PropertyCapability;
use crate::error::{CoreError, RejectionKind};
use crate::model::PropertyPath;

/// A JSON number, integral when both the value and the step are whole.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::as_conversions
)]
pub(crate) fn number_value(value: f64, step: f64) -> Value {
    if value.fract() == 0.0 && step.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return Value::from(value as i64);
    }
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Parse a numeric command value, accepting numeric strings.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize `value` for `property`. Numeric values are snapped to the
/// resolved step and clamped to the resolved range.
pub fn normalize(
    capability: Option<&PropertyCapability>,
    resolution: &Resolution,
    property: &PropertyPath,
    value: Value,
) -> Result<Value, CoreError> {
    let Some(capability) = capability else {
        return Ok(match value {
            Value::Bool(true) => Value::from("ON"),
            Value::Bool(false) => Value::from("OFF"),
            other => other,
        });
    };

    if capability.is_boolean() {
        return Ok(Value::Bool(match &value {
            Value::Bool(b) => *b,
            Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "on" | "1" | "yes"),
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            _ => false,
        }));
    }

    if capability.is_numeric(property) {
        let Some(number) = as_number(&value) else {
            return Err(CoreError::rejected(
                RejectionKind::TypeMismatch,
                format!("{property} expects a number, got {value}"),
            ));
        };
        let base = resolution.min;
        let step = resolution.step;
        let snapped = base + ((number - base) / step).round() * step;
        let clamped = snapped.clamp(resolution.min, resolution.max);
        return Ok(number_value(clamped, step));
    }

    if capability.is_enumerated() {
        let Some(values) = capability.values.as_ref().filter(|v| !v.is_empty()) else {
            return Ok(match value {
                Value::String(_) => value,
                other => Value::from(other.to_string()),
            });
        };
        let raw = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if values.contains_key(&raw) {
            return Ok(Value::from(raw));
        }
        if let Some(key) = values.keys().find(|k| k.eq_ignore_ascii_case(&raw)) {
            return Ok(Value::from(key.clone()));
        }
        warn!(
            property = %property,
            value = %raw,
            "value not among known options, sending as-is"
        );
        return Ok(value);
    }

    Ok(match value {
        Value::Bool(true) => Value::from("ON"),
        Value::Bool(false) => Value::from("OFF"),
        other => other,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::capability::resolver::ResolutionSource;

    fn bounds(min: f64, max: f64, step: f64) -> Resolution {
        Resolution {
            property: "p".into(),
            value: None,
            writable: true,
            min,
            max,
            step,
            source: ResolutionSource::Unconditional,
        }
    }

    fn cap(raw: Value) -> PropertyCapability {
        PropertyCapability::from_value(&raw).unwrap()
    }

    #[test]
    fn numbers_snap_to_step_then_clamp() {
        let c = cap(json!({ "type": "number", "min": 30, "max": 120, "step": 30 }));
        let path = PropertyPath::from("userSelections/antiCreaseValue");
        let r = bounds(30.0, 120.0, 30.0);

        assert_eq!(normalize(Some(&c), &r, &path, json!(70)).unwrap(), json!(60));
        assert_eq!(normalize(Some(&c), &r, &path, json!(80)).unwrap(), json!(90));
        assert_eq!(normalize(Some(&c), &r, &path, json!("500")).unwrap(), json!(120));
    }

    #[test]
    fn fractional_steps_stay_float() {
        let c = cap(json!({ "type": "temperature", "min": 5, "max": 10, "step": 0.5 }));
        let path = PropertyPath::from("targetTemperatureC");
        let out = normalize(Some(&c), &bounds(5.0, 10.0, 0.5), &path, json!(7.3)).unwrap();
        assert_eq!(out, json!(7.5));
    }

    #[test]
    fn non_numeric_for_number_is_type_mismatch() {
        let c = cap(json!({ "type": "number" }));
        let err = normalize(Some(&c), &bounds(0.0, 100.0, 1.0), &"fanSpeed".into(), json!("fast"))
            .unwrap_err();
        assert_eq!(err.rejection().unwrap().kind, RejectionKind::TypeMismatch);
    }

    #[test]
    fn enum_matches_case_insensitively() {
        let c = cap(json!({ "type": "string", "values": { "AUTO": {}, "COOL": {} } }));
        let r = bounds(0.0, 100.0, 1.0);
        let path = PropertyPath::from("mode");
        assert_eq!(normalize(Some(&c), &r, &path, json!("cool")).unwrap(), json!("COOL"));
        assert_eq!(normalize(Some(&c), &r, &path, json!("AUTO")).unwrap(), json!("AUTO"));
        assert_eq!(normalize(Some(&c), &r, &path, json!("dry")).unwrap(), json!("dry"));
    }

    #[test]
    fn booleans_accept_truthy_strings() {
        let c = cap(json!({ "type": "boolean" }));
        let r = bounds(0.0, 100.0, 1.0);
        let path = PropertyPath::from("cavityLight");
        assert_eq!(normalize(Some(&c), &r, &path, json!("on")).unwrap(), json!(true));
        assert_eq!(normalize(Some(&c), &r, &path, json!(0)).unwrap(), json!(false));
    }

    #[test]
    fn unknown_capability_maps_bool_to_on_off() {
        let r = bounds(0.0, 100.0, 1.0);
        let path = PropertyPath::from("executeCommand");
        assert_eq!(normalize(None, &r, &path, json!(true)).unwrap(), json!("ON"));
        assert_eq!(normalize(None, &r, &path, json!("START")).unwrap(), json!("START"));
    }
}
