// ── Capability schema entries ──
//
// Typed view over one entry of the vendor capability schema. The schema is
// kept as raw JSON on the record; this is parsed on demand.

use serde_json::{Map, Value};

use crate::model::PropertyPath;

pub(crate) const DEFAULT_MIN: f64 = 0.0;
pub(crate) const DEFAULT_MAX: f64 = 100.0;
pub(crate) const DEFAULT_STEP: f64 = 1.0;

/// One property's capability description, or a per-program override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyCapability {
    /// `read`, `write`, `readwrite`, or `constant`.
    pub access: Option<String>,
    /// Vendor `type`: `number`, `temperature`, `boolean`, `string`, `enum`, ...
    pub kind: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub default: Option<Value>,
    pub values: Option<Map<String, Value>>,
    pub disabled: bool,
}

impl PropertyCapability {
    pub fn from_value(raw: &Value) -> Option<Self> {
        let object = raw.as_object()?;
        let number = |key: &str| object.get(key).and_then(Value::as_f64);

        Some(Self {
            access: object.get("access").and_then(Value::as_str).map(str::to_owned),
            kind: object
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_ascii_lowercase),
            min: number("min"),
            max: number("max"),
            step: number("step"),
            default: object.get("default").cloned(),
            values: object.get("values").and_then(Value::as_object).cloned(),
            disabled: object.get("disabled").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    /// Look up a property's unconditional capability. Keys are tried as the
    /// full path first, then as the bare leaf name.
    pub fn lookup(capabilities: &Map<String, Value>, path: &PropertyPath) -> Option<Self> {
        path.lookup(capabilities)
            .or_else(|| capabilities.get(path.leaf()))
            .and_then(Self::from_value)
    }

    pub fn is_writable(&self) -> bool {
        self.access
            .as_deref()
            .is_some_and(|a| a.contains("write"))
    }

    pub fn is_boolean(&self) -> bool {
        self.kind.as_deref() == Some("boolean")
    }

    pub fn is_numeric(&self, path: &PropertyPath) -> bool {
        matches!(
            self.kind.as_deref(),
            Some("number" | "float" | "integer" | "int" | "temperature")
        ) || path.leaf().to_ascii_lowercase().contains("temperature")
    }

    pub fn is_enumerated(&self) -> bool {
        matches!(self.kind.as_deref(), Some("string" | "enum"))
            || self.values.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// Never zero, never negative.
pub(crate) fn sanitize_step(step: Option<f64>) -> f64 {
    match step {
        Some(s) if s > 0.0 && s.is_finite() => s,
        _ => DEFAULT_STEP,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_override_shape() {
        let cap = PropertyCapability::from_value(&json!({
            "min": 30, "max": 120, "step": 30, "disabled": false
        }))
        .unwrap();
        assert_eq!(cap.min, Some(30.0));
        assert_eq!(cap.max, Some(120.0));
        assert_eq!(cap.step, Some(30.0));
        assert!(!cap.disabled);
    }

    #[test]
    fn lookup_falls_back_to_leaf_name() {
        let caps = json!({ "antiCreaseValue": { "access": "readwrite", "type": "number" } });
        let cap = PropertyCapability::lookup(
            caps.as_object().unwrap(),
            &PropertyPath::from("userSelections/antiCreaseValue"),
        )
        .unwrap();
        assert!(cap.is_writable());
    }

    #[test]
    fn temperature_name_implies_numeric() {
        let cap = PropertyCapability::default();
        assert!(cap.is_numeric(&PropertyPath::from("targetTemperatureC")));
        assert!(!cap.is_numeric(&PropertyPath::from("cavityLight")));
    }

    #[test]
    fn step_never_zero() {
        assert_eq!(sanitize_step(Some(0.0)), 1.0);
        assert_eq!(sanitize_step(Some(-5.0)), 1.0);
        assert_eq!(sanitize_step(None), 1.0);
        assert_eq!(sanitize_step(Some(0.5)), 0.5);
    }
}
