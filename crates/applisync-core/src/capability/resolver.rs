// ── Capability resolution ──
//
// Turns (record, property) into the writable range the property has right
// now, given whichever program is active. Results are cached per
// (appliance, property, program) and dropped when the program or the
// property's reported value changes.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::format::number_value;
use super::locate::LocatorChain;
use super::schema::{DEFAULT_MAX, DEFAULT_MIN, PropertyCapability, sanitize_step};
use crate::model::{ApplianceId, ApplianceRecord, PropertyPath};

/// When a program disables a property, keep the control writable but pin
/// its range to a single value instead of hiding it.
pub const CLAMP_DISABLED_CONTROLS: bool = true;

// ── Resolution ───────────────────────────────────────────────────────

/// Which rule produced a [`Resolution`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResolutionSource {
    /// Unconditional schema bounds: no program is active, or the active
    /// program has no override for the property.
    Unconditional,
    /// The property is itself a program selector.
    Selector,
    ProgramOverride {
        program: String,
        location: &'static str,
    },
    /// The active program explicitly disables the property.
    ProgramDisabled { program: String },
    /// A program is active but no known schema location describes it, so
    /// unconditional bounds apply.
    SchemaMismatch { program: String },
    /// The schema has no entry for this property.
    Unknown,
}

/// Effective constraints for one property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub property: PropertyPath,
    pub value: Option<Value>,
    pub writable: bool,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub source: ResolutionSource,
}

impl Resolution {
    pub fn is_program_disabled(&self) -> bool {
        matches!(self.source, ResolutionSource::ProgramDisabled { .. })
    }

    pub fn contains(&self, value: f64) -> bool {
        // Tolerate float noise from vendor steps like 0.1.
        let epsilon = self.step * 1e-6;
        value >= self.min - epsilon && value <= self.max + epsilon
    }
}

// ── Resolver ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    appliance: ApplianceId,
    property: PropertyPath,
    program: Option<String>,
}

struct Cached {
    /// Reported value the resolution was computed against.
    reported: Option<Value>,
    resolution: Resolution,
}

/// Resolves program-dependent capability constraints.
#[derive(Default)]
pub struct CapabilityResolver {
    cache: DashMap<CacheKey, Cached>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CapabilityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, record: &ApplianceRecord, property: &PropertyPath) -> Resolution {
        let chain = LocatorChain::for_family(record.family.as_deref());
        let program = chain.active_program(&record.reported).map(|(_, p)| p);
        let reported = record.reported_value(property).cloned();

        let key = CacheKey {
            appliance: record.id.clone(),
            property: property.clone(),
            program: program.map(str::to_owned),
        };

        if let Some(hit) = self.cache.get(&key) {
            if hit.reported == reported {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return hit.resolution.clone();
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let resolution = compute(&chain, record, property, program, reported.clone());
        debug!(
            appliance = %record.id,
            property = %property,
            program = program.unwrap_or("-"),
            source = ?resolution.source,
            "resolved capability"
        );
        self.cache.insert(
            key,
            Cached {
                reported,
                resolution: resolution.clone(),
            },
        );
        resolution
    }

    /// Drop cached entries affected by a state change. A change to any
    /// program selector drops everything for the appliance.
    pub fn invalidate(&self, appliance: &ApplianceId, changed: &[PropertyPath]) {
        if changed.is_empty() {
            return;
        }
        let chain = LocatorChain::for_family(None);
        if changed.iter().any(|p| chain.is_selector(p)) {
            self.invalidate_appliance(appliance);
            return;
        }
        self.cache
            .retain(|k, _| &k.appliance != appliance || !changed.contains(&k.property));
    }

    /// Drop everything cached for one appliance (new schema, removal).
    pub fn invalidate_appliance(&self, appliance: &ApplianceId) {
        self.cache.retain(|k, _| &k.appliance != appliance);
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

fn compute(
    chain: &LocatorChain,
    record: &ApplianceRecord,
    property: &PropertyPath,
    program: Option<&str>,
    value: Option<Value>,
) -> Resolution {
    let schema = PropertyCapability::lookup(&record.capabilities, property);
    let base = schema.clone().unwrap_or_default();

    let unconditional = |source: ResolutionSource, value: Option<Value>| Resolution {
        property: property.clone(),
        value,
        writable: schema.as_ref().is_some_and(PropertyCapability::is_writable),
        min: base.min.unwrap_or(DEFAULT_MIN),
        max: base.max.unwrap_or(DEFAULT_MAX),
        step: sanitize_step(base.step),
        source,
    };

    if chain.is_selector(property) {
        return Resolution {
            writable: true,
            ..unconditional(ResolutionSource::Selector, value)
        };
    }

    let Some(program) = program else {
        let source = if schema.is_some() {
            ResolutionSource::Unconditional
        } else {
            ResolutionSource::Unknown
        };
        return unconditional(source, value);
    };

    let Some((location, overrides)) = chain.program_overrides(&record.capabilities, program)
    else {
        let source = ResolutionSource::SchemaMismatch {
            program: program.to_owned(),
        };
        return unconditional(source, value);
    };

    let entry = overrides
        .get(property.as_str())
        .or_else(|| overrides.get(property.leaf()))
        .and_then(PropertyCapability::from_value);

    match entry {
        // The program does not constrain this property.
        None => unconditional(ResolutionSource::Unconditional, value),
        Some(entry) if entry.disabled => {
            let numeric = base.is_numeric(property) || base.min.is_some() || base.max.is_some();
            let min = entry.min.or(base.min).unwrap_or(DEFAULT_MIN);
            let step = sanitize_step(entry.step.or(base.step));
            disabled(property, program, min, step, numeric, value)
        }
        Some(entry) => Resolution {
            property: property.clone(),
            value,
            writable: schema.as_ref().is_none_or(PropertyCapability::is_writable),
            min: entry.min.or(base.min).unwrap_or(DEFAULT_MIN),
            max: entry.max.or(base.max).unwrap_or(DEFAULT_MAX),
            step: sanitize_step(entry.step.or(base.step)),
            source: ResolutionSource::ProgramOverride {
                program: program.to_owned(),
                location: location.selector(),
            },
        },
    }
}

fn disabled(
    property: &PropertyPath,
    program: &str,
    min: f64,
    step: f64,
    numeric: bool,
    value: Option<Value>,
) -> Resolution {
    let source = ResolutionSource::ProgramDisabled {
        program: program.to_owned(),
    };
    if !CLAMP_DISABLED_CONTROLS {
        return Resolution {
            property: property.clone(),
            value,
            writable: false,
            min,
            max: min,
            step,
            source,
        };
    }

    Resolution {
        property: property.clone(),
        value: if numeric { Some(number_value(min, step)) } else { value },
        writable: true,
        min,
        max: min,
        step,
        source,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    use super::*;

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    fn dryer(program: &str) -> ApplianceRecord {
        let mut record = ApplianceRecord::placeholder("D1".into(), None, Some("TD".into()));
        record.placeholder = false;
        record.capabilities = object(json!({
            "userSelections/antiCreaseValue": {
                "access": "readwrite", "type": "number", "min": 0, "max": 120, "step": 30
            },
            "userSelections/programUID": {
                "access": "readwrite",
                "type": "string",
                "values": {
                    "COTTON_PR_COTTONSECO": {
                        "userSelections/antiCreaseValue": { "min": 30, "max": 120, "step": 30, "disabled": false }
                    },
                    "SHOES_PR_RUNNINGSHOES": {
                        "userSelections/antiCreaseValue": { "disabled": true },
                        "userSelections/drynessValue": { "min": 1, "max": 3, "step": 1 }
                    },
                    "DELICATES_PR_SILK": {
                        "userSelections/drynessValue": { "min": 1, "max": 2, "step": 1 }
                    }
                }
            }
        }));
        record.reported = object(json!({
            "userSelections": { "programUID": program, "antiCreaseValue": 60 }
        }));
        record
    }

    fn oven(program: Option<&str>) -> ApplianceRecord {
        let mut record = ApplianceRecord::placeholder("O1".into(), None, Some("OV".into()));
        record.placeholder = false;
        record.capabilities = object(json!({
            "targetTemperatureC": { "access": "readwrite", "type": "temperature", "min": 30, "max": 230, "step": 5 },
            "cavityLight": { "access": "readwrite", "type": "boolean" },
            "program": {
                "access": "readwrite",
                "values": {
                    "DEFROST": { "targetTemperatureC": { "min": 30, "max": 60, "step": 5, "disabled": false } },
                    "GRILL": { "targetTemperatureC": { "disabled": true, "step": 0 } }
                }
            }
        }));
        if let Some(program) = program {
            record.reported.insert("program".into(), json!(program));
        }
        record.reported.insert("targetTemperatureC".into(), json!(180));
        record
    }

    #[test]
    fn no_program_uses_unconditional_bounds() {
        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(&oven(None), &"targetTemperatureC".into());
        assert_eq!(r.source, ResolutionSource::Unconditional);
        assert_eq!((r.min, r.max, r.step), (30.0, 230.0, 5.0));
        assert!(r.writable);
    }

    #[test]
    fn flat_program_override_applies() {
        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(&oven(Some("DEFROST")), &"targetTemperatureC".into());
        assert_eq!((r.min, r.max, r.step), (30.0, 60.0, 5.0));
        assert!(matches!(r.source, ResolutionSource::ProgramOverride { location: "program", .. }));
        assert_eq!(r.value, Some(json!(180)));
    }

    #[test]
    fn override_at_second_location_is_found() {
        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(
            &dryer("COTTON_PR_COTTONSECO"),
            &"userSelections/antiCreaseValue".into(),
        );
        assert_eq!((r.min, r.max, r.step), (30.0, 120.0, 30.0));
        assert!(matches!(
            r.source,
            ResolutionSource::ProgramOverride { location: "userSelections/programUID", .. }
        ));
    }

    #[test]
    fn disabled_property_is_clamped_not_hidden() {
        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(&oven(Some("GRILL")), &"targetTemperatureC".into());
        assert!(r.writable);
        assert!(r.is_program_disabled());
        assert_eq!(r.min, 30.0);
        assert_eq!(r.max, 30.0);
        assert_eq!(r.step, 1.0);
        assert_eq!(r.value, Some(json!(30)));
    }

    #[test]
    fn explicitly_disabled_property_is_clamped_at_min() {
        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(
            &dryer("SHOES_PR_RUNNINGSHOES"),
            &"userSelections/antiCreaseValue".into(),
        );
        assert!(r.is_program_disabled());
        assert!(r.writable);
        assert_eq!((r.min, r.max), (0.0, 0.0));
        assert_eq!(r.value, Some(json!(0)));
    }

    #[test]
    fn numeric_property_missing_from_program_keeps_base_bounds() {
        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(
            &dryer("DELICATES_PR_SILK"),
            &"userSelections/antiCreaseValue".into(),
        );
        assert_eq!(r.source, ResolutionSource::Unconditional);
        assert!(r.writable);
        assert_eq!((r.min, r.max, r.step), (0.0, 120.0, 30.0));
        assert_eq!(r.value, Some(json!(60)));
    }

    #[test]
    fn program_overriding_only_other_controls_leaves_temperature_free() {
        let mut record = oven(Some("BAKE"));
        record.capabilities["program"]["values"]
            .as_object_mut()
            .unwrap()
            .insert("BAKE".into(), json!({ "cavityLight": { "disabled": false } }));

        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(&record, &"targetTemperatureC".into());
        assert_eq!(r.source, ResolutionSource::Unconditional);
        assert_eq!((r.min, r.max), (30.0, 230.0));
        assert_eq!(r.value, Some(json!(180)));
    }

    #[test]
    fn boolean_not_listed_by_program_stays_unconditional() {
        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(&oven(Some("DEFROST")), &"cavityLight".into());
        assert_eq!(r.source, ResolutionSource::Unconditional);
        assert!(r.writable);
    }

    #[test]
    fn selector_is_always_writable() {
        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(
            &dryer("SHOES_PR_RUNNINGSHOES"),
            &"userSelections/programUID".into(),
        );
        assert_eq!(r.source, ResolutionSource::Selector);
        assert!(r.writable);
        assert_eq!(r.value, Some(json!("SHOES_PR_RUNNINGSHOES")));
    }

    #[test]
    fn unknown_program_is_schema_mismatch() {
        let resolver = CapabilityResolver::new();
        let r = resolver.resolve(&oven(Some("PIZZA")), &"targetTemperatureC".into());
        assert_eq!(
            r.source,
            ResolutionSource::SchemaMismatch {
                program: "PIZZA".into()
            }
        );
        assert_eq!((r.min, r.max), (30.0, 230.0));
    }

    #[test]
    fn cache_hits_until_value_or_program_changes() {
        let resolver = CapabilityResolver::new();
        let property = PropertyPath::from("userSelections/antiCreaseValue");
        let cotton = dryer("COTTON_PR_COTTONSECO");

        resolver.resolve(&cotton, &property);
        resolver.resolve(&cotton, &property);
        assert_eq!(resolver.cache_stats(), (1, 1));

        let mut changed = cotton.clone();
        changed
            .reported
            .insert("userSelections".into(), json!({ "programUID": "COTTON_PR_COTTONSECO", "antiCreaseValue": 90 }));
        let r = resolver.resolve(&changed, &property);
        assert_eq!(r.value, Some(json!(90)));
        assert_eq!(resolver.cache_stats(), (1, 2));

        let shoes = dryer("SHOES_PR_RUNNINGSHOES");
        assert!(resolver.resolve(&shoes, &property).is_program_disabled());
    }

    #[test]
    fn selector_change_invalidates_appliance() {
        let resolver = CapabilityResolver::new();
        let cotton = dryer("COTTON_PR_COTTONSECO");
        resolver.resolve(&cotton, &"userSelections/antiCreaseValue".into());
        resolver.resolve(&cotton, &"userSelections/drynessValue".into());
        assert_eq!(resolver.cached_entries(), 2);

        resolver.invalidate(&cotton.id, &["userSelections/programUID".into()]);
        assert_eq!(resolver.cached_entries(), 0);
    }
}
