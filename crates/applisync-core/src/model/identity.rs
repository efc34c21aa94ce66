// ── Identity and addressing types ──
//
// ApplianceId names an appliance; PropertyPath names a value inside its
// reported state. Both are cheap to clone and hash, and are used as map
// keys throughout the store, resolver cache, and overlay.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── ApplianceId ─────────────────────────────────────────────────────

/// Vendor-assigned appliance identifier, e.g.
/// `944188772_00:31862190-443E07363DAB`. Opaque to us.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplianceId(String);

impl ApplianceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplianceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ApplianceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ApplianceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl FromStr for ApplianceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl Borrow<str> for ApplianceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ── PropertyPath ────────────────────────────────────────────────────

/// A `/`-separated path into reported state, e.g.
/// `userSelections/antiCreaseValue` or `targetTemperatureC`.
///
/// The vendor uses the same notation for capability keys, so a path can
/// address either a flat slash-named key or a walk through nested objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyPath(String);

impl PropertyPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment: `userSelections/antiCreaseValue` → `antiCreaseValue`.
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Everything before the leaf, if the path has more than one segment.
    pub fn parent(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(parent, _)| parent)
    }

    pub fn is_nested(&self) -> bool {
        self.0.contains('/')
    }

    pub fn join(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            Self(segment.to_owned())
        } else {
            Self(format!("{}/{segment}", self.0))
        }
    }

    /// Look the path up in a JSON object. A flat key equal to the whole
    /// path wins over a nested walk.
    pub fn lookup<'a>(&self, root: &'a Map<String, Value>) -> Option<&'a Value> {
        if let Some(flat) = root.get(&self.0) {
            return Some(flat);
        }
        if !self.is_nested() {
            return None;
        }

        let mut segments = self.segments();
        let mut current = root.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Build the nested object this path describes, with `value` at the
    /// leaf: `a/b` + `1` → `{"a": {"b": 1}}`.
    pub fn nest(&self, value: Value) -> Map<String, Value> {
        let segments: Vec<&str> = self.segments().collect();
        let mut node = value;
        for segment in segments.iter().skip(1).rev() {
            let mut wrapper = Map::new();
            wrapper.insert((*segment).to_owned(), node);
            node = Value::Object(wrapper);
        }

        let mut root = Map::new();
        if let Some(first) = segments.first() {
            root.insert((*first).to_owned(), node);
        }
        root
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyPath {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PropertyPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for PropertyPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// Every leaf path present in a (possibly nested) partial state object.
/// Arrays are leaves.
pub fn leaf_paths(partial: &Map<String, Value>) -> Vec<PropertyPath> {
    fn walk(prefix: &PropertyPath, map: &Map<String, Value>, out: &mut Vec<PropertyPath>) {
        for (key, value) in map {
            let path = prefix.join(key);
            match value {
                Value::Object(inner) if !inner.is_empty() => walk(&path, inner, out),
                _ => out.push(path),
            }
        }
    }

    let mut out = Vec::new();
    walk(&PropertyPath::new(""), partial, &mut out);
    out
}
