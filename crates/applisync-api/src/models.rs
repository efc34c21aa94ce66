// Appliance API response types
//
// Models for the vendor's appliance REST endpoints. Fields use
// `#[serde(default)]` liberally: the API omits fields freely across
// appliance families, and reported state is kept as raw JSON because its
// shape is family-specific.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Listing ──────────────────────────────────────────────────────────

/// One entry from `GET /appliances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceSummary {
    pub appliance_id: String,
    #[serde(default)]
    pub appliance_name: Option<String>,
    /// Family code, e.g. `"OV"` (oven), `"TD"` (dryer), `"AC"`.
    #[serde(default)]
    pub appliance_type: Option<String>,
    /// `"connected"` / `"disconnected"`; absent on some accounts.
    #[serde(default)]
    pub connection_state: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

// ── Details ──────────────────────────────────────────────────────────

/// `GET /appliances/{id}/info`: identity plus the capability schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceDetails {
    #[serde(default)]
    pub appliance_info: ApplianceInfo,
    #[serde(default)]
    pub capabilities: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceInfo {
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub pnc: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub colour: Option<String>,
}

impl ApplianceInfo {
    /// The model name, falling back to the numeric product code prefix of
    /// the appliance id (`944188772_00:31862190-...` → `944188772`) when the
    /// vendor reports none.
    pub fn model_or_pnc(&self, appliance_id: &str) -> Option<String> {
        match self.model.as_deref() {
            Some(model) if !model.is_empty() && model != "Unknown" => Some(model.to_owned()),
            _ => pnc_model(appliance_id),
        }
    }
}

fn pnc_model(appliance_id: &str) -> Option<String> {
    let prefix = appliance_id.split('_').next()?;
    (prefix.len() >= 6 && prefix.chars().all(|c| c.is_ascii_digit())).then(|| prefix.to_owned())
}

// ── State ────────────────────────────────────────────────────────────

/// `GET /appliances/{id}/state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceState {
    #[serde(default)]
    pub appliance_id: Option<String>,
    #[serde(default)]
    pub connection_state: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub properties: StateProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateProperties {
    #[serde(default)]
    pub reported: Map<String, Value>,
}

impl ApplianceState {
    /// `true` if either the envelope or the reported payload flags the
    /// appliance as disconnected.
    pub fn is_disconnected(&self) -> bool {
        let flagged = |v: Option<&str>| v.is_some_and(|s| s.eq_ignore_ascii_case("disconnected"));
        flagged(self.connection_state.as_deref())
            || flagged(
                self.properties
                    .reported
                    .get("connectivityState")
                    .and_then(Value::as_str),
            )
    }
}

// ── Commands ─────────────────────────────────────────────────────────

/// Whatever the vendor returns on an accepted command. Usually empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Token renewal ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

// ── Error body ───────────────────────────────────────────────────────

/// Error payload shape. The vendor is not consistent about `error` vs
/// `code`, so both are accepted.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}
