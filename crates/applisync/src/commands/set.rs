//! `set`: send one property write through the coordinator.

use serde_json::Value;

use applisync_core::{ApplianceId, Coordinator, PropertyPath};

use super::print_json;
use crate::cli::SetArgs;
use crate::error::CliError;

pub async fn handle(coordinator: &Coordinator, args: SetArgs) -> Result<(), CliError> {
    let outcome = coordinator
        .set_property(
            ApplianceId::from(args.target.appliance),
            PropertyPath::new(args.target.property),
            parse_value(&args.value),
        )
        .await?;
    print_json(&outcome)
}

/// `60` → number, `true` → bool, `"COTTON"` or `COTTON` → string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}
