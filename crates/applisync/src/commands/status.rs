//! `status`: every tracked appliance with connectivity and last-seen.

use serde_json::{Value, json};

use applisync_core::Coordinator;

use super::print_json;
use crate::error::CliError;

pub fn handle(coordinator: &Coordinator) -> Result<(), CliError> {
    let rows: Vec<Value> = coordinator
        .snapshot()
        .iter()
        .map(|record| {
            json!({
                "id": record.id,
                "name": record.display_name(),
                "family": record.family,
                "model": record.model,
                "connectivity": record.connectivity,
                "last_seen": record.last_seen,
                "placeholder": record.placeholder,
            })
        })
        .collect();
    print_json(&rows)
}
