//! `watch`: stream state changes as JSON lines until Ctrl-C.
//!
//! Two kinds of line are printed: `roster` whenever the set of tracked
//! appliances changes, and `change` for every state change.

use serde_json::{Map, Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use applisync_core::{ApplianceId, ApplianceStream, ConnectionState, Coordinator, StateChange};

use crate::error::CliError;

pub async fn handle(coordinator: &Coordinator) -> Result<(), CliError> {
    let mut changes = coordinator.changes();
    let mut state = coordinator.connection_state();
    let mut appliances = coordinator.appliances();

    let mut roster = sorted_ids(&appliances);
    println!("{}", render_roster(&appliances));
    info!(appliances = roster.len(), "watching, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                if *state.borrow_and_update() == ConnectionState::ReauthRequired {
                    return Err(CliError::AuthFailed {
                        message: "credentials were rejected while watching".into(),
                    });
                }
            }
            snapshot = appliances.changed() => {
                if snapshot.is_none() {
                    return Ok(());
                }
                let ids = sorted_ids(&appliances);
                if ids != roster {
                    roster = ids;
                    println!("{}", render_roster(&appliances));
                }
            }
            change = changes.recv() => match change {
                Ok(change) => println!("{}", render_change(coordinator, &change)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "output fell behind, changes dropped"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn sorted_ids(appliances: &ApplianceStream) -> Vec<ApplianceId> {
    let mut ids = appliances.ids();
    ids.sort();
    ids
}

fn render_roster(appliances: &ApplianceStream) -> Value {
    let mut entries: Vec<Value> = appliances
        .current()
        .iter()
        .map(|record| {
            json!({
                "id": record.id,
                "name": record.display_name(),
                "connectivity": record.connectivity,
            })
        })
        .collect();
    entries.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));

    json!({
        "event": "roster",
        "connected": appliances.connected(),
        "appliances": entries,
    })
}

/// One JSON line: the change plus the new value of every changed path.
fn render_change(coordinator: &Coordinator, change: &StateChange) -> Value {
    let record = coordinator.get(&change.appliance_id);
    let values: Map<String, Value> = change
        .changed
        .iter()
        .map(|path| {
            let value = record
                .as_ref()
                .and_then(|r| r.reported_value(path).cloned())
                .unwrap_or(Value::Null);
            (path.to_string(), value)
        })
        .collect();

    json!({
        "event": "change",
        "appliance": change.appliance_id,
        "source": change.source.to_string(),
        "revision": change.revision,
        "connectivity": change.connectivity,
        "values": values,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use applisync_core::{ApplianceRecord, ApplianceStore, Connectivity, UpdateSource};

    use super::*;

    #[test]
    fn roster_lists_appliances_in_id_order() {
        let store = ApplianceStore::new();
        for (id, connectivity) in [("B2", Connectivity::Disconnected), ("A1", Connectivity::Connected)] {
            let mut record = ApplianceRecord::placeholder(id.into(), Some(format!("Unit {id}")), None);
            record.connectivity = connectivity;
            store.insert(record, UpdateSource::Setup);
        }

        let appliances = store.subscribe();
        let line = render_roster(&appliances);
        assert_eq!(line["event"], "roster");
        assert_eq!(line["connected"], 1);
        assert_eq!(line["appliances"][0]["id"], "A1");
        assert_eq!(line["appliances"][1]["connectivity"], "disconnected");
        assert_eq!(
            sorted_ids(&appliances),
            vec![ApplianceId::from("A1"), ApplianceId::from("B2")]
        );
    }
}
