use serde_json::json;

use applisync_core::{ApplianceId, Coordinator};

use super::print_json;
use crate::cli::SyncArgs;
use crate::error::CliError;

pub async fn handle(coordinator: &Coordinator, args: &SyncArgs) -> Result<(), CliError> {
    let report = coordinator
        .manual_sync(&ApplianceId::from(args.appliance.as_str()))
        .await?;
    print_json(&json!({
        "appliances": report.snapshot.len(),
        "added": report.added,
        "purged": report.purged,
        "preserved": report.preserved,
        "failed": report.failed,
        "reconnected": report.reconnected,
    }))
}
