use applisync_core::{ApplianceId, Coordinator, PropertyPath};

use super::print_json;
use crate::cli::PropertyArgs;
use crate::error::CliError;

pub fn handle(coordinator: &Coordinator, args: &PropertyArgs) -> Result<(), CliError> {
    let resolution = coordinator.resolve(
        &ApplianceId::from(args.appliance.as_str()),
        &PropertyPath::from(args.property.as_str()),
    )?;
    print_json(&resolution)
}
