//! Command dispatch: bridges CLI args -> coordinator calls -> JSON output.

pub mod resolve;
pub mod set;
pub mod status;
pub mod sync;
pub mod watch;

use applisync_core::Coordinator;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::runtime::{Mode, build_coordinator};

/// Dispatch a vendor-bound command to its handler. The coordinator is
/// started first and always stopped afterwards.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    let mode = match cmd {
        Command::Watch => Mode::Daemon,
        _ => Mode::Oneshot,
    };
    let coordinator = build_coordinator(global, mode)?;
    coordinator.start().await?;

    let result = run(cmd, &coordinator).await;
    coordinator.stop().await;
    result
}

async fn run(cmd: Command, coordinator: &Coordinator) -> Result<(), CliError> {
    match cmd {
        Command::Watch => watch::handle(coordinator).await,
        Command::Status => status::handle(coordinator),
        Command::Resolve(args) => resolve::handle(coordinator, &args),
        Command::Set(args) => set::handle(coordinator, args).await,
        Command::Sync(args) => sync::handle(coordinator, &args).await,
        // Handled before dispatch
        Command::Completions(_) => Ok(()),
    }
}

/// Pretty-print a JSON value to stdout.
pub(crate) fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
