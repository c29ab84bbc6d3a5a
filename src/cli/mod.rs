//! CLI command implementations

pub mod error;
pub mod remediate;
pub mod run;

pub use error::CliError;
pub use remediate::TerminalRemediator;
pub use run::{Cli, Commands, OutputFormat, WatchArgs};
