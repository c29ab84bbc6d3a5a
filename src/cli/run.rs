//! Crawl commands

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use super::remediate::{on_terminal, prompt_missing};
use super::{CliError, TerminalRemediator};
use crate::config::{
    CrawlerConfig, DEFAULT_BACKEND_BASE_URL, DEFAULT_CONFIG_FILE, DEFAULT_POE_BASE_URL,
};
use crate::crawler::{CrawlDriver, CrawlReport, RetryOrchestrator};
use crate::credentials::{load_config_file, persist_value, CredentialStore, Credentials};
use crate::fetcher::CredentialKind;
use crate::shutdown::SharedShutdown;
use crate::sink::SinkStats;

/// Guild Stash Sync CLI
#[derive(Parser, Debug)]
#[command(name = "guild-stash-sync")]
#[command(about = "Copy a guild's stash history to the league backend", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Credentials file with KEY=VALUE lines
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// PoE session ID (POESESSID cookie)
    #[arg(long, global = true, env = "POESESSID", hide_env_values = true)]
    pub session_id: Option<String>,

    /// Backend API token
    #[arg(long, global = true, env = "BPL_TOKEN", hide_env_values = true)]
    pub backend_token: Option<String>,

    /// Guild to crawl
    #[arg(long, global = true, env = "GUILD_ID")]
    pub guild_id: Option<String>,

    /// Base URL of the stash history API
    #[arg(long, global = true, default_value = DEFAULT_POE_BASE_URL)]
    pub poe_url: String,

    /// Base URL of the backend
    #[arg(long, global = true, default_value = DEFAULT_BACKEND_BASE_URL)]
    pub backend_url: String,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Hide the progress bar
    #[arg(long, global = true, default_value_t = false)]
    pub no_progress: bool,

    /// Never prompt; missing or rejected credentials end the run
    #[arg(long, global = true, default_value_t = false)]
    pub non_interactive: bool,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fill the gaps around the stored history once
    Once,

    /// Fill the gaps, then keep syncing new entries
    Watch(WatchArgs),
}

/// Watch command arguments
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Seconds between sync cycles
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_secs: u64,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}. Valid options: json, human")),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    command: &'static str,
    report: CrawlReport,
    delivery: SinkStats,
}

impl Cli {
    /// Configuration built from the global flags
    pub fn crawler_config(&self) -> CrawlerConfig {
        let config = CrawlerConfig::default()
            .with_poe_base_url(&self.poe_url)
            .with_backend_base_url(&self.backend_url);
        match &self.command {
            Commands::Once => config,
            Commands::Watch(args) => {
                config.with_watch_interval(Duration::from_secs(args.interval_secs))
            }
        }
    }

    fn explicit_value(&self, kind: CredentialKind) -> Option<&str> {
        match kind {
            CredentialKind::Session => self.session_id.as_deref(),
            CredentialKind::BackendToken => self.backend_token.as_deref(),
            CredentialKind::TargetId => self.guild_id.as_deref(),
        }
    }

    /// Resolve credentials from flags/environment, then the config file, then the terminal
    pub async fn resolve_credentials(&self) -> Result<CredentialStore, CliError> {
        let file_values = load_config_file(&self.config)?;
        let mut resolved = Vec::with_capacity(CredentialKind::ALL.len());

        for kind in CredentialKind::ALL {
            let known = self
                .explicit_value(kind)
                .or_else(|| file_values.get(kind.env_var()).map(String::as_str))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);

            let value = match known {
                Some(value) => value,
                None if self.non_interactive => return Err(CliError::MissingCredential(kind)),
                None => {
                    let value =
                        on_terminal(move |input, output| prompt_missing(kind, input, output))
                            .await?;
                    if let Err(e) = persist_value(&self.config, kind.env_var(), &value) {
                        warn!(path = %self.config.display(), error = %e, "Could not update config file");
                    }
                    value
                }
            };
            resolved.push(value);
        }

        let credentials = Credentials::new(&*resolved[0], &*resolved[1], &resolved[2])?;
        Ok(CredentialStore::new(credentials).with_config_file(&self.config))
    }

    /// Run the selected command
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<(), CliError> {
        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr).map_err(|e| CliError::Metrics(e.to_string()))?;
        }

        let config = self.crawler_config();
        let orchestrator = RetryOrchestrator::new(config.max_credential_attempts);
        let store = self.resolve_credentials().await?;
        info!(guild_id = %store.guild_id(), "Credentials loaded");

        let driver = CrawlDriver::new(config, store.clone())?
            .with_shutdown(shutdown)
            .with_progress(!self.no_progress);
        let remediator = TerminalRemediator::new(store, !self.non_interactive);

        let (command, result) = match &self.command {
            Commands::Once => (
                "once",
                orchestrator.run(|| driver.run_once(), &remediator).await,
            ),
            Commands::Watch(_) => (
                "watch",
                orchestrator.run(|| driver.run_continuous(), &remediator).await,
            ),
        };

        let delivery = driver.finish().await;
        let report = result?;
        self.print_summary(&RunSummary {
            command,
            report,
            delivery,
        });
        Ok(())
    }

    fn print_summary(&self, summary: &RunSummary) {
        match self.output_format {
            OutputFormat::Json => match serde_json::to_string(summary) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(error = %e, "Could not serialize summary"),
            },
            OutputFormat::Human => {
                println!("\nStash history sync ({}) finished", summary.command);
                println!("Sweeps: {}", summary.report.sweeps);
                if summary.report.cycles > 0 {
                    println!("Watch cycles: {}", summary.report.cycles);
                }
                println!("Pages fetched: {}", summary.report.pages);
                println!("Entries seen: {}", summary.report.entries);
                println!(
                    "Pages delivered: {} ({} failed)",
                    summary.delivery.delivered, summary.delivery.failed
                );
            }
        }
    }
}
