//! CloudMirror CLI - Command-line interface for CloudMirror
//!
//! Provides commands for:
//! - Listing tracked paths with their local state
//! - Forgetting tracked subtrees
//! - Managing the stop/resume sync policy
//! - Viewing and editing configuration
//! - Showing this installation's device id

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cloudmirror_cache::SqliteMappingStore;
use cloudmirror_core::config::{Config, LoggingConfig};

mod commands;
mod output;

use commands::{
    completions::CompletionsCommand, config::ConfigCommand, device::DeviceCommand,
    list::ListCommand, policy::PolicyCommand, untrack::UntrackCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "cloudmirror", version, about = "Mirror local folders into cloud storage")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List tracked paths
    List(ListCommand),
    /// Forget the mappings of a tracked subtree
    Untrack(UntrackCommand),
    /// Pause or resume synchronization of subtrees
    #[command(subcommand)]
    Policy(PolicyCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Show this installation's device id
    Device(DeviceCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

/// State shared by every command
pub struct CliContext {
    pub config: Config,
    pub config_path: PathBuf,
    pub format: OutputFormat,
}

impl CliContext {
    /// Opens the mapping store at the configured database path
    pub async fn open_store(&self) -> Result<SqliteMappingStore> {
        let path = &self.config.database.path;
        SqliteMappingStore::open(path)
            .await
            .with_context(|| format!("Failed to open database at {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);
    init_tracing(cli.verbose, cli.quiet, &config.logging);

    let ctx = CliContext {
        config,
        config_path,
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
    };

    match cli.command {
        Commands::List(cmd) => cmd.execute(&ctx).await,
        Commands::Untrack(cmd) => cmd.execute(&ctx).await,
        Commands::Policy(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
        Commands::Device(cmd) => cmd.execute(&ctx).await,
        Commands::Completions(cmd) => cmd.execute(&ctx).await,
    }
}

/// Installs the tracing subscriber
///
/// `RUST_LOG` wins over `-v`/`--quiet`, which win over `logging.level`.
fn init_tracing(verbose: u8, quiet: bool, logging: &LoggingConfig) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => logging.level.as_str(),
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
