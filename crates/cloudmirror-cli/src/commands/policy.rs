//! Policy command - Pause and resume synchronization of subtrees
//!
//! A stopped path is skipped by auto-sync together with its subtree, except
//! for resumed paths inside it.

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use tracing::info;

use cloudmirror_core::domain::policy::StopSyncPolicy;
use cloudmirror_core::ports::IMappingStore;

use super::resolve_path;
use crate::output::{get_formatter, OutputFormatter};
use crate::CliContext;

#[derive(Debug, Subcommand)]
pub enum PolicyCommand {
    /// Show stopped and resumed paths
    Show,
    /// Stop syncing a path and its subtree
    Stop {
        path: PathBuf,
    },
    /// Resume syncing a path inside a stopped subtree
    Resume {
        path: PathBuf,
    },
    /// Remove any stop or resume entry for exactly this path
    Clear {
        path: PathBuf,
    },
}

impl PolicyCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let store = ctx.open_store().await?;

        match self {
            PolicyCommand::Show => {}
            PolicyCommand::Stop { path } => {
                let path = resolve_path(path)?;
                store.stop_sync(&path).await?;
                info!(path = %path, "Sync stopped");
                if !ctx.format.is_json() {
                    formatter.success(&format!("Stopped syncing {path}"));
                }
            }
            PolicyCommand::Resume { path } => {
                let path = resolve_path(path)?;
                store.resume_sync(&path).await?;
                info!(path = %path, "Sync resumed");
                if !ctx.format.is_json() {
                    formatter.success(&format!("Resumed syncing {path}"));
                }
            }
            PolicyCommand::Clear { path } => {
                let path = resolve_path(path)?;
                let cleared = store.clear_policy(&path).await?;
                if !ctx.format.is_json() {
                    if cleared {
                        formatter.success(&format!("Cleared policy for {path}"));
                    } else {
                        formatter.warn(&format!("No policy entry for {path}"));
                    }
                }
            }
        }

        let policy = store.policy().await?;
        store.close().await?;
        print_policy(formatter.as_ref(), ctx.format.is_json(), &policy)
    }
}

fn print_policy(formatter: &dyn OutputFormatter, json: bool, policy: &StopSyncPolicy) -> Result<()> {
    if json {
        formatter.print_json(&serde_json::to_value(policy)?);
        return Ok(());
    }

    if policy.is_empty() {
        formatter.info("All tracked paths are synced");
        return Ok(());
    }
    if !policy.stopped().is_empty() {
        formatter.info("Stopped:");
        for path in policy.stopped() {
            formatter.info(&format!("  {path}"));
        }
    }
    if !policy.resumed().is_empty() {
        formatter.info("Resumed:");
        for path in policy.resumed() {
            formatter.info(&format!("  {path}"));
        }
    }
    Ok(())
}
