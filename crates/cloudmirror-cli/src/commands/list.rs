//! List command - Show tracked paths
//!
//! Joins every mapping record with the current state of its local path.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use cloudmirror_core::domain::record::{Provider, Scope};
use cloudmirror_core::ports::IMappingStore;
use cloudmirror_sync::orchestrator::{tracked_files, TrackedFile};

use crate::output::{get_formatter, human_size};
use crate::CliContext;

#[derive(Debug, Args)]
pub struct ListCommand {
    /// Only show entries of this provider (google_drive, box)
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Only show entries of this account (requires --provider)
    #[arg(long, requires = "provider")]
    pub account: Option<String>,
}

impl ListCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let store = ctx.open_store().await?;

        let scope = match (self.provider, &self.account) {
            (Some(provider), Some(account)) => Some(Scope::new(provider, account.clone())),
            _ => None,
        };
        let mut tracked = tracked_files(&store, scope.as_ref())
            .await
            .context("Failed to read tracked entries")?;
        if let Some(provider) = self.provider {
            tracked.retain(|t| t.provider == provider);
        }
        store.close().await?;

        info!(count = tracked.len(), "Listing tracked entries");

        if ctx.format.is_json() {
            let json = serde_json::to_value(&tracked)
                .context("Failed to serialize tracked entries")?;
            formatter.print_json(&json);
            return Ok(());
        }

        if tracked.is_empty() {
            formatter.info("No tracked paths");
            return Ok(());
        }

        formatter.success(&format!(
            "{} tracked entr{}",
            tracked.len(),
            if tracked.len() == 1 { "y" } else { "ies" }
        ));
        for entry in &tracked {
            formatter.info(&describe(entry));
        }
        let missing = tracked.iter().filter(|t| !t.exists).count();
        if missing > 0 {
            formatter.warn(&format!(
                "{missing} tracked path{} no longer exist locally",
                if missing == 1 { "" } else { "s" }
            ));
        }
        Ok(())
    }
}

fn describe(entry: &TrackedFile) -> String {
    let kind = if entry.is_directory { "dir " } else { "file" };
    let size = match entry.size {
        Some(bytes) => human_size(bytes),
        None if !entry.exists => "missing".to_string(),
        None => "-".to_string(),
    };
    format!(
        "{kind} {path}  [{size}]  {provider}:{account}  synced {when}",
        path = entry.path,
        provider = entry.provider,
        account = entry.account,
        when = entry
            .last_sync
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S"),
    )
}
