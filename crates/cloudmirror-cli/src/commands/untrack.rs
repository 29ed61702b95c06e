//! Untrack command - Forget a tracked subtree locally
//!
//! Removes the mapping records of a path and everything below it for one
//! provider account, together with any stop/resume entries in the subtree.
//! Remote copies are left in place; the next sync of an ancestor uploads the
//! subtree again as new objects.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use cloudmirror_core::domain::record::{Provider, Scope};
use cloudmirror_core::ports::IMappingStore;

use super::resolve_path;
use crate::output::get_formatter;
use crate::CliContext;

#[derive(Debug, Args)]
pub struct UntrackCommand {
    /// Path to forget (file or directory)
    pub path: PathBuf,

    /// Provider the path is tracked with (google_drive, box)
    #[arg(long)]
    pub provider: Provider,

    /// Account the path is tracked with
    #[arg(long)]
    pub account: String,
}

impl UntrackCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let path = resolve_path(&self.path)?;
        let scope = Scope::new(self.provider, self.account.clone());

        let store = ctx.open_store().await?;
        let removed = store
            .delete_subtree(&path, &scope)
            .await
            .with_context(|| format!("Failed to untrack {path}"))?;
        store.close().await?;

        info!(path = %path, scope = %scope, removed, "Untracked subtree");

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "path": path,
                "provider": self.provider,
                "account": self.account,
                "removed": removed,
            }));
        } else if removed == 0 {
            formatter.warn(&format!("{path} is not tracked for {scope}"));
        } else {
            formatter.success(&format!(
                "Forgot {removed} entr{} under {path}",
                if removed == 1 { "y" } else { "ies" }
            ));
            formatter.info("Remote copies were not deleted");
        }
        Ok(())
    }
}
