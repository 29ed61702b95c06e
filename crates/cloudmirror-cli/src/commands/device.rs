//! Device command - Show this installation's device id
//!
//! The id tags lock sentinels written by this installation. It is generated
//! on first use.

use anyhow::Result;
use clap::Args;

use cloudmirror_core::device;

use crate::output::get_formatter;
use crate::CliContext;

#[derive(Debug, Args)]
pub struct DeviceCommand {}

impl DeviceCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let path = device::default_path();
        let id = device::load_or_create(&path)?;

        if ctx.format.is_json() {
            get_formatter(ctx.format).print_json(&serde_json::json!({
                "device_id": id,
                "path": path,
            }));
        } else {
            println!("{id}");
        }
        Ok(())
    }
}
