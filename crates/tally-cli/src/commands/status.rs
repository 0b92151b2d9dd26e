use std::path::Path;

use crate::commands::common::{open_client, pending_summary};
use crate::error::CliError;

pub async fn run_status(db_path: &Path) -> Result<(), CliError> {
    let client = open_client(db_path).await?;
    let queued = client.store().pending().await?;

    if queued.is_empty() {
        println!("All records are in sync");
        return Ok(());
    }

    let (creates, updates, deletes) = pending_summary(&queued);
    println!("{} queued mutation(s)", queued.len());
    println!("  create: {creates}");
    println!("  update: {updates}");
    println!("  delete: {deletes}");
    Ok(())
}
