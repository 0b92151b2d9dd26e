use std::path::Path;

use tally_core::store::LocalStore;

use crate::commands::common::{open_client, CURRENT_SCHEMA};
use crate::error::CliError;

pub async fn run_migrate(db_path: &Path) -> Result<(), CliError> {
    // open_client already reconciles the schema; report where we ended up.
    let client = open_client(db_path).await?;
    let version = client
        .store()
        .current_schema()
        .await?
        .map_or(0, |schema| schema.version);

    println!("Local store at schema version {version} (expected {})", CURRENT_SCHEMA.version);
    Ok(())
}
