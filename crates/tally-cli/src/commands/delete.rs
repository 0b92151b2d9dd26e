use std::path::Path;

use tally_core::SyncVerb;

use crate::commands::common::{apply_mutation, open_client, resolve_record};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let client = open_client(db_path).await?;
    let record = resolve_record(&client, id).await?;
    apply_mutation(&client, SyncVerb::Delete, record).await
}
