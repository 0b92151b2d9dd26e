use std::path::Path;

use tally_core::{PendingSync, SyncOptions, SyncTarget, SyncVerb};

use crate::commands::common::{commit_finalized, open_client};
use crate::error::CliError;

/// Replay every queued mutation against the remote service, in local
/// mutation order. Failed pushes stay queued; the rest proceed.
pub async fn run_push(db_path: &Path) -> Result<(), CliError> {
    let client = open_client(db_path).await?;
    if client.remote().is_none() {
        return Err(CliError::RemoteNotConfigured);
    }

    let queued = client.store().pending().await?;
    if queued.is_empty() {
        println!("Nothing to push");
        return Ok(());
    }

    let mut pushed = 0usize;
    let mut failed = 0usize;
    for record in queued {
        let record_id = record.id;
        let verb = match record.pending_sync {
            Some(PendingSync::Create) => SyncVerb::Create,
            Some(PendingSync::Delete) => SyncVerb::Delete,
            Some(PendingSync::Update) | None => SyncVerb::Update,
        };

        let mut target = SyncTarget::Record(record);
        match client.sync(verb, &mut target, SyncOptions::default()).await {
            Ok(_) => {
                commit_finalized(&client, &target, verb == SyncVerb::Delete).await?;
                pushed += 1;
                println!("{record_id}  pushed");
            }
            Err(error) => {
                failed += 1;
                tracing::warn!("Push failed for {record_id}: {error}");
                println!("{record_id}  failed ({error})");
            }
        }
    }

    println!("Pushed {pushed}, failed {failed}");
    Ok(())
}
