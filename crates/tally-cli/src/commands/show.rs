use std::path::Path;

use tally_core::{Error, SyncTarget, SyncVerb};

use crate::commands::common::{
    cache_refreshed, default_options, open_client, record_to_list_item, resolve_record,
};
use crate::error::CliError;

pub async fn run_show(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let client = open_client(db_path).await?;
    let record = resolve_record(&client, id).await?;

    // Clean records are refreshed from the remote when one is configured;
    // records with queued edits are always served locally.
    let mut target = SyncTarget::Record(record);
    let mut refreshed = false;
    match client
        .sync(SyncVerb::Read, &mut target, default_options(&client))
        .await
    {
        Ok(receipt) => refreshed = receipt.source == tally_core::DataSource::Remote,
        Err(Error::Remote(error)) => {
            tracing::warn!("Remote refresh failed; showing local copy: {error}");
        }
        Err(error) => return Err(error.into()),
    }

    let Some(record) = target.into_record() else {
        return Err(CliError::RecordNotFound(id.to_string()));
    };
    if refreshed {
        cache_refreshed(&client, std::slice::from_ref(&record)).await?;
    }

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&record_to_list_item(&record))?
        );
    } else {
        println!("id:         {}", record.id);
        if let Some(remote_id) = &record.remote_id {
            println!("remote id:  {remote_id}");
        }
        println!("collection: {}", record.collection);
        if let Some(tag) = record.pending_sync {
            println!("queued:     {}", tag.as_str());
        }
        println!("{}", serde_json::to_string_pretty(&record.fields)?);
    }

    Ok(())
}
