use std::path::Path;

use tally_core::{Collection, Error, SyncTarget, SyncVerb};

use crate::commands::common::{
    cache_refreshed, default_options, format_record_lines, normalize_collection_name, open_client,
    record_to_list_item, RecordListItem,
};
use crate::error::CliError;

pub async fn run_list(
    collection: &str,
    limit: usize,
    as_json: bool,
    local_only: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let collection = normalize_collection_name(collection)?;
    let client = open_client(db_path).await?;

    let mut options = default_options(&client);
    if local_only {
        options = options.skipping_remote_sync();
    }

    let mut target = SyncTarget::Collection(Collection::new(collection));
    let mut refreshed = false;
    match client.sync(SyncVerb::Read, &mut target, options).await {
        Ok(receipt) => refreshed = receipt.source == tally_core::DataSource::Remote,
        Err(Error::Remote(error)) => {
            tracing::warn!("Remote refresh failed; listing local copies: {error}");
        }
        Err(error) => return Err(error.into()),
    }

    let records = target
        .collection()
        .map(|collection| collection.records.clone())
        .unwrap_or_default();
    if refreshed {
        cache_refreshed(&client, &records).await?;
    }
    let records = &records[..records.len().min(limit)];

    if as_json {
        let items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_record_lines(records) {
            println!("{line}");
        }
    }

    Ok(())
}
