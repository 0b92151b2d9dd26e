use std::path::Path;

use tally_core::{Record, SyncVerb};

use crate::commands::common::{
    apply_mutation, normalize_collection_name, open_client, parse_field_pairs,
};
use crate::error::CliError;

pub async fn run_add(
    collection: &str,
    field_pairs: &[String],
    db_path: &Path,
) -> Result<(), CliError> {
    let collection = normalize_collection_name(collection)?;
    if field_pairs.is_empty() {
        return Err(CliError::EmptyFields);
    }
    let fields = parse_field_pairs(field_pairs)?;

    let client = open_client(db_path).await?;
    let record = Record::new(collection, fields);
    apply_mutation(&client, SyncVerb::Create, record).await
}
