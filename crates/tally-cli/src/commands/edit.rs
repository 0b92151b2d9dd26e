use std::path::Path;

use serde_json::{Map, Value};
use tally_core::SyncVerb;

use crate::commands::common::{
    apply_mutation, capture_editor_input_with_initial, open_client, parse_field_pairs,
    resolve_record,
};
use crate::error::CliError;

pub async fn run_edit(id: &str, field_pairs: &[String], db_path: &Path) -> Result<(), CliError> {
    let client = open_client(db_path).await?;
    let mut record = resolve_record(&client, id).await?;

    if field_pairs.is_empty() {
        let initial = serde_json::to_string_pretty(&record.fields)?;
        let Some(edited) = capture_editor_input_with_initial(&initial)? else {
            return Err(CliError::EmptyFields);
        };
        if edited == initial {
            println!("{}", record.id);
            return Ok(());
        }
        record.fields = serde_json::from_str::<Map<String, Value>>(&edited)?;
    } else {
        for (key, value) in parse_field_pairs(field_pairs)? {
            record.set_field(key, value);
        }
    }

    apply_mutation(&client, SyncVerb::Update, record).await
}
