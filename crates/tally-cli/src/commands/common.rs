use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tally_core::remote::HttpRemoteClient;
use tally_core::store::{LibSqlStore, LocalStore, StoreSchema};
use tally_core::{
    DataSource, Error, PendingSync, Record, RecordId, SyncCoordinator, SyncOptions, SyncTarget,
    SyncVerb,
};

use crate::error::CliError;

/// Schema version this build of the CLI expects
pub const CURRENT_SCHEMA: StoreSchema = StoreSchema::new(1);

/// Coordinator wired to the bundled adapters; the remote side is absent when
/// no endpoint is configured.
pub type Client = SyncCoordinator<LibSqlStore, Option<HttpRemoteClient>>;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub remote_id: Option<String>,
    pub collection: String,
    pub fields: Map<String, Value>,
    pub pending_sync: Option<String>,
    pub updated_at: i64,
    pub relative_time: String,
}

/// Open the local store, wire the remote from the environment, and run the
/// schema reconciliation that must precede record traffic.
pub async fn open_client(db_path: &Path) -> Result<Client, CliError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = LibSqlStore::open_path(db_path).await?;
    let remote = remote_from_env()?;
    if remote.is_some() {
        tracing::info!("Remote sync enabled");
    } else {
        tracing::info!("Running in local-only mode (no remote configured)");
    }

    let client = SyncCoordinator::new(store, remote);
    client.migrate(&CURRENT_SCHEMA).await?;
    Ok(client)
}

/// Default options for this client: mutations queue locally when no remote
/// service is configured.
pub fn default_options(client: &Client) -> SyncOptions {
    if client.remote().is_some() {
        SyncOptions::default()
    } else {
        SyncOptions::default().skipping_remote_sync()
    }
}

fn remote_from_env() -> Result<Option<HttpRemoteClient>, CliError> {
    let Some(url) = env::var("TALLY_REMOTE_URL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };

    let mut remote =
        HttpRemoteClient::new(url).map_err(|error| CliError::RemoteConfig(error.to_string()))?;
    if let Ok(token) = env::var("TALLY_REMOTE_TOKEN") {
        remote = remote.with_auth_token(token);
    }
    Ok(Some(remote))
}

/// Read a record from the local store by exact id, without touching the
/// remote service.
pub async fn read_local(client: &Client, id: RecordId) -> Result<Option<Record>, CliError> {
    let mut stub = Record::new("", Map::new());
    stub.id = id;

    let mut target = SyncTarget::Record(stub);
    match client
        .sync(
            SyncVerb::Read,
            &mut target,
            SyncOptions::default().skipping_remote_sync(),
        )
        .await
    {
        Ok(_) => Ok(target.into_record()),
        Err(Error::NotFound(_)) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Resolve a record by exact id or unique id prefix.
pub async fn resolve_record(client: &Client, record_query: &str) -> Result<Record, CliError> {
    let record_query = normalize_record_identifier(record_query)?;

    if let Ok(record_id) = record_query.parse::<RecordId>() {
        if let Some(record) = read_local(client, record_id).await? {
            return Ok(record);
        }
    }

    let matching_ids = client.store().find_ids_by_prefix(&record_query, 3).await?;
    match matching_ids.len() {
        0 => Err(CliError::RecordNotFound(record_query)),
        1 => {
            let resolved_id = matching_ids[0]
                .parse::<RecordId>()
                .map_err(|_| CliError::RecordNotFound(record_query.clone()))?;
            read_local(client, resolved_id)
                .await?
                .ok_or(CliError::RecordNotFound(record_query))
        }
        _ => {
            let options = matching_ids
                .iter()
                .take(3)
                .map(|id| id.chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{record_query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Parse `key=value` pairs into a field map. Values that parse as JSON are
/// kept typed; everything else is a string.
pub fn parse_field_pairs(pairs: &[String]) -> Result<Map<String, Value>, CliError> {
    let mut fields = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::InvalidField(pair.clone()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::InvalidField(pair.clone()));
        }

        let value = value.trim();
        let parsed = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        fields.insert(key.to_string(), parsed);
    }
    Ok(fields)
}

pub fn normalize_collection_name(name: &str) -> Result<String, CliError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyCollection)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = record.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let preview = record_preview(record, 40);
            let relative_time = format_relative_time(record.updated_at, now_ms);

            record.pending_sync.map_or_else(
                || format!("{short_id:<13}  {preview:<40}  {relative_time}"),
                |tag| {
                    format!(
                        "{short_id:<13}  {preview:<40}  {relative_time:<10}  *{}",
                        tag.as_str()
                    )
                },
            )
        })
        .collect()
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.to_string(),
        remote_id: record.remote_id.clone(),
        collection: record.collection.clone(),
        fields: record.fields.clone(),
        pending_sync: record.pending_sync.map(|tag| tag.as_str().to_string()),
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
    }
}

/// One-line `key=value` summary of a record's fields, truncated with an
/// ellipsis.
pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let summary = record
        .fields
        .iter()
        .map(|(key, value)| match value {
            Value::String(text) => format!("{key}={text}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(" ");

    if summary.chars().count() <= max_chars {
        summary
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = summary.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Run one mutation through the coordinator and persist its outcome.
///
/// The coordinator performs at most one local write per request, so after a
/// successful remote push the finalized (cleared) record is committed back
/// to the local store here. A remote failure is not fatal: the mutation is
/// already queued locally for a later `push`.
pub async fn apply_mutation(
    client: &Client,
    verb: SyncVerb,
    record: Record,
) -> Result<(), CliError> {
    let record_id = record.id;
    let mut target = SyncTarget::Record(record);

    match client.sync(verb, &mut target, default_options(client)).await {
        Ok(receipt) => {
            if receipt.source == DataSource::Remote {
                commit_finalized(client, &target, verb == SyncVerb::Delete).await?;
            }
            println!("{record_id}");
            Ok(())
        }
        Err(Error::Remote(error)) => {
            tracing::warn!("Remote push failed; mutation queued locally: {error}");
            println!("{record_id} (queued; remote push failed)");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

/// Commit a record's post-push state to the local store: remove the row
/// after a remote delete, otherwise persist the cleared sync tag.
pub async fn commit_finalized(
    client: &Client,
    target: &SyncTarget,
    was_delete: bool,
) -> Result<(), CliError> {
    let Some(record) = target.record() else {
        return Ok(());
    };
    if record.pending_sync.is_some() {
        return Ok(());
    }

    let verb = if was_delete {
        SyncVerb::Delete
    } else {
        SyncVerb::Update
    };
    client
        .store()
        .sync(verb, &SyncTarget::Record(record.clone()))
        .await?;
    Ok(())
}

/// Cache remotely refreshed clean records back into the local store.
pub async fn cache_refreshed(client: &Client, records: &[Record]) -> Result<(), CliError> {
    for record in records {
        if record.pending_sync.is_none() {
            client
                .store()
                .sync(SyncVerb::Update, &SyncTarget::Record(record.clone()))
                .await?;
        }
    }
    Ok(())
}

pub fn capture_editor_input_with_initial(initial_content: &str) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_record_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let edited = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    let trimmed = edited.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            // Fallback for editor commands with args, e.g. "code --wait"
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_record_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("tally-record-{}-{now}.json", std::process::id()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TALLY_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
        .join("tally.db")
}

/// Summarize queued mutations by tag.
#[must_use]
pub fn pending_summary(records: &[Record]) -> (usize, usize, usize) {
    let mut counts = (0, 0, 0);
    for record in records {
        match record.pending_sync {
            Some(PendingSync::Create) => counts.0 += 1,
            Some(PendingSync::Update) => counts.1 += 1,
            Some(PendingSync::Delete) => counts.2 += 1,
            None => {}
        }
    }
    counts
}
