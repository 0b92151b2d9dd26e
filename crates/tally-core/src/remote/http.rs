//! HTTP remote service client

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{RemoteError, RemoteService};
use crate::models::Record;
use crate::sync::{SyncTarget, SyncVerb};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Remote service client speaking a plain JSON record API.
///
/// Routes: `POST /records` for creates, `GET|PUT|DELETE /records/{id}` for
/// single records, `GET /records?collection=` for collection reads. The
/// resource id is the canonical remote id when known, otherwise the client
/// key - the service upserts by key, which is how a record created offline
/// reaches it as an update.
#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let base_url = normalize_endpoint(base_url.into())?;
        Ok(Self {
            base_url,
            auth_token: None,
            client: reqwest::Client::builder().build()?,
        })
    }

    /// Attach a bearer token sent with every request
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = normalize_text_option(Some(token.into()));
        self
    }

    fn record_url(&self, record: &Record) -> String {
        let resource = record
            .remote_id
            .clone()
            .unwrap_or_else(|| record.id.as_str());
        format!("{}/records/{resource}", self.base_url)
    }

    fn collection_url(&self, name: &str) -> String {
        format!(
            "{}/records?collection={}",
            self.base_url,
            urlencoding::encode(name)
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, RemoteError> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        if response.content_length() == Some(0) {
            return Ok(Value::Null);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))
    }
}

/// Wire payload for a record: business fields flattened next to the
/// client key and collection name.
fn record_payload(record: &Record) -> Value {
    let mut payload = json!({
        "key": record.id.as_str(),
        "collection": record.collection,
    });
    if let Some(object) = payload.as_object_mut() {
        if let Some(remote_id) = &record.remote_id {
            object.insert("id".to_string(), json!(remote_id));
        }
        for (key, value) in &record.fields {
            object.insert(key.clone(), value.clone());
        }
    }
    payload
}

#[async_trait]
impl RemoteService for HttpRemoteClient {
    async fn sync(&self, verb: SyncVerb, target: &SyncTarget) -> Result<Value, RemoteError> {
        match (verb, target) {
            (SyncVerb::Create, SyncTarget::Record(record)) => {
                let url = format!("{}/records", self.base_url);
                self.execute(
                    self.request(reqwest::Method::POST, url)
                        .json(&record_payload(record)),
                )
                .await
            }
            (SyncVerb::Update, SyncTarget::Record(record)) => {
                self.execute(
                    self.request(reqwest::Method::PUT, self.record_url(record))
                        .json(&record_payload(record)),
                )
                .await
            }
            (SyncVerb::Delete, SyncTarget::Record(record)) => {
                self.execute(self.request(reqwest::Method::DELETE, self.record_url(record)))
                    .await
            }
            (SyncVerb::Read, SyncTarget::Record(record)) => {
                if record.remote_id.is_none() {
                    return Err(RemoteError::InvalidPayload(
                        "record has no canonical id to fetch".to_string(),
                    ));
                }
                self.execute(self.request(reqwest::Method::GET, self.record_url(record)))
                    .await
            }
            (SyncVerb::Read, SyncTarget::Collection(collection)) => {
                self.execute(
                    self.request(reqwest::Method::GET, self.collection_url(&collection.name)),
                )
                .await
            }
            (_, SyncTarget::Collection(_)) => Err(RemoteError::InvalidPayload(
                "collections are read-only".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String, RemoteError> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
