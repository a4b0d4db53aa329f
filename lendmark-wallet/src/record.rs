//! Wallet Record Service
//!
//! Client for the marketplace backend's wallet record, the server-side
//! mirror of a user's wallet (address, optional seed backup, metadata).
//! The server holds at most one record per user and answers a duplicate
//! create with 409 Conflict.
//!
//! All endpoints live at `{api_base}/wallet` and answer with
//! `{ success, data, message? }`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Timeout for backend requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of delete-and-recreate rounds after a conflict
pub const DEFAULT_CONFLICT_RETRIES: u32 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("backend unreachable: {0}")]
    Transport(String),

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("backend rejected credentials")]
    Unauthorized,

    #[error("wallet record still conflicts after {attempts} attempts")]
    ConflictUnresolved { attempts: u32 },
}

/// The backend's copy of a user's wallet
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWalletRecord {
    pub address: String,
    #[serde(default, rename = "seed", skip_serializing_if = "Option::is_none")]
    pub seed_backup: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// RFC 3339, or a naive timestamp taken as UTC. Anything else reads as
/// absent rather than failing the whole record.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(raw)) => raw,
        Some(other) => {
            warn!("Ignoring non-string verified_at: {}", other);
            return Ok(None);
        }
    };

    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    match NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(at) => Ok(Some(at.and_utc())),
        Err(e) => {
            warn!("Ignoring unparseable verified_at {:?}: {}", raw, e);
            Ok(None)
        }
    }
}

impl fmt::Debug for RemoteWalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteWalletRecord")
            .field("address", &self.address)
            .field("has_seed_backup", &self.seed_backup.is_some())
            .field("label", &self.label)
            .field("is_primary", &self.is_primary)
            .field("is_verified", &self.is_verified)
            .field("verified_at", &self.verified_at)
            .finish()
    }
}

/// Body of a create request
#[derive(Clone, Serialize)]
pub struct NewWalletRecord {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    pub label: String,
}

impl fmt::Debug for NewWalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewWalletRecord")
            .field("address", &self.address)
            .field("has_seed", &self.seed.is_some())
            .field("label", &self.label)
            .finish()
    }
}

impl NewWalletRecord {
    fn into_record(self) -> RemoteWalletRecord {
        RemoteWalletRecord {
            address: self.address,
            seed_backup: self.seed,
            label: self.label,
            is_primary: true,
            is_verified: false,
            verified_at: None,
        }
    }
}

/// Result of a create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(RemoteWalletRecord),
    Conflict,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

/// Backend wallet record operations.
#[async_trait]
pub trait WalletRecords: Send + Sync {
    /// Current record, `None` when the user has none.
    async fn fetch(&self, token: &str) -> Result<Option<RemoteWalletRecord>, RecordError>;

    async fn create(&self, token: &str, record: &NewWalletRecord) -> Result<CreateOutcome, RecordError>;

    async fn delete(&self, token: &str) -> Result<(), RecordError>;
}

/// HTTP client for `{api_base}/wallet`
#[derive(Debug, Clone)]
pub struct WalletRecordClient {
    http: reqwest::Client,
    endpoint: String,
}

impl WalletRecordClient {
    pub fn new(api_base: &str) -> Result<Self, RecordError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RecordError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/wallet", api_base.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<Envelope<T>, RecordError> {
        response
            .json()
            .await
            .map_err(|e| RecordError::Decode(e.to_string()))
    }

    async fn http_error(response: reqwest::Response) -> RecordError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return RecordError::Unauthorized;
        }
        let message = match response.json::<Envelope<serde_json::Value>>().await {
            Ok(envelope) => envelope.message.unwrap_or_default(),
            Err(_) => String::new(),
        };
        RecordError::Http {
            status: status.as_u16(),
            message,
        }
    }
}

fn transport(e: reqwest::Error) -> RecordError {
    RecordError::Transport(e.to_string())
}

#[async_trait]
impl WalletRecords for WalletRecordClient {
    async fn fetch(&self, token: &str) -> Result<Option<RemoteWalletRecord>, RecordError> {
        let response = self
            .http
            .get(&self.endpoint)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::http_error(response).await);
        }

        let envelope: Envelope<RemoteWalletRecord> = Self::envelope(response).await?;
        if !envelope.success {
            debug!(
                "Wallet record fetch unsuccessful: {}",
                envelope.message.unwrap_or_default()
            );
            return Ok(None);
        }
        Ok(envelope.data)
    }

    async fn create(&self, token: &str, record: &NewWalletRecord) -> Result<CreateOutcome, RecordError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(record)
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(CreateOutcome::Conflict);
        }
        if !response.status().is_success() {
            return Err(Self::http_error(response).await);
        }

        let envelope: Envelope<RemoteWalletRecord> = Self::envelope(response).await?;
        let created = envelope
            .data
            .unwrap_or_else(|| record.clone().into_record());
        info!("Wallet record created for {}", created.address);
        Ok(CreateOutcome::Created(created))
    }

    async fn delete(&self, token: &str) -> Result<(), RecordError> {
        let response = self
            .http
            .delete(&self.endpoint)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;

        // Already gone counts as deleted
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            info!("Wallet record deleted");
            return Ok(());
        }
        Err(Self::http_error(response).await)
    }
}

/// Create a record, resolving conflicts by deleting the existing record and
/// retrying with ours, at most `max_retries` times.
///
/// Two devices racing through this loop can each delete the other's record;
/// whichever creates last wins.
pub async fn create_resolving_conflicts(
    records: &dyn WalletRecords,
    token: &str,
    record: &NewWalletRecord,
    max_retries: u32,
) -> Result<RemoteWalletRecord, RecordError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match records.create(token, record).await? {
            CreateOutcome::Created(created) => return Ok(created),
            CreateOutcome::Conflict if attempts > max_retries => {
                warn!(
                    "Wallet record for {} still conflicts after {} attempts",
                    record.address, attempts
                );
                return Err(RecordError::ConflictUnresolved { attempts });
            }
            CreateOutcome::Conflict => {
                warn!(
                    "Wallet record conflict for {}, replacing remote record",
                    record.address
                );
                records.delete(token).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn new_record() -> NewWalletRecord {
        NewWalletRecord {
            address: "rAlice".to_string(),
            seed: Some("sEdSecret".to_string()),
            label: "alice".to_string(),
        }
    }

    #[test]
    fn test_verified_at_is_lenient() {
        let parse = |verified_at: Value| -> RemoteWalletRecord {
            serde_json::from_value(json!({ "address": "rAlice", "verified_at": verified_at })).unwrap()
        };

        assert_eq!(
            parse(json!("2024-05-01T12:30:00Z")).verified_at.unwrap().to_rfc3339(),
            "2024-05-01T12:30:00+00:00"
        );
        assert_eq!(
            parse(json!("2024-05-01T14:30:00+02:00")).verified_at,
            parse(json!("2024-05-01T12:30:00.000")).verified_at
        );
        assert_eq!(parse(json!("last tuesday")).verified_at, None);
        assert_eq!(parse(json!(1714566600)).verified_at, None);
        assert_eq!(parse(Value::Null).verified_at, None);

        let record: RemoteWalletRecord = serde_json::from_value(json!({ "address": "rAlice" })).unwrap();
        assert_eq!(record.verified_at, None);
    }

    #[tokio::test]
    async fn test_fetch_tolerates_bad_verified_at() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/wallet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "address": "rAlice",
                    "seed": "sEdSecret",
                    "is_verified": true,
                    "verified_at": "pending"
                }
            })))
            .mount(&server)
            .await;

        let client = WalletRecordClient::new(&format!("{}/api", server.uri())).unwrap();
        let record = client.fetch("tok").await.unwrap().unwrap();
        assert_eq!(record.seed_backup.as_deref(), Some("sEdSecret"));
        assert!(record.is_verified);
        assert_eq!(record.verified_at, None);
    }

    #[tokio::test]
    async fn test_fetch_record_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/wallet"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "address": "rAlice",
                    "seed": "sEdSecret",
                    "label": "alice",
                    "is_primary": true,
                    "is_verified": true,
                    "verified_at": "2026-01-02T03:04:05Z"
                }
            })))
            .mount(&server)
            .await;

        let client = WalletRecordClient::new(&format!("{}/api/", server.uri())).unwrap();
        let record = client.fetch("tok").await.unwrap().unwrap();

        assert_eq!(record.address, "rAlice");
        assert_eq!(record.seed_backup.as_deref(), Some("sEdSecret"));
        assert!(record.is_verified);
        assert!(record.verified_at.is_some());
        assert!(!format!("{:?}", record).contains("sEdSecret"));
    }

    #[tokio::test]
    async fn test_fetch_absent_forms() {
        let server = MockServer::start().await;
        let client = WalletRecordClient::new(&server.uri()).unwrap();

        // no mock mounted: wiremock answers 404
        assert_eq!(client.fetch("tok").await.unwrap(), None);

        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": false, "message": "no wallet" })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        assert_eq!(client.fetch("tok").await.unwrap(), None);

        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": null })),
            )
            .mount(&server)
            .await;
        assert_eq!(client.fetch("tok").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = WalletRecordClient::new(&server.uri()).unwrap();
        assert_eq!(client.fetch("bad").await.unwrap_err(), RecordError::Unauthorized);
    }

    #[tokio::test]
    async fn test_create_and_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallet"))
            .and(body_json(json!({ "address": "rAlice", "seed": "sEdSecret", "label": "alice" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "success": true, "data": null })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "success": false, "message": "wallet exists"
            })))
            .mount(&server)
            .await;

        let client = WalletRecordClient::new(&server.uri()).unwrap();
        match client.create("tok", &new_record()).await.unwrap() {
            CreateOutcome::Created(record) => {
                assert_eq!(record.address, "rAlice");
                assert!(record.is_primary);
            }
            CreateOutcome::Conflict => panic!("expected created"),
        }
        assert_eq!(
            client.create("tok", &new_record()).await.unwrap(),
            CreateOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = WalletRecordClient::new(&server.uri()).unwrap();
        assert!(client.delete("tok").await.is_ok());
    }

    /// Scripted backend: answers creates from a queue
    struct Scripted {
        outcomes: Mutex<Vec<CreateOutcome>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<CreateOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WalletRecords for Scripted {
        async fn fetch(&self, _token: &str) -> Result<Option<RemoteWalletRecord>, RecordError> {
            Ok(None)
        }

        async fn create(&self, _token: &str, _record: &NewWalletRecord) -> Result<CreateOutcome, RecordError> {
            self.calls.lock().unwrap().push("create");
            Ok(self.outcomes.lock().unwrap().pop().unwrap_or(CreateOutcome::Conflict))
        }

        async fn delete(&self, _token: &str) -> Result<(), RecordError> {
            self.calls.lock().unwrap().push("delete");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_conflict_then_recreate() {
        let created = new_record().into_record();
        let scripted = Scripted::new(vec![CreateOutcome::Conflict, CreateOutcome::Created(created.clone())]);

        let record = create_resolving_conflicts(&scripted, "tok", &new_record(), 1)
            .await
            .unwrap();
        assert_eq!(record, created);
        assert_eq!(scripted.calls(), vec!["create", "delete", "create"]);
    }

    #[tokio::test]
    async fn test_conflict_exhausted() {
        let scripted = Scripted::new(vec![CreateOutcome::Conflict, CreateOutcome::Conflict]);

        let err = create_resolving_conflicts(&scripted, "tok", &new_record(), 1)
            .await
            .unwrap_err();
        assert_eq!(err, RecordError::ConflictUnresolved { attempts: 2 });
        assert_eq!(scripted.calls(), vec!["create", "delete", "create"]);
    }

    #[tokio::test]
    async fn test_no_conflict_no_delete() {
        let scripted = Scripted::new(vec![CreateOutcome::Created(new_record().into_record())]);
        create_resolving_conflicts(&scripted, "tok", &new_record(), 3)
            .await
            .unwrap();
        assert_eq!(scripted.calls(), vec!["create"]);
    }
}
