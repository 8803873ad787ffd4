//! Cloud Firestore adapter over the REST API.
//!
//! # Responsibility
//! - Map records and the tag registry onto per-owner Firestore documents.
//! - Establish anonymous or persistent identities through Identity Toolkit
//!   and the Secure Token service, renewing the ID token near expiry and
//!   once after a `401`.
//! - Emulate real-time listeners with a polling thread that emits full
//!   snapshots whenever the collection changes.
//!
//! # Invariants
//! - Record documents live at `users/{owner}/records/{id}`; the tag registry
//!   lives at `users/{owner}/metadata/tags`.
//! - Transport failures are logged and returned as `RemoteError`; one-shot
//!   reads degrade to empty results.
//! - A poller stops within one poll slice after its subscription is released.

use crate::model::record::{now_epoch_ms, sort_newest_first, Record, RecordId, RecordPatch};
use crate::model::settings::RemoteConfig;
use crate::sync::remote_spi::{IdentityProvider, RemoteConnector, RemoteHandle, RemoteStore};
use crate::sync::remote_types::{
    FeedSink, OwnerId, OwnerSession, RemoteError, RemoteResult, RemoteStage, Subscription,
};
use log::{debug, info, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

const PROVIDER_ID: &str = "firestore";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const MIN_POLL_INTERVAL_MS: u64 = 250;
const POLL_SLICE: Duration = Duration::from_millis(50);
const LIST_PAGE_SIZE: u32 = 300;
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3_600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const RECORDS_COLLECTION: &str = "records";
const TAGS_DOCUMENT: &str = "metadata/tags";

/// Base URLs of the Google services the adapter talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirestoreEndpoints {
    pub identity_toolkit: String,
    pub secure_token: String,
    pub firestore: String,
}

impl Default for FirestoreEndpoints {
    fn default() -> Self {
        Self {
            identity_toolkit: "https://identitytoolkit.googleapis.com".to_string(),
            secure_token: "https://securetoken.googleapis.com".to_string(),
            firestore: "https://firestore.googleapis.com".to_string(),
        }
    }
}

/// Connector for the `firestore` provider id.
#[derive(Debug, Clone, Default)]
pub struct FirestoreConnector {
    endpoints: FirestoreEndpoints,
}

impl FirestoreConnector {
    pub const PROVIDER_ID: &'static str = PROVIDER_ID;

    pub fn new() -> Self {
        Self::default()
    }

    /// Points the connector at alternative hosts (e.g. a local emulator).
    pub fn with_endpoints(endpoints: FirestoreEndpoints) -> Self {
        Self { endpoints }
    }
}

impl RemoteConnector for FirestoreConnector {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn connect(&self, config: &RemoteConfig) -> RemoteResult<RemoteHandle> {
        let timeout = Duration::from_millis(
            config
                .request_timeout_ms
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        );
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|err| {
                RemoteError::new(
                    PROVIDER_ID,
                    RemoteStage::Connect,
                    "client_build_failed",
                    err.to_string(),
                    false,
                )
            })?;

        let api_key = config.api_key.trim().to_string();
        let project_id = config.project_id.trim().to_string();
        let poll_interval = Duration::from_millis(
            config
                .poll_interval_ms
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                .max(MIN_POLL_INTERVAL_MS),
        );

        info!(
            "event=remote_connect module=firestore status=ok project_id={} timeout_ms={} poll_interval_ms={}",
            project_id,
            timeout.as_millis(),
            poll_interval.as_millis()
        );

        let tokens = Arc::new(TokenSource {
            client: client.clone(),
            endpoints: self.endpoints.clone(),
            api_key,
            current: Mutex::new(None),
        });
        let store = FirestoreStore {
            client,
            documents_url: format!(
                "{}/v1/projects/{}/databases/(default)/documents",
                self.endpoints.firestore.trim_end_matches('/'),
                project_id
            ),
            tokens: Arc::clone(&tokens),
            poll_interval,
        };
        let identity = FirestoreIdentity {
            tokens,
            refresh_token: config.refresh_token.clone(),
        };

        Ok(RemoteHandle {
            store: Arc::new(store),
            identity: Arc::new(identity),
        })
    }
}

/// Short-lived ID token and the credential that renews it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IdToken {
    value: String,
    refresh_token: String,
    expires_at: Instant,
}

impl IdToken {
    /// `expires_in` is the lifetime in seconds as reported by the token
    /// endpoints; unparseable values fall back to one hour.
    fn issued(
        value: String,
        refresh_token: String,
        expires_in: Option<&str>,
        now: Instant,
    ) -> Self {
        let lifetime = expires_in
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Self {
            value,
            refresh_token,
            expires_at: now + Duration::from_secs(lifetime),
        }
    }

    fn needs_refresh(&self, now: Instant) -> bool {
        now + TOKEN_REFRESH_MARGIN >= self.expires_at
    }
}

/// Token state shared by the identity provider and the document store.
struct TokenSource {
    client: Client,
    endpoints: FirestoreEndpoints,
    api_key: String,
    current: Mutex<Option<IdToken>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    id_token: String,
    refresh_token: String,
    local_id: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    user_id: String,
    #[serde(default)]
    expires_in: Option<String>,
}

impl TokenSource {
    fn current(&self) -> Option<IdToken> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn install(&self, token: IdToken) {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token);
    }

    fn sign_up_anonymously(&self) -> RemoteResult<OwnerSession> {
        let url = format!(
            "{}/v1/accounts:signUp",
            self.endpoints.identity_toolkit.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "returnSecureToken": true }))
            .send()
            .map_err(|err| transport_error(RemoteStage::Auth, &err))?;
        let response = check_status(RemoteStage::Auth, response)?;
        let body: SignUpResponse = parse_json(RemoteStage::Auth, response)?;

        self.install(IdToken::issued(
            body.id_token,
            body.refresh_token.clone(),
            body.expires_in.as_deref(),
            Instant::now(),
        ));
        Ok(OwnerSession {
            owner_id: OwnerId::new(body.local_id),
            refresh_token: Some(body.refresh_token),
        })
    }

    fn exchange_refresh_token(&self, refresh_token: &str) -> RemoteResult<OwnerSession> {
        let url = format!(
            "{}/v1/token",
            self.endpoints.secure_token.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .map_err(|err| transport_error(RemoteStage::Auth, &err))?;
        let response = check_status(RemoteStage::Auth, response)?;
        let body: RefreshResponse = parse_json(RemoteStage::Auth, response)?;

        self.install(IdToken::issued(
            body.id_token,
            body.refresh_token.clone(),
            body.expires_in.as_deref(),
            Instant::now(),
        ));
        Ok(OwnerSession {
            owner_id: OwnerId::new(body.user_id),
            refresh_token: Some(body.refresh_token),
        })
    }

    /// Exchanges the current refresh credential for a new ID token.
    fn renew(&self) -> RemoteResult<String> {
        let Some(current) = self.current() else {
            return Err(RemoteError::new(
                PROVIDER_ID,
                RemoteStage::Auth,
                "not_signed_in",
                "no identity token to renew",
                false,
            ));
        };
        self.exchange_refresh_token(&current.refresh_token)?;
        self.current()
            .map(|token| token.value)
            .ok_or_else(|| {
                RemoteError::new(
                    PROVIDER_ID,
                    RemoteStage::Auth,
                    "not_signed_in",
                    "identity token vanished during renewal",
                    false,
                )
            })
    }

    /// Bearer value for the next request, renewed first when near expiry.
    fn bearer(&self) -> Option<String> {
        let current = self.current()?;
        if !current.needs_refresh(Instant::now()) {
            return Some(current.value);
        }
        match self.renew() {
            Ok(value) => {
                info!("event=token_refresh module=firestore status=ok reason=expiry");
                Some(value)
            }
            Err(err) => {
                warn!(
                    "event=token_refresh module=firestore status=error reason=expiry error_code={} error={}",
                    err.code, err.message
                );
                Some(current.value)
            }
        }
    }
}

/// Identity Toolkit backed identity provider.
pub struct FirestoreIdentity {
    tokens: Arc<TokenSource>,
    refresh_token: Option<String>,
}

impl IdentityProvider for FirestoreIdentity {
    fn sign_in(&self) -> RemoteResult<OwnerSession> {
        let started_at = Instant::now();
        let (mode, result) = match self.refresh_token.as_deref() {
            Some(refresh_token) if !refresh_token.trim().is_empty() => {
                ("persistent", self.tokens.exchange_refresh_token(refresh_token))
            }
            _ => ("anonymous", self.tokens.sign_up_anonymously()),
        };

        match &result {
            Ok(session) => info!(
                "event=identity_sign_in module=firestore status=ok mode={mode} owner={} duration_ms={}",
                session.owner_id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=identity_sign_in module=firestore status=error mode={mode} duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code,
                err.message
            ),
        }
        result
    }
}

/// Firestore REST document store.
#[derive(Clone)]
pub struct FirestoreStore {
    client: Client,
    documents_url: String,
    tokens: Arc<TokenSource>,
    poll_interval: Duration,
}

impl FirestoreStore {
    fn records_url(&self, owner: &OwnerId) -> String {
        format!(
            "{}/users/{}/{RECORDS_COLLECTION}",
            self.documents_url,
            owner.as_str()
        )
    }

    fn record_url(&self, owner: &OwnerId, id: RecordId) -> String {
        format!("{}/{id}", self.records_url(owner))
    }

    fn tags_url(&self, owner: &OwnerId) -> String {
        format!(
            "{}/users/{}/{TAGS_DOCUMENT}",
            self.documents_url,
            owner.as_str()
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.bearer() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends an authorized request; a 401 renews the ID token and retries once.
    fn send<F>(&self, stage: RemoteStage, build: F) -> RemoteResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = self
            .authorized(build())
            .send()
            .map_err(|err| transport_error(stage, &err))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        match self.tokens.renew() {
            Ok(token) => {
                info!(
                    "event=token_refresh module=firestore status=ok reason=unauthorized stage={}",
                    stage.as_str()
                );
                build()
                    .bearer_auth(token)
                    .send()
                    .map_err(|err| transport_error(stage, &err))
            }
            Err(err) => {
                warn!(
                    "event=token_refresh module=firestore status=error reason=unauthorized stage={} error_code={} error={}",
                    stage.as_str(),
                    err.code,
                    err.message
                );
                Ok(response)
            }
        }
    }

    fn list_records(&self, owner: &OwnerId) -> RemoteResult<Vec<Record>> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("pageSize".to_string(), LIST_PAGE_SIZE.to_string())];
            if let Some(token) = page_token.take() {
                query.push(("pageToken".to_string(), token));
            }
            let response = self.send(RemoteStage::Fetch, || {
                self.client.get(self.records_url(owner)).query(&query)
            })?;
            let response = check_status(RemoteStage::Fetch, response)?;
            let page: Value = parse_json(RemoteStage::Fetch, response)?;

            if let Some(documents) = page.get("documents").and_then(Value::as_array) {
                for document in documents {
                    match decode_record(document) {
                        Some(record) => records.push(record),
                        None => warn!(
                            "event=remote_fetch module=firestore status=skip owner={owner} document={}",
                            document.get("name").and_then(Value::as_str).unwrap_or("unknown")
                        ),
                    }
                }
            }

            match page.get("nextPageToken").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => page_token = Some(next.to_string()),
                _ => break,
            }
        }

        sort_newest_first(&mut records);
        Ok(records)
    }

    fn read_tags(&self, owner: &OwnerId) -> RemoteResult<Vec<String>> {
        let response = self.send(RemoteStage::Tags, || self.client.get(self.tags_url(owner)))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = check_status(RemoteStage::Tags, response)?;
        let document: Value = parse_json(RemoteStage::Tags, response)?;
        Ok(decode_tags(&document))
    }

    fn patch_document(
        &self,
        stage: RemoteStage,
        url: String,
        fields: Map<String, Value>,
        mask: Option<&[&str]>,
    ) -> RemoteResult<()> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(mask) = mask {
            query.extend(mask.iter().map(|field| ("updateMask.fieldPaths", *field)));
            query.push(("currentDocument.exists", "true"));
        }
        let body = json!({ "fields": fields });
        let response = self.send(stage, || {
            self.client.patch(url.as_str()).query(&query).json(&body)
        })?;
        check_status(stage, response)?;
        Ok(())
    }

    fn spawn_poller<F>(&self, owner: &OwnerId, label: &'static str, poll: F) -> Subscription
    where
        F: Fn(&FirestoreStore, &OwnerId) -> Option<bool> + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let store = self.clone();
        let owner = owner.clone();
        let interval = self.poll_interval;

        let spawned = thread::Builder::new()
            .name(format!("notesync-poll-{label}"))
            .spawn(move || {
                debug!("event=remote_subscribe module=firestore status=start feed={label} owner={owner}");
                while !flag.load(Ordering::SeqCst) {
                    // `None` means the receiver is gone.
                    if poll(&store, &owner).is_none() {
                        break;
                    }
                    let started = Instant::now();
                    while started.elapsed() < interval && !flag.load(Ordering::SeqCst) {
                        thread::sleep(POLL_SLICE);
                    }
                }
                debug!("event=remote_subscribe module=firestore status=stopped feed={label} owner={owner}");
            });

        match spawned {
            Ok(_) => Subscription::new(move || cancelled.store(true, Ordering::SeqCst)),
            Err(err) => {
                warn!(
                    "event=remote_subscribe module=firestore status=error feed={label} error_code=thread_spawn_failed error={err}"
                );
                Subscription::inert()
            }
        }
    }
}

impl RemoteStore for FirestoreStore {
    fn fetch_all(&self, owner: &OwnerId) -> Vec<Record> {
        self.list_records(owner).unwrap_or_else(|err| {
            warn!("event=remote_fetch module=firestore status=error owner={owner} error={err}");
            Vec::new()
        })
    }

    fn subscribe(&self, owner: &OwnerId, sink: FeedSink) -> Subscription {
        let last: Mutex<Option<Vec<Record>>> = Mutex::new(None);
        self.spawn_poller(owner, "records", move |store, owner| {
            let records = match store.list_records(owner) {
                Ok(records) => records,
                Err(err) => {
                    warn!("event=remote_poll module=firestore status=error feed=records owner={owner} error={err}");
                    return Some(false);
                }
            };
            let mut last = last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if last.as_ref() == Some(&records) {
                return Some(false);
            }
            *last = Some(records.clone());
            sink.send_records(records).then_some(true)
        })
    }

    fn write(&self, owner: &OwnerId, record: &Record) -> RemoteResult<()> {
        self.patch_document(
            RemoteStage::Write,
            self.record_url(owner, record.id),
            encode_record(record),
            None,
        )
        .inspect_err(|err| {
            warn!(
                "event=remote_write module=firestore status=error owner={owner} record_id={} error={err}",
                record.id
            )
        })
    }

    fn update(
        &self,
        owner: &OwnerId,
        id: RecordId,
        patch: &RecordPatch,
        updated_at: i64,
    ) -> RemoteResult<()> {
        let (fields, mask) = encode_patch(patch, updated_at);
        self.patch_document(
            RemoteStage::Update,
            self.record_url(owner, id),
            fields,
            Some(mask.as_slice()),
        )
        .inspect_err(|err| {
            warn!("event=remote_update module=firestore status=error owner={owner} record_id={id} error={err}")
        })
    }

    fn remove(&self, owner: &OwnerId, id: RecordId) -> RemoteResult<()> {
        let response = self
            .send(RemoteStage::Remove, || {
                self.client.delete(self.record_url(owner, id))
            })
            .inspect_err(|err| {
                warn!("event=remote_remove module=firestore status=error owner={owner} record_id={id} error={err}")
            })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(RemoteStage::Remove, response)
            .map(|_| ())
            .inspect_err(|err| {
                warn!("event=remote_remove module=firestore status=error owner={owner} record_id={id} error={err}")
            })
    }

    fn get_tags(&self, owner: &OwnerId) -> Vec<String> {
        self.read_tags(owner).unwrap_or_else(|err| {
            warn!("event=remote_get_tags module=firestore status=error owner={owner} error={err}");
            Vec::new()
        })
    }

    fn subscribe_tags(&self, owner: &OwnerId, sink: FeedSink) -> Subscription {
        let last: Mutex<Option<Vec<String>>> = Mutex::new(None);
        self.spawn_poller(owner, "tags", move |store, owner| {
            let tags = match store.read_tags(owner) {
                Ok(tags) => tags,
                Err(err) => {
                    warn!("event=remote_poll module=firestore status=error feed=tags owner={owner} error={err}");
                    return Some(false);
                }
            };
            let mut last = last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if last.as_ref() == Some(&tags) {
                return Some(false);
            }
            *last = Some(tags.clone());
            sink.send_tags(tags).then_some(true)
        })
    }

    fn save_tags(&self, owner: &OwnerId, tags: &[String]) -> RemoteResult<()> {
        self.patch_document(
            RemoteStage::Tags,
            self.tags_url(owner),
            encode_tags(tags, now_epoch_ms()),
            None,
        )
        .inspect_err(|err| {
            warn!("event=remote_save_tags module=firestore status=error owner={owner} error={err}")
        })
    }
}

fn check_status(stage: RemoteStage, response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(http_error(stage, status, &body))
}

fn parse_json<T: DeserializeOwned>(stage: RemoteStage, response: Response) -> RemoteResult<T> {
    response.json::<T>().map_err(|err| {
        RemoteError::new(
            PROVIDER_ID,
            stage,
            "invalid_response",
            err.to_string(),
            false,
        )
    })
}

fn transport_error(stage: RemoteStage, err: &reqwest::Error) -> RemoteError {
    let code = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect_failed"
    } else {
        "network"
    };
    RemoteError::new(PROVIDER_ID, stage, code, err.to_string(), true)
}

fn http_error(stage: RemoteStage, status: StatusCode, body: &str) -> RemoteError {
    let code = match status {
        StatusCode::BAD_REQUEST => "invalid_argument",
        StatusCode::UNAUTHORIZED => "unauthenticated",
        StatusCode::FORBIDDEN => "permission_denied",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::TOO_MANY_REQUESTS => "resource_exhausted",
        status if status.is_server_error() => "unavailable",
        _ => "http_error",
    };
    let message = api_error_message(body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
    RemoteError::new(PROVIDER_ID, stage, code, message, retryable)
}

/// Extracts `error.message` from a Google API error body.
fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn string_value(value: &str) -> Value {
    json!({ "stringValue": value })
}

fn integer_value(value: i64) -> Value {
    json!({ "integerValue": value.to_string() })
}

fn string_array_value(values: &[String]) -> Value {
    if values.is_empty() {
        return json!({ "arrayValue": {} });
    }
    let values: Vec<Value> = values.iter().map(|value| string_value(value)).collect();
    json!({ "arrayValue": { "values": values } })
}

fn encode_record(record: &Record) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("id".to_string(), string_value(&record.id.to_string()));
    fields.insert("content".to_string(), string_value(&record.content));
    if let Some(title) = record.title.as_deref() {
        fields.insert("title".to_string(), string_value(title));
    }
    fields.insert("tags".to_string(), string_array_value(&record.tags));
    if let Some(annotation) = record.annotation.as_deref() {
        fields.insert("annotation".to_string(), string_value(annotation));
    }
    fields.insert("flag".to_string(), json!({ "booleanValue": record.flag }));
    fields.insert("createdAt".to_string(), integer_value(record.created_at));
    fields.insert("updatedAt".to_string(), integer_value(record.updated_at));
    fields
}

/// Encodes patch fields plus the matching update mask.
///
/// Cleared optional fields stay in the mask but not in `fields`, which makes
/// Firestore delete them.
fn encode_patch(patch: &RecordPatch, updated_at: i64) -> (Map<String, Value>, Vec<&'static str>) {
    let mut fields = Map::new();
    if let Some(content) = patch.content.as_deref() {
        fields.insert("content".to_string(), string_value(content));
    }
    if let Some(Some(title)) = patch.title.as_ref() {
        fields.insert("title".to_string(), string_value(title));
    }
    if let Some(tags) = patch.tags.as_ref() {
        fields.insert("tags".to_string(), string_array_value(tags));
    }
    if let Some(Some(annotation)) = patch.annotation.as_ref() {
        fields.insert("annotation".to_string(), string_value(annotation));
    }
    if let Some(flag) = patch.flag {
        fields.insert("flag".to_string(), json!({ "booleanValue": flag }));
    }
    fields.insert("updatedAt".to_string(), integer_value(updated_at));

    let mut mask = patch.field_names();
    mask.push("updatedAt");
    (fields, mask)
}

fn encode_tags(tags: &[String], saved_at: i64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("list".to_string(), string_array_value(tags));
    fields.insert("updatedAt".to_string(), integer_value(saved_at));
    fields
}

fn field_str<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields.get(name)?.get("stringValue")?.as_str()
}

fn field_i64(fields: &Map<String, Value>, name: &str) -> Option<i64> {
    let value = fields.get(name)?;
    if let Some(text) = value.get("integerValue").and_then(Value::as_str) {
        return text.parse().ok();
    }
    value.get("integerValue").and_then(Value::as_i64)
}

fn field_strings(fields: &Map<String, Value>, name: &str) -> Vec<String> {
    fields
        .get(name)
        .and_then(|value| value.get("arrayValue"))
        .and_then(|array| array.get("values"))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value.get("stringValue").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes one Firestore document into a record.
///
/// The id falls back to the last segment of the document name.
fn decode_record(document: &Value) -> Option<Record> {
    let fields = document.get("fields")?.as_object()?;
    let id_text = field_str(fields, "id").or_else(|| {
        document
            .get("name")
            .and_then(Value::as_str)
            .and_then(|name| name.rsplit('/').next())
    })?;
    let id = Uuid::parse_str(id_text).ok()?;
    let created_at = field_i64(fields, "createdAt")?;
    let updated_at = field_i64(fields, "updatedAt").unwrap_or(created_at);

    Some(Record {
        id,
        content: field_str(fields, "content")?.to_string(),
        title: field_str(fields, "title").map(str::to_string),
        tags: field_strings(fields, "tags"),
        annotation: field_str(fields, "annotation").map(str::to_string),
        flag: fields
            .get("flag")
            .and_then(|value| value.get("booleanValue"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        created_at,
        updated_at,
    })
}

fn decode_tags(document: &Value) -> Vec<String> {
    document
        .get("fields")
        .and_then(Value::as_object)
        .map(|fields| field_strings(fields, "list"))
        .unwrap_or_default()
}
