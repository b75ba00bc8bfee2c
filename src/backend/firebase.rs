//! Hosted identity + document store client.
//!
//! Thin HTTP wrapper over the Identity Toolkit `accounts:*` endpoints and the
//! Firestore `documents` REST API. Wire parsing and typed-value conversion are
//! pure functions so they can be tested without a network.
//!
//! The signed-in user's id token is held in memory only and sent as the
//! bearer for document calls. Nothing is persisted across runs.

#[cfg(test)]
#[path = "firebase_test.rs"]
mod firebase_test;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info};

use super::{Document, DocumentWrite, FederatedPrompt, FederatedProvider, IdentityBackend};
use crate::config::FirebaseConfig;
use crate::error::AuthError;
use crate::session::Identity;

/// Redirect URI reported to the identity service for IdP sign-in.
const IDP_REQUEST_URI: &str = "http://localhost";

// =============================================================================
// CLIENT
// =============================================================================

pub struct FirebaseBackend {
    http: reqwest::Client,
    config: FirebaseConfig,
    prompt: Arc<dyn FederatedPrompt>,
    id_token: RwLock<Option<String>>,
    auth_state: watch::Sender<Option<Identity>>,
}

impl FirebaseBackend {
    /// Build a client for `config`; `prompt` supplies federated assertions.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the HTTP client cannot be built.
    pub fn new(config: FirebaseConfig, prompt: Arc<dyn FederatedPrompt>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| AuthError::BackendUnavailable(format!("http client build failed: {e}")))?;
        let (auth_state, _) = watch::channel(None);
        Ok(Self { http, config, prompt, id_token: RwLock::new(None), auth_state })
    }

    async fn sign_in<B: Serialize + Sync>(&self, method: &str, body: &B) -> Result<Identity, AuthError> {
        let response = self
            .http
            .post(accounts_url(&self.config, method))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;
        if !(200..300).contains(&status) {
            return Err(parse_auth_error(status, &text));
        }

        let parsed: SignInResponse =
            serde_json::from_str(&text).map_err(|e| AuthError::MalformedResponse(format!("{method}: {e}")))?;
        *self.id_token.write().await = Some(parsed.id_token.clone());

        let identity = parsed.into_identity();
        info!(uid = %identity.uid, method, "identity service sign-in");
        self.auth_state.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.id_token.read().await.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl IdentityBackend for FirebaseBackend {
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let body = PasswordRequest { email, password, return_secure_token: true };
        self.sign_in("accounts:signInWithPassword", &body).await
    }

    async fn create_credential(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let body = PasswordRequest { email, password, return_secure_token: true };
        self.sign_in("accounts:signUp", &body).await
    }

    async fn federated_sign_in(&self, provider: FederatedProvider) -> Result<Identity, AuthError> {
        let assertion = self.prompt.assertion(provider).await?.ok_or(AuthError::PopupClosed)?;
        let body = IdpRequest {
            post_body: idp_post_body(provider, assertion.trim()),
            request_uri: IDP_REQUEST_URI,
            return_secure_token: true,
            return_idp_credential: true,
        };
        self.sign_in("accounts:signInWithIdp", &body).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.id_token.write().await = None;
        self.auth_state.send_replace(None);
        info!("identity service sign-out");
        Ok(())
    }

    async fn read_document(&self, collection: &str, key: &str) -> Result<Option<Document>, AuthError> {
        let url = document_url(&self.config, collection, key);
        let response = self
            .authorized(self.http.get(&url))
            .await
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;
        if status == 404 {
            debug!(collection, key, "document not found");
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(parse_firestore_error(status, &text));
        }

        let document: FirestoreDocument =
            serde_json::from_str(&text).map_err(|e| AuthError::MalformedResponse(format!("document: {e}")))?;
        decode_fields(document.fields).map(Some)
    }

    async fn write_document(
        &self,
        collection: &str,
        key: &str,
        write: DocumentWrite,
    ) -> Result<OffsetDateTime, AuthError> {
        let body = commit_body(&self.config, collection, key, &write);
        let response = self
            .authorized(self.http.post(commit_url(&self.config)))
            .await
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;
        if !(200..300).contains(&status) {
            return Err(parse_firestore_error(status, &text));
        }
        parse_commit_time(&text)
    }

    fn subscribe_auth_state(&self) -> watch::Receiver<Option<Identity>> {
        self.auth_state.subscribe()
    }
}

fn transport_error(e: reqwest::Error) -> AuthError {
    AuthError::BackendUnavailable(e.to_string())
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest<'a> {
    post_body: String,
    request_uri: &'a str,
    return_secure_token: bool,
    return_idp_credential: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
}

impl SignInResponse {
    fn into_identity(self) -> Identity {
        Identity {
            uid: self.local_id,
            email: self.email.filter(|e| !e.is_empty()),
            display_name: self.display_name.filter(|n| !n.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    #[serde(default)]
    fields: Document,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    commit_time: String,
}

// =============================================================================
// ENDPOINTS
// =============================================================================

fn accounts_url(config: &FirebaseConfig, method: &str) -> String {
    format!("{}/{method}?key={}", config.auth_base_url.trim_end_matches('/'), config.api_key)
}

fn database_path(config: &FirebaseConfig) -> String {
    format!("projects/{}/databases/(default)/documents", config.project_id)
}

fn document_name(config: &FirebaseConfig, collection: &str, key: &str) -> String {
    format!("{}/{collection}/{key}", database_path(config))
}

fn document_url(config: &FirebaseConfig, collection: &str, key: &str) -> String {
    format!(
        "{}/{}",
        config.firestore_base_url.trim_end_matches('/'),
        document_name(config, collection, key)
    )
}

fn commit_url(config: &FirebaseConfig) -> String {
    format!("{}/{}:commit", config.firestore_base_url.trim_end_matches('/'), database_path(config))
}

/// Form-encoded `postBody` for `accounts:signInWithIdp`.
fn idp_post_body(provider: FederatedProvider, assertion: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("id_token", assertion)
        .append_pair("providerId", provider.provider_id())
        .finish()
}

/// Single-write commit body; server timestamps become `REQUEST_TIME` transforms.
fn commit_body(config: &FirebaseConfig, collection: &str, key: &str, write: &DocumentWrite) -> Value {
    let mut entry = json!({
        "update": {
            "name": document_name(config, collection, key),
            "fields": encode_fields(&write.fields),
        }
    });
    if !write.server_timestamps.is_empty() {
        let transforms: Vec<Value> = write
            .server_timestamps
            .iter()
            .map(|field| json!({ "fieldPath": field_path(field), "setToServerValue": "REQUEST_TIME" }))
            .collect();
        entry["updateTransforms"] = Value::Array(transforms);
    }
    json!({ "writes": [entry] })
}

/// Quote a field name with backticks unless it is a simple identifier.
fn field_path(name: &str) -> String {
    let simple = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_owned()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Map an identity-service error response onto `AuthError`.
///
/// Messages look like `EMAIL_EXISTS` or `WEAK_PASSWORD : Password should be…`.
fn parse_auth_error(status: u16, body: &str) -> AuthError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_default();
    let (code, detail) = match message.split_once(" : ") {
        Some((code, detail)) => (code.trim(), Some(detail.trim())),
        None => (message.trim(), None),
    };

    match code {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => AuthError::InvalidCredentials,
        "EMAIL_EXISTS" => AuthError::EmailInUse,
        "WEAK_PASSWORD" => AuthError::WeakPassword(detail.unwrap_or("password rejected").to_owned()),
        "INVALID_EMAIL" | "MISSING_EMAIL" => AuthError::InvalidEmail,
        "USER_DISABLED" => AuthError::PermissionDenied(code.to_owned()),
        "TOO_MANY_ATTEMPTS_TRY_LATER" => AuthError::BackendUnavailable(code.to_owned()),
        _ if status >= 500 => AuthError::BackendUnavailable(format!("status {status}")),
        "" => AuthError::Rejected { code: format!("HTTP_{status}") },
        other => AuthError::Rejected { code: other.to_owned() },
    }
}

/// Map a document-store error response onto `AuthError`.
fn parse_firestore_error(status: u16, body: &str) -> AuthError {
    let (message, code) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.status.unwrap_or_default()),
        Err(_) => (String::new(), String::new()),
    };

    match (code.as_str(), status) {
        ("PERMISSION_DENIED" | "UNAUTHENTICATED", _) | (_, 401 | 403) => AuthError::PermissionDenied(message),
        ("UNAVAILABLE" | "DEADLINE_EXCEEDED" | "RESOURCE_EXHAUSTED" | "INTERNAL", _) | (_, 500..) => {
            AuthError::BackendUnavailable(if message.is_empty() { format!("status {status}") } else { message })
        }
        ("", _) => AuthError::Rejected { code: format!("HTTP_{status}") },
        (other, _) => AuthError::Rejected { code: other.to_owned() },
    }
}

fn parse_commit_time(body: &str) -> Result<OffsetDateTime, AuthError> {
    let commit: CommitResponse =
        serde_json::from_str(body).map_err(|e| AuthError::MalformedResponse(format!("commit: {e}")))?;
    OffsetDateTime::parse(&commit.commit_time, &Rfc3339)
        .map_err(|e| AuthError::MalformedResponse(format!("commit time {}: {e}", commit.commit_time)))
}

// =============================================================================
// TYPED VALUES
// =============================================================================

/// Convert Firestore typed fields (`{"name": {"stringValue": "A"}}`) to plain JSON.
fn decode_fields(fields: Document) -> Result<Document, AuthError> {
    fields
        .into_iter()
        .map(|(name, typed)| decode_value(typed).map(|value| (name, value)))
        .collect()
}

fn decode_value(typed: Value) -> Result<Value, AuthError> {
    let map = match typed {
        Value::Object(map) => map,
        other => return Err(AuthError::MalformedResponse(format!("typed value is not an object: {other}"))),
    };
    let Some((kind, inner)) = map.into_iter().next() else {
        return Err(AuthError::MalformedResponse("empty typed value".to_owned()));
    };

    match (kind.as_str(), inner) {
        ("nullValue", _) => Ok(Value::Null),
        ("booleanValue", Value::Bool(b)) => Ok(Value::Bool(b)),
        ("integerValue", Value::String(raw)) => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| AuthError::MalformedResponse(format!("integerValue {raw}: {e}"))),
        ("integerValue" | "doubleValue", Value::Number(n)) => Ok(Value::Number(n)),
        (
            "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" | "doubleValue",
            Value::String(s),
        ) => Ok(Value::String(s)),
        ("geoPointValue", Value::Object(point)) => Ok(Value::Object(point)),
        ("mapValue", Value::Object(mut map)) => match map.remove("fields") {
            Some(Value::Object(fields)) => decode_fields(fields).map(Value::Object),
            _ => Ok(Value::Object(Document::new())),
        },
        ("arrayValue", Value::Object(mut array)) => match array.remove("values") {
            Some(Value::Array(values)) => values
                .into_iter()
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Ok(Value::Array(Vec::new())),
        },
        (other, inner) => Err(AuthError::MalformedResponse(format!("unsupported value {other}: {inner}"))),
    }
}

/// Convert plain JSON fields to Firestore typed fields.
fn encode_fields(fields: &Document) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, value)| (name.clone(), encode_value(value)))
            .collect(),
    )
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(values) => json!({ "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() } }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}
