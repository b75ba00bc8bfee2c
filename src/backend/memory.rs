//! In-process backend for tests and the demo shell.
//!
//! Accounts and documents live in a mutex-guarded map. Sign-in state is
//! published on the same kind of watch channel the hosted backend uses, so
//! the session store cannot tell the two apart. Any operation can be made
//! to fail once with `fail_next`.

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Mutex, watch};
use tracing::debug;
use uuid::Uuid;

use super::{Document, DocumentWrite, FederatedPrompt, FederatedProvider, IdentityBackend};
use crate::error::AuthError;
use crate::session::Identity;

const MIN_PASSWORD_LEN: usize = 6;

/// Backend operations that can be scripted to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    VerifyCredentials,
    CreateCredential,
    FederatedSignIn,
    SignOut,
    ReadDocument,
    WriteDocument,
}

struct Account {
    identity: Identity,
    password: String,
}

#[derive(Default)]
struct MemoryState {
    /// Password accounts keyed by normalized email.
    accounts: HashMap<String, Account>,
    /// Federated accounts keyed by normalized email.
    federated: HashMap<String, Identity>,
    documents: HashMap<(String, String), Document>,
    failures: HashMap<Operation, AuthError>,
}

/// In-memory `IdentityBackend`.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    auth_state: watch::Sender<Option<Identity>>,
    prompt: Option<Arc<dyn FederatedPrompt>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let (auth_state, _) = watch::channel(None);
        Self { state: Mutex::new(MemoryState::default()), auth_state, prompt: None }
    }

    /// Use `prompt` for federated sign-in. The assertion it returns is read
    /// as the provider account's email.
    #[must_use]
    pub fn with_prompt(mut self, prompt: Arc<dyn FederatedPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Start with `identity` already signed in, as if restored by the provider.
    #[must_use]
    pub fn with_signed_in(self, identity: Identity) -> Self {
        self.auth_state.send_replace(Some(identity));
        self
    }

    /// Register a password account without signing in.
    ///
    /// # Errors
    ///
    /// Same validation as `create_credential`.
    pub async fn add_account(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let mut state = self.state.lock().await;
        register_account(&mut state, email, password)
    }

    /// Register a federated account reachable through the prompt.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEmail` for malformed addresses.
    pub async fn add_federated_account(&self, email: &str, display_name: Option<&str>) -> Result<Identity, AuthError> {
        let email = normalize_email(email).ok_or(AuthError::InvalidEmail)?;
        let identity = Identity {
            uid: new_uid(),
            email: Some(email.clone()),
            display_name: display_name.map(str::to_owned),
        };
        self.state.lock().await.federated.insert(email, identity.clone());
        Ok(identity)
    }

    /// Store a document directly, bypassing failure injection.
    pub async fn put_document(&self, collection: &str, key: &str, document: Document) {
        self.state
            .lock()
            .await
            .documents
            .insert((collection.to_owned(), key.to_owned()), document);
    }

    /// Read a document directly, bypassing failure injection.
    pub async fn document(&self, collection: &str, key: &str) -> Option<Document> {
        self.state
            .lock()
            .await
            .documents
            .get(&(collection.to_owned(), key.to_owned()))
            .cloned()
    }

    /// Make the next call of `operation` fail with `error`.
    pub async fn fail_next(&self, operation: Operation, error: AuthError) {
        self.state.lock().await.failures.insert(operation, error);
    }

    /// Currently signed-in identity.
    #[must_use]
    pub fn current_user(&self) -> Option<Identity> {
        self.auth_state.borrow().clone()
    }

    fn publish(&self, identity: Option<Identity>) {
        debug!(uid = identity.as_ref().map(|i| i.uid.as_str()), "memory backend auth state changed");
        self.auth_state.send_replace(identity);
    }
}

fn take_failure(state: &mut MemoryState, operation: Operation) -> Result<(), AuthError> {
    match state.failures.remove(&operation) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn register_account(state: &mut MemoryState, email: &str, password: &str) -> Result<Identity, AuthError> {
    let email = normalize_email(email).ok_or(AuthError::InvalidEmail)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword(format!(
            "Password should be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if state.accounts.contains_key(&email) {
        return Err(AuthError::EmailInUse);
    }
    let identity = Identity { uid: new_uid(), email: Some(email.clone()), display_name: None };
    state
        .accounts
        .insert(email, Account { identity: identity.clone(), password: password.to_owned() });
    Ok(identity)
}

fn new_uid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Trim and lowercase; reject anything that is not `local@domain`.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(normalized)
}

#[async_trait::async_trait]
impl IdentityBackend for MemoryBackend {
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = {
            let mut state = self.state.lock().await;
            take_failure(&mut state, Operation::VerifyCredentials)?;
            let email = normalize_email(email).ok_or(AuthError::InvalidEmail)?;
            match state.accounts.get(&email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(AuthError::InvalidCredentials),
            }
        };
        self.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn create_credential(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = {
            let mut state = self.state.lock().await;
            take_failure(&mut state, Operation::CreateCredential)?;
            register_account(&mut state, email, password)?
        };
        self.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn federated_sign_in(&self, provider: FederatedProvider) -> Result<Identity, AuthError> {
        take_failure(&mut *self.state.lock().await, Operation::FederatedSignIn)?;

        let Some(prompt) = &self.prompt else {
            return Err(AuthError::PopupClosed);
        };
        let assertion = prompt.assertion(provider).await?.ok_or(AuthError::PopupClosed)?;
        let email = normalize_email(&assertion).ok_or(AuthError::InvalidEmail)?;

        let identity = {
            let mut state = self.state.lock().await;
            state
                .federated
                .entry(email.clone())
                .or_insert_with(|| Identity { uid: new_uid(), email: Some(email), display_name: None })
                .clone()
        };
        self.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        take_failure(&mut *self.state.lock().await, Operation::SignOut)?;
        self.publish(None);
        Ok(())
    }

    async fn read_document(&self, collection: &str, key: &str) -> Result<Option<Document>, AuthError> {
        let mut state = self.state.lock().await;
        take_failure(&mut state, Operation::ReadDocument)?;
        Ok(state.documents.get(&(collection.to_owned(), key.to_owned())).cloned())
    }

    async fn write_document(
        &self,
        collection: &str,
        key: &str,
        write: DocumentWrite,
    ) -> Result<OffsetDateTime, AuthError> {
        let mut state = self.state.lock().await;
        take_failure(&mut state, Operation::WriteDocument)?;

        let now = OffsetDateTime::now_utc();
        let stamp = now
            .format(&Rfc3339)
            .map_err(|e| AuthError::MalformedResponse(format!("timestamp format: {e}")))?;
        let mut document = write.fields;
        for field in write.server_timestamps {
            document.insert(field, serde_json::Value::String(stamp.clone()));
        }
        state.documents.insert((collection.to_owned(), key.to_owned()), document);
        Ok(now)
    }

    fn subscribe_auth_state(&self) -> watch::Receiver<Option<Identity>> {
        self.auth_state.subscribe()
    }
}
