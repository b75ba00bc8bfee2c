//! Identity + document backend boundary.
//!
//! ARCHITECTURE
//! ============
//! The session store never talks to a concrete service. It depends on
//! `IdentityBackend`, which covers credential checks, account creation,
//! federated sign-in, sign-out, profile documents, and a push channel of
//! auth-state transitions. `firebase` speaks the hosted REST APIs; `memory`
//! keeps everything in process for tests and the demo shell.

pub mod firebase;
pub mod memory;

use std::fmt;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::error::AuthError;
use crate::session::Identity;

/// A stored document: field name to JSON value.
pub type Document = serde_json::Map<String, Value>;

/// A full-document write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentWrite {
    /// Fields written verbatim.
    pub fields: Document,
    /// Fields the backend sets to its own commit time.
    pub server_timestamps: Vec<String>,
}

/// Federated identity providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FederatedProvider {
    Google,
}

impl FederatedProvider {
    /// Provider id used by the identity service.
    #[must_use]
    pub fn provider_id(self) -> &'static str {
        match self {
            Self::Google => "google.com",
        }
    }
}

impl fmt::Display for FederatedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.provider_id())
    }
}

/// Operations the session store needs from the external backend.
#[async_trait::async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Check an email/password pair and sign in.
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Create an email/password account and sign in as it.
    async fn create_credential(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Sign in through a federated provider.
    async fn federated_sign_in(&self, provider: FederatedProvider) -> Result<Identity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Read one document. `Ok(None)` when it does not exist.
    async fn read_document(&self, collection: &str, key: &str) -> Result<Option<Document>, AuthError>;

    /// Replace one document, returning the backend's commit time.
    async fn write_document(
        &self,
        collection: &str,
        key: &str,
        write: DocumentWrite,
    ) -> Result<OffsetDateTime, AuthError>;

    /// Auth-state channel. The receiver observes the current state at once
    /// and every later sign-in or sign-out.
    fn subscribe_auth_state(&self) -> watch::Receiver<Option<Identity>>;
}

/// Source of a federated provider assertion (the sign-in popup).
#[async_trait::async_trait]
pub trait FederatedPrompt: Send + Sync {
    /// Ask the user to complete provider sign-in. `Ok(None)` means they
    /// dismissed the prompt.
    async fn assertion(&self, provider: FederatedProvider) -> Result<Option<String>, AuthError>;
}
