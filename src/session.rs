//! Session data model: identity, profile, role.
//!
//! DESIGN
//! ======
//! `Identity` is whatever the backend says about the signed-in principal.
//! `Profile` is the application document stored under the same uid. Roles
//! arrive as free-form strings from the document store, so `Role` keeps
//! unrecognized values instead of failing to decode them; routing treats
//! those the same as "no role".

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::backend::{Document, DocumentWrite};
use crate::error::AuthError;
use crate::routes::RouteName;

/// Document field holding the server-assigned creation time.
pub const CREATED_AT_FIELD: &str = "createdAt";

// =============================================================================
// IDENTITY
// =============================================================================

/// Backend-issued principal for the signed-in user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable backend user id; also the profile document key.
    pub uid: String,
    /// Primary email, if the provider shared one.
    pub email: Option<String>,
    /// Display name from a federated provider, if any.
    pub display_name: Option<String>,
}

impl Identity {
    /// Name to use when synthesizing a profile for this identity.
    ///
    /// Display name first, then the local part of the email, then `"user"`.
    #[must_use]
    pub fn default_profile_name(&self) -> String {
        if let Some(name) = self.display_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_owned();
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .map(str::trim)
            .filter(|local| !local.is_empty())
            .unwrap_or("user")
            .to_owned()
    }
}

// =============================================================================
// ROLE
// =============================================================================

/// User role as stored on the profile document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Coach,
    Athlete,
    /// Any value other than `coach`/`athlete`.
    Other(String),
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Coach => "coach",
            Self::Athlete => "athlete",
            Self::Other(raw) => raw,
        }
    }

    /// Landing route for this role, if it has one.
    #[must_use]
    pub fn dashboard(&self) -> Option<RouteName> {
        match self {
            Self::Coach => Some(RouteName::CoachDashboard),
            Self::Athlete => Some(RouteName::AthleteDashboard),
            Self::Other(_) => None,
        }
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "coach" => Self::Coach,
            "athlete" => Self::Athlete,
            _ => Self::Other(raw),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PROFILE
// =============================================================================

/// Application profile document, keyed by uid in the profile collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<Role>,
    /// Server-assigned creation time. `None` until the backend has stamped it.
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<OffsetDateTime>,
}

impl Profile {
    /// New athlete profile awaiting its server timestamp.
    #[must_use]
    pub fn athlete(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { name: name.into(), email: email.into(), role: Some(Role::Athlete), created_at: None }
    }

    /// Decode a stored document.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if a field has the wrong shape.
    pub fn from_document(document: Document) -> Result<Self, AuthError> {
        serde_json::from_value(Value::Object(document))
            .map_err(|e| AuthError::MalformedResponse(format!("profile document: {e}")))
    }

    /// Build the write that creates this profile, with `createdAt` left to
    /// the server.
    #[must_use]
    pub fn to_write(&self) -> DocumentWrite {
        let mut fields = Document::new();
        fields.insert("name".into(), Value::String(self.name.clone()));
        fields.insert("email".into(), Value::String(self.email.clone()));
        if let Some(role) = &self.role {
            fields.insert("role".into(), Value::String(role.as_str().to_owned()));
        }
        DocumentWrite { fields, server_timestamps: vec![CREATED_AT_FIELD.to_owned()] }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Current identity, profile, and loading status.
///
/// `loading` is true while the session is still hydrating or any auth or
/// profile operation is in flight; routing must not treat the session as
/// final in that state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub user: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl Session {
    /// Role from the loaded profile, if any.
    #[must_use]
    pub fn role(&self) -> Option<&Role> {
        self.profile.as_ref().and_then(|p| p.role.as_ref())
    }

    /// Dashboard for the loaded role, if the role is recognized.
    #[must_use]
    pub fn dashboard(&self) -> Option<RouteName> {
        self.role().and_then(Role::dashboard)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}
