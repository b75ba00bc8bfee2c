//! Application configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::str::FromStr;

pub const DEFAULT_PROFILE_COLLECTION: &str = "users";
pub const DEFAULT_AUTH_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required env var {var}")]
    Missing { var: &'static str },

    /// A variable is set to something we cannot use.
    #[error("config parse failed: {0}")]
    Invalid(String),
}

/// Which `IdentityBackend` to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Firebase,
    Memory,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "firebase" => Ok(Self::Firebase),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Invalid(format!(
                "unknown backend '{other}' (expected 'firebase' or 'memory')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Hosted identity + document store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub project_id: String,
    pub auth_base_url: String,
    pub firestore_base_url: String,
    pub timeouts: HttpTimeouts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub profile_collection: String,
    /// Present when `backend` is `Firebase`.
    pub firebase: Option<FirebaseConfig>,
}

impl AppConfig {
    /// Build typed config from the process environment.
    ///
    /// - `COACHBOARD_BACKEND`: `firebase` (default) or `memory`
    /// - `COACHBOARD_PROFILE_COLLECTION`: default `users`
    /// - `FIREBASE_API_KEY`, `FIREBASE_PROJECT_ID`: required for `firebase`
    /// - `FIREBASE_AUTH_EMULATOR_HOST`, `FIRESTORE_EMULATOR_HOST`: emulator endpoints
    /// - `FIREBASE_REQUEST_TIMEOUT_SECS`: default 30
    /// - `FIREBASE_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// [`AppConfig::from_env`] with the backend forced by the caller
    /// (command-line override). `COACHBOARD_BACKEND` is ignored when
    /// `backend` is `Some`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_env_with(backend: Option<BackendKind>) -> Result<Self, ConfigError> {
        Self::from_lookup_with(env_lookup, backend)
    }

    /// Same as [`AppConfig::from_env`] with a caller-supplied lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_lookup_with(lookup, None)
    }

    /// Resolve the backend first, then read only the settings it needs.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_lookup_with<F>(lookup: F, backend: Option<BackendKind>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match (backend, lookup("COACHBOARD_BACKEND")) {
            (Some(forced), _) => forced,
            (None, Some(raw)) => raw.parse()?,
            (None, None) => BackendKind::Firebase,
        };
        let profile_collection = lookup("COACHBOARD_PROFILE_COLLECTION")
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_PROFILE_COLLECTION.to_owned());

        let firebase = match backend {
            BackendKind::Firebase => Some(FirebaseConfig::from_lookup(&lookup)?),
            BackendKind::Memory => None,
        };

        Ok(Self { backend, profile_collection, firebase })
    }
}

impl FirebaseConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = required(lookup, "FIREBASE_API_KEY")?;
        let project_id = required(lookup, "FIREBASE_PROJECT_ID")?;

        let auth_base_url = match lookup("FIREBASE_AUTH_EMULATOR_HOST") {
            Some(host) => format!("http://{}/identitytoolkit.googleapis.com/v1", host.trim()),
            None => DEFAULT_AUTH_BASE_URL.to_owned(),
        };
        let firestore_base_url = match lookup("FIRESTORE_EMULATOR_HOST") {
            Some(host) => format!("http://{}/v1", host.trim()),
            None => DEFAULT_FIRESTORE_BASE_URL.to_owned(),
        };
        let timeouts = HttpTimeouts {
            request_secs: parse_u64(lookup, "FIREBASE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: parse_u64(lookup, "FIREBASE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };

        Ok(Self { api_key, project_id, auth_base_url, firestore_base_url, timeouts })
    }
}

/// Process environment lookup; unset and non-unicode values read as absent.
#[must_use]
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { var })
}

fn parse_u64<F>(lookup: &F, var: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::Invalid(format!("{var}={raw}: {e}"))),
        None => Ok(default),
    }
}
