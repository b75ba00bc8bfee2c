//! Error taxonomy for identity and profile operations.
//!
//! ERROR HANDLING
//! ==============
//! Backend failures surface unchanged to the caller; nothing in this crate
//! retries. A missing profile document is not an error and never shows up
//! here: reads return `Ok(None)` instead.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

/// Errors produced by the session store and its backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Email/password pair was rejected.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Email address is malformed.
    #[error("invalid email address")]
    InvalidEmail,

    /// An account already exists for this email.
    #[error("email address already in use")]
    EmailInUse,

    /// Password does not satisfy the backend's strength rules.
    #[error("password too weak: {0}")]
    WeakPassword(String),

    /// The federated sign-in prompt was dismissed before completing.
    #[error("sign-in popup closed before completion")]
    PopupClosed,

    /// The backend refused access to a document or account.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend could not be reached or is temporarily failing.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend rejected the request with a code we do not map.
    #[error("backend rejected request: {code}")]
    Rejected { code: String },

    /// A backend response or stored document could not be decoded.
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    /// `init_auth_listener` was called a second time on the same store.
    #[error("auth listener already installed")]
    ListenerAlreadyInstalled,
}

impl AuthError {
    /// Stable machine-readable code for display and logging.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "E_INVALID_CREDENTIALS",
            Self::InvalidEmail => "E_INVALID_EMAIL",
            Self::EmailInUse => "E_EMAIL_IN_USE",
            Self::WeakPassword(_) => "E_WEAK_PASSWORD",
            Self::PopupClosed => "E_POPUP_CLOSED",
            Self::PermissionDenied(_) => "E_PERMISSION_DENIED",
            Self::BackendUnavailable(_) => "E_BACKEND_UNAVAILABLE",
            Self::Rejected { .. } => "E_REJECTED",
            Self::MalformedResponse(_) => "E_MALFORMED_RESPONSE",
            Self::ListenerAlreadyInstalled => "E_LISTENER_INSTALLED",
        }
    }

    /// Whether repeating the same request later could succeed.
    ///
    /// Informational only; callers decide whether to retry.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}
