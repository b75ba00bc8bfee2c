use super::*;

#[test]
fn error_codes_are_distinct() {
    let errors = [
        AuthError::InvalidCredentials,
        AuthError::InvalidEmail,
        AuthError::EmailInUse,
        AuthError::WeakPassword("short".into()),
        AuthError::PopupClosed,
        AuthError::PermissionDenied("users/u1".into()),
        AuthError::BackendUnavailable("timeout".into()),
        AuthError::Rejected { code: "OPERATION_NOT_ALLOWED".into() },
        AuthError::MalformedResponse("bad json".into()),
        AuthError::ListenerAlreadyInstalled,
    ];
    for (i, a) in errors.iter().enumerate() {
        for (j, b) in errors.iter().enumerate() {
            if i != j {
                assert_ne!(a.error_code(), b.error_code());
            }
        }
    }
}

#[test]
fn only_unavailable_is_retryable() {
    assert!(AuthError::BackendUnavailable("503".into()).retryable());
    assert!(!AuthError::InvalidCredentials.retryable());
    assert!(!AuthError::PopupClosed.retryable());
    assert!(!AuthError::PermissionDenied("x".into()).retryable());
}

#[test]
fn weak_password_display_includes_detail() {
    let err = AuthError::WeakPassword("Password should be at least 6 characters".into());
    assert_eq!(err.to_string(), "password too weak: Password should be at least 6 characters");
}
