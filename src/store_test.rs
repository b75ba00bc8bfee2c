use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Notify;

use super::*;
use crate::backend::memory::{MemoryBackend, Operation};
use crate::backend::{Document, FederatedPrompt};
use crate::routes::RouteName;
use crate::session::Role;

struct FixedPrompt(Option<&'static str>);

#[async_trait::async_trait]
impl FederatedPrompt for FixedPrompt {
    async fn assertion(&self, _provider: FederatedProvider) -> Result<Option<String>, AuthError> {
        Ok(self.0.map(str::to_owned))
    }
}

/// Blocks until released, then answers with a fixed email.
struct GatedPrompt {
    gate: Arc<Notify>,
    email: &'static str,
}

#[async_trait::async_trait]
impl FederatedPrompt for GatedPrompt {
    async fn assertion(&self, _provider: FederatedProvider) -> Result<Option<String>, AuthError> {
        self.gate.notified().await;
        Ok(Some(self.email.to_owned()))
    }
}

fn profile_doc(name: &str, email: &str, role: &str) -> Document {
    match json!({ "name": name, "email": email, "role": role, "createdAt": "2026-01-05T08:00:00Z" }) {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Store with an installed, hydrated listener.
async fn hydrated(backend: Arc<MemoryBackend>) -> (AuthStore, AuthListener) {
    let store = AuthStore::new(backend);
    let listener = store.init_auth_listener().unwrap();
    assert!(store.ready().await);
    store.settled().await;
    (store, listener)
}

// =============================================================
// Loading
// =============================================================

#[test]
fn loading_until_hydrated() {
    let store = AuthStore::new(Arc::new(MemoryBackend::new()));
    let session = store.session();
    assert!(session.loading);
    assert!(session.user.is_none());
}

#[tokio::test]
async fn hydration_with_no_user_clears_loading() {
    let (store, listener) = hydrated(Arc::new(MemoryBackend::new())).await;
    assert_eq!(store.session(), Session::default());
    assert!(listener.is_active());
}

#[tokio::test]
async fn loading_is_true_while_an_operation_is_in_flight() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(
        MemoryBackend::new().with_prompt(Arc::new(GatedPrompt { gate: Arc::clone(&gate), email: "g@x.com" })),
    );
    let (store, _listener) = hydrated(backend).await;

    let pending = tokio::spawn({
        let store = store.clone();
        async move { store.login_with_google().await }
    });
    let busy = store.watch().wait_for(|s| s.loading).await.unwrap();
    assert!(busy.user.is_none());

    gate.notify_one();
    pending.await.unwrap().unwrap();
    let done = store.watch().wait_for(|s| s.user.is_some() && !s.loading).await.unwrap();
    assert_eq!(done.profile.unwrap().name, "g");
}

#[tokio::test]
async fn failed_login_leaves_loading_false() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_account("a@x.com", "secret1").await.unwrap();
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;

    let err = store.login("a@x.com", "wrong-pass").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);

    let session = store.session();
    assert!(!session.loading);
    assert!(session.user.is_none());
    assert!(session.profile.is_none());
}

// =============================================================
// login
// =============================================================

#[tokio::test]
async fn login_loads_user_and_profile_together() {
    let backend = Arc::new(MemoryBackend::new());
    let coach = backend.add_account("c@x.com", "secret1").await.unwrap();
    backend.put_document("users", &coach.uid, profile_doc("Coach C", "c@x.com", "coach")).await;
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;

    store.login("c@x.com", "secret1").await.unwrap();

    let session = store.session();
    assert_eq!(session.user.as_ref().map(|u| u.uid.as_str()), Some(coach.uid.as_str()));
    assert_eq!(session.role(), Some(&Role::Coach));
    assert_eq!(session.dashboard(), Some(RouteName::CoachDashboard));
}

#[tokio::test]
async fn login_without_profile_document_has_no_profile() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_account("a@x.com", "secret1").await.unwrap();
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;

    store.login("a@x.com", "secret1").await.unwrap();

    let session = store.session();
    assert!(session.user.is_some());
    assert!(session.profile.is_none());
}

#[tokio::test]
async fn login_profile_read_failure_commits_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_account("a@x.com", "secret1").await.unwrap();
    backend
        .fail_next(Operation::ReadDocument, AuthError::BackendUnavailable("offline".into()))
        .await;
    let store = AuthStore::new(Arc::clone(&backend) as Arc<dyn IdentityBackend>);

    let err = store.login("a@x.com", "secret1").await.unwrap_err();
    assert!(err.retryable());

    let session = store.session();
    assert!(session.user.is_none());
    assert!(session.profile.is_none());
}

#[tokio::test]
async fn concurrent_logins_never_mix_user_and_profile() {
    let backend = Arc::new(MemoryBackend::new());
    let a = backend.add_account("a@x.com", "secret1").await.unwrap();
    let b = backend.add_account("b@x.com", "secret2").await.unwrap();
    backend.put_document("users", &a.uid, profile_doc("A", "a@x.com", "athlete")).await;
    backend.put_document("users", &b.uid, profile_doc("B", "b@x.com", "coach")).await;
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;

    let (ra, rb) = tokio::join!(store.login("a@x.com", "secret1"), store.login("b@x.com", "secret2"));
    ra.unwrap();
    rb.unwrap();

    let session = store.settled().await;
    let user = session.user.unwrap();
    let profile = session.profile.unwrap();
    assert_eq!(Some(profile.email), user.email);
}

// =============================================================
// register_athlete
// =============================================================

#[tokio::test]
async fn register_creates_athlete_profile_with_server_timestamp() {
    let backend = Arc::new(MemoryBackend::new());
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;

    store.register_athlete("A", "a@x.com", "secret1").await.unwrap();

    let session = store.session();
    let uid = session.user.as_ref().unwrap().uid.clone();
    let profile = session.profile.unwrap();
    assert_eq!(profile.name, "A");
    assert_eq!(profile.email, "a@x.com");
    assert_eq!(profile.role, Some(Role::Athlete));
    assert!(profile.created_at.is_some());

    let stored = backend.document("users", &uid).await.unwrap();
    assert_eq!(stored["role"], json!("athlete"));
    assert!(stored["createdAt"].is_string());
}

#[tokio::test]
async fn register_duplicate_email_fails() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_account("a@x.com", "secret1").await.unwrap();
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;

    let err = store.register_athlete("A", "a@x.com", "secret1").await.unwrap_err();
    assert_eq!(err, AuthError::EmailInUse);

    let session = store.session();
    assert!(session.user.is_none());
    assert!(!session.loading);
}

#[tokio::test]
async fn register_write_failure_stays_loading_until_sign_in_is_applied() {
    let backend = Arc::new(MemoryBackend::new());
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;
    backend
        .fail_next(Operation::WriteDocument, AuthError::PermissionDenied("rules".into()))
        .await;

    let err = store.register_athlete("A", "a@x.com", "secret1").await.unwrap_err();
    assert_eq!(err, AuthError::PermissionDenied("rules".into()));

    // The credential exists and is signed in; the session must not look final yet.
    let pending = store.session();
    assert!(pending.user.is_none());
    assert!(pending.loading);

    let session = store.settled().await;
    assert!(!session.loading);
    assert_eq!(session.user.unwrap().email.as_deref(), Some("a@x.com"));
    assert!(session.profile.is_none());
}

#[tokio::test]
async fn register_uses_configured_collection() {
    let backend = Arc::new(MemoryBackend::new());
    let store = AuthStore::with_collection(Arc::clone(&backend) as Arc<dyn IdentityBackend>, "profiles");

    store.register_athlete("A", "a@x.com", "secret1").await.unwrap();

    let uid = store.session().user.unwrap().uid;
    assert!(backend.document("profiles", &uid).await.is_some());
    assert!(backend.document("users", &uid).await.is_none());
}

// =============================================================
// login_with_google
// =============================================================

#[tokio::test]
async fn google_sign_in_keeps_existing_profile() {
    let backend = MemoryBackend::new().with_prompt(Arc::new(FixedPrompt(Some("c@x.com"))));
    let coach = backend.add_federated_account("c@x.com", Some("Someone Else")).await.unwrap();
    let existing = profile_doc("Coach C", "c@x.com", "coach");
    backend.put_document("users", &coach.uid, existing.clone()).await;
    let backend = Arc::new(backend);
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;

    store.login_with_google().await.unwrap();

    let profile = store.session().profile.unwrap();
    assert_eq!(profile.name, "Coach C");
    assert_eq!(profile.role, Some(Role::Coach));
    assert_eq!(backend.document("users", &coach.uid).await, Some(existing));
}

#[tokio::test]
async fn google_first_sign_in_uses_display_name() {
    let backend = MemoryBackend::new().with_prompt(Arc::new(FixedPrompt(Some("nia@x.com"))));
    backend.add_federated_account("nia@x.com", Some("Nia Runner")).await.unwrap();
    let (store, _listener) = hydrated(Arc::new(backend)).await;

    store.login_with_google().await.unwrap();

    let profile = store.session().profile.unwrap();
    assert_eq!(profile.name, "Nia Runner");
    assert_eq!(profile.email, "nia@x.com");
    assert_eq!(profile.role, Some(Role::Athlete));
    assert!(profile.created_at.is_some());
}

#[tokio::test]
async fn google_first_sign_in_without_display_name_uses_email_local_part() {
    let backend = MemoryBackend::new().with_prompt(Arc::new(FixedPrompt(Some("sprinter@x.com"))));
    let (store, _listener) = hydrated(Arc::new(backend)).await;

    store.login_with_google().await.unwrap();

    assert_eq!(store.session().profile.unwrap().name, "sprinter");
}

#[tokio::test]
async fn google_profile_read_failure_settles_without_profile() {
    let backend = MemoryBackend::new().with_prompt(Arc::new(FixedPrompt(Some("g@x.com"))));
    let backend = Arc::new(backend);
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;
    backend
        .fail_next(Operation::ReadDocument, AuthError::BackendUnavailable("offline".into()))
        .await;

    let err = store.login_with_google().await.unwrap_err();
    assert!(err.retryable());
    assert!(store.session().loading);

    let session = store.settled().await;
    assert!(!session.loading);
    assert_eq!(session.user.unwrap().email.as_deref(), Some("g@x.com"));
    assert!(session.profile.is_none());
}

#[tokio::test]
async fn google_first_sign_in_write_failure_settles_without_profile() {
    let backend = MemoryBackend::new().with_prompt(Arc::new(FixedPrompt(Some("new@x.com"))));
    let backend = Arc::new(backend);
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;
    backend
        .fail_next(Operation::WriteDocument, AuthError::BackendUnavailable("offline".into()))
        .await;

    let err = store.login_with_google().await.unwrap_err();
    assert_eq!(err, AuthError::BackendUnavailable("offline".into()));
    assert!(store.session().loading);

    let session = store.settled().await;
    assert!(!session.loading);
    let uid = session.user.unwrap().uid;
    assert!(session.profile.is_none());
    assert!(backend.document("users", &uid).await.is_none());
}

#[tokio::test]
async fn dismissed_popup_is_popup_closed() {
    let backend = MemoryBackend::new().with_prompt(Arc::new(FixedPrompt(None)));
    let (store, _listener) = hydrated(Arc::new(backend)).await;

    let err = store.login_with_google().await.unwrap_err();
    assert_eq!(err, AuthError::PopupClosed);

    let session = store.session();
    assert!(session.user.is_none());
    assert!(!session.loading);
}

// =============================================================
// fetch_user_profile
// =============================================================

#[tokio::test]
async fn fetch_missing_profile_is_none() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_account("a@x.com", "secret1").await.unwrap();
    let store = AuthStore::new(Arc::clone(&backend) as Arc<dyn IdentityBackend>);
    store.login("a@x.com", "secret1").await.unwrap();
    let uid = store.session().user.unwrap().uid;

    assert_eq!(store.fetch_user_profile(&uid).await.unwrap(), None);
    assert!(store.session().profile.is_none());
}

#[tokio::test]
async fn fetch_picks_up_new_profile() {
    let backend = Arc::new(MemoryBackend::new());
    let a = backend.add_account("a@x.com", "secret1").await.unwrap();
    let store = AuthStore::new(Arc::clone(&backend) as Arc<dyn IdentityBackend>);
    store.login("a@x.com", "secret1").await.unwrap();

    backend.put_document("users", &a.uid, profile_doc("A", "a@x.com", "athlete")).await;
    let fetched = store.fetch_user_profile(&a.uid).await.unwrap().unwrap();

    assert_eq!(fetched.role, Some(Role::Athlete));
    assert_eq!(store.session().profile, Some(fetched));
}

#[tokio::test]
async fn fetch_for_another_uid_does_not_touch_session() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_account("a@x.com", "secret1").await.unwrap();
    backend.put_document("users", "someone-else", profile_doc("B", "b@x.com", "coach")).await;
    let store = AuthStore::new(Arc::clone(&backend) as Arc<dyn IdentityBackend>);
    store.login("a@x.com", "secret1").await.unwrap();

    let fetched = store.fetch_user_profile("someone-else").await.unwrap();
    assert!(fetched.is_some());
    assert!(store.session().profile.is_none());
}

#[tokio::test]
async fn fetch_malformed_profile_is_an_error() {
    let backend = Arc::new(MemoryBackend::new());
    let a = backend.add_account("a@x.com", "secret1").await.unwrap();
    let mut bad = Document::new();
    bad.insert("name".into(), json!(42));
    backend.put_document("users", &a.uid, bad).await;
    let store = AuthStore::new(Arc::clone(&backend) as Arc<dyn IdentityBackend>);

    let err = store.fetch_user_profile(&a.uid).await.unwrap_err();
    assert!(matches!(err, AuthError::MalformedResponse(_)));
}

// =============================================================
// logout
// =============================================================

#[tokio::test]
async fn logout_clears_user_and_profile() {
    let backend = Arc::new(MemoryBackend::new());
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;
    store.register_athlete("A", "a@x.com", "secret1").await.unwrap();

    store.logout().await.unwrap();

    let session = store.watch().wait_for(|s| !s.loading).await.unwrap();
    assert!(session.user.is_none());
    assert!(session.profile.is_none());
    assert!(backend.current_user().is_none());
}

#[tokio::test]
async fn failed_logout_keeps_session() {
    let backend = Arc::new(MemoryBackend::new());
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;
    store.register_athlete("A", "a@x.com", "secret1").await.unwrap();
    backend
        .fail_next(Operation::SignOut, AuthError::BackendUnavailable("offline".into()))
        .await;

    assert!(store.logout().await.is_err());
    assert!(store.session().user.is_some());
}

// =============================================================
// init_auth_listener
// =============================================================

#[tokio::test]
async fn second_listener_is_rejected() {
    let store = AuthStore::new(Arc::new(MemoryBackend::new()));
    let _first = store.init_auth_listener().unwrap();
    assert_eq!(store.init_auth_listener().unwrap_err(), AuthError::ListenerAlreadyInstalled);
}

#[tokio::test]
async fn listener_restores_signed_in_user_and_profile() {
    let identity = Identity { uid: "u-coach".into(), email: Some("c@x.com".into()), display_name: None };
    let backend = MemoryBackend::new().with_signed_in(identity.clone());
    backend.put_document("users", "u-coach", profile_doc("Coach C", "c@x.com", "coach")).await;
    let (store, _listener) = hydrated(Arc::new(backend)).await;

    let session = store.session();
    assert_eq!(session.user, Some(identity));
    assert_eq!(session.dashboard(), Some(RouteName::CoachDashboard));
    assert!(!session.loading);
}

#[tokio::test]
async fn listener_hydrates_even_when_profile_read_fails() {
    let identity = Identity { uid: "u1".into(), email: None, display_name: None };
    let backend = MemoryBackend::new().with_signed_in(identity);
    backend
        .fail_next(Operation::ReadDocument, AuthError::PermissionDenied("rules".into()))
        .await;
    let (store, _listener) = hydrated(Arc::new(backend)).await;

    let session = store.session();
    assert!(session.user.is_some());
    assert!(session.profile.is_none());
    assert!(!session.loading);
}

#[tokio::test]
async fn listener_clears_session_on_external_sign_out() {
    let backend = Arc::new(MemoryBackend::new());
    let (store, _listener) = hydrated(Arc::clone(&backend)).await;
    store.register_athlete("A", "a@x.com", "secret1").await.unwrap();

    backend.sign_out().await.unwrap();

    let session = store.watch().wait_for(|s| s.user.is_none() && !s.loading).await.unwrap();
    assert!(session.profile.is_none());
}

#[tokio::test]
async fn ready_returns_when_listener_is_disposed_before_hydration() {
    let store = AuthStore::new(Arc::new(MemoryBackend::new()));
    let listener = store.init_auth_listener().unwrap();
    listener.dispose();

    assert!(!store.ready().await);
    assert!(!store.session().loading);
}

#[tokio::test]
async fn disposed_listener_stops_updates() {
    let identity = Identity { uid: "u1".into(), email: None, display_name: None };
    let backend = Arc::new(MemoryBackend::new().with_signed_in(identity));
    let (store, listener) = hydrated(Arc::clone(&backend)).await;
    listener.dispose();

    backend.sign_out().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(store.session().user.is_some());
}
