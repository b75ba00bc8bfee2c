//! Auth session store.
//!
//! DESIGN
//! ======
//! One `AuthStore` per application instance, constructed explicitly and
//! cloned into whatever needs it (navigator, shell). The session lives in a
//! `watch` channel; each mutation is a single `send_modify`, so readers never
//! observe `user` and `profile` from different sign-ins.
//!
//! `loading` is derived, not assigned: it is true until the first auth-state
//! event has been applied ("hydrated"), while any operation holds a
//! `LoadingHold`, and while the backend's auth state is ahead of what the
//! listener has applied. Holds are RAII, so every exit path releases them.
//! An operation that signs in on the backend and then fails keeps the session
//! loading until the listener has caught up with that sign-in.
//!
//! CONCURRENCY
//! ===========
//! Store operations and listener events are serialized by one async mutex.
//! A second login while one is in flight waits its turn; nothing is
//! cancelled.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{FederatedProvider, IdentityBackend};
use crate::config::DEFAULT_PROFILE_COLLECTION;
use crate::error::AuthError;
use crate::session::{Identity, Profile, Session};

// =============================================================================
// PUBLISHED STATE
// =============================================================================

#[derive(Clone, Debug, Default)]
struct Tracked {
    session: Session,
    holds: usize,
    hydrated: bool,
    listening: bool,
    /// Listener disposed; auth-state changes are no longer applied.
    detached: bool,
    /// Uid of the last auth state the listener applied (`Some(None)` for
    /// signed out). `None` until the first event.
    applied: Option<Option<String>>,
    /// Backend auth state differs from `applied`.
    behind: bool,
}

impl Tracked {
    fn settle(&mut self) {
        self.session.loading = (!self.hydrated && !self.detached) || self.holds > 0 || self.behind;
    }

    fn compare_backend(&mut self, current: Option<String>) {
        self.behind = self.listening && !self.detached && self.applied.as_ref() != Some(&current);
    }
}

struct Inner {
    backend: Arc<dyn IdentityBackend>,
    collection: String,
    state: watch::Sender<Tracked>,
    /// Backend auth state as seen by the store, independent of the listener.
    auth_view: watch::Receiver<Option<Identity>>,
    ops: Mutex<()>,
}

impl Inner {
    fn backend_uid(&self) -> Option<String> {
        self.auth_view.borrow().as_ref().map(|i| i.uid.clone())
    }
}

/// Keeps `loading` true while alive.
struct LoadingHold {
    inner: Arc<Inner>,
}

impl Drop for LoadingHold {
    fn drop(&mut self) {
        let current = self.inner.backend_uid();
        self.inner.state.send_modify(|t| {
            t.holds = t.holds.saturating_sub(1);
            t.compare_backend(current);
            t.settle();
        });
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Single source of truth for the current session.
#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<Inner>,
}

impl AuthStore {
    /// Store over `backend` using the default profile collection.
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self::with_collection(backend, DEFAULT_PROFILE_COLLECTION)
    }

    #[must_use]
    pub fn with_collection(backend: Arc<dyn IdentityBackend>, collection: impl Into<String>) -> Self {
        let mut initial = Tracked::default();
        initial.settle();
        let (state, _) = watch::channel(initial);
        let auth_view = backend.subscribe_auth_state();
        Self {
            inner: Arc::new(Inner {
                backend,
                collection: collection.into(),
                state,
                auth_view,
                ops: Mutex::new(()),
            }),
        }
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.inner.state.borrow().session.clone()
    }

    /// Stream of session snapshots.
    #[must_use]
    pub fn watch(&self) -> SessionWatch {
        SessionWatch { rx: self.inner.state.subscribe() }
    }

    /// Resolves once the first auth-state event has been applied, or once
    /// the listener is disposed before that happens. Returns whether the
    /// session hydrated.
    ///
    /// Pending forever if `init_auth_listener` is never called.
    pub async fn ready(&self) -> bool {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|t| t.hydrated || t.detached).await {
            Ok(tracked) => tracked.hydrated,
            Err(_) => false,
        }
    }

    /// Waits until no operation is in flight and the session is hydrated.
    pub async fn settled(&self) -> Session {
        match self.watch().wait_for(|s| !s.loading).await {
            Some(session) => session,
            None => self.session(),
        }
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Sign in with email and password, then load the profile.
    ///
    /// `user` and `profile` are committed together; on failure neither changes.
    ///
    /// # Errors
    ///
    /// Propagates backend failures unchanged.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _loading = self.hold_loading();
        let _ops = self.inner.ops.lock().await;

        let identity = self
            .inner
            .backend
            .verify_credentials(email, password)
            .await
            .inspect_err(|e| warn!(error = %e, code = e.error_code(), "login failed"))?;
        let profile = self.read_profile(&identity.uid).await?;

        info!(uid = %identity.uid, role = ?profile.as_ref().and_then(|p| p.role.as_ref()), "login succeeded");
        self.commit(identity, profile);
        Ok(())
    }

    /// Create an account and its athlete profile.
    ///
    /// # Errors
    ///
    /// Propagates failures from credential creation or the profile write.
    pub async fn register_athlete(&self, name: &str, email: &str, password: &str) -> Result<(), AuthError> {
        let _loading = self.hold_loading();
        let _ops = self.inner.ops.lock().await;

        let identity = self
            .inner
            .backend
            .create_credential(email, password)
            .await
            .inspect_err(|e| warn!(error = %e, code = e.error_code(), "registration failed"))?;
        let profile = self.create_profile(&identity, Profile::athlete(name, email)).await?;

        info!(uid = %identity.uid, "athlete registered");
        self.commit(identity, Some(profile));
        Ok(())
    }

    /// Federated sign-in. Adopts an existing profile as-is, or creates a
    /// default athlete profile on first sign-in.
    ///
    /// # Errors
    ///
    /// Propagates sign-in, read, or write failures (`PopupClosed` when the
    /// prompt is dismissed).
    pub async fn login_with_google(&self) -> Result<(), AuthError> {
        let _loading = self.hold_loading();
        let _ops = self.inner.ops.lock().await;

        let identity = self
            .inner
            .backend
            .federated_sign_in(FederatedProvider::Google)
            .await
            .inspect_err(|e| warn!(error = %e, code = e.error_code(), "google sign-in failed"))?;

        let profile = match self.read_profile(&identity.uid).await? {
            Some(existing) => existing,
            None => {
                let email = identity.email.clone().unwrap_or_default();
                let draft = Profile::athlete(identity.default_profile_name(), email);
                info!(uid = %identity.uid, "creating profile on first google sign-in");
                self.create_profile(&identity, draft).await?
            }
        };

        self.commit(identity, Some(profile));
        Ok(())
    }

    /// Reload the profile for `uid`. A missing document clears `profile`.
    ///
    /// The result is only applied while `uid` is still the session user.
    ///
    /// # Errors
    ///
    /// Propagates read failures; absence is `Ok(None)`.
    pub async fn fetch_user_profile(&self, uid: &str) -> Result<Option<Profile>, AuthError> {
        let _loading = self.hold_loading();
        let _ops = self.inner.ops.lock().await;
        self.refresh_profile(uid).await
    }

    /// Sign out and clear the session.
    ///
    /// # Errors
    ///
    /// Propagates sign-out failures; the session is left untouched then.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _ops = self.inner.ops.lock().await;
        self.inner
            .backend
            .sign_out()
            .await
            .inspect_err(|e| warn!(error = %e, "logout failed"))?;
        self.update(|s| {
            s.user = None;
            s.profile = None;
        });
        info!("logged out");
        Ok(())
    }

    /// Subscribe to backend auth-state transitions.
    ///
    /// Call once, before resolving any route. The returned handle owns the
    /// subscription; dropping it stops further updates.
    ///
    /// # Errors
    ///
    /// Returns `ListenerAlreadyInstalled` on a second call.
    pub fn init_auth_listener(&self) -> Result<AuthListener, AuthError> {
        let mut installed = false;
        self.inner.state.send_if_modified(|t| {
            installed = t.listening;
            t.listening = true;
            !installed
        });
        if installed {
            return Err(AuthError::ListenerAlreadyInstalled);
        }

        let mut changes = self.inner.backend.subscribe_auth_state();
        let store = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let identity = changes.borrow_and_update().clone();
                store.apply_auth_state(identity).await;
                if changes.changed().await.is_err() {
                    debug!("auth state channel closed");
                    break;
                }
            }
        });

        info!("auth listener installed");
        Ok(AuthListener { task, inner: Arc::clone(&self.inner) })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn hold_loading(&self) -> LoadingHold {
        self.inner.state.send_modify(|t| {
            t.holds += 1;
            t.settle();
        });
        LoadingHold { inner: Arc::clone(&self.inner) }
    }

    fn update(&self, f: impl FnOnce(&mut Session)) {
        self.inner.state.send_modify(|t| {
            f(&mut t.session);
            t.settle();
        });
    }

    fn commit(&self, identity: Identity, profile: Option<Profile>) {
        self.update(|s| {
            s.user = Some(identity);
            s.profile = profile;
        });
    }

    async fn read_profile(&self, uid: &str) -> Result<Option<Profile>, AuthError> {
        let document = self
            .inner
            .backend
            .read_document(&self.inner.collection, uid)
            .await
            .inspect_err(|e| warn!(uid, error = %e, "profile read failed"))?;
        document.map(Profile::from_document).transpose()
    }

    async fn create_profile(&self, identity: &Identity, mut profile: Profile) -> Result<Profile, AuthError> {
        let created_at = self
            .inner
            .backend
            .write_document(&self.inner.collection, &identity.uid, profile.to_write())
            .await
            .inspect_err(|e| warn!(uid = %identity.uid, error = %e, "profile write failed"))?;
        profile.created_at = Some(created_at);
        Ok(profile)
    }

    async fn refresh_profile(&self, uid: &str) -> Result<Option<Profile>, AuthError> {
        let profile = self.read_profile(uid).await?;
        let applied = profile.clone();
        self.update(|s| {
            if s.user.as_ref().is_some_and(|u| u.uid == uid) {
                s.profile = applied;
            } else {
                debug!(uid, "discarding profile for a user no longer signed in");
            }
        });
        Ok(profile)
    }

    async fn apply_auth_state(&self, identity: Option<Identity>) {
        let applied = identity.as_ref().map(|i| i.uid.clone());
        {
            let _loading = self.hold_loading();
            let _ops = self.inner.ops.lock().await;

            match identity {
                Some(identity) => {
                    let uid = identity.uid.clone();
                    self.update(|s| {
                        if s.user.as_ref().is_none_or(|u| u.uid != uid) {
                            s.profile = None;
                        }
                        s.user = Some(identity);
                    });
                    if let Err(e) = self.refresh_profile(&uid).await {
                        warn!(uid, error = %e, "profile refresh after auth change failed");
                    }
                }
                None => self.update(|s| {
                    s.user = None;
                    s.profile = None;
                }),
            }
            self.inner.state.send_modify(|t| t.applied = Some(applied));
        }

        let current = self.inner.backend_uid();
        self.inner.state.send_modify(|t| {
            t.compare_backend(current);
            if !t.hydrated {
                t.hydrated = true;
                info!(signed_in = t.session.user.is_some(), "session hydrated");
            }
            t.settle();
        });
    }
}

// =============================================================================
// HANDLES
// =============================================================================

/// Disposer for the auth-state subscription. Dropping it cancels the task
/// and releases anyone waiting in [`AuthStore::ready`].
#[must_use = "dropping the listener stops session updates"]
pub struct AuthListener {
    task: JoinHandle<()>,
    inner: Arc<Inner>,
}

impl AuthListener {
    /// Stop receiving auth-state updates.
    pub fn dispose(self) {
        drop(self);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        self.task.abort();
        self.inner.state.send_modify(|t| {
            t.detached = true;
            t.behind = false;
            t.settle();
        });
        debug!("auth listener disposed");
    }
}

impl fmt::Debug for AuthListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthListener").field("active", &self.is_active()).finish_non_exhaustive()
    }
}

/// Receiver of session snapshots.
pub struct SessionWatch {
    rx: watch::Receiver<Tracked>,
}

impl SessionWatch {
    #[must_use]
    pub fn current(&self) -> Session {
        self.rx.borrow().session.clone()
    }

    /// Next changed snapshot, or `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Session> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().session.clone()),
            Err(_) => None,
        }
    }

    /// First snapshot (current or future) satisfying `predicate`.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&Session) -> bool) -> Option<Session> {
        match self.rx.wait_for(|t| predicate(&t.session)).await {
            Ok(tracked) => Some(tracked.session.clone()),
            Err(_) => None,
        }
    }
}
