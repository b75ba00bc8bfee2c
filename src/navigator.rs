//! Route navigator.
//!
//! Resolves paths, runs the guard against the current session snapshot, and
//! follows redirects until a location is committed. `navigate` is synchronous;
//! only the first mount waits for the session to hydrate.

#[cfg(test)]
#[path = "navigator_test.rs"]
mod navigator_test;

use tracing::{debug, info, warn};

use crate::guard::{Navigation, navigation_guard};
use crate::routes::{Location, Resolution, resolve};
use crate::store::AuthStore;

/// Upper bound on chained redirects for one navigation.
pub const MAX_REDIRECTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    #[error("no route matches {0}")]
    NotFound(String),

    #[error("redirect loop starting at {path} ({hops} hops)")]
    RedirectLoop { path: String, hops: usize },
}

pub struct Navigator {
    store: AuthStore,
    current: Option<Location>,
}

impl Navigator {
    #[must_use]
    pub fn new(store: AuthStore) -> Self {
        Self { store, current: None }
    }

    /// First navigation. Waits until the session has hydrated so the guard
    /// sees the restored user rather than an empty session.
    ///
    /// # Errors
    ///
    /// Same as [`Navigator::navigate`].
    pub async fn mount(&mut self, path: &str) -> Result<Location, NavigationError> {
        if !self.store.ready().await {
            warn!("mounting without a hydrated session");
        }
        self.store.settled().await;
        self.navigate(path)
    }

    /// Navigate to `path`, following guard and static redirects.
    ///
    /// On error the current location is left unchanged.
    ///
    /// # Errors
    ///
    /// `NotFound` for unmatched paths, `RedirectLoop` past [`MAX_REDIRECTS`].
    pub fn navigate(&mut self, path: &str) -> Result<Location, NavigationError> {
        let session = self.store.session();
        let mut target = path.to_owned();

        for hop in 0..=MAX_REDIRECTS {
            let location = match resolve(&target) {
                Resolution::Matched(location) => location,
                Resolution::Redirect(to) => {
                    debug!(from = %target, to = %to, "static redirect");
                    target = to;
                    continue;
                }
                Resolution::NotFound(missing) => {
                    warn!(path = %missing, "no matching route");
                    return Err(NavigationError::NotFound(missing));
                }
            };

            match navigation_guard(&location, &session) {
                Navigation::Allow => {
                    info!(route = %location.route, path = %location.path, hops = hop, "navigated");
                    self.current = Some(location.clone());
                    return Ok(location);
                }
                Navigation::Redirect(route) => {
                    debug!(from = %location.path, to = %route, "guard redirect");
                    target = route.pattern().to_owned();
                }
            }
        }

        warn!(path, "redirect limit reached");
        Err(NavigationError::RedirectLoop { path: path.to_owned(), hops: MAX_REDIRECTS })
    }

    /// Last committed location.
    #[must_use]
    pub fn current(&self) -> Option<&Location> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> &AuthStore {
        &self.store
    }
}
