//! Navigation guard.
//!
//! Pure decision function over `(destination, session)`, evaluated before
//! every route transition. Rule order matters; the first match wins.

#[cfg(test)]
#[path = "guard_test.rs"]
mod guard_test;

use crate::routes::{Location, RouteName};
use crate::session::Session;

/// Guard verdict for one navigation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Navigation {
    Allow,
    Redirect(RouteName),
}

/// Decide whether navigation to `to` may proceed under `session`.
#[must_use]
pub fn navigation_guard(to: &Location, session: &Session) -> Navigation {
    // Still hydrating: holding navigation here would block the initial load.
    if session.loading {
        return Navigation::Allow;
    }

    let meta = to.route.meta();

    if meta.requires_auth && session.user.is_none() {
        return Navigation::Redirect(RouteName::Login);
    }

    if let Some(required) = &meta.role {
        if session.role() != Some(required) {
            return Navigation::Redirect(session.dashboard().unwrap_or(RouteName::Login));
        }
    }

    if to.route == RouteName::Login && session.user.is_some() {
        if let Some(dashboard) = session.dashboard() {
            return Navigation::Redirect(dashboard);
        }
    }

    Navigation::Allow
}
