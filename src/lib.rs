//! # coachboard
//!
//! Session and routing core for the coach/athlete management app.
//!
//! The crate owns the in-memory session (who is signed in, their profile and
//! role, and whether a backend call is still in flight) and the navigation
//! guard that turns that session into route decisions. Credentials, tokens,
//! and profile documents live in an external identity + document backend,
//! reached through the [`backend::IdentityBackend`] trait.

pub mod backend;
pub mod config;
pub mod error;
pub mod guard;
pub mod navigator;
pub mod routes;
pub mod session;
pub mod store;

pub use error::AuthError;
pub use session::{Identity, Profile, Role, Session};
pub use store::{AuthListener, AuthStore};
