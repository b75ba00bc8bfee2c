//! Route table and path resolution.
//!
//! SYSTEM CONTEXT
//! ==============
//! Each route carries the metadata the navigation guard consumes:
//! whether it requires a signed-in user and which role it is reserved for.
//! Views behind these routes are rendered elsewhere.

#[cfg(test)]
#[path = "routes_test.rs"]
mod routes_test;

use std::collections::BTreeMap;
use std::fmt;

use crate::session::Role;

/// Named application routes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteName {
    Login,
    Register,
    CoachDashboard,
    CoachAthleteRoutines,
    CoachAthleteProfile,
    AthleteDashboard,
    AthleteEditProfile,
}

/// Guard-facing metadata declared by a route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteMeta {
    pub requires_auth: bool,
    pub role: Option<Role>,
}

impl RouteName {
    pub const ALL: [Self; 7] = [
        Self::Login,
        Self::Register,
        Self::CoachDashboard,
        Self::CoachAthleteRoutines,
        Self::CoachAthleteProfile,
        Self::AthleteDashboard,
        Self::AthleteEditProfile,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::CoachDashboard => "coach-dashboard",
            Self::CoachAthleteRoutines => "coach-athlete-routines",
            Self::CoachAthleteProfile => "coach-athlete-profile",
            Self::AthleteDashboard => "athlete-dashboard",
            Self::AthleteEditProfile => "athlete-edit-profile",
        }
    }

    /// Path pattern; `:name` segments capture parameters.
    #[must_use]
    pub fn pattern(self) -> &'static str {
        match self {
            Self::Login => "/login",
            Self::Register => "/register",
            Self::CoachDashboard => "/coach",
            Self::CoachAthleteRoutines => "/coach/athletes/:athleteId/routines",
            Self::CoachAthleteProfile => "/coach/athletes/:athleteId/profile",
            Self::AthleteDashboard => "/athlete",
            Self::AthleteEditProfile => "/athlete/edit-profile",
        }
    }

    #[must_use]
    pub fn meta(self) -> RouteMeta {
        match self {
            Self::Login | Self::Register => RouteMeta::default(),
            Self::CoachDashboard | Self::CoachAthleteRoutines | Self::CoachAthleteProfile => {
                RouteMeta { requires_auth: true, role: Some(Role::Coach) }
            }
            Self::AthleteDashboard | Self::AthleteEditProfile => {
                RouteMeta { requires_auth: true, role: Some(Role::Athlete) }
            }
        }
    }

    /// Whether the pattern has no parameter segments.
    #[must_use]
    pub fn is_static(self) -> bool {
        !self.pattern().contains(':')
    }
}

impl fmt::Display for RouteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static redirects applied before route matching.
const REDIRECTS: &[(&str, &str)] = &[("/", "/login")];

// =============================================================================
// RESOLUTION
// =============================================================================

/// A matched route with its normalized path and captured parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub route: RouteName,
    pub path: String,
    pub params: BTreeMap<String, String>,
}

impl Location {
    /// Location of a route without parameters.
    #[must_use]
    pub fn of(route: RouteName) -> Self {
        Self { route, path: route.pattern().to_owned(), params: BTreeMap::new() }
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Outcome of resolving a path against the route table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Matched(Location),
    Redirect(String),
    NotFound(String),
}

/// Resolve a raw path (query string and fragment allowed) to a route.
#[must_use]
pub fn resolve(raw: &str) -> Resolution {
    let path = normalize_path(raw);

    if let Some((_, to)) = REDIRECTS.iter().find(|(from, _)| *from == path) {
        return Resolution::Redirect((*to).to_owned());
    }

    for route in RouteName::ALL {
        if let Some(params) = match_pattern(route.pattern(), &path) {
            return Resolution::Matched(Location { route, path, params });
        }
    }
    Resolution::NotFound(path)
}

/// Strip query and fragment, collapse empty segments, drop trailing slash.
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    let segments: Vec<&str> = raw[..end].split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

fn match_pattern(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let mut expected = pattern.split('/').filter(|s| !s.is_empty());
    let mut actual = path.split('/').filter(|s| !s.is_empty());
    let mut params = BTreeMap::new();

    loop {
        match (expected.next(), actual.next()) {
            (None, None) => return Some(params),
            (Some(want), Some(got)) => {
                if let Some(name) = want.strip_prefix(':') {
                    params.insert(name.to_owned(), got.to_owned());
                } else if want != got {
                    return None;
                }
            }
            _ => return None,
        }
    }
}
