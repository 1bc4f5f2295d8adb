//! Navigation guard for authenticated and unauthenticated areas

use crate::{RefreshOutcome, SessionManager};

/// The decision for a navigation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    /// Continue to the requested path
    Proceed,
    /// Go to another path instead
    Redirect(String),
}

/// Which paths are public, which are entry points for logging in, and where
/// to send users who are in the wrong place
///
/// A path matches a rule when it equals the rule or is nested beneath it, so
/// `/login` matches `/login` and `/login/reset` but not `/loginx`.
#[derive(Clone, Debug)]
pub struct RouteRules {
    login: String,
    landing: String,
    auth_entry: Vec<String>,
    public: Vec<String>,
}

impl Default for RouteRules {
    fn default() -> Self {
        Self {
            login: "/login".into(),
            landing: "/aboutme".into(),
            auth_entry: vec!["/login".into(), "/signup".into()],
            public: vec!["/home".into()],
        }
    }
}

impl RouteRules {
    /// Rules with no public or auth-entry paths
    pub fn new(login: impl Into<String>, landing: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            landing: landing.into(),
            auth_entry: Vec::new(),
            public: Vec::new(),
        }
    }

    /// Adds a path where users log in or register
    ///
    /// Authenticated users are redirected away from these paths.
    pub fn with_auth_entry(mut self, path: impl Into<String>) -> Self {
        self.auth_entry.push(path.into());
        self
    }

    /// Adds a path that anyone may visit
    pub fn with_public(mut self, path: impl Into<String>) -> Self {
        self.public.push(path.into());
        self
    }

    /// Where unauthenticated users are sent
    pub fn login_path(&self) -> &str {
        &self.login
    }

    /// Where authenticated users visiting an auth-entry path are sent
    pub fn landing_path(&self) -> &str {
        &self.landing
    }

    /// Whether `path` is a login or registration path
    pub fn is_auth_entry(&self, path: &str) -> bool {
        self.auth_entry.iter().any(|rule| matches_rule(rule, path))
    }

    /// Whether `path` may be visited without a session
    pub fn is_public(&self, path: &str) -> bool {
        self.public.iter().any(|rule| matches_rule(rule, path))
    }
}

fn matches_rule(rule: &str, path: &str) -> bool {
    match path.strip_prefix(rule) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rule.ends_with('/'),
        None => false,
    }
}

/// Decides whether a navigation may proceed given the state of the session
#[derive(Clone, Debug)]
pub struct SessionBoundary {
    session: SessionManager,
    rules: RouteRules,
}

impl SessionBoundary {
    /// Guards navigation with the default route rules
    pub fn new(session: SessionManager) -> Self {
        Self::with_rules(session, RouteRules::default())
    }

    /// Guards navigation with custom route rules
    pub fn with_rules(session: SessionManager, rules: RouteRules) -> Self {
        Self { session, rules }
    }

    /// The route rules in effect
    pub fn rules(&self) -> &RouteRules {
        &self.rules
    }

    /// Decides where a navigation to `path` should go
    ///
    /// An invalid access token with a refresh token on hand is renewed before
    /// deciding. A denied renewal has already cleared the session.
    #[tracing::instrument(skip(self))]
    pub async fn navigate(&self, path: &str) -> Navigation {
        let auth_entry = self.rules.is_auth_entry(path);
        if !auth_entry && self.rules.is_public(path) {
            return Navigation::Proceed;
        }

        let authenticated = match self.session.current() {
            Some(pair) if self.session.validator().validate(pair.access().as_str()) => true,
            Some(pair) => match self.session.refresh_stale(pair.access()).await {
                RefreshOutcome::Renewed(_) => true,
                RefreshOutcome::Denied(denial) => {
                    tracing::debug!(%denial, "session could not be renewed");
                    false
                }
            },
            None => false,
        };

        match (authenticated, auth_entry) {
            (true, true) => {
                tracing::trace!(to = %self.rules.landing, "already authenticated");
                Navigation::Redirect(self.rules.landing.clone())
            }
            (false, false) => {
                tracing::trace!(to = %self.rules.login, "authentication required");
                Navigation::Redirect(self.rules.login.clone())
            }
            _ => Navigation::Proceed,
        }
    }
}
