//! Request-time access guards.
//!
//! Each guard inspects the session and returns a [`Verdict`]. An
//! [`AccessGuard`] runs its guards in order; the first verdict that is not
//! `Allow` decides. Anonymous users are sent to login before any allow/deny
//! check is made, unless the guard was built with `deny_anonymous`.

use std::{collections::BTreeSet, fmt::Debug, sync::Arc};
use tracing::debug;
use url::Url;

use super::{
    error::AuthorizationDenied,
    flow::LoginFlow,
    session::{SessionProjector, SessionStore},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// No authenticated session; the caller decides between login and 401.
    Anonymous,
    Deny(AuthorizationDenied),
}

pub trait Guard: Debug + Send + Sync {
    fn check(&self, session: &SessionProjector<'_>) -> Verdict;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoginRequired;

impl Guard for LoginRequired {
    fn check(&self, session: &SessionProjector<'_>) -> Verdict {
        if session.is_authenticated() {
            Verdict::Allow
        } else {
            Verdict::Anonymous
        }
    }
}

#[derive(Clone, Debug)]
pub struct UserAllowlist {
    users: BTreeSet<String>,
}

impl UserAllowlist {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl Guard for UserAllowlist {
    fn check(&self, session: &SessionProjector<'_>) -> Verdict {
        match session.current_user() {
            None => Verdict::Anonymous,
            Some(user) if self.users.contains(&user) => Verdict::Allow,
            Some(user) => Verdict::Deny(AuthorizationDenied::UserNotAllowed(user)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttributeMatch {
    name: String,
    allowed: BTreeSet<String>,
}

impl AttributeMatch {
    pub fn new<I, S>(name: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl Guard for AttributeMatch {
    fn check(&self, session: &SessionProjector<'_>) -> Verdict {
        if !session.is_authenticated() {
            return Verdict::Anonymous;
        }
        let matched = session.current_attrs().get(&self.name).is_some_and(|value| {
            value
                .as_slice()
                .iter()
                .any(|candidate| self.allowed.contains(candidate))
        });
        if matched {
            Verdict::Allow
        } else {
            Verdict::Deny(AuthorizationDenied::AttrNotAllowed(self.name.clone()))
        }
    }
}

/// Why a protected operation was not run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Blocked {
    /// Send the browser here to log in first.
    Login(Url),
    Denied(AuthorizationDenied),
}

#[derive(Clone, Debug, Default)]
pub struct AccessGuard {
    guards: Vec<Arc<dyn Guard>>,
    deny_anonymous: bool,
}

impl AccessGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn login_required() -> Self {
        Self::new().with(LoginRequired)
    }

    #[must_use]
    pub fn with<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    /// Answer anonymous requests with `MissingSession` instead of a login redirect.
    #[must_use]
    pub fn deny_anonymous(mut self) -> Self {
        self.deny_anonymous = true;
        self
    }

    /// Evaluate every guard in order; re-run on each request, nothing is cached.
    #[must_use]
    pub fn evaluate(&self, session: &SessionProjector<'_>) -> Verdict {
        for guard in &self.guards {
            match guard.check(session) {
                Verdict::Allow => continue,
                verdict => return verdict,
            }
        }
        Verdict::Allow
    }

    /// Run `proceed` if the session passes every guard.
    ///
    /// # Errors
    /// Returns [`Blocked::Login`] for anonymous sessions and [`Blocked::Denied`]
    /// when a guard rejects the current user; `proceed` is not called then.
    pub fn authorize<T>(
        &self,
        flow: &LoginFlow,
        session: &dyn SessionStore,
        current_url: &str,
        proceed: impl FnOnce() -> T,
    ) -> Result<T, Blocked> {
        let projector = SessionProjector::new(session, flow.config());
        match self.evaluate(&projector) {
            Verdict::Allow => Ok(proceed()),
            Verdict::Anonymous if self.deny_anonymous => {
                Err(Blocked::Denied(AuthorizationDenied::MissingSession))
            }
            Verdict::Anonymous => {
                debug!(next = %current_url, "anonymous request, redirecting to CAS login");
                Err(Blocked::Login(flow.initiate_login(Some(current_url))))
            }
            Verdict::Deny(denied) => {
                debug!("access denied: {denied}");
                Err(Blocked::Denied(denied))
            }
        }
    }
}
