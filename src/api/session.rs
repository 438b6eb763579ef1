//! Cookie-keyed in-memory sessions for the bundled server.
//!
//! The CAS core only needs a [`SessionStore`]; applications embedding the
//! library bring their own. This store keeps sessions in process memory and
//! expires them after a period of inactivity.

use axum::{
    extract::{Request, State},
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};
use tracing::{debug, error};
use ulid::Ulid;

use crate::cas::{MemorySession, SessionError, SessionStore};

pub const SESSION_COOKIE_NAME: &str = "casc_session";
pub const DEFAULT_SESSION_IDLE_SECONDS: u64 = 8 * 60 * 60;

struct Entry {
    session: Arc<MemorySession>,
    last_seen: Instant,
}

type Sessions = Arc<Mutex<HashMap<String, Entry>>>;

fn lock(sessions: &Sessions) -> MutexGuard<'_, HashMap<String, Entry>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sessions are only kept once something is written to them; anonymous
/// traffic that never logs in leaves nothing behind.
pub struct SessionRegistry {
    sessions: Sessions,
    idle_ttl: Duration,
    secure_cookie: bool,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(idle_ttl: Duration, secure_cookie: bool) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            idle_ttl,
            secure_cookie,
        }
    }

    /// Look up the presented session id, or hand out a fresh unsaved session.
    pub fn resolve(&self, presented: Option<&str>) -> SessionHandle {
        let now = Instant::now();
        if let Some(id) = presented {
            let mut sessions = lock(&self.sessions);
            if let Some(entry) = sessions.get_mut(id) {
                if now.duration_since(entry.last_seen) < self.idle_ttl {
                    entry.last_seen = now;
                    return self.handle(id.to_string(), entry.session.clone(), true);
                }
                sessions.remove(id);
            }
        }
        self.handle(Ulid::new().to_string(), Arc::new(MemorySession::new()), false)
    }

    /// Move a session to a fresh id; the old id stops resolving.
    pub fn rotate(&self, handle: &SessionHandle) -> SessionHandle {
        let rotated = self.handle(Ulid::new().to_string(), handle.session.clone(), false);
        lock(&self.sessions).remove(&handle.id);
        rotated.persist();
        rotated
    }

    /// `Set-Cookie` value for `handle`.
    pub fn cookie(&self, handle: &SessionHandle) -> Option<HeaderValue> {
        session_cookie(handle.id(), self.secure_cookie)
            .map_err(|err| error!("Failed to build session cookie: {err}"))
            .ok()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn secure_cookie(&self) -> bool {
        self.secure_cookie
    }

    fn handle(&self, id: String, session: Arc<MemorySession>, stored: bool) -> SessionHandle {
        SessionHandle {
            id,
            session,
            stored: Arc::new(AtomicBool::new(stored)),
            sessions: self.sessions.clone(),
            idle_ttl: self.idle_ttl,
        }
    }
}

/// Request-scoped view of one session, inserted as a request extension.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    session: Arc<MemorySession>,
    stored: Arc<AtomicBool>,
    sessions: Sessions,
    idle_ttl: Duration,
}

impl SessionHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the registry holds this session.
    #[must_use]
    pub fn is_stored(&self) -> bool {
        self.stored.load(Ordering::SeqCst)
    }

    fn persist(&self) {
        if self.stored.swap(true, Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        let mut sessions = lock(&self.sessions);
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_ttl);
        sessions.insert(
            self.id.clone(),
            Entry {
                session: self.session.clone(),
                last_seen: now,
            },
        );
        debug!(active = sessions.len(), "session created");
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("stored", &self.is_stored())
            .finish_non_exhaustive()
    }
}

impl SessionStore for SessionHandle {
    fn get(&self, key: &str) -> Result<Option<Value>, SessionError> {
        self.session.get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SessionError> {
        self.session.set(key, value)?;
        self.persist();
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.session.delete(key)
    }
}

/// Middleware: attach a [`SessionHandle`] to the request and set the cookie
/// when the handler saved a session the browser does not know yet.
pub async fn attach(
    State(sessions): State<Arc<SessionRegistry>>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = extract_session_id(request.headers());
    let handle = sessions.resolve(presented.as_deref());
    let fresh = !handle.is_stored();
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    // A handler that rotated the session has already set the cookie.
    if fresh && handle.is_stored() && !sets_session_cookie(&response) {
        match session_cookie(handle.id(), sessions.secure_cookie()) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(err) => error!("Failed to build session cookie: {err}"),
        }
    }
    response
}

fn sets_session_cookie(response: &Response) -> bool {
    let prefix = format!("{SESSION_COOKIE_NAME}=");
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .any(|value| value.as_bytes().starts_with(prefix.as_bytes()))
}

/// `HttpOnly` session cookie. `SameSite=Lax` keeps it on the top-level
/// redirect back from the CAS server.
fn session_cookie(id: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty() {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sessions_are_kept_only_after_a_write() {
        let registry = SessionRegistry::new(Duration::from_secs(60), false);
        let first = registry.resolve(None);
        assert!(!first.is_stored());
        assert_eq!(first.get("username").unwrap(), None);
        first.delete("username").unwrap();
        assert!(registry.is_empty());

        first.set("username", json!("jdoe")).unwrap();
        assert!(first.is_stored());
        assert_eq!(registry.len(), 1);

        let again = registry.resolve(Some(first.id()));
        assert!(again.is_stored());
        assert_eq!(again.id(), first.id());
        assert_eq!(again.get("username").unwrap(), Some(json!("jdoe")));
    }

    #[test]
    fn unknown_ids_start_a_fresh_session() {
        let registry = SessionRegistry::new(Duration::from_secs(60), false);
        let handle = registry.resolve(Some("forged"));
        assert!(!handle.is_stored());
        assert_ne!(handle.id(), "forged");
        assert!(registry.is_empty());
    }

    #[test]
    fn idle_sessions_expire() {
        let registry = SessionRegistry::new(Duration::ZERO, false);
        let first = registry.resolve(None);
        first.set("username", json!("jdoe")).unwrap();
        let second = registry.resolve(Some(first.id()));
        assert!(!second.is_stored());
        assert_ne!(first.id(), second.id());
        assert!(registry.is_empty());
    }

    #[test]
    fn rotate_moves_data_to_a_new_id() {
        let registry = SessionRegistry::new(Duration::from_secs(60), false);
        let first = registry.resolve(None);
        first.set("username", json!("jdoe")).unwrap();

        let rotated = registry.rotate(&first);
        assert_ne!(rotated.id(), first.id());
        assert!(rotated.is_stored());
        assert_eq!(rotated.get("username").unwrap(), Some(json!("jdoe")));
        assert_eq!(registry.len(), 1);

        let stale = registry.resolve(Some(first.id()));
        assert!(!stale.is_stored());
        assert_eq!(stale.get("username").unwrap(), None);
    }

    #[test]
    fn extracts_session_id_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; casc_session=01HZX; lang=en"),
        );
        assert_eq!(extract_session_id(&headers).as_deref(), Some("01HZX"));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("casc_session="));
        assert_eq!(extract_session_id(&headers), None);
    }

    #[test]
    fn cookie_is_secure_only_when_requested() {
        let plain = session_cookie("abc", false).unwrap();
        assert_eq!(
            plain.to_str().unwrap(),
            "casc_session=abc; Path=/; HttpOnly; SameSite=Lax"
        );
        let secure = session_cookie("abc", true).unwrap();
        assert!(secure.to_str().unwrap().ends_with("; Secure"));
    }
}
