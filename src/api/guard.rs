use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::Arc;

use super::{session::SessionHandle, CasState};
use crate::cas::AccessGuard;

/// State for [`enforce`]: the CAS wiring plus the guard protecting a route group.
#[derive(Clone)]
pub struct Protected {
    cas: CasState,
    guard: Arc<AccessGuard>,
}

impl Protected {
    #[must_use]
    pub fn new(cas: CasState, guard: AccessGuard) -> Self {
        Self {
            cas,
            guard: Arc::new(guard),
        }
    }
}

/// Middleware: run the wrapped route only if the session passes the guard.
///
/// Anonymous browsers are redirected to CAS with the current path and query
/// as `next`, so they land back here after logging in.
pub async fn enforce(
    State(protected): State<Protected>,
    Extension(session): Extension<SessionHandle>,
    request: Request,
    next: Next,
) -> Response {
    let current = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |pq| pq.as_str().to_string());

    match protected
        .guard
        .authorize(protected.cas.flow(), &session, &current, || next.run(request))
    {
        Ok(response) => response.await,
        Err(blocked) => blocked.into_response(),
    }
}
