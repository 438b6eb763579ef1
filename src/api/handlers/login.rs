//! The browser side of the login round trip.

use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use serde::Deserialize;
use tracing::{debug, error};
use utoipa::IntoParams;

use crate::{
    api::{error::found, session::SessionHandle, CasState},
    cas::{flow::sanitize_next, SessionProjector},
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NextParams {
    /// Local path to return to afterwards; anything else falls back to `/`.
    next: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FinishParams {
    /// Service ticket issued by the CAS server.
    ticket: Option<String>,
    next: Option<String>,
    /// PGT IOU, when the CAS server passes it back on the callback.
    #[serde(rename = "pgtIou")]
    pgt_iou: Option<String>,
}

#[utoipa::path(
    get,
    path = "/casc/login",
    params(NextParams),
    responses(
        (status = 302, description = "Redirect to the CAS login page, or straight to `next` when already logged in")
    ),
    tag = "cas"
)]
pub async fn login(
    State(state): State<CasState>,
    Extension(session): Extension<SessionHandle>,
    Query(params): Query<NextParams>,
) -> Response {
    let next = params.next.as_deref();
    if SessionProjector::new(&session, state.config()).is_authenticated() {
        debug!("already authenticated, skipping CAS");
        return found(sanitize_next(next));
    }
    found(state.flow().initiate_login(next).as_str())
}

#[utoipa::path(
    get,
    path = "/casc/finish",
    params(FinishParams),
    responses(
        (status = 302, description = "Ticket validated, redirect to `next`"),
        (status = 400, description = "No ticket in the callback"),
        (status = 401, description = "Ticket rejected by the CAS server or login vetoed"),
        (status = 502, description = "CAS server unreachable or answered garbage")
    ),
    tag = "cas"
)]
pub async fn finish(
    State(state): State<CasState>,
    Extension(session): Extension<SessionHandle>,
    Query(params): Query<FinishParams>,
) -> Response {
    let Some(ticket) = params.ticket.filter(|ticket| !ticket.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing ticket".to_string()).into_response();
    };

    match state
        .flow()
        .finish_login(
            &session,
            &ticket,
            params.next.as_deref(),
            params.pgt_iou.as_deref(),
        )
        .await
    {
        Ok(target) => {
            // The pre-login session id stops resolving.
            let rotated = state.sessions().rotate(&session);
            let mut response = found(&target);
            if let Some(cookie) = state.sessions().cookie(&rotated) {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            response
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/casc/logout",
    params(NextParams),
    responses(
        (status = 302, description = "Session cleared, redirect to the CAS logout page"),
        (status = 500, description = "Session could not be cleared")
    ),
    tag = "cas"
)]
pub async fn logout(
    State(state): State<CasState>,
    Extension(session): Extension<SessionHandle>,
    Query(params): Query<NextParams>,
) -> Response {
    match state.flow().initiate_logout(&session, params.next.as_deref()) {
        Ok(url) => found(url.as_str()),
        Err(err) => {
            error!("Failed to clear session on logout: {err}");

            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
