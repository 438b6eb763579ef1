use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use secrecy::SecretString;
use serde::Deserialize;
use tracing::{debug, warn};
use utoipa::IntoParams;

use crate::{
    api::{error::found, session::SessionHandle, CasState},
    cas::proxy::with_ticket,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProxyParams {
    /// Target service the proxy ticket is issued for.
    service: Option<String>,
}

/// Query the CAS server sends to the PGT callback.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PgtCallbackParams {
    #[serde(rename = "pgtIou")]
    pgt_iou: Option<String>,
    #[serde(rename = "pgtId")]
    pgt_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/casc/proxy",
    params(ProxyParams),
    responses(
        (status = 302, description = "Redirect to `service` with a fresh proxy ticket"),
        (status = 400, description = "Missing or invalid service URL"),
        (status = 403, description = "No proxy granting ticket, or the CAS server refused"),
        (status = 404, description = "Proxy mode is disabled"),
        (status = 502, description = "CAS server unreachable")
    ),
    tag = "cas"
)]
pub async fn service_proxy(
    State(state): State<CasState>,
    Extension(session): Extension<SessionHandle>,
    Query(params): Query<ProxyParams>,
) -> Response {
    let Some(service) = params.service.filter(|service| !service.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing service".to_string()).into_response();
    };

    let ticket = match state.broker().acquire_proxy_ticket(&session, &service).await {
        Ok(ticket) => ticket,
        Err(err) => {
            warn!("Proxy ticket request for {service} failed: {err}");
            return err.into_response();
        }
    };

    match with_ticket(&service, &ticket) {
        Ok(url) => found(url.as_str()),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/casc/pgtcallback",
    params(PgtCallbackParams),
    responses(
        (status = 200, description = "PGT recorded, or a bare reachability probe"),
        (status = 400, description = "Only one of pgtIou/pgtId given")
    ),
    tag = "cas"
)]
pub async fn pgt_callback(
    State(state): State<CasState>,
    Query(params): Query<PgtCallbackParams>,
) -> Response {
    match (params.pgt_iou, params.pgt_id) {
        (Some(iou), Some(pgt)) if !iou.is_empty() && !pgt.is_empty() => {
            state.pgt_ious().record(iou, SecretString::from(pgt));
            debug!(pending = state.pgt_ious().len(), "PGT recorded");
            (StatusCode::OK, "OK".to_string()).into_response()
        }
        // The CAS server probes the callback before delivering anything.
        (None, None) => (StatusCode::OK, "OK".to_string()).into_response(),
        _ => (StatusCode::BAD_REQUEST, "Incomplete PGT callback".to_string()).into_response(),
    }
}
