use crate::{api::CasState, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    cas: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "CAS server is reachable", body = [Health]),
        (status = 503, description = "CAS server is unreachable", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, State(state): State<CasState>) -> impl IntoResponse {
    let login_url = state.config().server_endpoint("/login");
    let probe_span = info_span!("cas.probe", url = %login_url);
    let result = match state
        .client()
        .head(login_url)
        .send()
        .instrument(probe_span)
        .await
    {
        // Any answer at all means the CAS server is up; it may refuse HEAD.
        Ok(response) if !response.status().is_server_error() => Ok(()),
        Ok(response) => {
            error!("CAS server answered HTTP {}", response.status());

            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(error) => {
            error!("Failed to reach CAS server: {}", error);

            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cas: if result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    match result {
        Ok(()) => (StatusCode::OK, headers, body),
        Err(status) => (status, headers, body),
    }
}
