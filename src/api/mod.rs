//! axum surface for the CAS client: login round trip, PGT callback, proxy
//! redirects and a guarded sample route.

use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use reqwest::Client;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;

use crate::cas::{
    http_client, AccessGuard, CasConfig, HookChain, LoginFlow, PgtIouRegistry, ProxyBroker,
    TicketValidator,
};

pub mod error;
pub mod guard;
pub(crate) mod handlers;
mod openapi;
pub mod session;

pub use openapi::openapi;
pub use session::{SessionHandle, SessionRegistry};

/// Shared wiring behind every handler. Cloning is cheap.
#[derive(Clone)]
pub struct CasState {
    config: Arc<CasConfig>,
    client: Client,
    flow: LoginFlow,
    broker: ProxyBroker,
    pgt_ious: Arc<PgtIouRegistry>,
    sessions: Arc<SessionRegistry>,
}

impl CasState {
    /// Wire the validator, login flow and proxy broker around one HTTP client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: CasConfig, hooks: HookChain, session_idle: Duration) -> reqwest::Result<Self> {
        let config = Arc::new(config);
        let client = http_client(&config)?;
        let pgt_ious = Arc::new(PgtIouRegistry::new(config.pgt_iou_ttl()));

        let validator = TicketValidator::with_client(config.clone(), client.clone());
        let flow = LoginFlow::new(config.clone(), validator, Arc::new(hooks))
            .with_pgt_registry(pgt_ious.clone());
        let broker = ProxyBroker::with_client(config.clone(), client.clone());
        let sessions = Arc::new(SessionRegistry::new(session_idle, config.cookie_secure()));

        Ok(Self {
            config,
            client,
            flow,
            broker,
            pgt_ious,
            sessions,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn flow(&self) -> &LoginFlow {
        &self.flow
    }

    #[must_use]
    pub fn broker(&self) -> &ProxyBroker {
        &self.broker
    }

    #[must_use]
    pub fn pgt_ious(&self) -> &PgtIouRegistry {
        &self.pgt_ious
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }
}

/// Build the router. `me_guard` protects `/me`.
///
/// Only the routes that read or write the user session go through the
/// session layer; health checks, the API document and the CAS proxy callback
/// never create one.
#[must_use]
pub fn router(state: CasState, me_guard: AccessGuard) -> Router {
    let config = state.config();

    let protected = Router::new()
        .route("/me", get(handlers::me))
        .route_layer(middleware::from_fn_with_state(
            guard::Protected::new(state.clone(), me_guard),
            guard::enforce,
        ));

    let sessioned = Router::new()
        .route(config.login_path(), get(handlers::login))
        .route(config.finish_path(), get(handlers::finish))
        .route(config.logout_path(), get(handlers::logout))
        .route(config.proxy_path(), get(handlers::service_proxy))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.sessions().clone(),
            session::attach,
        ));

    Router::new()
        .route(config.pgt_callback_path(), get(handlers::pgt_callback))
        .route("/health", get(handlers::health))
        .route("/openapi.json", get(|| async { Json(openapi()) }))
        .merge(sessioned)
        .with_state(state)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: CasState, me_guard: AccessGuard) -> Result<()> {
    let app = router(state, me_guard).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Gracefully shutdown"),
                Err(err) => {
                    error!("Failed to listen for shutdown signal: {err}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
