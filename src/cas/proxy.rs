//! Proxy tickets: acting on the user's behalf against third-party services.
//!
//! During validation in proxy mode the CAS server calls our callback with a
//! `pgtIou`/`pgtId` pair, then returns the IOU in the validation response. The
//! IOU is redeemed through [`PgtIouRegistry`] and the PGT kept in the session;
//! [`ProxyBroker`] trades it for single-use proxy tickets.

use reqwest::{redirect::Policy, Client};
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use tracing::{debug, info_span, instrument, warn, Instrument};
use url::Url;

use super::{
    config::CasConfig,
    error::ProxyFailure,
    http_client,
    response::parse_proxy_response,
    session::{SessionProjector, SessionStore},
    ticket_hint,
    validator::fetch_text,
};
use crate::APP_USER_AGENT;

const MAX_HANDSHAKE_REDIRECTS: usize = 10;

struct PendingPgt {
    pgt: SecretString,
    received_at: Instant,
}

/// IOU to PGT mapping written by the proxy callback; entries are taken once
/// and expire after the configured TTL.
pub struct PgtIouRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<String, PendingPgt>>,
}

impl PgtIouRegistry {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, iou: String, pgt: SecretString) {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, pending| now.duration_since(pending.received_at) < self.ttl);
        entries.insert(
            iou,
            PendingPgt {
                pgt,
                received_at: now,
            },
        );
    }

    pub fn take(&self, iou: &str) -> Option<SecretString> {
        let pending = self.lock().remove(iou)?;
        if pending.received_at.elapsed() < self.ttl {
            Some(pending.pgt)
        } else {
            debug!("PGT IOU expired before it was redeemed");
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A poisoned map only ever holds complete entries; keep using it.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingPgt>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PgtIouRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgtIouRegistry")
            .field("ttl", &self.ttl)
            .field("pending", &self.len())
            .finish()
    }
}

/// Authenticated client for a proxied service, holding the cookies the
/// service set during the ticket handshake. Owned by the caller; never stored.
#[derive(Clone, Debug)]
pub struct ProxySession {
    client: Client,
    service_url: String,
}

impl ProxySession {
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    #[must_use]
    pub fn into_client(self) -> Client {
        self.client
    }
}

#[derive(Clone, Debug)]
pub struct ProxyBroker {
    config: Arc<CasConfig>,
    client: Client,
}

impl ProxyBroker {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Arc<CasConfig>) -> reqwest::Result<Self> {
        let client = http_client(&config)?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub fn with_client(config: Arc<CasConfig>, client: Client) -> Self {
        Self { config, client }
    }

    #[must_use]
    pub fn proxy_url(&self, pgt: &SecretString, target_service: &str) -> Url {
        let mut url = self.config.server_endpoint("/proxy");
        url.query_pairs_mut()
            .append_pair("pgt", pgt.expose_secret())
            .append_pair("targetService", target_service);
        url
    }

    /// Ask the CAS server for a proxy ticket for `service_url`.
    ///
    /// # Errors
    /// Returns an error if proxy mode is off, the session holds no PGT, or the
    /// CAS server denies the request.
    #[instrument(skip(self, session))]
    pub async fn acquire_proxy_ticket(
        &self,
        session: &dyn SessionStore,
        service_url: &str,
    ) -> Result<String, ProxyFailure> {
        if !self.config.proxy() {
            return Err(ProxyFailure::NotEnabled);
        }
        let pgt = SessionProjector::new(session, &self.config)
            .proxy_granting_ticket()
            .ok_or(ProxyFailure::MissingGrantingTicket)?;

        let body = fetch_text(&self.client, self.proxy_url(&pgt, service_url)).await?;
        let ticket = parse_proxy_response(&body)?;
        debug!(ticket = %ticket_hint(&ticket), "proxy ticket issued");
        Ok(ticket)
    }

    /// Obtain a proxy ticket and present it to `resource_urn` (defaults to
    /// `service_url`), keeping the cookies the resource sets.
    ///
    /// Proxy access is best effort: any failure is logged and yields `None`.
    pub async fn get_proxy_session(
        &self,
        session: &dyn SessionStore,
        service_url: &str,
        resource_urn: Option<&str>,
    ) -> Option<ProxySession> {
        let resource = resource_urn.unwrap_or(service_url);
        let span = info_span!("cas.proxy_session", service = %service_url, resource = %resource);
        match self
            .open_proxy_session(session, service_url, resource)
            .instrument(span)
            .await
        {
            Ok(proxy_session) => Some(proxy_session),
            Err(err) => {
                warn!("No proxy session for {service_url}: {err}");
                None
            }
        }
    }

    async fn open_proxy_session(
        &self,
        session: &dyn SessionStore,
        service_url: &str,
        resource: &str,
    ) -> Result<ProxySession, ProxyFailure> {
        let ticket = self.acquire_proxy_ticket(session, service_url).await?;
        let handshake_url = with_ticket(resource, &ticket)?;

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .cookie_store(true)
            .redirect(Policy::limited(MAX_HANDSHAKE_REDIRECTS))
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.request_timeout())
            .build()
            .map_err(|err| ProxyFailure::HandshakeFailed(err.to_string()))?;

        let response = client
            .get(handshake_url)
            .send()
            .await
            .map_err(|err| ProxyFailure::HandshakeFailed(err.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyFailure::HandshakeFailed(format!(
                "resource answered HTTP {status}"
            )));
        }

        Ok(ProxySession {
            client,
            service_url: service_url.to_string(),
        })
    }
}

/// `service_url` with `ticket` appended to its query string.
///
/// # Errors
/// Returns an error if `service_url` is not an absolute URL.
pub fn with_ticket(service_url: &str, ticket: &str) -> Result<Url, ProxyFailure> {
    let mut url =
        Url::parse(service_url).map_err(|_| ProxyFailure::InvalidService(service_url.to_string()))?;
    url.query_pairs_mut().append_pair("ticket", ticket);
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cas::{error::ValidationFailure, session::MemorySession};
    use std::net::TcpListener;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn proxy_config(server_uri: &str) -> CasConfig {
        CasConfig::new(&format!("{server_uri}/cas"), "https://app.x")
            .unwrap()
            .with_proxy(true)
    }

    fn session_with_pgt(config: &CasConfig) -> MemorySession {
        let session = MemorySession::new();
        SessionProjector::new(&session, config)
            .store_proxy_granting_ticket(&SecretString::from("PGT-1".to_string()))
            .unwrap();
        session
    }

    #[test]
    fn registry_entries_are_taken_once() {
        let registry = PgtIouRegistry::new(Duration::from_secs(60));
        registry.record("PGTIOU-1".into(), SecretString::from("PGT-1".to_string()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.take("PGTIOU-1").unwrap().expose_secret(), "PGT-1");
        assert!(registry.take("PGTIOU-1").is_none());
        assert!(registry.take("PGTIOU-unknown").is_none());
    }

    #[test]
    fn registry_entries_expire() {
        let registry = PgtIouRegistry::new(Duration::ZERO);
        registry.record("PGTIOU-1".into(), SecretString::from("PGT-1".to_string()));
        assert!(registry.take("PGTIOU-1").is_none());
    }

    #[test]
    fn with_ticket_appends_to_existing_query() {
        let url = with_ticket("https://svc.x/api?page=2", "PT-1").unwrap();
        assert_eq!(url.as_str(), "https://svc.x/api?page=2&ticket=PT-1");
        assert!(matches!(
            with_ticket("svc", "PT-1"),
            Err(ProxyFailure::InvalidService(_))
        ));
    }

    #[tokio::test]
    async fn acquire_requires_proxy_mode_and_pgt() {
        let config = CasConfig::new("https://cas.x/cas", "https://app.x").unwrap();
        let broker = ProxyBroker::new(Arc::new(config)).unwrap();
        let session = MemorySession::new();
        assert!(matches!(
            broker.acquire_proxy_ticket(&session, "https://svc.x").await,
            Err(ProxyFailure::NotEnabled)
        ));

        let config = proxy_config("https://cas.x");
        let broker = ProxyBroker::new(Arc::new(config)).unwrap();
        assert!(matches!(
            broker.acquire_proxy_ticket(&session, "https://svc.x").await,
            Err(ProxyFailure::MissingGrantingTicket)
        ));
    }

    #[tokio::test]
    async fn acquire_returns_issued_ticket() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cas/proxy"))
            .and(query_param("pgt", "PGT-1"))
            .and(query_param("targetService", "https://svc.x/api"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
                    <cas:proxySuccess><cas:proxyTicket>PT-1</cas:proxyTicket></cas:proxySuccess>
                </cas:serviceResponse>"#,
            ))
            .mount(&server)
            .await;

        let config = proxy_config(&server.uri());
        let session = session_with_pgt(&config);
        let broker = ProxyBroker::new(Arc::new(config)).unwrap();
        let ticket = broker
            .acquire_proxy_ticket(&session, "https://svc.x/api")
            .await
            .unwrap();
        assert_eq!(ticket, "PT-1");
    }

    #[tokio::test]
    async fn denied_ticket_surfaces_cas_code() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cas/proxy"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
                    <cas:proxyFailure code="INVALID_TICKET">PGT expired</cas:proxyFailure>
                </cas:serviceResponse>"#,
            ))
            .mount(&server)
            .await;

        let config = proxy_config(&server.uri());
        let session = session_with_pgt(&config);
        let broker = ProxyBroker::new(Arc::new(config)).unwrap();
        let err = broker
            .acquire_proxy_ticket(&session, "https://svc.x/api")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyFailure::TicketDenied(ValidationFailure::CasRejected { ref code, .. }) if code == "INVALID_TICKET"
        ));
        assert!(broker
            .get_proxy_session(&session, "https://svc.x/api", None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn proxy_session_keeps_resource_cookies() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let cas = MockServer::start().await;
        let resource = MockServer::start().await;
        let service_url = format!("{}/api", resource.uri());

        Mock::given(method("GET"))
            .and(path("/cas/proxy"))
            .and(query_param("targetService", service_url.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
                    <cas:proxySuccess><cas:proxyTicket>PT-7</cas:proxyTicket></cas:proxySuccess>
                </cas:serviceResponse>"#,
            ))
            .mount(&cas)
            .await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("ticket", "PT-7"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "svc_session=abc; Path=/"),
            )
            .expect(1)
            .mount(&resource)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/data"))
            .and(wiremock::matchers::header("cookie", "svc_session=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .mount(&resource)
            .await;

        let config = proxy_config(&cas.uri());
        let session = session_with_pgt(&config);
        let broker = ProxyBroker::new(Arc::new(config)).unwrap();
        let proxy_session = broker
            .get_proxy_session(&session, &service_url, None)
            .await
            .unwrap();
        assert_eq!(proxy_session.service_url(), service_url);

        let body = proxy_session
            .client()
            .get(format!("{}/api/data", resource.uri()))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "payload");
    }

    #[tokio::test]
    async fn failed_handshake_yields_none() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let cas = MockServer::start().await;
        let resource = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cas/proxy"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
                    <cas:proxySuccess><cas:proxyTicket>PT-8</cas:proxyTicket></cas:proxySuccess>
                </cas:serviceResponse>"#,
            ))
            .mount(&cas)
            .await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&resource)
            .await;

        let config = proxy_config(&cas.uri());
        let session = session_with_pgt(&config);
        let broker = ProxyBroker::new(Arc::new(config)).unwrap();
        let service_url = format!("{}/api", resource.uri());
        assert!(broker
            .get_proxy_session(&session, &service_url, None)
            .await
            .is_none());
    }
}
