//! Ticket validation against the CAS server.

use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

use super::{
    attributes::Attributes,
    config::CasConfig,
    error::ValidationFailure,
    http_client,
    response::{parse_service_response, parse_v1},
    ticket_hint,
};

/// Identity vouched for by the CAS server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validated {
    pub user: String,
    /// Everything the server released, before the allowlist is applied.
    pub attributes: Attributes,
    pub pgt_iou: Option<String>,
    /// Proxy chain, most recent first; empty for service tickets.
    pub proxies: Vec<String>,
}

impl Validated {
    #[must_use]
    pub fn new(user: String, attributes: Attributes) -> Self {
        Self {
            user,
            attributes,
            pgt_iou: None,
            proxies: Vec::new(),
        }
    }
}

pub type ValidationResult = Result<Validated, ValidationFailure>;

#[derive(Clone, Debug)]
pub struct TicketValidator {
    client: Client,
    config: Arc<CasConfig>,
}

impl TicketValidator {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Arc<CasConfig>) -> reqwest::Result<Self> {
        let client = http_client(&config)?;
        Ok(Self::with_client(config, client))
    }

    #[must_use]
    pub fn with_client(config: Arc<CasConfig>, client: Client) -> Self {
        Self { client, config }
    }

    #[must_use]
    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    /// Validation URL for a service ticket, including `pgtUrl` in proxy mode.
    #[must_use]
    pub fn validation_url(&self, ticket: &str, service_url: &str) -> Url {
        self.build_url(self.config.version().validate_path(), ticket, service_url)
    }

    /// Validate a service ticket.
    ///
    /// The request is issued once. A spent ticket cannot be validated again, so
    /// failures are returned to the caller who has to restart the login.
    pub async fn validate(&self, ticket: &str, service_url: &str) -> ValidationResult {
        let url = self.validation_url(ticket, service_url);
        let span = info_span!(
            "cas.validate",
            version = %self.config.version(),
            ticket = %ticket_hint(ticket),
        );
        let result = self
            .fetch_and_parse(url, self.config.version().is_xml())
            .instrument(span)
            .await;
        if let Err(failure) = &result {
            warn!(reason = failure.reason(), "ticket validation failed: {failure}");
        }
        result
    }

    /// Validate a proxy ticket presented to this service by another proxy.
    pub async fn validate_proxy_ticket(&self, ticket: &str, service_url: &str) -> ValidationResult {
        let Some(path) = self.config.version().proxy_validate_path() else {
            return Err(ValidationFailure::Unsupported(self.config.version()));
        };
        let url = self.build_url(path, ticket, service_url);
        let span = info_span!("cas.proxy_validate", ticket = %ticket_hint(ticket));
        self.fetch_and_parse(url, true).instrument(span).await
    }

    async fn fetch_and_parse(&self, url: Url, xml: bool) -> ValidationResult {
        let body = fetch_text(&self.client, url).await?;
        if xml {
            parse_service_response(&body)
        } else {
            parse_v1(&body)
        }
    }

    fn build_url(&self, path: &str, ticket: &str, service_url: &str) -> Url {
        let mut url = self.config.server_endpoint(path);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("ticket", ticket);
            query.append_pair("service", service_url);
            if self.config.proxy() && self.config.version().is_xml() {
                query.append_pair("pgtUrl", self.config.pgt_callback_url().as_str());
            }
        }
        url
    }
}

/// Single GET against the CAS server; non-2xx is a server error, anything
/// below HTTP (DNS, TLS, timeouts) a network error. Error text never carries
/// the URL, which holds tickets.
pub(crate) async fn fetch_text(client: &Client, url: Url) -> Result<String, ValidationFailure> {
    debug!(endpoint = %url.path(), "calling CAS server");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| ValidationFailure::NetworkError(err.without_url().to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ValidationFailure::ServerError(status.as_u16()));
    }

    response
        .text()
        .await
        .map_err(|err| ValidationFailure::NetworkError(err.without_url().to_string()))
}
