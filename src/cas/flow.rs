//! Login and logout orchestration.
//!
//! Flow Overview: `initiate_login` sends the browser to the CAS login page with
//! a service URL pointing at the finish callback (carrying `next`). The CAS
//! server redirects back with a ticket; `finish_login` validates it, runs the
//! hook chain, and only then commits the session. Login state is never stored
//! as flow state; it is derived from the session on every request.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;

use super::{
    config::CasConfig,
    error::{LoginError, SessionError},
    hooks::HookChain,
    proxy::PgtIouRegistry,
    session::{SessionProjector, SessionStore},
    validator::TicketValidator,
};

const DEFAULT_NEXT: &str = "/";

/// Only same-site paths are accepted as redirect targets after login or logout.
#[must_use]
pub fn sanitize_next(next: Option<&str>) -> &str {
    match next {
        Some(next) if next.starts_with('/') && !next.starts_with("//") && !next.starts_with("/\\") => {
            next
        }
        _ => DEFAULT_NEXT,
    }
}

#[derive(Clone, Debug)]
pub struct LoginFlow {
    config: Arc<CasConfig>,
    validator: TicketValidator,
    hooks: Arc<HookChain>,
    pgt_ious: Option<Arc<PgtIouRegistry>>,
}

impl LoginFlow {
    #[must_use]
    pub fn new(config: Arc<CasConfig>, validator: TicketValidator, hooks: Arc<HookChain>) -> Self {
        Self {
            config,
            validator,
            hooks,
            pgt_ious: None,
        }
    }

    /// Registry filled by the proxy callback; needed to resolve PGT IOUs.
    #[must_use]
    pub fn with_pgt_registry(mut self, registry: Arc<PgtIouRegistry>) -> Self {
        self.pgt_ious = Some(registry);
        self
    }

    #[must_use]
    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    #[must_use]
    pub fn validator(&self) -> &TicketValidator {
        &self.validator
    }

    /// Service URL registered with CAS for this attempt. Login and validation
    /// must present exactly the same value, so both derive it from `next`.
    #[must_use]
    pub fn service_url(&self, next: Option<&str>) -> Url {
        let mut url = self.config.service_endpoint(self.config.finish_path());
        let next = sanitize_next(next);
        if next != DEFAULT_NEXT {
            url.query_pairs_mut().append_pair("next", next);
        }
        url
    }

    /// CAS login URL to redirect the browser to. Does not touch the session.
    #[must_use]
    pub fn initiate_login(&self, next: Option<&str>) -> Url {
        let mut url = self.config.server_endpoint("/login");
        url.query_pairs_mut()
            .append_pair("service", self.service_url(next).as_str());
        url
    }

    /// Validate `ticket` and commit the session; returns the local redirect target.
    ///
    /// `pgt_iou` is the IOU passed on the callback query string, used only when
    /// the validation response does not carry one.
    ///
    /// # Errors
    /// Returns an error if validation fails, a hook aborts, or the session
    /// cannot be written. In all cases the session is left as it was.
    #[instrument(skip_all, fields(next = sanitize_next(next)))]
    pub async fn finish_login(
        &self,
        session: &dyn SessionStore,
        ticket: &str,
        next: Option<&str>,
        pgt_iou: Option<&str>,
    ) -> Result<String, LoginError> {
        let target = sanitize_next(next).to_string();
        let service_url = self.service_url(next);

        let validated = self.validator.validate(ticket, service_url.as_str()).await?;
        let (identity, attributes) = self.hooks.run(validated.user, validated.attributes)?;

        // Resolve the PGT before committing so the projector writes happen last.
        let pgt = if self.config.proxy() {
            let iou = validated.pgt_iou.as_deref().or(pgt_iou);
            iou.and_then(|iou| self.take_pgt(iou))
        } else {
            None
        };

        let projector = SessionProjector::new(session, &self.config);
        projector.commit(&identity, attributes)?;

        if let Some(pgt) = pgt {
            if let Err(err) = projector.store_proxy_granting_ticket(&pgt) {
                warn!("Failed to store proxy granting ticket: {err}");
            }
        }

        info!(user = %identity, "CAS login completed");
        Ok(target)
    }

    /// Clear the session and return the CAS logout URL.
    ///
    /// # Errors
    /// Returns an error if the session cannot be cleared.
    pub fn initiate_logout(
        &self,
        session: &dyn SessionStore,
        next: Option<&str>,
    ) -> Result<Url, SessionError> {
        let projector = SessionProjector::new(session, &self.config);
        if let Some(user) = projector.current_user() {
            info!(user = %user, "CAS logout");
        }
        projector.clear()?;

        let mut url = self.config.server_endpoint("/logout");
        if let Some(next) = next {
            if let Ok(target) = self.config.service_url().join(sanitize_next(Some(next))) {
                url.query_pairs_mut().append_pair("service", target.as_str());
            }
        }
        Ok(url)
    }

    fn take_pgt(&self, iou: &str) -> Option<secrecy::SecretString> {
        let Some(registry) = &self.pgt_ious else {
            warn!("Proxy mode is on but no PGT registry is configured");
            return None;
        };
        let pgt = registry.take(iou);
        if pgt.is_none() {
            warn!("No proxy granting ticket delivered for IOU");
        }
        pgt
    }
}
