//! CAS protocol core: validation, hooks, session projection, guards and proxy tickets.
//!
//! Everything in here is independent of the HTTP server; the `api` module only
//! adapts these types to axum handlers and middleware.

pub mod attributes;
pub mod config;
pub mod error;
pub mod flow;
pub mod guard;
pub mod hooks;
pub mod proxy;
mod response;
pub mod session;
pub mod validator;

pub use attributes::{AttrValue, Attributes};
pub use config::{CasConfig, ProtocolVersion};
pub use error::{
    AuthorizationDenied, ConfigError, HookAbort, LoginError, ProxyFailure, SessionError,
    ValidationFailure,
};
pub use flow::LoginFlow;
pub use guard::{AccessGuard, AttributeMatch, Blocked, Guard, LoginRequired, UserAllowlist, Verdict};
pub use hooks::{HookChain, HookChainBuilder, Identity};
pub use proxy::{PgtIouRegistry, ProxyBroker, ProxySession};
pub use session::{MemorySession, SessionProjector, SessionStore};
pub use validator::{TicketValidator, Validated, ValidationResult};

use crate::APP_USER_AGENT;
use reqwest::Client;

/// Build the HTTP client used to talk to the CAS server.
///
/// Both timeouts are always set; an unbounded hang on the validation call is
/// reported as a network failure instead.
pub(crate) fn http_client(config: &CasConfig) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(APP_USER_AGENT)
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
}

/// Shorten a ticket for logging; tickets are bearer credentials until spent.
pub(crate) fn ticket_hint(ticket: &str) -> String {
    let prefix: String = ticket.chars().take(8).collect();
    if prefix.len() < ticket.len() {
        format!("{prefix}...")
    } else {
        prefix
    }
}
