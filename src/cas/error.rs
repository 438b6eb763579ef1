use thiserror::Error;

use super::config::ProtocolVersion;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("URL must be an absolute http(s) URL with a host: {0}")]
    UnsupportedUrl(String),
    #[error("unsupported CAS protocol version: {0}")]
    UnsupportedVersion(String),
}

/// Why a ticket could not be turned into an identity.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("malformed CAS response: {0}")]
    MalformedResponse(String),
    #[error("CAS server unreachable: {0}")]
    NetworkError(String),
    #[error("CAS server answered HTTP {0}")]
    ServerError(u16),
    #[error("ticket rejected by CAS ({code}): {description}")]
    CasRejected { code: String, description: String },
    #[error("not supported by CAS protocol {0}")]
    Unsupported(ProtocolVersion),
}

impl ValidationFailure {
    /// Stable machine-readable reason, used in logs.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedResponse(_) => "malformed_response",
            Self::NetworkError(_) => "network_error",
            Self::ServerError(_) => "server_error",
            Self::CasRejected { .. } => "cas_rejected",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("login aborted by hook {hook:?}: {reason}")]
pub struct HookAbort {
    pub hook: String,
    pub reason: String,
}

impl HookAbort {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            hook: String::new(),
            reason: reason.into(),
        }
    }

    pub(crate) fn in_hook(mut self, name: &str) -> Self {
        if self.hook.is_empty() {
            self.hook = name.to_string();
        }
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthorizationDenied {
    #[error("no authenticated session")]
    MissingSession,
    #[error("user {0:?} is not allowed")]
    UserNotAllowed(String),
    #[error("attribute {0:?} does not carry an allowed value")]
    AttrNotAllowed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode session value {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProxyFailure {
    #[error("proxy mode is not enabled")]
    NotEnabled,
    #[error("no proxy granting ticket in session")]
    MissingGrantingTicket,
    #[error("invalid target service {0}")]
    InvalidService(String),
    #[error("proxy ticket denied: {0}")]
    TicketDenied(#[from] ValidationFailure),
    #[error("proxy handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Terminal failure of the ticket callback. None of these variants leave a
/// partially written session behind.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
    #[error(transparent)]
    Hook(#[from] HookAbort),
    #[error(transparent)]
    Session(#[from] SessionError),
}
