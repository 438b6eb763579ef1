//! Immutable client configuration, fixed at startup.

use std::{fmt, str::FromStr, time::Duration};
use url::Url;

use super::error::ConfigError;

pub const DEFAULT_USERNAME_KEY: &str = "username";
pub const DEFAULT_ATTRIBUTES_KEY: &str = "attributes";
pub const DEFAULT_PGT_KEY: &str = "cas_pgt";
pub const DEFAULT_FINISH_PATH: &str = "/casc/finish";
pub const DEFAULT_LOGIN_PATH: &str = "/casc/login";
pub const DEFAULT_LOGOUT_PATH: &str = "/casc/logout";
pub const DEFAULT_PROXY_PATH: &str = "/casc/proxy";
pub const DEFAULT_PGT_CALLBACK_PATH: &str = "/casc/pgtcallback";
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_PGT_IOU_TTL_SECONDS: u64 = 5 * 60;

/// CAS protocol revision spoken by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1,
    #[default]
    V2,
    V3,
}

impl ProtocolVersion {
    /// Service-ticket validation endpoint, relative to the CAS base URL.
    #[must_use]
    pub fn validate_path(self) -> &'static str {
        match self {
            Self::V1 => "/validate",
            Self::V2 => "/serviceValidate",
            Self::V3 => "/p3/serviceValidate",
        }
    }

    /// Proxy-ticket validation endpoint; v1 has none.
    #[must_use]
    pub fn proxy_validate_path(self) -> Option<&'static str> {
        match self {
            Self::V1 => None,
            Self::V2 => Some("/proxyValidate"),
            Self::V3 => Some("/p3/proxyValidate"),
        }
    }

    /// Whether responses are XML documents rather than the v1 two-line text.
    #[must_use]
    pub fn is_xml(self) -> bool {
        !matches!(self, Self::V1)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
            Self::V3 => "v3",
        };
        f.write_str(name)
    }
}

impl FromStr for ProtocolVersion {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "v1" => Ok(Self::V1),
            "2" | "v2" => Ok(Self::V2),
            "3" | "v3" => Ok(Self::V3),
            other => Err(ConfigError::UnsupportedVersion(other.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CasConfig {
    server_url: Url,
    service_url: Url,
    version: ProtocolVersion,
    attributes: Vec<String>,
    username_key: String,
    attributes_key: String,
    pgt_key: String,
    proxy: bool,
    login_path: String,
    finish_path: String,
    logout_path: String,
    proxy_path: String,
    pgt_callback_path: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    pgt_iou_ttl: Duration,
}

impl CasConfig {
    /// `server_url` is the CAS base URL (e.g. `https://cas.example.com/cas`),
    /// `service_url` the public base URL of this application.
    ///
    /// # Errors
    /// Returns an error if either URL is not an absolute `http(s)` URL.
    pub fn new(server_url: &str, service_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            server_url: parse_base_url(server_url)?,
            service_url: parse_base_url(service_url)?,
            version: ProtocolVersion::default(),
            attributes: Vec::new(),
            username_key: DEFAULT_USERNAME_KEY.to_string(),
            attributes_key: DEFAULT_ATTRIBUTES_KEY.to_string(),
            pgt_key: DEFAULT_PGT_KEY.to_string(),
            proxy: false,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            finish_path: DEFAULT_FINISH_PATH.to_string(),
            logout_path: DEFAULT_LOGOUT_PATH.to_string(),
            proxy_path: DEFAULT_PROXY_PATH.to_string(),
            pgt_callback_path: DEFAULT_PGT_CALLBACK_PATH.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            pgt_iou_ttl: Duration::from_secs(DEFAULT_PGT_IOU_TTL_SECONDS),
        })
    }

    #[must_use]
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Ordered attribute allowlist; duplicates are dropped, first occurrence wins.
    #[must_use]
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut allowlist: Vec<String> = Vec::new();
        for name in attributes {
            let name = name.into();
            let name = name.trim();
            if !name.is_empty() && !allowlist.iter().any(|known| known == name) {
                allowlist.push(name.to_string());
            }
        }
        self.attributes = allowlist;
        self
    }

    #[must_use]
    pub fn with_username_key(mut self, key: String) -> Self {
        self.username_key = key;
        self
    }

    #[must_use]
    pub fn with_attributes_key(mut self, key: String) -> Self {
        self.attributes_key = key;
        self
    }

    #[must_use]
    pub fn with_pgt_key(mut self, key: String) -> Self {
        self.pgt_key = key;
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    /// Local route that starts a login.
    #[must_use]
    pub fn with_login_path(mut self, path: String) -> Self {
        self.login_path = path;
        self
    }

    #[must_use]
    pub fn with_finish_path(mut self, path: String) -> Self {
        self.finish_path = path;
        self
    }

    #[must_use]
    pub fn with_logout_path(mut self, path: String) -> Self {
        self.logout_path = path;
        self
    }

    #[must_use]
    pub fn with_proxy_path(mut self, path: String) -> Self {
        self.proxy_path = path;
        self
    }

    #[must_use]
    pub fn with_pgt_callback_path(mut self, path: String) -> Self {
        self.pgt_callback_path = path;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_pgt_iou_ttl(mut self, ttl: Duration) -> Self {
        self.pgt_iou_ttl = ttl;
        self
    }

    #[must_use]
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    #[must_use]
    pub fn service_url(&self) -> &Url {
        &self.service_url
    }

    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    #[must_use]
    pub fn username_key(&self) -> &str {
        &self.username_key
    }

    #[must_use]
    pub fn attributes_key(&self) -> &str {
        &self.attributes_key
    }

    #[must_use]
    pub fn pgt_key(&self) -> &str {
        &self.pgt_key
    }

    #[must_use]
    pub fn proxy(&self) -> bool {
        self.proxy
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn finish_path(&self) -> &str {
        &self.finish_path
    }

    #[must_use]
    pub fn logout_path(&self) -> &str {
        &self.logout_path
    }

    #[must_use]
    pub fn proxy_path(&self) -> &str {
        &self.proxy_path
    }

    #[must_use]
    pub fn pgt_callback_path(&self) -> &str {
        &self.pgt_callback_path
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn pgt_iou_ttl(&self) -> Duration {
        self.pgt_iou_ttl
    }

    /// Session cookies are only marked secure when the service is served over HTTPS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.service_url.scheme() == "https"
    }

    /// Endpoint on the CAS server, keeping the base path (`/cas` + `/login`).
    #[must_use]
    pub fn server_endpoint(&self, path: &str) -> Url {
        append_path(&self.server_url, path)
    }

    /// Endpoint on this application, keeping the service base path.
    #[must_use]
    pub fn service_endpoint(&self, path: &str) -> Url {
        append_path(&self.service_url, path)
    }

    /// Absolute URL the CAS server calls to deliver PGT IOUs.
    #[must_use]
    pub fn pgt_callback_url(&self) -> Url {
        self.service_endpoint(&self.pgt_callback_path)
    }
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        url: value.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(ConfigError::UnsupportedUrl(value.to_string())),
    }
}

fn append_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    let suffix = path.trim_start_matches('/');
    url.set_path(&format!("{prefix}/{suffix}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}
