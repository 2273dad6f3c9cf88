use std::time::Duration;

use crate::client::tls;
use crate::request::ProxySpec;

/// Per-client configuration (§6). Built directly by the host; the
/// engine owns no CLI or env parsing of its own.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub bearer_token: String,
    pub ca_bundle_path: Option<String>,
    pub verify_peer: bool,
    pub timeout_seconds: u64,
    pub keep_alive: bool,
    pub http_proxy: Option<String>,
    pub http_proxy_port: u16,
    pub http_proxy_username: Option<String>,
    pub http_proxy_password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            bearer_token: String::new(),
            ca_bundle_path: None,
            verify_peer: true,
            timeout_seconds: 30,
            keep_alive: true,
            http_proxy: None,
            http_proxy_port: 0,
            http_proxy_username: None,
            http_proxy_password: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub(crate) fn resolved_ca_bundle(&self) -> Option<String> {
        self.ca_bundle_path.clone().or_else(tls::discover_ca_bundle)
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub(crate) fn proxy_spec(&self) -> Option<ProxySpec> {
        self.http_proxy.as_ref().map(|host| ProxySpec {
            host: host.clone(),
            port: self.http_proxy_port,
            username: self.http_proxy_username.clone(),
            password: self.http_proxy_password.clone(),
        })
    }
}

#[derive(Default)]
pub struct ClientConfigBuilder {
    inner: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.inner.bearer_token = token.into();
        self
    }

    pub fn ca_bundle_path(mut self, path: impl Into<String>) -> Self {
        self.inner.ca_bundle_path = Some(path.into());
        self
    }

    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.inner.verify_peer = verify;
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.inner.timeout_seconds = seconds;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.inner.keep_alive = keep_alive;
        self
    }

    pub fn http_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.inner.http_proxy = Some(host.into());
        self.inner.http_proxy_port = port;
        self
    }

    pub fn http_proxy_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.inner.http_proxy_username = Some(username.into());
        self.inner.http_proxy_password = Some(password.into());
        self
    }

    pub fn build(self) -> ClientConfig {
        self.inner
    }
}
