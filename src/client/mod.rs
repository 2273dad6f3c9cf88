//! HTTP Client Facade (§4.5 / §6): the {GET, HEAD, POST, PUT, DELETE}
//! surface consumed by the host remote-file-system layer. Every method
//! builds a [`RequestSpec`], submits it to the shared [`Engine`], and
//! returns the published [`Response`].

pub mod config;
pub mod tls;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::request::{Method, RequestSpec, StreamSink};
use crate::response::Response;

pub use config::ClientConfig;

/// Mirrors byte counts across the wire, in the idiom of the original
/// `tcp_ip_recorder`/`tcp_connection_fetcher` byte counters (§4.5
/// supplement). Opt-in; the facade never constructs one itself.
pub trait TransferObserver: Send + Sync {
    fn on_bytes_sent(&self, url: &str, bytes: usize) {
        let _ = (url, bytes);
    }

    fn on_bytes_received(&self, url: &str, bytes: usize) {
        let _ = (url, bytes);
    }
}

/// A single query parameter, percent-encoded when appended to the URL.
pub type QueryParam = (String, String);

fn append_query(url: &str, params: &[QueryParam]) -> String {
    if params.is_empty() {
        return url.to_string();
    }

    let mut out = String::from(url);
    out.push('?');
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(&utf8_percent_encode(value, NON_ALPHANUMERIC).to_string());
    }
    out
}

/// A configured HTTP client bound to the shared Engine. Cheap to clone;
/// `config` is the only per-instance state.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Client {
        Client { config }
    }

    fn base_spec(&self, url: String, method: Method, headers: Vec<(String, String)>) -> RequestSpec {
        let mut headers = headers;
        if !self.config.bearer_token.is_empty() {
            headers.push((
                "Authorization".to_string(),
                format!("Bearer {}", self.config.bearer_token),
            ));
        }
        headers.push(("Accept-Encoding".to_string(), "identity".to_string()));

        RequestSpec {
            url,
            method,
            headers,
            body: None,
            connect_timeout: Some(self.config.timeout()),
            overall_timeout: Some(self.config.timeout()),
            follow_redirects: true,
            verify_peer: self.config.verify_peer,
            ca_bundle_path: self.config.resolved_ca_bundle(),
            keep_alive: self.config.keep_alive,
            proxy: self.config.proxy_spec(),
            stream_sink: None,
        }
    }

    fn submit(&self, spec: RequestSpec, observer: Option<&dyn TransferObserver>) -> Result<Response, EngineError> {
        let url = spec.url.clone();
        let response = Engine::global()?.submit(spec)?;

        if let Some(observer) = observer {
            observer.on_bytes_received(&url, response.body.len());
        }

        Ok(response)
    }

    /// GET. `stream_sink`, if present, receives each newly-arrived body
    /// region as it streams in.
    pub fn get(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
        query: &[QueryParam],
        stream_sink: Option<StreamSink>,
        observer: Option<&dyn TransferObserver>,
    ) -> Result<Response, EngineError> {
        let mut spec = self.base_spec(append_query(url, query), Method::Get, headers);
        spec.stream_sink = stream_sink;
        self.submit(spec, observer)
    }

    pub fn head(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
        query: &[QueryParam],
        observer: Option<&dyn TransferObserver>,
    ) -> Result<Response, EngineError> {
        let spec = self.base_spec(append_query(url, query), Method::Head, headers);
        self.submit(spec, observer)
    }

    pub fn post(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
        content_type: Option<&str>,
        body: Vec<u8>,
        observer: Option<&dyn TransferObserver>,
    ) -> Result<Response, EngineError> {
        let mut headers = headers;
        headers.push((
            "Content-Type".to_string(),
            content_type.unwrap_or("application/octet-stream").to_string(),
        ));

        let byte_count = body.len();
        let mut spec = self.base_spec(url.to_string(), Method::Post, headers);
        spec.body = Some(body);

        let url_owned = url.to_string();
        let response = self.submit(spec, observer)?;
        if let Some(observer) = observer {
            observer.on_bytes_sent(&url_owned, byte_count);
        }
        Ok(response)
    }

    pub fn put(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
        content_type: Option<&str>,
        body: Vec<u8>,
        observer: Option<&dyn TransferObserver>,
    ) -> Result<Response, EngineError> {
        let mut headers = headers;
        headers.push((
            "Content-Type".to_string(),
            content_type.unwrap_or("application/octet-stream").to_string(),
        ));

        let byte_count = body.len();
        let mut spec = self.base_spec(url.to_string(), Method::Put, headers);
        spec.body = Some(body);

        let url_owned = url.to_string();
        let response = self.submit(spec, observer)?;
        if let Some(observer) = observer {
            observer.on_bytes_sent(&url_owned, byte_count);
        }
        Ok(response)
    }

    pub fn delete(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
        query: &[QueryParam],
        observer: Option<&dyn TransferObserver>,
    ) -> Result<Response, EngineError> {
        let spec = self.base_spec(append_query(url, query), Method::Delete, headers);
        self.submit(spec, observer)
    }
}
