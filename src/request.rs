use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use curl::easy::{Easy2, Handler, List, ReadError, WriteError};

use crate::response::Response;

/// One completed (or in-progress) header group: the response line plus the
/// header fields that followed it, in arrival order. A redirected transfer
/// produces one group per hop.
pub type HeaderGroup = Vec<(String, String)>;

/// Synthetic key under which the `"HTTP/1.1 200 OK"` status line of a
/// group is stored, per §4.3's header sink contract.
pub const RESPONSE_STATUS_KEY: &str = "__RESPONSE_STATUS__";

/// A per-chunk body callback. Invoked with the newly appended region only;
/// must not retain the slice past the call.
pub type StreamSink = Box<dyn FnMut(&[u8]) + Send>;

/// `curl::easy::Handler` implementation that is the sole owner of the
/// accumulating body buffer and redirect-aware header groups for one
/// transfer, in the idiom of `sagebind-isahc`'s `RequestHandler`
/// (examples/other_examples, `634734ca_...src-handler.rs.rs`): the
/// handler itself is the `Write`/`header` sink, not a side channel.
pub struct TransferHandler {
    body: Vec<u8>,
    header_groups: Vec<HeaderGroup>,
    stream_sink: Option<StreamSink>,
    upload_body: Vec<u8>,
    upload_pos: usize,
}

impl TransferHandler {
    fn new(stream_sink: Option<StreamSink>) -> TransferHandler {
        TransferHandler {
            body: Vec::new(),
            header_groups: Vec::new(),
            stream_sink,
            upload_body: Vec::new(),
            upload_pos: 0,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn header_groups(&self) -> &[HeaderGroup] {
        &self.header_groups
    }

    /// The final hop's headers, or an empty group if none arrived yet.
    pub fn last_group(&self) -> HeaderGroup {
        self.header_groups.last().cloned().unwrap_or_default()
    }

    fn open_group(&mut self, status_line: &str) {
        let mut group = HeaderGroup::new();
        group.push((RESPONSE_STATUS_KEY.to_string(), status_line.to_string()));
        self.header_groups.push(group);
    }

    fn push_header(&mut self, name: &str, value: &str) {
        if let Some(group) = self.header_groups.last_mut() {
            group.push((name.to_string(), value.to_string()));
        }
    }

    /// Feed the bytes a PUT upload will read out through `read()`, per
    /// §4.5's "POST/PUT attach an in-memory body buffer" contract.
    fn set_upload_body(&mut self, body: Vec<u8>) {
        self.upload_body = body;
        self.upload_pos = 0;
    }
}

impl Handler for TransferHandler {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        let start = self.body.len();
        self.body.extend_from_slice(data);

        if let Some(sink) = self.stream_sink.as_mut() {
            sink(&self.body[start..]);
        }

        Ok(data.len())
    }

    fn read(&mut self, into: &mut [u8]) -> Result<usize, ReadError> {
        let remaining = &self.upload_body[self.upload_pos..];
        let n = remaining.len().min(into.len());
        into[..n].copy_from_slice(&remaining[..n]);
        self.upload_pos += n;
        Ok(n)
    }

    fn header(&mut self, data: &[u8]) -> bool {
        // Trailing "\r\n" (or bare "\n") is stripped; lines without a
        // colon are ignored, except the "HTTP/" status line which opens
        // a new header group (§4.3).
        let line = String::from_utf8_lossy(data);
        let trimmed = line.trim_end_matches(['\r', '\n']);

        if trimmed.starts_with("HTTP/") {
            self.open_group(trimmed);
            return true;
        }

        if let Some(colon) = trimmed.find(':') {
            let name = &trimmed[..colon];
            // only a single leading space after the colon is trimmed,
            // per §4.3 / P5.
            let value = trimmed[colon + 1..].strip_prefix(' ').unwrap_or(&trimmed[colon + 1..]);
            self.push_header(name, value);
        }

        true
    }
}

/// Write-once, read-once handoff from the Engine thread to the blocked
/// caller. Modelled on `queen_io::poll::Poll`'s internal
/// `Mutex<()>` + `Condvar` sequencing, generalised to carry a value.
pub struct OneShot<T> {
    lock: Mutex<Option<T>>,
    condvar: Condvar,
}

impl<T> OneShot<T> {
    pub fn new() -> OneShot<T> {
        OneShot {
            lock: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    /// Fulfil the slot. Panics (in debug) if called twice; production
    /// builds silently keep the first value, since I4 guarantees the
    /// Engine only ever calls this once per request.
    pub fn send(&self, value: T) {
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(guard.is_none(), "one-shot slot fulfilled twice");
        if guard.is_none() {
            *guard = Some(value);
        }
        self.condvar.notify_one();
    }

    /// Block until fulfilled.
    pub fn recv(&self) -> T {
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        while guard.is_none() {
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
        guard.take().expect("one-shot slot fulfilled")
    }
}

/// Everything needed to configure one HTTP exchange. Built by the facade
/// (`crate::client`), consumed by [`TransferRequest::new`].
pub struct RequestSpec {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub connect_timeout: Option<Duration>,
    pub overall_timeout: Option<Duration>,
    pub follow_redirects: bool,
    pub verify_peer: bool,
    pub ca_bundle_path: Option<String>,
    pub keep_alive: bool,
    pub proxy: Option<ProxySpec>,
    pub stream_sink: Option<StreamSink>,
}

#[derive(Clone, Debug)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

#[derive(Clone, Debug)]
pub struct ProxySpec {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One HTTP exchange in flight. Owns the native transfer handle
/// (`curl::easy::Easy2<TransferHandler>`) until the Engine attaches it to
/// the multiplexer; ownership then moves into the Engine's in-flight
/// table (§3, I1).
pub struct TransferRequest {
    pub(crate) easy: Easy2<TransferHandler>,
    pub(crate) url: String,
    pub(crate) result_slot: Arc<OneShot<Response>>,
}

impl TransferRequest {
    pub fn new(spec: RequestSpec) -> Result<TransferRequest, curl::Error> {
        let url = spec.url.clone();
        let mut easy = Easy2::new(TransferHandler::new(spec.stream_sink));

        easy.url(&spec.url)?;
        easy.signal(false)?;

        match spec.method {
            Method::Get => {
                easy.get(true)?;
            }
            Method::Head => {
                easy.nobody(true)?;
            }
            Method::Post => {
                easy.post(true)?;
                if let Some(body) = &spec.body {
                    easy.post_field_size(body.len() as u64)?;
                    easy.post_fields_copy(body)?;
                }
            }
            Method::Put => {
                easy.upload(true)?;
                if let Some(body) = &spec.body {
                    easy.in_filesize(body.len() as u64)?;
                    easy.get_mut().set_upload_body(body.clone());
                }
            }
            Method::Delete => {
                easy.custom_request("DELETE")?;
            }
        }

        if !spec.headers.is_empty() {
            let mut list = List::new();
            for (name, value) in &spec.headers {
                list.append(&format!("{name}: {value}"))?;
            }
            easy.http_headers(list)?;
        }

        easy.follow_location(spec.follow_redirects)?;
        easy.ssl_verify_peer(spec.verify_peer)?;
        easy.ssl_verify_host(spec.verify_peer)?;

        if let Some(ca) = &spec.ca_bundle_path {
            easy.cainfo(ca)?;
        }

        if let Some(timeout) = spec.connect_timeout {
            easy.connect_timeout(timeout)?;
        }

        if let Some(timeout) = spec.overall_timeout {
            easy.timeout(timeout)?;
        }

        if !spec.keep_alive {
            easy.forbid_reuse(true)?;
        }

        if let Some(proxy) = &spec.proxy {
            easy.proxy(&proxy.host)?;
            easy.proxy_port(proxy.port)?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                easy.proxy_username(user)?;
                easy.proxy_password(pass)?;
            }
        }

        Ok(TransferRequest {
            easy,
            url,
            result_slot: Arc::new(OneShot::new()),
        })
    }

    pub fn result_slot(&self) -> Arc<OneShot<Response>> {
        self.result_slot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_line_trims_single_leading_space_and_crlf() {
        let mut handler = TransferHandler::new(None);
        handler.open_group("HTTP/1.1 200 OK");
        handler.header(b"X-Foo:  bar\r\n");

        assert_eq!(
            handler.last_group(),
            vec![
                (RESPONSE_STATUS_KEY.to_string(), "HTTP/1.1 200 OK".to_string()),
                ("X-Foo".to_string(), " bar".to_string()),
            ]
        );
    }

    #[test]
    fn header_without_colon_is_ignored() {
        let mut handler = TransferHandler::new(None);
        handler.open_group("HTTP/1.1 200 OK");
        handler.header(b"not-a-header-line\n");

        assert_eq!(handler.last_group().len(), 1);
    }

    #[test]
    fn redirect_chain_produces_one_group_per_hop() {
        let mut handler = TransferHandler::new(None);

        handler.open_group("HTTP/1.1 301 Moved Permanently");
        handler.header(b"Location: https://example.test/b\r\n");

        handler.open_group("HTTP/1.1 302 Found");
        handler.header(b"Location: https://example.test/c\r\n");

        handler.open_group("HTTP/1.1 200 OK");
        handler.header(b"Content-Length: 5\r\n");

        assert_eq!(handler.header_groups().len(), 3);
        assert_eq!(
            handler.last_group(),
            vec![
                (RESPONSE_STATUS_KEY.to_string(), "HTTP/1.1 200 OK".to_string()),
                ("Content-Length".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn upload_body_is_read_out_in_full_across_short_reads() {
        let mut handler = TransferHandler::new(None);
        handler.set_upload_body(b"hello, world".to_vec());

        let mut out = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = handler.read(&mut buf).expect("read");
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }

        assert_eq!(out, b"hello, world");
    }

    #[test]
    fn one_shot_delivers_exactly_once() {
        use std::sync::Arc;
        use std::thread;

        let slot = Arc::new(OneShot::new());
        let producer = slot.clone();

        let handle = thread::spawn(move || {
            producer.send(42u32);
        });

        assert_eq!(slot.recv(), 42);
        handle.join().unwrap();
    }
}
