// Hand-rolled loopback HTTP/1.1 server, in the idiom of queen-io's own
// `net::tcp` module: direct `std::net::TcpListener` usage, no mock-HTTP
// crate. Good enough to drive the end-to-end scenarios without parsing
// anything beyond a request line.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

/// What the server sends back for every request it accepts, in order.
/// Each `Script` entry is raw bytes written verbatim to the socket.
pub struct Script(pub Vec<Vec<u8>>);

/// Starts a background thread serving `script.0[i]` to the `i`-th
/// accepted connection, then stops. Returns the bound address.
pub fn serve(script: Script) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().expect("local_addr");

    thread::spawn(move || {
        for response in script.0 {
            let (stream, _) = match listener.accept() {
                Ok(pair) => pair,
                Err(_) => return,
            };
            handle_one(stream, &response);
        }
    });

    format!("http://{}", addr)
}

fn handle_one(mut stream: TcpStream, response: &[u8]) {
    let mut buf = [0u8; 4096];
    // Drain the request line/headers without trying to parse them; we
    // only need the client to have finished writing before we reply.
    let _ = stream.read(&mut buf);
    let _ = stream.write_all(response);
    let _ = stream.flush();
}

pub fn http_response(status_line: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("{status_line}\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out
}

/// A range-capable loopback server backing scenarios 2 and 3: it accepts
/// connections for as long as the test holds onto the returned address
/// (the listener is dropped, and the accept loop with it, once the
/// `JoinHandle` is dropped at the end of the test process), parses a
/// `Range: bytes=a-b` request header if present, and serves the matching
/// slice of `fixture` with `206 Partial Content`, or the whole fixture
/// with `200 OK` if no `Range` header was sent. Each connection is
/// handled on its own thread so concurrent callers are genuinely served
/// concurrently, not serialized behind one accept loop.
pub fn serve_range_fixture(fixture: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().expect("local_addr");
    let fixture = Arc::new(fixture);

    thread::spawn(move || {
        for conn in listener.incoming() {
            let stream = match conn {
                Ok(stream) => stream,
                Err(_) => return,
            };
            let fixture = fixture.clone();
            thread::spawn(move || handle_range_request(stream, &fixture));
        }
    });

    format!("http://{}", addr)
}

fn handle_range_request(mut stream: TcpStream, fixture: &[u8]) {
    let range = match read_range_header(&stream) {
        Some(range) => range,
        None => return,
    };

    let response = match range {
        Some((start, end)) => {
            let start = start.min(fixture.len());
            let end = end.min(fixture.len().saturating_sub(1));
            let slice = if start <= end {
                &fixture[start..=end]
            } else {
                &fixture[0..0]
            };
            let content_range = format!("bytes {start}-{end}/{}", fixture.len());
            http_response(
                "HTTP/1.1 206 Partial Content",
                &[("Content-Range", &content_range)],
                slice,
            )
        }
        None => http_response("HTTP/1.1 200 OK", &[], fixture),
    };

    let _ = stream.write_all(&response);
    let _ = stream.flush();
}

/// Reads request line + headers up to the blank line, returning `Some(range)`
/// where `range` is `Some((start, end))` parsed out of a `Range: bytes=a-b`
/// header, or `Some(None)` if the request carried no such header. Returns
/// `None` only if the connection closed before a full header block arrived.
fn read_range_header(stream: &TcpStream) -> Option<Option<(usize, usize)>> {
    let mut reader = BufReader::new(stream);
    let mut range = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).ok()?;
        if n == 0 {
            return None;
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        if let Some(value) = trimmed.strip_prefix("Range: bytes=") {
            if let Some((start, end)) = value.split_once('-') {
                if let (Ok(start), Ok(end)) = (start.parse(), end.parse()) {
                    range = Some((start, end));
                }
            }
        }
    }

    Some(range)
}
