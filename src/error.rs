use std::fmt;

/// Taxonomy of terminal conditions a transfer can finish in.
///
/// `Success` is not an error kind; it is represented by `ErrorKind`'s
/// absence on a [`crate::response::Response`] (`error_text` empty).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failed to initialise the transport handle or poller primitives.
    /// Fatal for that attempt.
    TransportInit,
    /// Connect or overall deadline expired.
    Timeout,
    /// Certificate or hostname verification failed.
    Tls,
    /// Name resolution failed.
    Dns,
    /// Connection refused, reset, or aborted mid-transfer.
    Network,
    /// Malformed response line or unparseable headers.
    Protocol,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransportInit => "TransportInit",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Tls => "TLS",
            ErrorKind::Dns => "Dns",
            ErrorKind::Network => "Network",
            ErrorKind::Protocol => "Protocol",
        }
    }

    /// Classify a `curl::Error` the way `drain_completions` does: ask the
    /// handful of `is_*` predicates curl exposes, falling back to
    /// `Network` for anything else transport-shaped.
    pub fn from_curl_error(err: &curl::Error) -> ErrorKind {
        if err.is_operation_timedout() {
            ErrorKind::Timeout
        } else if err.is_ssl_connect_error()
            || err.is_peer_failed_verification()
            || err.is_ssl_certproblem()
            || err.is_ssl_cacert()
        {
            ErrorKind::Tls
        } else if err.is_couldnt_resolve_host() || err.is_couldnt_resolve_proxy() {
            ErrorKind::Dns
        } else if err.is_couldnt_connect() || err.is_send_error() || err.is_recv_error() {
            ErrorKind::Network
        } else if err.is_got_nothing() || err.is_conv_failed() {
            ErrorKind::Protocol
        } else {
            ErrorKind::Network
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can be raised synchronously, outside the one-shot
/// completion handoff: constructing engine primitives, or submitting
/// onto a poisoned queue.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("failed to initialize poller: {0}")]
    PollerInit(#[source] std::io::Error),

    #[error("poller operation failed: {0}")]
    Poller(#[source] std::io::Error),

    #[error("failed to initialize curl multi handle: {0}")]
    TransportInit(#[source] curl::MultiError),

    #[error("failed to configure transfer: {0}")]
    RequestInit(#[source] curl::Error),

    #[error("failed to spawn engine thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("submission queue is poisoned")]
    QueuePoisoned,
}
