use crate::error::ErrorKind;
use crate::request::HeaderGroup;

/// Published by the Engine through a request's one-shot slot. Exactly one
/// `Response` is produced per submitted `TransferRequest` (I4).
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub status: u32,
    pub url: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub error: Option<TransferError>,
}

#[derive(Clone, Debug)]
pub struct TransferError {
    pub kind: ErrorKind,
    pub message: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Non-empty iff the transport reported failure (§6).
    pub fn error_text(&self) -> String {
        match &self.error {
            Some(e) => e.message.clone(),
            None => String::new(),
        }
    }

    pub fn success(url: String, status: u32, body: Vec<u8>, headers: HeaderGroup) -> Response {
        Response {
            status,
            url,
            body,
            headers,
            error: None,
        }
    }

    /// §4.4: on failure the error-text is either the last group's
    /// `__RESPONSE_STATUS__` value (if captured) or the transport's
    /// human error string; body/headers are empty.
    pub fn failure(url: String, kind: ErrorKind, curl_message: String) -> Response {
        Response {
            status: 0,
            url,
            body: Vec::new(),
            headers: Vec::new(),
            error: Some(TransferError {
                kind,
                message: curl_message,
            }),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
