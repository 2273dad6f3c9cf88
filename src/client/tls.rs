//! CA bundle discovery (§6): probe a fixed list of well-known paths and
//! use the first one that exists.

use std::path::Path;

const CANDIDATE_PATHS: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/ssl/cert.pem",
];

/// Returns the first candidate path that exists on disk, or `None` if
/// none do (in which case the transport's own default is used).
pub fn discover_ca_bundle() -> Option<String> {
    CANDIDATE_PATHS
        .iter()
        .find(|path| Path::new(path).is_file())
        .map(|path| path.to_string())
}
