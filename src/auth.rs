//! Authentication strategy dispatch.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::warn;

use crate::config::{Authentication, ConnectionConfig};
use crate::digest::{self, Probe};
use crate::enums::{FailurePolicy, Method};
use crate::headers::Headers;
use crate::transport::{ClientCertificate, Params};
use crate::{Error, Result};

/// Authentication material a scheme produces for one request
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// Headers to attach to the request
    HeaderSet(Headers),
    /// Parameters to merge into the request URL's query string
    QueryAppend(Params),
    /// Identity for the transport's TLS layer; no headers
    TransportCredential(ClientCertificate),
    None,
}

/// `Basic base64(username:password)`
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}

/// Resolve the configured scheme into authentication material for `method`.
///
/// Digest may issue a probe request through `probe`. If that handshake fails, the
/// lenient policy logs it and returns `AuthOutcome::None` so the request goes out
/// without credentials; the strict policy returns `Error::Authentication`.
pub fn resolve<P: Probe + ?Sized>(
    config: &ConnectionConfig,
    method: Method,
    probe: &P,
) -> Result<AuthOutcome> {
    Ok(match config.authentication() {
        Authentication::None => AuthOutcome::None,
        Authentication::Basic { username, password } => {
            let mut headers = Headers::new();
            headers.insert(
                "Authorization".to_string(),
                basic_authorization(username, password),
            );
            AuthOutcome::HeaderSet(headers)
        }
        Authentication::Header(params) => AuthOutcome::HeaderSet(params.clone()),
        Authentication::Query(params) => AuthOutcome::QueryAppend(params.clone()),
        Authentication::Cert(cert) => AuthOutcome::TransportCredential(cert.clone()),
        Authentication::Digest(params) => {
            match digest::authenticate(params, method, config.base_url(), probe) {
                Ok(headers) => AuthOutcome::HeaderSet(headers),
                Err(why) => match config.policy() {
                    FailurePolicy::Strict => return Err(Error::Authentication(why)),
                    FailurePolicy::Lenient => {
                        warn!(
                            "digest authentication unavailable, sending without credentials: {}",
                            why
                        );
                        AuthOutcome::None
                    }
                },
            }
        }
    })
}

/// Lay `custom` over `scheme_headers`. Names compare case-insensitively and the
/// custom value wins.
pub fn merge_custom_headers(
    scheme_headers: Option<Headers>,
    custom: Option<&Headers>,
) -> Option<Headers> {
    let mut merged = scheme_headers.unwrap_or_default();
    if let Some(custom) = custom {
        for (name, value) in custom {
            merged.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            merged.insert(name.clone(), value.clone());
        }
    }

    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}
