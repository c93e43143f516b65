//! Connection configuration and authentication parameters.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use log::warn;
use url::Url;

use crate::enums::{FailurePolicy, Scheme};
use crate::error::AuthFailure;
use crate::headers::Headers;
use crate::transport::{ClientCertificate, Params};
use crate::{Error, Result};

/// Username/password pair used to answer a Digest challenge
#[derive(Debug, Clone, PartialEq)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
    /// URL to probe for the challenge. Defaults to the connection's base URL.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DigestParams {
    /// Everything after `Digest ` in a ready-made Authorization header
    Prebuilt(String),
    /// Obtain a challenge from the server and answer it
    Challenge(DigestCredentials),
}

/// Authentication strategy together with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Authentication {
    /// No authentication material is produced
    None,
    Basic { username: String, password: String },
    Digest(DigestParams),
    /// Caller-declared header names and values, sent verbatim
    Header(Params),
    /// Parameters merged into the request query string
    Query(Params),
    Cert(ClientCertificate),
}

/// Loosely typed parameter value: plain text or a nested mapping
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Map(Params),
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<Params> for ParamValue {
    fn from(map: Params) -> Self {
        ParamValue::Map(map)
    }
}

pub type AuthParams = IndexMap<String, ParamValue>;

impl Authentication {
    pub fn basic<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Authentication::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn digest<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Authentication::Digest(DigestParams::Challenge(DigestCredentials {
            username: username.into(),
            password: password.into(),
            url: None,
        }))
    }

    pub fn cert<F: Into<PathBuf>, P: Into<String>>(cert_file: F, cert_password: P) -> Self {
        Authentication::Cert(ClientCertificate {
            cert_file: cert_file.into(),
            cert_password: cert_password.into(),
        })
    }

    /// Strategy tag, `None` when no authentication is configured
    pub fn scheme(&self) -> Option<Scheme> {
        match self {
            Authentication::None => None,
            Authentication::Basic { .. } => Some(Scheme::Basic),
            Authentication::Digest(_) => Some(Scheme::Digest),
            Authentication::Header(_) => Some(Scheme::Header),
            Authentication::Query(_) => Some(Scheme::Query),
            Authentication::Cert(_) => Some(Scheme::Cert),
        }
    }

    /// Build from a scheme name and untyped parameters.
    ///
    /// The scheme name is matched case-insensitively. An unknown name yields
    /// `Authentication::None` under [`FailurePolicy::Lenient`] and
    /// `Error::UnsupportedScheme` under [`FailurePolicy::Strict`].
    ///
    /// Recognized keys:
    ///
    /// | scheme | keys |
    /// |--------|------|
    /// | Basic  | `username`, `password` |
    /// | Digest | `digest_header`, or `digest_parameters` = {`username`, `password`, `url`?} |
    /// | Header | any, each becomes a header |
    /// | Query  | any, each becomes a query parameter |
    /// | Cert   | `cert_file`, `cert_password` |
    ///
    /// # Errors
    /// A missing required key is `Error::Configuration`; a `digest_parameters`
    /// entry that is not a mapping is `Error::Authentication`.
    pub fn from_params(scheme: &str, params: &AuthParams, policy: FailurePolicy) -> Result<Self> {
        let scheme = match Scheme::from_str(scheme) {
            Ok(s) => s,
            Err(e) => {
                return match policy {
                    FailurePolicy::Strict => Err(e),
                    FailurePolicy::Lenient => {
                        warn!("ignoring unsupported authentication scheme {:?}", scheme);
                        Ok(Authentication::None)
                    }
                }
            }
        };

        Ok(match scheme {
            Scheme::Basic => Authentication::Basic {
                username: required_text(params, "username")?,
                password: required_text(params, "password")?,
            },
            Scheme::Digest => Authentication::Digest(digest_params(params)?),
            Scheme::Header => Authentication::Header(flat(params)?),
            Scheme::Query => Authentication::Query(flat(params)?),
            Scheme::Cert => Authentication::Cert(ClientCertificate {
                cert_file: required_text(params, "cert_file")?.into(),
                cert_password: required_text(params, "cert_password")?,
            }),
        })
    }
}

fn required_text(params: &AuthParams, key: &'static str) -> Result<String> {
    match params.get(key) {
        Some(ParamValue::Text(v)) => Ok(v.clone()),
        Some(ParamValue::Map(_)) => Err(Error::Configuration(
            key,
            "expected text, got a mapping".into(),
        )),
        None => Err(Error::Configuration(key, "missing".into())),
    }
}

fn flat(params: &AuthParams) -> Result<Params> {
    params
        .iter()
        .map(|(k, v)| match v {
            ParamValue::Text(t) => Ok((k.clone(), t.clone())),
            ParamValue::Map(_) => Err(Error::Configuration(
                "params",
                format!("{} must be text", k),
            )),
        })
        .collect()
}

fn digest_params(params: &AuthParams) -> Result<DigestParams> {
    if let Some(ParamValue::Text(header)) = params.get("digest_header") {
        return Ok(DigestParams::Prebuilt(header.clone()));
    }

    match params.get("digest_parameters") {
        Some(ParamValue::Map(map)) => {
            let field = |key: &'static str| {
                map.get(key).cloned().ok_or_else(|| {
                    Error::Configuration(key, "missing from digest_parameters".into())
                })
            };
            Ok(DigestParams::Challenge(DigestCredentials {
                username: field("username")?,
                password: field("password")?,
                url: map.get("url").cloned(),
            }))
        }
        Some(ParamValue::Text(_)) => Err(AuthFailure::MalformedDigestParameters.into()),
        None => Err(Error::Configuration(
            "digest_parameters",
            "either digest_header or digest_parameters is required".into(),
        )),
    }
}

/// Immutable connection snapshot. The client swaps whole snapshots on
/// reconfiguration; nothing is mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    base_url: String,
    authentication: Authentication,
    accept_self_signed: bool,
    custom_headers: Option<Headers>,
    policy: FailurePolicy,
    timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// # Errors
    /// `Error::Configuration` if `base_url` is not an absolute URL, or if a
    /// certificate scheme names an empty file path.
    pub fn new<S: Into<String>>(base_url: S, authentication: Authentication) -> Result<Self> {
        let base_url = base_url.into();
        if let Err(e) = Url::parse(&base_url) {
            return Err(Error::Configuration("base_url", format!("{}: {}", base_url, e)));
        }
        if let Authentication::Cert(cert) = &authentication {
            if cert.cert_file.as_os_str().is_empty() {
                return Err(Error::Configuration("cert_file", "empty path".into()));
            }
        }

        Ok(ConnectionConfig {
            base_url,
            authentication,
            accept_self_signed: false,
            custom_headers: None,
            policy: FailurePolicy::default(),
            timeout: None,
        })
    }

    pub fn accept_self_signed(mut self, accept: bool) -> Self {
        self.accept_self_signed = accept;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub fn accepts_self_signed(&self) -> bool {
        self.accept_self_signed
    }

    pub fn verify_tls(&self) -> bool {
        !self.accept_self_signed
    }

    pub fn custom_headers(&self) -> Option<&Headers> {
        self.custom_headers.as_ref()
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn with_custom_headers(&self, headers: Headers) -> Self {
        ConnectionConfig {
            custom_headers: Some(headers),
            ..self.clone()
        }
    }

    pub(crate) fn with_authentication(&self, authentication: Authentication) -> Self {
        ConnectionConfig {
            authentication,
            ..self.clone()
        }
    }
}
