//! The transport seam: what the client hands to an HTTP implementation and what it
//! expects back.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::result;
use std::time::Duration;

use indexmap::IndexMap;

use crate::enums::Method;
use crate::headers::{self, Headers};
use crate::utils::build_query;
use crate::{Error, Result};

/// Ordered key/value pairs used for query strings and form bodies
pub type Params = IndexMap<String, String>;

/// Network, DNS or TLS failure reported by a transport. Passed through to the caller as is.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        TransportError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Client certificate identity the transport presents during the TLS handshake
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCertificate {
    pub cert_file: PathBuf,
    pub cert_password: String,
}

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Raw(Vec<u8>),
    /// Key/value fields, sent form-encoded
    Form(Params),
}

impl Body {
    /// Wire bytes; forms are `application/x-www-form-urlencoded`
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Body::Raw(bytes) => bytes.clone(),
            Body::Form(fields) => build_query(fields).into_bytes(),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Raw(bytes)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Raw(s.as_bytes().to_vec())
    }
}

impl From<Params> for Body {
    fn from(fields: Params) -> Self {
        Body::Form(fields)
    }
}

/// A single outgoing HTTP request, fully resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<Body>,
    pub headers: Option<Headers>,
    /// False when the connection accepts self-signed certificates
    pub verify_tls: bool,
    pub client_certificate: Option<ClientCertificate>,
    /// Deadline for the whole exchange; enforcement is up to the transport
    pub timeout: Option<Duration>,
}

/// What a transport returns: the raw header block followed by the body, and the
/// size of the header block.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub data: Vec<u8>,
    pub header_size: usize,
}

impl RawResponse {
    pub fn new(status: u16, header_block: &[u8], body: &[u8]) -> Self {
        let mut data = Vec::with_capacity(header_block.len() + body.len());
        data.extend_from_slice(header_block);
        data.extend_from_slice(body);
        RawResponse {
            status,
            data,
            header_size: header_block.len(),
        }
    }

    /// Split into (header block, body) at `header_size`
    pub fn split(&self) -> Result<(&[u8], &[u8])> {
        if self.header_size > self.data.len() {
            return Err(Error::MalformedHeader(format!(
                "header size {} exceeds response length {}",
                self.header_size,
                self.data.len()
            )));
        }
        Ok(self.data.split_at(self.header_size))
    }
}

/// Normalized response handed back to callers. The body is left unparsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn from_raw(raw: &RawResponse) -> Result<Self> {
        let (header_block, body) = raw.split()?;
        Ok(Response {
            code: raw.status,
            headers: headers::parse(header_block)?,
            body: body.to_vec(),
        })
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        headers::get(&self.headers, name)
    }
}

#[cfg(feature = "http")]
impl std::convert::TryFrom<Response> for http::Response<Vec<u8>> {
    type Error = http::Error;

    fn try_from(response: Response) -> result::Result<Self, http::Error> {
        let mut builder = http::Response::builder().status(response.code);
        for (name, value) in &response.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(response.body)
    }
}

/// Performs one HTTP exchange. Implementations own timeouts, TLS and connection handling.
pub trait Transport {
    fn execute(&self, request: &Request) -> result::Result<RawResponse, TransportError>;
}

impl<F> Transport for F
where
    F: Fn(&Request) -> result::Result<RawResponse, TransportError>,
{
    fn execute(&self, request: &Request) -> result::Result<RawResponse, TransportError> {
        self(request)
    }
}
