use std::fmt::{self, Display, Formatter};
use std::result;

use crate::transport::TransportError;

/// Reason a Digest handshake could not produce credentials
#[derive(Debug, Clone, PartialEq)]
pub enum AuthFailure {
    /// The probe request did not come back with a response
    ProbeFailed(String),
    /// The probe answered with a status other than 401
    ChallengeNotIssued(u16),
    /// 401 without a `WWW-Authenticate` header
    MissingChallenge,
    MissingDirective(&'static str),
    MalformedChallenge(String),
    /// `digest_parameters` was supplied but is not a key/value mapping
    MalformedDigestParameters,
}

impl Display for AuthFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::ProbeFailed(ctx) => write!(f, "digest probe failed: {}", ctx),
            AuthFailure::ChallengeNotIssued(code) => {
                write!(f, "digest challenge not issued (probe returned {})", code)
            }
            AuthFailure::MissingChallenge => f.write_str("401 response without WWW-Authenticate"),
            AuthFailure::MissingDirective(what) => write!(f, "challenge is missing \"{}\"", what),
            AuthFailure::MalformedChallenge(ctx) => write!(f, "malformed challenge: {}", ctx),
            AuthFailure::MalformedDigestParameters => {
                f.write_str("digest_parameters must be a key/value mapping")
            }
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Error {
    Transport(TransportError),
    MalformedHeader(String),
    Authentication(AuthFailure),
    UnsupportedScheme(String),
    /// Offending key and context
    Configuration(&'static str, String),
    InvalidHeaderSyntax(String),
    UnknownAlgorithm(String),
    BadQop(String),
}

pub type Result<T> = result::Result<T, Error>;

use Error::*;

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Transport(err) => write!(f, "Transport error: {}", err),
            MalformedHeader(line) => write!(f, "Malformed header line: {:?}", line),
            Authentication(why) => write!(f, "Authentication unavailable: {}", why),
            UnsupportedScheme(name) => write!(f, "Unsupported authentication scheme: {}", name),
            Configuration(key, ctx) => write!(f, "Bad configuration for \"{}\": {}", key, ctx),
            InvalidHeaderSyntax(ctx) => write!(f, "Invalid header syntax: {}", ctx),
            UnknownAlgorithm(ctx) => write!(f, "Unknown algorithm: {}", ctx),
            BadQop(ctx) => write!(f, "Bad Qop option: {}", ctx),
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Transport(err)
    }
}

impl From<AuthFailure> for Error {
    fn from(why: AuthFailure) -> Self {
        Authentication(why)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Transport(err) => Some(err),
            _ => None,
        }
    }
}
