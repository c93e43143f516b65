//! Digest challenge/response handshake.
//!
//! A handshake starts in `NotStarted`. A pre-built header resolves at once; otherwise
//! an unauthenticated probe is sent and the handshake waits in `ChallengeRequested`
//! until the probe's response either yields a `WWW-Authenticate` challenge to answer
//! (`Resolved`) or does not (`Failed`). Challenges are never cached: every handshake
//! starts from a fresh probe with `nc=00000001`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use indexmap::IndexMap;
use log::trace;
use rand::Rng;

use crate::config::{DigestCredentials, DigestParams};
use crate::enums::{Algorithm, Method, Qop};
use crate::error::AuthFailure;
use crate::headers::Headers;
use crate::transport::Response;
use crate::utils::{request_target, QuoteForDigest};
use crate::{Error, Result};

/// Nonce count. Nonces are used exactly once.
pub const NONCE_COUNT: &str = "00000001";

/// Issues the probe request. Implementations must not attach credentials.
pub trait Probe {
    fn probe(&self, method: Method, url: &str) -> Result<Response>;
}

/// Directives of a `WWW-Authenticate: Digest ...` challenge, keyed by lowercase name
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    pub directives: IndexMap<String, String>,
}

impl Challenge {
    /// Construct from the `WWW-Authenticate` header value
    ///
    /// # Errors
    /// If a quoted value is never closed
    pub fn parse(input: &str) -> Result<Self> {
        let mut input = input.trim();
        if input.get(..6).map_or(false, |s| s.eq_ignore_ascii_case("digest")) {
            input = &input[6..];
        }

        Ok(Challenge {
            directives: parse_directives(input)?,
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.directives.get(name).map(String::as_str)
    }

    fn require(&self, name: &'static str) -> std::result::Result<&str, AuthFailure> {
        self.get(name).ok_or(AuthFailure::MissingDirective(name))
    }

    /// Offered qop options we support; `None` for RFC 2069 servers.
    /// Unrecognized tokens are ignored.
    pub fn qop_options(&self) -> Option<Vec<Qop>> {
        self.get("qop").map(|list| {
            list.split(',')
                .filter_map(|q| Qop::from_str(q).ok())
                .collect()
        })
    }

    pub fn algorithm(&self) -> Result<Algorithm> {
        match self.get("algorithm") {
            Some(a) => Algorithm::from_str(a),
            None => Ok(Algorithm::default()),
        }
    }
}

impl FromStr for Challenge {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

/// Parse the comma-separated `key=value` list of a challenge. Values may be quoted,
/// in which case they can contain commas and backslash-escaped characters.
pub fn parse_directives(input: &str) -> Result<IndexMap<String, String>> {
    #[derive(Debug)]
    #[allow(non_camel_case_types)]
    enum ParserState {
        P_WHITE,
        P_NAME(usize),
        P_VALUE_BEGIN,
        P_VALUE_QUOTED,
        P_VALUE_QUOTED_NEXTLITERAL,
        P_VALUE_PLAIN,
    }

    let mut state = ParserState::P_WHITE;

    let mut parsed = IndexMap::<String, String>::new();
    let mut current_token = String::new();
    let mut current_value = String::new();

    for (pos, c) in input.char_indices() {
        match state {
            ParserState::P_WHITE => {
                if c.is_alphabetic() {
                    state = ParserState::P_NAME(pos);
                }
            }
            ParserState::P_NAME(name_start) => {
                if c == '=' {
                    current_token = input[name_start..pos].trim().to_ascii_lowercase();
                    state = ParserState::P_VALUE_BEGIN;
                }
            }
            ParserState::P_VALUE_BEGIN => {
                current_value.clear();
                state = match c {
                    '"' => ParserState::P_VALUE_QUOTED,
                    _ => {
                        current_value.push(c);
                        ParserState::P_VALUE_PLAIN
                    }
                };
            }
            ParserState::P_VALUE_QUOTED => match c {
                '"' => {
                    parsed.insert(
                        std::mem::take(&mut current_token),
                        std::mem::take(&mut current_value),
                    );
                    state = ParserState::P_WHITE;
                }
                '\\' => state = ParserState::P_VALUE_QUOTED_NEXTLITERAL,
                _ => current_value.push(c),
            },
            ParserState::P_VALUE_PLAIN => {
                if c == ',' || c.is_ascii_whitespace() {
                    parsed.insert(
                        std::mem::take(&mut current_token),
                        std::mem::take(&mut current_value),
                    );
                    state = ParserState::P_WHITE;
                } else {
                    current_value.push(c);
                }
            }
            ParserState::P_VALUE_QUOTED_NEXTLITERAL => {
                current_value.push(c);
                state = ParserState::P_VALUE_QUOTED
            }
        }
    }

    match state {
        ParserState::P_VALUE_PLAIN => {
            parsed.insert(current_token, current_value);
        }
        ParserState::P_VALUE_BEGIN => {
            parsed.insert(current_token, String::new());
        }
        ParserState::P_WHITE => {}
        // a bare trailing token without '=' carries no directive
        ParserState::P_NAME(_) => {}
        _ => {
            return Err(Error::InvalidHeaderSyntax(format!(
                "unexpected end of challenge in state {:?}",
                state
            )))
        }
    }

    Ok(parsed)
}

/// Computed `Authorization` value answering one challenge
#[derive(Debug, Clone, PartialEq)]
pub struct DigestAnswer {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    /// Selected qop, `None` in legacy RFC 2069 mode
    pub qop: Option<Qop>,
    pub cnonce: String,
    pub response: String,
    pub opaque: Option<String>,
    /// Algorithm token as the server spelled it
    pub algorithm: String,
}

impl DigestAnswer {
    /// Answer `challenge` for `method` on `uri` with the given client nonce.
    ///
    /// The hash function follows the challenge's `algorithm` directive (MD5 when
    /// absent). `auth` is preferred over `auth-int`; the latter is computed over an
    /// empty body since probes carry none.
    pub fn compute(
        challenge: &Challenge,
        username: &str,
        password: &str,
        method: Method,
        uri: &str,
        cnonce: &str,
    ) -> std::result::Result<Self, AuthFailure> {
        let realm = challenge.require("realm")?;
        let nonce = challenge.require("nonce")?;
        let h = challenge
            .algorithm()
            .map_err(|e| AuthFailure::MalformedChallenge(e.to_string()))?;

        let qop = match challenge.qop_options() {
            None => None,
            Some(offered) if offered.contains(&Qop::AUTH) => Some(Qop::AUTH),
            Some(offered) if offered.contains(&Qop::AUTH_INT) => Some(Qop::AUTH_INT),
            Some(_) => return Err(AuthFailure::MissingDirective("qop")),
        };

        let a1 = {
            let a = format!("{}:{}:{}", username, realm, password);
            if h.sess {
                format!("{}:{}:{}", h.hash_str(&a), nonce, cnonce)
            } else {
                a
            }
        };

        let a2 = match qop {
            Some(Qop::AUTH_INT) => format!("{}:{}:{}", method, uri, h.hash(&[])),
            _ => format!("{}:{}", method, uri),
        };

        let ha1 = h.hash_str(&a1);
        let ha2 = h.hash_str(&a2);

        let response = match qop {
            Some(q) => h.hash_str(&format!(
                "{}:{}:{}:{}:{}:{}",
                ha1, nonce, NONCE_COUNT, cnonce, q, ha2
            )),
            None => h.hash_str(&format!("{}:{}:{}", ha1, nonce, ha2)),
        };

        Ok(DigestAnswer {
            username: username.to_string(),
            realm: realm.to_string(),
            nonce: nonce.to_string(),
            uri: uri.to_string(),
            qop,
            cnonce: cnonce.to_string(),
            response,
            opaque: challenge.get("opaque").map(str::to_string),
            algorithm: challenge
                .get("algorithm")
                .map(str::to_string)
                .unwrap_or_else(|| h.to_string()),
        })
    }
}

impl Display for DigestAnswer {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            self.username.quote_for_digest(),
            self.realm.quote_for_digest(),
            self.nonce.quote_for_digest(),
            self.uri
        )?;

        if let Some(qop) = self.qop {
            write!(
                f,
                ", cnonce=\"{}\", nc={}, qop=\"{}\"",
                self.cnonce.quote_for_digest(),
                NONCE_COUNT,
                qop
            )?;
        }

        write!(f, ", response=\"{}\"", self.response)?;

        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque.quote_for_digest())?;
        }

        write!(f, ", algorithm=\"{}\"", self.algorithm.quote_for_digest())
    }
}

/// Where a handshake currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum DigestState {
    NotStarted,
    ChallengeRequested { probe_url: String },
    /// Holds the complete `Authorization` header value
    Resolved(String),
    Failed(AuthFailure),
}

/// One Digest handshake. Lives for a single request; nothing carries over.
#[derive(Debug)]
pub struct DigestHandshake<'a> {
    params: &'a DigestParams,
    method: Method,
    base_url: &'a str,
    cnonce: Option<String>,
    state: DigestState,
}

impl<'a> DigestHandshake<'a> {
    pub fn new(params: &'a DigestParams, method: Method, base_url: &'a str) -> Self {
        DigestHandshake {
            params,
            method,
            base_url,
            cnonce: None,
            state: DigestState::NotStarted,
        }
    }

    /// Fix the client nonce instead of drawing a random one (tests only)
    pub fn with_cnonce<S: Into<String>>(mut self, cnonce: S) -> Self {
        self.cnonce = Some(cnonce.into());
        self
    }

    pub fn state(&self) -> &DigestState {
        &self.state
    }

    /// `NotStarted` -> `Resolved` for a pre-built header, `ChallengeRequested` otherwise
    pub fn begin(&mut self) -> &DigestState {
        if self.state == DigestState::NotStarted {
            let next = match self.params {
                DigestParams::Prebuilt(header) => {
                    DigestState::Resolved(format!("Digest {}", header))
                }
                DigestParams::Challenge(creds) => DigestState::ChallengeRequested {
                    probe_url: creds.url.clone().unwrap_or_else(|| self.base_url.to_string()),
                },
            };
            self.transition(next);
        }
        &self.state
    }

    /// Feed the outcome of the probe. Only meaningful in `ChallengeRequested`.
    pub fn receive(&mut self, probe: Result<Response>) -> &DigestState {
        let (probe_url, creds) = match (&self.state, self.params) {
            (DigestState::ChallengeRequested { probe_url }, DigestParams::Challenge(creds)) => {
                (probe_url.clone(), creds)
            }
            _ => return &self.state,
        };

        let next = match self.answer(probe, &probe_url, creds) {
            Ok(header) => DigestState::Resolved(header),
            Err(why) => DigestState::Failed(why),
        };
        self.transition(next);
        &self.state
    }

    fn answer(
        &self,
        probe: Result<Response>,
        probe_url: &str,
        creds: &DigestCredentials,
    ) -> std::result::Result<String, AuthFailure> {
        let response = probe.map_err(|e| AuthFailure::ProbeFailed(e.to_string()))?;
        if response.code != 401 {
            return Err(AuthFailure::ChallengeNotIssued(response.code));
        }

        let header = response
            .header("WWW-Authenticate")
            .ok_or(AuthFailure::MissingChallenge)?;
        let challenge =
            Challenge::parse(header).map_err(|e| AuthFailure::MalformedChallenge(e.to_string()))?;

        let cnonce = match &self.cnonce {
            Some(c) => c.clone(),
            None => {
                let bytes: [u8; 16] = rand::thread_rng().gen();
                hex::encode(bytes)
            }
        };

        let answer = DigestAnswer::compute(
            &challenge,
            &creds.username,
            &creds.password,
            self.method,
            &request_target(probe_url),
            &cnonce,
        )?;
        Ok(answer.to_string())
    }

    fn transition(&mut self, next: DigestState) {
        trace!("digest handshake: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Drive the handshake to completion, issuing the probe through `probe` when needed.
    pub fn run<P: Probe + ?Sized>(
        mut self,
        probe: &P,
    ) -> std::result::Result<Headers, AuthFailure> {
        if let DigestState::ChallengeRequested { probe_url } = self.begin().clone() {
            let result = probe.probe(self.method, &probe_url);
            self.receive(result);
        }

        match self.state {
            DigestState::Resolved(header) => {
                let mut headers = Headers::new();
                headers.insert("Authorization".to_string(), header);
                Ok(headers)
            }
            DigestState::Failed(why) => Err(why),
            // begin() always leaves NotStarted; receive() always leaves ChallengeRequested
            DigestState::NotStarted | DigestState::ChallengeRequested { .. } => {
                Err(AuthFailure::MissingChallenge)
            }
        }
    }
}

/// Produce the `Authorization` header for `method`, probing the server if needed.
pub fn authenticate<P: Probe + ?Sized>(
    params: &DigestParams,
    method: Method,
    base_url: &str,
    probe: &P,
) -> std::result::Result<Headers, AuthFailure> {
    DigestHandshake::new(params, method, base_url).run(probe)
}
