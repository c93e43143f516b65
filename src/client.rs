//! Request lifecycle: URL assembly, authentication, transport call, normalization.

use std::sync::Arc;

use log::debug;

use crate::auth::{self, AuthOutcome};
use crate::config::{Authentication, ConnectionConfig};
use crate::digest::Probe;
use crate::enums::Method;
use crate::headers::Headers;
use crate::transport::{Body, ClientCertificate, Params, Request, Response, Transport};
use crate::utils::{build_query, join_url};
use crate::{Error, Result};

/// REST client bound to one connection configuration.
///
/// Every call works on the configuration snapshot that was current when it
/// started. Reconfiguration takes `&mut self`, so it can never interleave with
/// calls in flight on the same client.
#[derive(Debug)]
pub struct RestClient<T> {
    transport: T,
    config: Arc<ConnectionConfig>,
}

/// Unauthenticated side channel used for Digest probes
struct UnauthenticatedProbe<'c, T> {
    client: &'c RestClient<T>,
    config: &'c ConnectionConfig,
}

impl<'c, T: Transport> Probe for UnauthenticatedProbe<'c, T> {
    fn probe(&self, method: Method, url: &str) -> Result<Response> {
        self.client.execute_unauthenticated(self.config, method, url)
    }
}

impl<T: Transport> RestClient<T> {
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        RestClient {
            transport,
            config: Arc::new(config),
        }
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<ConnectionConfig> {
        Arc::clone(&self.config)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Replace the custom headers sent with every request
    pub fn set_custom_headers(&mut self, headers: Headers) {
        self.config = Arc::new(self.config.with_custom_headers(headers));
    }

    /// Rebind to a new connection. Custom headers set earlier are dropped.
    pub fn update_connection(&mut self, config: ConnectionConfig) {
        self.config = Arc::new(config);
    }

    /// Swap the authentication only; base URL, TLS setting and custom headers stay.
    pub fn update_authentication(&mut self, authentication: Authentication) {
        self.config = Arc::new(self.config.with_authentication(authentication));
    }

    /// GET `path` with `params` as the query string
    pub fn get(&self, path: &str, params: &Params) -> Result<Response> {
        self.send(Method::GET, path, Some(params), None)
    }

    pub fn put(&self, path: &str, body: Body) -> Result<Response> {
        self.send(Method::PUT, path, None, Some(body))
    }

    pub fn post(&self, path: &str, body: Body) -> Result<Response> {
        self.send(Method::POST, path, None, Some(body))
    }

    pub fn delete(&self, path: &str, body: Option<Body>) -> Result<Response> {
        self.send(Method::DELETE, path, None, body)
    }

    /// Verb-generic entry point. For GET the payload must be a form, which becomes
    /// the query string.
    pub fn request(&self, method: Method, path: &str, body: Option<Body>) -> Result<Response> {
        match (method, body) {
            (Method::GET, None) => self.get(path, &Params::new()),
            (Method::GET, Some(Body::Form(params))) => self.get(path, &params),
            (Method::GET, Some(Body::Raw(_))) => Err(Error::Configuration(
                "params",
                "GET parameters must be a key/value mapping".into(),
            )),
            (method, body) => self.send(method, path, None, body),
        }
    }

    /// Send `method` to an absolute `url` without resolving any authentication.
    /// TLS verification and timeout still follow `config`.
    pub fn execute_unauthenticated(
        &self,
        config: &ConnectionConfig,
        method: Method,
        url: &str,
    ) -> Result<Response> {
        self.dispatch(config, method, url.to_string(), None, None, None)
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&Params>,
        body: Option<Body>,
    ) -> Result<Response> {
        let snapshot = Arc::clone(&self.config);
        let config = snapshot.as_ref();
        let mut url = join_url(config.base_url(), path);
        let mut query = query.cloned().unwrap_or_default();

        let probe = UnauthenticatedProbe { client: self, config };
        let mut scheme_headers = None;
        let mut certificate = None;
        match auth::resolve(config, method, &probe)? {
            AuthOutcome::HeaderSet(headers) => scheme_headers = Some(headers),
            // GET folds the auth params into its own query before the URL is built;
            // the other verbs tack them on as a separate query string.
            AuthOutcome::QueryAppend(params) => match method {
                Method::GET => query.extend(params),
                _ if !params.is_empty() => {
                    url.push('?');
                    url.push_str(&build_query(&params));
                }
                _ => {}
            },
            AuthOutcome::TransportCredential(cert) => certificate = Some(cert),
            AuthOutcome::None => {}
        }

        if method == Method::GET && !query.is_empty() {
            url = format!("{}?{}", url, build_query(&query));
        }

        let headers = auth::merge_custom_headers(scheme_headers, config.custom_headers());

        debug!("{} {}", method, path);
        self.dispatch(config, method, url, body, headers, certificate)
    }

    fn dispatch(
        &self,
        config: &ConnectionConfig,
        method: Method,
        url: String,
        body: Option<Body>,
        headers: Option<Headers>,
        client_certificate: Option<ClientCertificate>,
    ) -> Result<Response> {
        let request = Request {
            method,
            url,
            body,
            headers,
            verify_tls: config.verify_tls(),
            client_certificate,
            timeout: config.request_timeout(),
        };

        let raw = self.transport.execute(&request)?;
        Response::from_raw(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DigestCredentials, DigestParams};
    use crate::enums::FailurePolicy;
    use crate::error::AuthFailure;
    use crate::transport::{RawResponse, TransportError};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays canned responses and records every request it sees
    struct ScriptedTransport {
        replies: RefCell<VecDeque<std::result::Result<RawResponse, TransportError>>>,
        requests: RefCell<Vec<Request>>,
    }

    impl ScriptedTransport {
        fn replying(replies: Vec<std::result::Result<RawResponse, TransportError>>) -> Self {
            ScriptedTransport {
                replies: RefCell::new(replies.into()),
                requests: RefCell::new(vec![]),
            }
        }

        fn ok() -> Self {
            Self::replying(vec![Ok(ok_response()); 4])
        }

        fn sent(&self) -> Vec<Request> {
            self.requests.borrow().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, request: &Request) -> std::result::Result<RawResponse, TransportError> {
            self.requests.borrow_mut().push(request.clone());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new("no scripted reply")))
        }
    }

    fn ok_response() -> RawResponse {
        RawResponse::new(
            200,
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n",
            b"{\"ok\":true}",
        )
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn client(auth: Authentication, transport: ScriptedTransport) -> RestClient<ScriptedTransport> {
        RestClient::new(transport, ConnectionConfig::new("https://x/api/", auth).unwrap())
    }

    #[test]
    fn test_get_normalizes_response() {
        let client = client(Authentication::None, ScriptedTransport::ok());
        let response = client.get("/items", &Params::new()).unwrap();

        assert_eq!(response.code, 200);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.body, b"{\"ok\":true}".to_vec());

        let sent = client.transport().sent();
        assert_eq!(sent[0].url, "https://x/api/items");
        assert_eq!(sent[0].method, Method::GET);
        assert_eq!(sent[0].headers, None);
        assert!(sent[0].verify_tls);
    }

    #[test]
    fn test_query_scheme_is_verb_asymmetric() {
        let client = client(
            Authentication::Query(params(&[("key", "k")])),
            ScriptedTransport::ok(),
        );

        client.get("/items", &params(&[("a", "1")])).unwrap();
        client.post("/items", Body::Form(params(&[("key", "ignored"), ("b", "2")]))).unwrap();
        client.put("/items?x=1", Body::from("raw")).unwrap();
        client.delete("items", None).unwrap();

        let urls: Vec<String> = client.transport().sent().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://x/api/items?a=1&key=k",
                "https://x/api/items?key=k",
                "https://x/api/items?x=1?key=k",
                "https://x/api/items?key=k",
            ]
        );
    }

    #[test]
    fn test_get_query_auth_overrides_same_named_param() {
        let client = client(
            Authentication::Query(params(&[("key", "k")])),
            ScriptedTransport::ok(),
        );
        client.get("items", &params(&[("key", "mine"), ("z", "9")])).unwrap();
        assert_eq!(client.transport().sent()[0].url, "https://x/api/items?key=k&z=9");
    }

    #[test]
    fn test_custom_headers_on_every_verb() {
        let mut client = client(Authentication::basic("u", "p"), ScriptedTransport::ok());
        client.set_custom_headers(params(&[("X-Trace", "abc"), ("Authorization", "Bearer t")]));

        client.get("a", &Params::new()).unwrap();
        client.put("a", Body::from("x")).unwrap();
        client.post("a", Body::from("x")).unwrap();
        client.delete("a", Some(Body::from("x"))).unwrap();

        for request in client.transport().sent() {
            let headers = request.headers.unwrap();
            assert_eq!(headers.get("X-Trace").unwrap(), "abc");
            assert_eq!(headers.get("Authorization").unwrap(), "Bearer t");
        }
    }

    #[test]
    fn test_update_connection_drops_custom_headers() {
        let mut client = client(Authentication::None, ScriptedTransport::ok());
        client.set_custom_headers(params(&[("X-Trace", "abc")]));
        client.update_connection(
            ConnectionConfig::new("https://y/v2", Authentication::basic("u", "p")).unwrap(),
        );
        client.get("items", &Params::new()).unwrap();

        let sent = client.transport().sent();
        assert_eq!(sent[0].url, "https://y/v2/items");
        let headers = sent[0].headers.as_ref().unwrap();
        assert!(headers.get("X-Trace").is_none());
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_update_authentication_keeps_connection() {
        let mut client = client(Authentication::None, ScriptedTransport::ok());
        client.set_custom_headers(params(&[("X-Trace", "abc")]));
        client.update_authentication(Authentication::Header(params(&[("X-Api-Key", "k")])));
        client.get("items", &Params::new()).unwrap();

        let sent = client.transport().sent();
        assert_eq!(sent[0].url, "https://x/api/items");
        let headers = sent[0].headers.as_ref().unwrap();
        assert_eq!(headers.get("X-Trace").unwrap(), "abc");
        assert_eq!(headers.get("X-Api-Key").unwrap(), "k");
    }

    #[test]
    fn test_cert_goes_to_transport_not_headers() {
        let config = ConnectionConfig::new("https://x/api/", Authentication::cert("/c.pem", "pw"))
            .unwrap()
            .accept_self_signed(true)
            .timeout(Duration::from_secs(3));
        let client = RestClient::new(ScriptedTransport::ok(), config);
        client.post("upload", Body::from("data")).unwrap();

        let sent = client.transport().sent();
        assert_eq!(sent[0].headers, None);
        assert!(!sent[0].verify_tls);
        assert_eq!(sent[0].timeout, Some(Duration::from_secs(3)));
        assert_eq!(
            sent[0].client_certificate.as_ref().unwrap().cert_password,
            "pw"
        );
        assert_eq!(sent[0].body, Some(Body::Raw(b"data".to_vec())));
    }

    #[test]
    fn test_digest_probe_then_request() {
        let challenge = RawResponse::new(
            401,
            b"HTTP/1.1 401 Unauthorized\r\n\
WWW-Authenticate: Digest realm=\"r\", nonce=\"n\", qop=\"auth\", opaque=\"o\"\r\n\r\n",
            b"",
        );
        let transport = ScriptedTransport::replying(vec![Ok(challenge), Ok(ok_response())]);
        let auth = Authentication::Digest(DigestParams::Challenge(DigestCredentials {
            username: "u".into(),
            password: "p".into(),
            url: Some("https://x/secure".into()),
        }));
        let client = client(auth, transport);

        let response = client.put("items/1", Body::Form(params(&[("n", "1")]))).unwrap();
        assert_eq!(response.code, 200);

        let sent = client.transport().sent();
        assert_eq!(sent.len(), 2);

        // the probe goes out bare, with the same verb
        assert_eq!(sent[0].method, Method::PUT);
        assert_eq!(sent[0].url, "https://x/secure");
        assert_eq!(sent[0].headers, None);
        assert_eq!(sent[0].body, None);

        let authorization = sent[1].headers.as_ref().unwrap()["Authorization"].clone();
        assert!(authorization
            .starts_with(r#"Digest username="u", realm="r", nonce="n", uri="/secure""#));
        assert!(authorization.contains("nc=00000001, qop=\"auth\""));
        assert!(authorization.ends_with("opaque=\"o\", algorithm=\"MD5\""));
        assert_eq!(sent[1].url, "https://x/api/items/1");
    }

    #[test]
    fn test_digest_failure_lenient_and_strict() {
        let not_challenged =
            || ScriptedTransport::replying(vec![Ok(ok_response()), Ok(ok_response())]);

        let lenient = client(Authentication::digest("u", "p"), not_challenged());
        assert_eq!(lenient.get("items", &Params::new()).unwrap().code, 200);
        let sent = lenient.transport().sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].url, "https://x/api/");
        assert_eq!(sent[1].headers, None);

        let config = ConnectionConfig::new("https://x/api/", Authentication::digest("u", "p"))
            .unwrap()
            .failure_policy(FailurePolicy::Strict);
        let strict = RestClient::new(not_challenged(), config);
        assert_eq!(
            strict.get("items", &Params::new()),
            Err(Error::Authentication(AuthFailure::ChallengeNotIssued(200)))
        );
        assert_eq!(strict.transport().sent().len(), 1);
    }

    #[test]
    fn test_transport_error_surfaces_unchanged() {
        let transport = ScriptedTransport::replying(vec![Err(TransportError::new("dns failure"))]);
        let client = client(Authentication::None, transport);
        assert_eq!(
            client.delete("x", None),
            Err(Error::Transport(TransportError::new("dns failure")))
        );
    }

    #[test]
    fn test_malformed_response_headers() {
        let bad = RawResponse::new(200, b"HTTP/1.1 200 OK\r\nbroken\r\n\r\n", b"");
        let client = client(Authentication::None, ScriptedTransport::replying(vec![Ok(bad)]));
        assert_eq!(
            client.get("x", &Params::new()),
            Err(Error::MalformedHeader("broken".into()))
        );
    }

    #[test]
    fn test_generic_request() {
        let client = client(Authentication::None, ScriptedTransport::ok());
        client
            .request(Method::GET, "search", Some(Body::Form(params(&[("q", "rust lang")]))))
            .unwrap();
        client.request(Method::DELETE, "items/2", None).unwrap();
        assert!(matches!(
            client.request(Method::GET, "search", Some(Body::from("raw"))),
            Err(Error::Configuration("params", _))
        ));

        let sent = client.transport().sent();
        assert_eq!(sent[0].url, "https://x/api/search?q=rust+lang");
        assert_eq!(sent[1].method, Method::DELETE);
        assert_eq!(sent[1].body, None);
    }

    #[test]
    fn test_snapshot_is_stable_across_reconfiguration() {
        let mut client = client(Authentication::None, ScriptedTransport::ok());
        let before = client.config();
        client.update_authentication(Authentication::basic("u", "p"));

        assert_eq!(before.authentication(), &Authentication::None);
        assert_eq!(client.config().authentication(), &Authentication::basic("u", "p"));
    }
}
