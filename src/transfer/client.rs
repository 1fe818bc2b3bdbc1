use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, TransferConfig};
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("quilt-store/", env!("CARGO_PKG_VERSION"));

/// an http session with one registry
///
/// object transfers go to signed urls and do not carry the bearer token; use
/// [`RegistryClient::http`] for those.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    base_url: String,
    token: Option<String>,
    retries: usize,
}

/// signed endpoints for one fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadUrls {
    pub head: String,
    pub put: String,
}

pub(crate) fn build_http(transfer: &TransferConfig) -> Result<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(transfer.connect_timeout())
        .timeout(transfer.read_timeout())
        .build()?)
}

impl RegistryClient {
    pub fn new(base_url: &str, token: Option<&str>, transfer: &TransferConfig) -> Result<Self> {
        Ok(Self {
            http: build_http(transfer)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            retries: transfer.retries,
        })
    }

    /// client for the configured registry, or a team's registry
    pub fn from_config(config: &Config, team: Option<&str>) -> Result<Self> {
        Self::new(
            &config.registry_url_for(team),
            config.token.as_deref(),
            &config.transfer,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// the underlying client, without registry credentials
    pub fn http(&self) -> &Client {
        &self.http
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "registry request");
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn send(&self, what: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        with_retries(what, self.retries, || check_status(build().send()?))
    }

    pub fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self.send(path, || self.request(Method::GET, path).query(query))?;
        Ok(response.json()?)
    }

    pub fn put_json<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        let response = self.send(path, || self.request(Method::PUT, path).json(body))?;
        Ok(response.json()?)
    }

    /// PUT a gzip compressed json body
    pub fn put_json_gzip<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        let json = serde_json::to_vec(body)?;
        let compressed = gzip_bytes(&json).map_err(|e| Error::Io {
            path: "<gzip>".into(),
            source: e,
        })?;

        let response = self.send(path, || {
            self.request(Method::PUT, path)
                .header(CONTENT_TYPE, "application/json")
                .header(CONTENT_ENCODING, "gzip")
                .body(compressed.clone())
        })?;
        Ok(response.json()?)
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.send(path, || self.request(Method::DELETE, path))?;
        Ok(())
    }
}

/// connection failures and 5xx responses are worth another attempt
pub(crate) fn retryable(err: &Error) -> bool {
    match err {
        Error::Http(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
        Error::Registry { status, .. } => *status >= 500,
        _ => false,
    }
}

/// run `op`, repeating it up to `retries` more times while it fails with a retryable error
pub(crate) fn with_retries<T>(what: &str, retries: usize, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Err(e) if retryable(&e) && attempt <= retries => {
                warn!(what, attempt, error = %e, "retrying");
            }
            outcome => return outcome,
        }
    }
}

fn gzip_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// map non-2xx responses to errors, keeping the server's message
pub(crate) fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Unauthorized);
    }
    let body = response.text().unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.message,
        Err(_) if body.is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
        Err(_) => body,
    };
    Err(Error::Registry {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::Server, token: Option<&str>) -> RegistryClient {
        RegistryClient::new(&server.url(), token, &TransferConfig::default()).unwrap()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pong {
        ok: bool,
    }

    #[test]
    fn test_get_json_sends_token() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/ping/")
            .match_header("authorization", "Bearer secret")
            .match_query(Matcher::UrlEncoded("x".into(), "1".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true}"#)
            .create();

        let pong: Pong = client(&server, Some("secret"))
            .get_json("/api/ping/", &[("x", "1")])
            .unwrap();
        assert_eq!(pong, Pong { ok: true });
        mock.assert();
    }

    #[test]
    fn test_error_statuses() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/auth").with_status(401).create();
        server
            .mock("GET", "/json")
            .with_status(404)
            .with_body(r#"{"message": "Package not found"}"#)
            .create();
        server
            .mock("GET", "/raw")
            .with_status(500)
            .with_body("boom")
            .create();
        let client = client(&server, None);

        assert!(matches!(
            client.get_json::<Pong>("/auth", &[]),
            Err(Error::Unauthorized)
        ));
        match client.get_json::<Pong>("/json", &[]).unwrap_err() {
            Error::Registry { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Package not found");
            }
            other => panic!("unexpected error: {}", other),
        }
        match client.get_json::<Pong>("/raw", &[]).unwrap_err() {
            Error::Registry { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_retries_server_errors() {
        let mut server = mockito::Server::new();
        let flaky = server.mock("GET", "/flaky").with_status(502).expect(1).create();
        let ok = server
            .mock("GET", "/flaky")
            .with_body(r#"{"ok": true}"#)
            .expect(1)
            .create();

        let pong: Pong = client(&server, None).get_json("/flaky", &[]).unwrap();
        assert!(pong.ok);
        flaky.assert();
        ok.assert();
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new();
        let missing = server.mock("DELETE", "/gone").with_status(404).expect(1).create();

        let err = client(&server, None).delete("/gone").unwrap_err();
        assert!(matches!(err, Error::Registry { status: 404, .. }));
        missing.assert();
    }

    #[test]
    fn test_put_json_gzip_sets_encoding() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PUT", "/api/package/alice/data/abc")
            .match_header("content-encoding", "gzip")
            .with_body(r#"{"ok": false}"#)
            .create();

        let pong: Pong = client(&server, None)
            .put_json_gzip("/api/package/alice/data/abc", &serde_json::json!({"dry_run": true}))
            .unwrap();
        assert!(!pong.ok);
        mock.assert();
    }
}
