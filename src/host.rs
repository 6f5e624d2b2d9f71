//! # Remote Host Boundary
//!
//! The [`RemoteHost`] trait covers what the workflow needs from a code-hosting
//! service beyond git itself: checking credentials, naming repository URLs and
//! serving the slug index.
//!
//! - [`HttpHost`] talks to a GitHub-style HTTPS API (`GET {api}/user`).
//! - [`LocalHost`] serves bare repositories from a directory, for offline use
//!   and tests.
//!
//! Tokens are held as [`SecretString`] and only exposed when building the
//! authorization header handed to git.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::error::{SlugError, SyncError};
use crate::git::GitInvocation;
use crate::slug::SlugIndex;

/// Environment variable holding an access token.
pub const TOKEN_ENV: &str = "LIB50_TOKEN";
/// Environment variable holding the username that goes with the token.
pub const USERNAME_ENV: &str = "LIB50_USERNAME";

const USER_AGENT: &str = concat!("lib50/", env!("CARGO_PKG_VERSION"));

/// Opaque credentials supplied by the calling tool.
#[derive(Default)]
pub enum Credentials {
    #[default]
    None,
    Token {
        username: Option<String>,
        token: SecretString,
    },
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Credentials::Token {
            username: None,
            token: SecretString::from(token.into()),
        }
    }

    pub fn with_username(self, name: &str) -> Self {
        match self {
            Credentials::Token { token, .. } => Credentials::Token {
                username: Some(name.to_string()),
                token,
            },
            Credentials::None => Credentials::None,
        }
    }

    /// Read `LIB50_TOKEN` / `LIB50_USERNAME`.
    pub fn from_env() -> Self {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => {
                let credentials = Credentials::token(token.trim());
                match std::env::var(USERNAME_ENV) {
                    Ok(name) if !name.trim().is_empty() => credentials.with_username(name.trim()),
                    _ => credentials,
                }
            }
            _ => Credentials::None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Credentials::None)
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Credentials::Token { username, .. } => username.as_deref(),
            Credentials::None => None,
        }
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        match self {
            Credentials::None => Credentials::None,
            Credentials::Token { username, token } => Credentials::Token {
                username: username.clone(),
                token: SecretString::from(token.expose_secret().to_string()),
            },
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => f.write_str("Credentials::None"),
            Credentials::Token { username, .. } => f
                .debug_struct("Credentials::Token")
                .field("username", username)
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// An authenticated identity, valid for one push.
#[derive(Debug)]
pub struct Session {
    pub username: String,
    pub email: String,
    auth_header: Option<SecretString>,
}

impl Session {
    pub fn new(username: &str, email: Option<&str>) -> Self {
        Self {
            username: username.to_string(),
            email: email
                .map(str::to_string)
                .unwrap_or_else(|| noreply_email(username)),
            auth_header: None,
        }
    }

    /// Attach HTTP basic credentials for git's `http.extraHeader`.
    pub fn with_basic_auth(mut self, token: &SecretString) -> Self {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, token.expose_secret()));
        self.auth_header = Some(SecretString::from(format!("Authorization: Basic {}", encoded)));
        self
    }

    /// The full `Authorization: ...` header line, if any.
    pub fn auth_header(&self) -> Option<&SecretString> {
        self.auth_header.as_ref()
    }

    /// Attach this session's credentials to a git network invocation.
    pub fn authorize(&self, invocation: GitInvocation) -> GitInvocation {
        match &self.auth_header {
            Some(header) => invocation.config("credential.helper", "").secret_config(
                "http.extraHeader",
                SecretString::from(header.expose_secret().to_string()),
            ),
            None => invocation,
        }
    }
}

/// The no-reply address used when the host does not expose the user's email.
pub fn noreply_email(username: &str) -> String {
    format!("{}@users.noreply.github.com", username)
}

/// A code-hosting service.
pub trait RemoteHost: Send + Sync {
    /// Short host name for messages, e.g. `github.com`.
    fn name(&self) -> &str;

    fn authenticate(&self, credentials: &Credentials) -> Result<Session, SyncError>;

    /// The git remote URL of `org/repo`.
    fn repository_url(&self, org: &str, repo: &str) -> String;

    fn fetch_index(&self) -> Result<SlugIndex, SlugError>;
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// A GitHub-style host reached over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpHost {
    name: String,
    api_url: Url,
    git_url: Url,
    index_url: Option<Url>,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

fn parse_url(raw: &str) -> Result<Url, SyncError> {
    Url::parse(raw).map_err(|e| SyncError::Network {
        url: raw.to_string(),
        message: e.to_string(),
    })
}

impl HttpHost {
    pub fn new(api_url: &str, git_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let api_url = parse_url(api_url)?;
        let git_url = parse_url(git_url)?;
        let name = git_url.host_str().unwrap_or("remote host").to_string();

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SyncError::Network {
                url: api_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            name,
            api_url,
            git_url,
            index_url: None,
            timeout,
            client,
        })
    }

    pub fn with_index_url(mut self, index_url: &str) -> Result<Self, SyncError> {
        self.index_url = Some(parse_url(index_url)?);
        Ok(self)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.as_str().trim_end_matches('/'), path)
    }

    fn request_error(&self, operation: &str, url: &str, error: reqwest::Error) -> SyncError {
        if error.is_timeout() {
            SyncError::Timeout {
                operation: operation.to_string(),
                after: self.timeout,
            }
        } else {
            SyncError::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

impl RemoteHost for HttpHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<Session, SyncError> {
        let Credentials::Token { token, .. } = credentials else {
            return Err(SyncError::AuthRequired {
                host: self.name.clone(),
            });
        };

        let url = self.endpoint("user");
        debug!("Authenticating against {}", url);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(token.expose_secret())
            .send()
            .map_err(|e| self.request_error("GET /user", &url, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(SyncError::AuthRejected {
                host: self.name.clone(),
                message,
            });
        }
        if status.is_server_error() {
            return Err(SyncError::Network {
                url,
                message: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(SyncError::HostRejected {
                reason: response.text().unwrap_or_else(|_| status.to_string()),
            });
        }

        let user: UserResponse = response
            .json()
            .map_err(|e| self.request_error("GET /user", &url, e))?;
        info!("Authenticated as {}", user.login);

        Ok(Session::new(&user.login, user.email.as_deref()).with_basic_auth(token))
    }

    fn repository_url(&self, org: &str, repo: &str) -> String {
        format!("{}/{}/{}", self.git_url.as_str().trim_end_matches('/'), org, repo)
    }

    fn fetch_index(&self) -> Result<SlugIndex, SlugError> {
        let Some(url) = &self.index_url else {
            debug!("No slug index configured; relying on branch discovery");
            return Ok(SlugIndex::default());
        };
        let unavailable = |message: String| SlugError::IndexUnavailable {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status())));
        }
        let body = response.text().map_err(|e| unavailable(e.to_string()))?;
        SlugIndex::from_json(&body).map_err(|e| unavailable(e.to_string()))
    }
}

/// Bare repositories under a local directory (`<root>/<org>/<repo>.git`).
///
/// Any token is accepted; with no credentials the session falls back to the
/// username from `LIB50_USERNAME`-style credentials or `lib50`.
#[derive(Debug, Clone)]
pub struct LocalHost {
    root: PathBuf,
    index: Option<PathBuf>,
    require_credentials: bool,
}

impl LocalHost {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            index: None,
            require_credentials: false,
        }
    }

    /// Read the slug index from a JSON file.
    pub fn with_index_file(mut self, path: &Path) -> Self {
        self.index = Some(path.to_path_buf());
        self
    }

    pub fn require_credentials(mut self) -> Self {
        self.require_credentials = true;
        self
    }

    pub fn repository_path(&self, org: &str, repo: &str) -> PathBuf {
        self.root.join(org).join(format!("{}.git", repo))
    }
}

impl RemoteHost for LocalHost {
    fn name(&self) -> &str {
        "local"
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<Session, SyncError> {
        if credentials.is_none() && self.require_credentials {
            return Err(SyncError::AuthRequired {
                host: self.name().to_string(),
            });
        }
        Ok(Session::new(credentials.username().unwrap_or("lib50"), None))
    }

    fn repository_url(&self, org: &str, repo: &str) -> String {
        self.repository_path(org, repo).display().to_string()
    }

    fn fetch_index(&self) -> Result<SlugIndex, SlugError> {
        let Some(path) = &self.index else {
            return Ok(SlugIndex::default());
        };
        let unavailable = |message: String| SlugError::IndexUnavailable {
            url: path.display().to_string(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
        SlugIndex::from_json(&content).map_err(|e| unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn host(uri: &str, timeout: Duration) -> HttpHost {
        HttpHost::new(uri, "https://github.com", timeout).unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "alice", "email": null})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let session = tokio::task::spawn_blocking(move || {
            host(&uri, Duration::from_secs(5)).authenticate(&Credentials::token("s3cret"))
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(session.username, "alice");
        assert_eq!(session.email, "alice@users.noreply.github.com");
        let header = session.auth_header().unwrap().expose_secret().to_string();
        assert_eq!(
            header,
            format!("Authorization: Basic {}", STANDARD.encode("alice:s3cret"))
        );
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = tokio::task::spawn_blocking(move || {
            host(&uri, Duration::from_secs(5)).authenticate(&Credentials::token("wrong"))
        })
        .await
        .unwrap()
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthRejected);
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[tokio::test]
    async fn test_authenticate_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"login": "alice"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = tokio::task::spawn_blocking(move || {
            host(&uri, Duration::from_millis(100)).authenticate(&Credentials::token("s3cret"))
        })
        .await
        .unwrap()
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orgs": {"old50": "cs50"},
                "branches": {"me50/alice": ["main"]}
            })))
            .mount(&server)
            .await;

        let uri = server.uri();
        let index = tokio::task::spawn_blocking(move || {
            host(&uri, Duration::from_secs(5))
                .with_index_url(&format!("{}/index.json", uri))
                .unwrap()
                .fetch_index()
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(index.orgs.get("old50").map(String::as_str), Some("cs50"));
        assert_eq!(index.branches["me50/alice"], vec!["main"]);
    }

    #[test]
    fn test_authenticate_without_credentials() {
        let err = host("https://api.github.com", Duration::from_secs(1))
            .authenticate(&Credentials::None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRequired);
        assert!(err.to_string().contains("github.com"));
    }

    #[test]
    fn test_no_index_url_means_empty_index() {
        let host = host("https://api.github.com", Duration::from_secs(1));
        assert_eq!(host.fetch_index().unwrap(), SlugIndex::default());
    }

    #[test]
    fn test_repository_url() {
        let host = host("https://api.github.com", Duration::from_secs(1));
        assert_eq!(host.repository_url("me50", "alice"), "https://github.com/me50/alice");
    }

    #[test]
    fn test_credentials_debug_hides_token() {
        let credentials = Credentials::token("ghp_abcdef").with_username("alice");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("ghp_abcdef"));
    }

    #[test]
    #[serial_test::serial]
    fn test_credentials_from_env() {
        std::env::set_var(TOKEN_ENV, " tok ");
        std::env::set_var(USERNAME_ENV, "bob");
        let credentials = Credentials::from_env();
        assert_eq!(credentials.username(), Some("bob"));
        std::env::remove_var(TOKEN_ENV);
        std::env::remove_var(USERNAME_ENV);
        assert!(Credentials::from_env().is_none());
    }

    #[test]
    fn test_local_host() {
        let temp = tempfile::TempDir::new().unwrap();
        let local = LocalHost::new(temp.path());
        assert!(local
            .repository_url("me50", "alice")
            .ends_with("alice.git"));
        let session = local
            .authenticate(&Credentials::token("x").with_username("carol"))
            .unwrap();
        assert_eq!(session.username, "carol");
        assert!(session.auth_header().is_none());
        assert!(session
            .authorize(GitInvocation::new(["fetch"]))
            .secret_config
            .is_empty());
        assert_eq!(local.fetch_index().unwrap(), SlugIndex::default());

        let strict = LocalHost::new(temp.path()).require_credentials();
        assert_eq!(
            strict.authenticate(&Credentials::None).unwrap_err().kind(),
            ErrorKind::AuthRequired
        );
    }
}
