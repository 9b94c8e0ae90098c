//! The stateful web client: cookies, redirects and authentication retries.
//!
//! One [`WebClient`] is scoped to one synchronization run. Its cookie jar and
//! Digest nonce counts are only correct if requests through it are issued
//! one at a time, which `&mut self` on every request method enforces.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};
use url::Url;

use super::agents::{AuthAgents, BasicCredential};
use super::auth::{AuthHandler, HttpAuthHandler, ReauthChecker};
use super::cookie::CookieJar;
use super::digest::DigestAgent;
use super::envelope::{Page, Request, Response};
use super::transport::{ReqwestTransport, Transport};
use crate::config::HttpConfig;
use crate::errors::WebError;
use crate::keyring::CredentialStore;

/// Default bound on followed redirects.
pub const DEFAULT_MAX_REDIRECTS: usize = 20;
/// Default bound on challenge/retry rounds in [`WebClient::read`].
pub const DEFAULT_MAX_AUTH_ROUNDS: usize = 8;

pub struct WebClient {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    cookies: CookieJar,
    agents: AuthAgents,
    checkers: Vec<Arc<dyn ReauthChecker>>,
    handlers: Vec<Arc<dyn AuthHandler>>,
    max_redirects: usize,
    max_auth_rounds: usize,
}

impl WebClient {
    /// A client with the built-in HTTP Basic/Digest handler registered.
    pub fn new(transport: Arc<dyn Transport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
            cookies: CookieJar::new(),
            agents: AuthAgents::new(),
            checkers: Vec::new(),
            handlers: vec![Arc::new(HttpAuthHandler)],
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_auth_rounds: DEFAULT_MAX_AUTH_ROUNDS,
        }
    }

    /// A `reqwest`-backed client configured from the `[http]` section.
    pub fn from_config(
        config: &HttpConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, WebError> {
        let transport = ReqwestTransport::new(&config.user_agent, config.timeout())?;
        Ok(Self::new(Arc::new(transport), credentials)
            .with_limits(config.max_redirects, config.max_auth_rounds))
    }

    pub fn with_limits(mut self, max_redirects: usize, max_auth_rounds: usize) -> Self {
        self.max_redirects = max_redirects;
        self.max_auth_rounds = max_auth_rounds;
        self
    }

    /// Append a checker; checkers run in registration order.
    pub fn add_checker(&mut self, checker: Arc<dyn ReauthChecker>) {
        self.checkers.push(checker);
    }

    /// Append a handler after those already registered.
    pub fn add_handler(&mut self, handler: Arc<dyn AuthHandler>) {
        self.handlers.push(handler);
    }

    pub fn credentials(&self) -> Arc<dyn CredentialStore> {
        Arc::clone(&self.credentials)
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn add_basic_credential(&mut self, credential: BasicCredential) {
        self.agents.add_basic(credential);
    }

    pub fn add_digest_agent(&mut self, agent: DigestAgent) {
        self.agents.add_digest(agent);
    }

    /// One exchange: apply credentials and cookies, send, record cookies.
    pub async fn do_request_state(&mut self, mut request: Request) -> Result<Response, WebError> {
        if let Some(authorization) = self.agents.authorization_for(&request)? {
            request.headers.insert(AUTHORIZATION, authorization);
        }
        if let Some(cookie) = self.cookies.cookie_header(&request.uri) {
            request.set_header(COOKIE, &cookie)?;
        }

        let response = self.transport.send(request).await?;

        let uri = response.uri().clone();
        for field in response.header_all(SET_COOKIE.as_str()) {
            self.cookies.update(&uri, field);
        }
        Ok(response)
    }

    /// Perform `request`, following 301/302/303/307 redirects with GETs.
    #[instrument(skip(self, request), fields(method = %request.method, uri = %request.uri))]
    pub async fn do_request(&mut self, request: Request) -> Result<Response, WebError> {
        let start = request.uri.to_string();
        let mut request = request;
        let mut redirects = 0;
        loop {
            let response = self.do_request_state(request).await?;
            let Some(location) = response.redirect_target().map(str::to_string) else {
                return Ok(response);
            };
            if redirects == self.max_redirects {
                return Err(WebError::TooManyRedirects { uri: start, limit: self.max_redirects });
            }
            redirects += 1;

            // Location may be relative even though RFC 2616 forbids it.
            let target = response
                .uri()
                .join(&location)
                .map_err(|_| WebError::InvalidUrl(location.clone()))?;
            debug!(status = response.status.as_u16(), to = %target, "following redirect");
            request = Request::get(target);
        }
    }

    /// GET `uri`, resolving authentication demands until a plain 200 arrives.
    pub async fn read(&mut self, uri: &Url) -> Result<Page, WebError> {
        self.read_request(Request::get(uri.clone())).await
    }

    /// [`read`](Self::read) returning the body decoded as text.
    pub async fn read_text(&mut self, uri: &Url) -> Result<String, WebError> {
        self.read(uri).await?.text()
    }

    #[instrument(skip(self, request), fields(uri = %request.uri))]
    pub async fn read_request(&mut self, request: Request) -> Result<Page, WebError> {
        let mut request = request;
        let mut rounds = 0;
        loop {
            let response = self.do_request(request).await?;
            let fired: Vec<&str> = self
                .checkers
                .iter()
                .filter(|c| c.detects(&response))
                .map(|c| c.name())
                .collect();
            if response.status == StatusCode::OK && fired.is_empty() {
                return Ok(Page::from(response));
            }
            if !fired.is_empty() {
                debug!(checkers = ?fired, "authentication required");
            }
            let challenged = !fired.is_empty() || response.status == StatusCode::UNAUTHORIZED;

            let unresolved = || {
                if challenged {
                    WebError::AuthChallengeUnresolved {
                        uri: response.uri().to_string(),
                        status: response.status.as_u16(),
                    }
                } else {
                    WebError::UnexpectedStatus {
                        uri: response.uri().to_string(),
                        status: response.status.as_u16(),
                    }
                }
            };
            if rounds == self.max_auth_rounds {
                return Err(unresolved());
            }
            rounds += 1;

            match self.resolve(&response).await? {
                Some(retry) => request = retry,
                None => return Err(unresolved()),
            }
        }
    }

    /// Offer `response` to the handlers in order; the first that produces a
    /// request wins.
    async fn resolve(&mut self, response: &Response) -> Result<Option<Request>, WebError> {
        let handlers = self.handlers.clone();
        let recognized: Vec<&str> = handlers
            .iter()
            .filter(|h| h.recognizes(response))
            .map(|h| h.name())
            .collect();
        if recognized.len() > 1 {
            warn!(handlers = ?recognized, uri = %response.uri(), "several auth handlers match; using the first");
        }
        for handler in &handlers {
            if let Some(retry) = handler.attempt(self, response).await? {
                debug!(handler = handler.name(), "challenge resolved");
                return Ok(Some(retry));
            }
        }
        Ok(None)
    }
}
