//! Challenge detection and resolution.
//!
//! A [`ReauthChecker`] decides that a response is really a login or
//! authentication demand (some sites answer 200 with a login form). An
//! [`AuthHandler`] resolves such a response by registering credentials with
//! the client and returning the request to retry.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use tracing::{debug, info, instrument, warn};

use super::agents::BasicCredential;
use super::challenge::{by_strength, parse_challenges, Challenge};
use super::client::WebClient;
use super::cookie::directory_of;
use super::digest::DigestAgent;
use super::envelope::{Request, Response};
use crate::errors::{CredentialError, WebError};
use crate::keyring::{canonical_root_url, ProtectionDomain};

/// Detects an unresolved authentication requirement in a response.
pub trait ReauthChecker: Send + Sync {
    fn name(&self) -> &str;
    fn detects(&self, response: &Response) -> bool;
}

/// Resolves a detected challenge.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap test of whether this handler applies to `response`.
    fn recognizes(&self, response: &Response) -> bool;

    /// Try to resolve the challenge. `Ok(None)` passes to the next handler.
    async fn attempt(
        &self,
        client: &mut WebClient,
        response: &Response,
    ) -> Result<Option<Request>, WebError>;
}

/// The challenged request, minus the credentials and cookies it was sent
/// with. The client attaches current ones when it goes out again.
pub fn retry_of(response: &Response) -> Request {
    let mut request = response.request.clone();
    request.headers.remove(AUTHORIZATION);
    request.headers.remove(COOKIE);
    request
}

/// HTTP 401 with `WWW-Authenticate`: Basic and Digest.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpAuthHandler;

impl HttpAuthHandler {
    fn challenges(response: &Response) -> Vec<Challenge> {
        let field = response.header_all(WWW_AUTHENTICATE.as_str()).collect::<Vec<_>>().join(", ");
        parse_challenges(&field)
            .into_iter()
            .filter_map(|parsed| match parsed {
                Ok(challenge) => Some(challenge),
                Err(e) => {
                    warn!(uri = %response.uri(), error = %e, "discarding challenge");
                    None
                }
            })
            .collect()
    }

    async fn basic(
        client: &mut WebClient,
        response: &Response,
        challenge: &Challenge,
    ) -> Result<Option<Request>, WebError> {
        let [(name, realm)] = challenge.params.as_slice() else {
            return Ok(None);
        };
        if !name.eq_ignore_ascii_case("realm") {
            return Ok(None);
        }

        let uri = response.uri();
        let domain = ProtectionDomain::http(uri, "basic", realm);
        let fields = client.credentials().fetch(&domain).await?;
        let [username, password, ..] = fields.as_slice() else {
            return Err(CredentialError::Syntax(format!("expected username and password for {}", domain)).into());
        };
        let credential = BasicCredential::encode(username, password);
        client.add_basic_credential(BasicCredential::new(
            canonical_root_url(uri),
            realm.as_str(),
            directory_of(uri.path()),
            credential,
        ));
        info!(uri = %uri, realm = %realm, "basic authentication registered");
        Ok(Some(retry_of(response)))
    }

    async fn digest(
        client: &mut WebClient,
        response: &Response,
        challenge: &Challenge,
    ) -> Result<Option<Request>, WebError> {
        let store = client.credentials();
        let Some(agent) = DigestAgent::www_authenticate(response.uri(), challenge, store.as_ref()).await? else {
            debug!(uri = %response.uri(), "digest challenge unusable");
            return Ok(None);
        };
        info!(uri = %response.uri(), realm = %agent.realm(), "digest authentication registered");
        client.add_digest_agent(agent);
        Ok(Some(retry_of(response)))
    }
}

#[async_trait]
impl AuthHandler for HttpAuthHandler {
    fn name(&self) -> &str {
        "http"
    }

    fn recognizes(&self, response: &Response) -> bool {
        response.status == StatusCode::UNAUTHORIZED && response.headers.contains_key(WWW_AUTHENTICATE)
    }

    #[instrument(skip_all, fields(uri = %response.uri()))]
    async fn attempt(
        &self,
        client: &mut WebClient,
        response: &Response,
    ) -> Result<Option<Request>, WebError> {
        if !self.recognizes(response) {
            return Ok(None);
        }
        for challenge in by_strength(Self::challenges(response)) {
            let retry = match challenge.scheme.as_str() {
                "digest" => Self::digest(client, response, &challenge).await?,
                "basic" => Self::basic(client, response, &challenge).await?,
                _ => None,
            };
            if retry.is_some() {
                return Ok(retry);
            }
        }
        Ok(None)
    }
}
