//! Registered credentials applied to outgoing requests before they are sent.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use tracing::debug;
use url::Url;

use super::digest::DigestAgent;
use super::envelope::Request;
use crate::errors::WebError;
use crate::keyring::canonical_root_url;
use crate::secret::SecretBuf;

/// A Basic credential valid below `path_prefix` of one canonical root.
pub struct BasicCredential {
    canonical_root: String,
    realm: String,
    path_prefix: String,
    /// base64 of `user:pass`.
    credential: SecretBuf,
}

impl std::fmt::Debug for BasicCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredential")
            .field("canonical_root", &self.canonical_root)
            .field("realm", &self.realm)
            .field("path_prefix", &self.path_prefix)
            .finish_non_exhaustive()
    }
}

impl BasicCredential {
    pub fn new(
        canonical_root: impl Into<String>,
        realm: impl Into<String>,
        path_prefix: impl Into<String>,
        credential: SecretBuf,
    ) -> Self {
        Self {
            canonical_root: canonical_root.into(),
            realm: realm.into(),
            path_prefix: path_prefix.into(),
            credential,
        }
    }

    /// Encode `username:password`; the plaintext pair is wiped before return.
    pub fn encode(username: &SecretBuf, password: &SecretBuf) -> SecretBuf {
        let mut user_pass = SecretBuf::with_capacity(username.len() + password.len() + 1);
        user_pass.extend_from_slice(username.as_bytes());
        user_pass.push(b':');
        user_pass.extend_from_slice(password.as_bytes());
        let encoded = SecretBuf::from_vec(STANDARD.encode(user_pass.as_bytes()).into_bytes());
        user_pass.wipe();
        encoded
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    fn scope_match(&self, root: &str, path: &str) -> Option<usize> {
        (self.canonical_root == root && path.starts_with(&self.path_prefix))
            .then_some(self.path_prefix.len())
    }

    fn header_value(&self) -> Result<HeaderValue, WebError> {
        let mut field = SecretBuf::with_capacity(6 + self.credential.len());
        field.extend_from_slice(b"Basic ");
        field.extend_from_slice(self.credential.as_bytes());
        let mut value = HeaderValue::from_bytes(field.as_bytes())
            .map_err(|_| WebError::InvalidHeader(AUTHORIZATION.to_string()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Basic credentials and Digest agents known to one web client.
#[derive(Debug, Default)]
pub struct AuthAgents {
    basic: Vec<BasicCredential>,
    digest: Vec<DigestAgent>,
}

impl AuthAgents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Basic credential, replacing one with the same scope.
    pub fn add_basic(&mut self, credential: BasicCredential) {
        self.basic.retain(|c| {
            !(c.canonical_root == credential.canonical_root
                && c.realm == credential.realm
                && c.path_prefix == credential.path_prefix)
        });
        debug!(root = %credential.canonical_root, realm = %credential.realm, prefix = %credential.path_prefix, "basic credential registered");
        self.basic.push(credential);
    }

    /// Register a Digest agent, replacing one for the same realm and domain.
    pub fn add_digest(&mut self, agent: DigestAgent) {
        self.digest.retain(|a| {
            !(a.realm() == agent.realm()
                && a.protection_domain_uris() == agent.protection_domain_uris())
        });
        self.digest.push(agent);
    }

    pub fn basic_count(&self) -> usize {
        self.basic.len()
    }

    pub fn digest_count(&self) -> usize {
        self.digest.len()
    }

    /// `Authorization` header for `request`, from the registered credential
    /// whose path prefix is longest. Digest wins ties.
    pub fn authorization_for(&mut self, request: &Request) -> Result<Option<HeaderValue>, WebError> {
        let uri: &Url = &request.uri;
        let root = canonical_root_url(uri);
        let path = uri.path();

        let basic = self
            .basic
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.scope_match(&root, path).map(|len| (len, i)))
            .max_by_key(|(len, _)| *len);
        let digest = self
            .digest
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.scope_match(uri).map(|len| (len, i)))
            .max_by_key(|(len, _)| *len);

        match (basic, digest) {
            (Some((b_len, _)), Some((d_len, i))) if d_len >= b_len => self.digest_header(i, request),
            (None, Some((_, i))) => self.digest_header(i, request),
            (Some((_, i)), _) => self.basic[i].header_value().map(Some),
            (None, None) => Ok(None),
        }
    }

    fn digest_header(&mut self, index: usize, request: &Request) -> Result<Option<HeaderValue>, WebError> {
        let auth = self.digest[index].generate_authorization(request);
        let mut value = HeaderValue::from_str(&auth)
            .map_err(|_| WebError::InvalidHeader(AUTHORIZATION.to_string()))?;
        value.set_sensitive(true);
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(root: &str, prefix: &str, user: &str) -> BasicCredential {
        let encoded = BasicCredential::encode(
            &SecretBuf::from_slice(user.as_bytes()),
            &SecretBuf::from_slice(b"pw"),
        );
        BasicCredential::new(root, "realm", prefix, encoded)
    }

    fn header(agents: &mut AuthAgents, uri: &str) -> Option<String> {
        let request = Request::get(Url::parse(uri).unwrap());
        agents
            .authorization_for(&request)
            .unwrap()
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[test]
    fn test_encode_user_pass() {
        let encoded = BasicCredential::encode(
            &SecretBuf::from_slice(b"Aladdin"),
            &SecretBuf::from_slice(b"open sesame"),
        );
        assert_eq!(encoded.as_str(), Some("QWxhZGRpbjpvcGVuIHNlc2FtZQ=="));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut agents = AuthAgents::new();
        agents.add_basic(cred("http://h.example.org", "/", "root"));
        agents.add_basic(cred("http://h.example.org", "/wiki/", "wiki"));

        let wiki = format!("Basic {}", STANDARD.encode("wiki:pw"));
        let root = format!("Basic {}", STANDARD.encode("root:pw"));
        assert_eq!(header(&mut agents, "http://h.example.org/wiki/Page").as_deref(), Some(wiki.as_str()));
        assert_eq!(header(&mut agents, "http://h.example.org/blog/").as_deref(), Some(root.as_str()));
        assert_eq!(header(&mut agents, "http://other.example.org/wiki/"), None);
        assert_eq!(header(&mut agents, "https://h.example.org/wiki/"), None);
    }

    #[test]
    fn test_same_scope_is_replaced() {
        let mut agents = AuthAgents::new();
        agents.add_basic(cred("http://h.example.org", "/", "old"));
        agents.add_basic(cred("http://h.example.org", "/", "new"));
        assert_eq!(agents.basic_count(), 1);
        let expected = format!("Basic {}", STANDARD.encode("new:pw"));
        assert_eq!(header(&mut agents, "http://h.example.org/").as_deref(), Some(expected.as_str()));
    }
}
