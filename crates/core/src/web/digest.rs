//! HTTP Digest authentication agent (RFC 2617, `qop=auth`, MD5).
//!
//! The agent keeps only `HA1 = MD5(username:realm:password)`; the password
//! and the A1 concatenation are wiped as soon as HA1 is computed.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;
use url::Url;

use super::challenge::Challenge;
use super::envelope::Request;
use crate::errors::CredentialError;
use crate::keyring::{canonical_root_url, CredentialStore, ProtectionDomain};
use crate::secret::SecretBuf;

fn md5_hex(input: &[u8]) -> String {
    hex::encode(Md5::digest(input))
}

pub(crate) fn quoted_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// A token when possible, a quoted-string otherwise.
pub(crate) fn parameter_value(s: &str) -> String {
    let is_token = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c));
    if is_token {
        s.to_string()
    } else {
        quoted_string(s)
    }
}

fn root_of(uri: &Url) -> Url {
    let mut root = uri.clone();
    root.set_path("");
    root.set_query(None);
    root.set_fragment(None);
    root
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// The usable parts of a Digest challenge.
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub algorithm: Option<String>,
    pub opaque: Option<String>,
    /// The same-origin URIs named by the `domain` parameter, or the
    /// canonical root when there are none.
    pub protection_domain_uris: Vec<Url>,
    /// `[anchor, "digest", realm]`, used for the credential lookup.
    pub protection_domain: ProtectionDomain,
}

impl DigestChallenge {
    /// Validate a challenge received for `uri`. `None` means the challenge
    /// cannot be answered (missing realm/nonce, qop other than `auth`, or an
    /// algorithm other than MD5).
    pub fn from_challenge(uri: &Url, challenge: &Challenge) -> Option<Self> {
        let realm = challenge.param("realm")?;
        let nonce = challenge.param("nonce")?;
        if challenge.param("qop") != Some("auth") {
            return None;
        }
        let algorithm = challenge.param("algorithm");
        if algorithm.is_some_and(|a| !a.eq_ignore_ascii_case("MD5")) {
            return None;
        }

        let root = root_of(uri);
        let mut protection_domain_uris: Vec<Url> = challenge
            .param("domain")
            .unwrap_or("/")
            .split_whitespace()
            .filter_map(|u| root.join(u).ok())
            .filter(|u| same_origin(u, &root))
            .collect();
        if protection_domain_uris.is_empty() {
            protection_domain_uris.push(root.clone());
        }
        let anchor = protection_domain_uris
            .iter()
            .min_by_key(|u| u.path().len())
            .unwrap_or(&root);
        let anchor = if anchor.path() == "/" && anchor.query().is_none() {
            canonical_root_url(anchor)
        } else {
            anchor.to_string()
        };

        Some(Self {
            realm: realm.to_string(),
            nonce: nonce.to_string(),
            algorithm: algorithm.map(str::to_string),
            opaque: challenge.param("opaque").map(str::to_string),
            protection_domain_uris,
            protection_domain: ProtectionDomain::new([anchor, "digest".to_string(), realm.to_string()]),
        })
    }
}

/// Per-server Digest state: HA1, the server nonce and the nonce count.
pub struct DigestAgent {
    protection_domain_uris: Vec<Url>,
    realm: String,
    username: String,
    nonce: String,
    ha1: SecretBuf,
    algorithm: Option<String>,
    opaque: Option<String>,
    nonce_count: u32,
}

impl std::fmt::Debug for DigestAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestAgent")
            .field("realm", &self.realm)
            .field("username", &self.username)
            .field("nonce_count", &self.nonce_count)
            .finish_non_exhaustive()
    }
}

impl DigestAgent {
    /// Build an agent for a challenge received at `uri`, fetching the
    /// credentials from `store`. `Ok(None)` means the challenge is unusable.
    pub async fn www_authenticate(
        uri: &Url,
        challenge: &Challenge,
        store: &dyn CredentialStore,
    ) -> Result<Option<Self>, CredentialError> {
        let Some(params) = DigestChallenge::from_challenge(uri, challenge) else {
            return Ok(None);
        };
        let fields = store.fetch(&params.protection_domain).await?;
        match fields.as_slice() {
            [username, password, ..] => Ok(Some(Self::from_credentials(params, username, password)?)),
            _ => Err(CredentialError::Syntax(format!(
                "expected username and password for {}",
                params.protection_domain
            ))),
        }
    }

    pub fn from_credentials(
        params: DigestChallenge,
        username: &SecretBuf,
        password: &SecretBuf,
    ) -> Result<Self, CredentialError> {
        let user = username
            .as_str()
            .ok_or_else(|| CredentialError::Syntax("username is not UTF-8".into()))?
            .to_string();

        let mut a1 = SecretBuf::with_capacity(
            username.len() + params.realm.len() + password.len() + 2,
        );
        a1.extend_from_slice(username.as_bytes());
        a1.push(b':');
        a1.extend_from_slice(params.realm.as_bytes());
        a1.push(b':');
        a1.extend_from_slice(password.as_bytes());
        let ha1 = SecretBuf::from_vec(md5_hex(a1.as_bytes()).into_bytes());
        a1.wipe();

        debug!(realm = %params.realm, username = %user, "digest agent created");
        Ok(Self {
            protection_domain_uris: params.protection_domain_uris,
            realm: params.realm,
            username: user,
            nonce: params.nonce,
            ha1,
            algorithm: params.algorithm,
            opaque: params.opaque,
            nonce_count: 1,
        })
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn protection_domain_uris(&self) -> &[Url] {
        &self.protection_domain_uris
    }

    /// Length of the longest protection-domain path covering `uri`.
    pub fn scope_match(&self, uri: &Url) -> Option<usize> {
        self.protection_domain_uris
            .iter()
            .filter(|pd| same_origin(pd, uri) && uri.path().starts_with(pd.path()))
            .map(|pd| pd.path().len())
            .max()
    }

    /// `Authorization` value for `request`. Every call consumes one nonce
    /// count and draws a fresh client nonce.
    pub fn generate_authorization(&mut self, request: &Request) -> String {
        let mut raw = [0u8; 18];
        OsRng.fill_bytes(&mut raw);
        let cnonce = STANDARD.encode(raw);
        self.authorize(request.method.as_str(), &request.request_uri(), &cnonce)
    }

    fn authorize(&mut self, method: &str, digest_uri: &str, cnonce: &str) -> String {
        let qop = "auth";
        let nc = format!("{:08x}", self.nonce_count);
        self.nonce_count = self.nonce_count.wrapping_add(1);

        let ha2 = md5_hex(format!("{}:{}", method, digest_uri).as_bytes());

        let mut kd = SecretBuf::with_capacity(
            self.ha1.len() + self.nonce.len() + nc.len() + cnonce.len() + qop.len() + ha2.len() + 5,
        );
        kd.extend_from_slice(self.ha1.as_bytes());
        for part in [self.nonce.as_str(), nc.as_str(), cnonce, qop, ha2.as_str()] {
            kd.push(b':');
            kd.extend_from_slice(part.as_bytes());
        }
        let response = md5_hex(kd.as_bytes());

        let mut auth = format!(
            "Digest username={}, realm={}, nonce={}, uri={}, qop={}, cnonce={}, nc={}, response={}",
            quoted_string(&self.username),
            quoted_string(&self.realm),
            quoted_string(&self.nonce),
            parameter_value(digest_uri),
            parameter_value(qop),
            quoted_string(cnonce),
            parameter_value(&nc),
            quoted_string(&response),
        );
        if let Some(algorithm) = &self.algorithm {
            auth.push_str(&format!(", algorithm={}", parameter_value(algorithm)));
        }
        if let Some(opaque) = &self.opaque {
            auth.push_str(&format!(", opaque={}", quoted_string(opaque)));
        }
        auth
    }
}
