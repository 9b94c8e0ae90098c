//! Credential lookup keyed by protection domains.
//!
//! A protection domain is an ordered list of strings naming the scope of a
//! credential, e.g. `["https://wiki.example.org", "basic", "Members"]`.
//! Stored domains may replace any component with `sha256:<hex>` so that the
//! literal (often a private host name) is not kept in clear text.

pub mod gpg;
pub mod strings;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use url::Url;

use crate::errors::CredentialError;
use crate::secret::SecretBuf;

pub use gpg::KeyRing;
pub use strings::{decode_strings, decode_strings_safe, encode_strings};

/// Prefix marking a hashed protection-domain component.
pub const HASHED_COMPONENT_PREFIX: &str = "sha256:";

/// Ordered identifier of a credential's applicability scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtectionDomain(Vec<String>);

impl ProtectionDomain {
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(components.into_iter().map(Into::into).collect())
    }

    /// `[canonical-root-url, scheme, realm]` for HTTP authentication.
    pub fn http(uri: &Url, scheme: &str, realm: &str) -> Self {
        Self::new([canonical_root_url(uri), scheme.to_string(), realm.to_string()])
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// Whether a stored pattern (literal or hashed components) names this domain.
    pub fn matched_by<S: AsRef<str>>(&self, pattern: &[S]) -> bool {
        pattern.len() == self.0.len()
            && pattern
                .iter()
                .zip(&self.0)
                .all(|(p, literal)| component_matches(p.as_ref(), literal))
    }
}

impl fmt::Display for ProtectionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_strings(&self.0))
    }
}

/// Does a stored component match a literal?
pub fn component_matches(stored: &str, literal: &str) -> bool {
    match stored.strip_prefix(HASHED_COMPONENT_PREFIX) {
        Some(hex_digest) => hex_digest.eq_ignore_ascii_case(&hash_component(literal)),
        None => stored == literal,
    }
}

/// Hex SHA-256 of a domain component.
pub fn hash_component(literal: &str) -> String {
    hex::encode(Sha256::digest(literal.as_bytes()))
}

/// Reduce a URI to scheme, host and port, dropping path, query and fragment.
pub fn canonical_root_url(uri: &Url) -> String {
    let mut root = uri.clone();
    root.set_path("");
    root.set_query(None);
    root.set_fragment(None);
    root.as_str().trim_end_matches('/').to_string()
}

/// Source of credentials for a protection domain.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Return the fields stored for `domain` (typically username, password).
    async fn fetch(&self, domain: &ProtectionDomain) -> Result<Vec<SecretBuf>, CredentialError>;
}

/// Credentials held in process memory.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: HashMap<Vec<String>, Vec<Vec<u8>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register fields under a domain pattern; components may be hashed.
    pub fn insert<S: Into<String>>(&mut self, pattern: Vec<S>, fields: &[&str]) {
        self.entries.insert(
            pattern.into_iter().map(Into::into).collect(),
            fields.iter().map(|f| f.as_bytes().to_vec()).collect(),
        );
    }

    pub fn with_entry<S: Into<String>>(mut self, pattern: Vec<S>, fields: &[&str]) -> Self {
        self.insert(pattern, fields);
        self
    }
}

impl Drop for MemoryCredentialStore {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        for fields in self.entries.values_mut() {
            for field in fields.iter_mut() {
                field.zeroize();
            }
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn fetch(&self, domain: &ProtectionDomain) -> Result<Vec<SecretBuf>, CredentialError> {
        self.entries
            .iter()
            .find(|(pattern, _)| domain.matched_by(pattern))
            .map(|(_, fields)| fields.iter().map(|f| SecretBuf::from_slice(f)).collect())
            .ok_or_else(|| CredentialError::NotFound { domain: domain.to_string() })
    }
}
