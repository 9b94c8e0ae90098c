//! GnuPG-encrypted credential files.
//!
//! Each credential lives in an ASCII-armored file `<dir>/<name>.asc` whose
//! `Comment:` armor header names the protection domain, e.g.
//!
//! ```text
//! echo alice s3cret | gpg --comment 'https://wiki.example.org basic "Staff"' \
//!     -e -a --default-recipient-self > ~/.keyring/wiki.asc
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::strings::{decode_strings, decode_strings_safe};
use super::{CredentialStore, ProtectionDomain};
use crate::errors::CredentialError;
use crate::secret::SecretBuf;

/// Directory of encrypted credential files decrypted through `gpg`.
#[derive(Debug, Clone)]
pub struct KeyRing {
    dir: PathBuf,
    gpg: String,
}

impl KeyRing {
    pub fn new(dir: impl Into<PathBuf>, gpg: impl Into<String>) -> Self {
        Self { dir: dir.into(), gpg: gpg.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Find the `.asc` file whose `Comment:` header names `domain`.
    ///
    /// Files are examined in path order and only their armor headers (up to
    /// the first blank line) are read.
    pub async fn locate(&self, domain: &ProtectionDomain) -> Result<PathBuf, CredentialError> {
        let not_found = || CredentialError::NotFound {
            domain: format!("{} in {}", domain, self.dir.display()),
        };

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "asc") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    warn!(path = %path.display(), "skipping keyring file that is not UTF-8");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            for line in contents.lines() {
                if line.is_empty() {
                    break;
                }
                let Some(comment) = line.strip_prefix("Comment:") else {
                    continue;
                };
                match decode_strings(comment) {
                    Ok(pattern) if domain.matched_by(&pattern) => {
                        debug!(path = %path.display(), "keyring entry matched");
                        return Ok(path);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "unreadable keyring comment"),
                }
            }
        }
        Err(not_found())
    }

    async fn decrypt(&self, path: &Path) -> Result<SecretBuf, CredentialError> {
        let output = Command::new(&self.gpg)
            .arg("-d")
            .arg("-q")
            .arg(path)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CredentialError::BinaryNotFound(self.gpg.clone())
                } else {
                    CredentialError::Io(e)
                }
            })?;

        let plaintext = SecretBuf::from_vec(output.stdout);
        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(CredentialError::DecryptFailed {
                path: path.display().to_string(),
                exit_code,
            });
        }
        Ok(plaintext)
    }
}

/// Drop a leading copy of the protection domain from decrypted fields.
fn strip_domain_prefix(mut fields: Vec<SecretBuf>, domain: &ProtectionDomain) -> Vec<SecretBuf> {
    let components = domain.components();
    let has_prefix = fields.len() >= components.len()
        && fields
            .iter()
            .zip(components)
            .all(|(field, component)| field.as_bytes() == component.as_bytes());
    if has_prefix {
        fields.drain(..components.len());
    }
    fields
}

#[async_trait]
impl CredentialStore for KeyRing {
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn fetch(&self, domain: &ProtectionDomain) -> Result<Vec<SecretBuf>, CredentialError> {
        let path = self.locate(domain).await?;
        let plaintext = self.decrypt(&path).await?;
        let fields = decode_strings_safe(plaintext.as_bytes())?;
        Ok(strip_domain_prefix(fields, domain))
    }
}
