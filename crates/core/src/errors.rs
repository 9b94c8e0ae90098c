//! Error types for the formsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Web(#[from] WebError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    WorkArea(#[from] WorkAreaError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Web client errors
// ---------------------------------------------------------------------------

/// Errors from the stateful web client.
#[derive(Debug, Error)]
pub enum WebError {
    /// Connection, TLS, or protocol failure in the underlying HTTP stack.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The redirect chain exceeded the configured limit.
    #[error("too many redirects (limit {limit}) starting at {uri}")]
    TooManyRedirects { uri: String, limit: usize },

    /// A login or authentication requirement was detected and no handler
    /// could resolve it.
    #[error("no handler for {status} in {uri}")]
    AuthChallengeUnresolved { uri: String, status: u16 },

    /// The final response was neither 200 nor a recognised challenge.
    #[error("unexpected HTTP status {status} from {uri}")]
    UnexpectedStatus { uri: String, status: u16 },

    /// A URI could not be parsed or resolved.
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    /// A header value could not be encoded.
    #[error("invalid header value for '{0}'")]
    InvalidHeader(String),

    /// The page declares a charset other than UTF-8.
    #[error("unsupported charset '{charset}' in {uri}")]
    UnsupportedCharset { uri: String, charset: String },

    /// Credentials needed to answer a challenge could not be obtained.
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

/// A `Set-Cookie` value that violates the domain/path rules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CookieError {
    #[error("malformed cookie: {0}")]
    Malformed(String),
}

/// A `WWW-Authenticate` challenge that cannot be parsed or used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("malformed challenge: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Credential store errors
// ---------------------------------------------------------------------------

/// Errors from the credential store.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No stored entry matches the protection domain.
    #[error("authentication information not found for {domain}")]
    NotFound { domain: String },

    /// A stored string sequence is not well formed.
    #[error("strings syntax error: {0}")]
    Syntax(String),

    /// The decryption tool exited unsuccessfully.
    #[error("decryption of '{path}' failed (exit {exit_code})")]
    DecryptFailed { path: String, exit_code: i32 },

    /// The decryption tool is not installed.
    #[error("credential tool not found: {0}")]
    BinaryNotFound(String),

    /// Generic I/O wrapper.
    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Repository accessor errors
// ---------------------------------------------------------------------------

/// Errors from repository accessors and the repository registry.
#[derive(Debug, Error)]
pub enum RepoError {
    /// No registered repository type carries this name.
    #[error("repository type not found: {0}")]
    UnknownType(String),

    /// No registered repository type recognises the page.
    #[error("unknown repository type : {0}")]
    NotApplicable(String),

    /// The page has no usable edit form.
    #[error("textarea not found in {0}")]
    FormNotFound(String),

    /// The edit form uses a method or encoding that cannot be submitted.
    #[error("unsupported form: {0}")]
    UnsupportedForm(String),

    /// The server rejected a commit.
    #[error("HTTP POST error: {status} at {uri}")]
    CommitRejected { uri: String, status: u16 },

    /// The accessor state could not be encoded for the working-area record.
    #[error("cannot encode accessor state: {0}")]
    State(#[from] serde_json::Error),

    /// Underlying web client error.
    #[error(transparent)]
    Web(#[from] WebError),
}

// ---------------------------------------------------------------------------
// Working area errors
// ---------------------------------------------------------------------------

/// Errors from the working area and its sync operations.
#[derive(Debug, Error)]
pub enum WorkAreaError {
    /// The file has no persisted record.
    #[error("not checked out: {}", .0.display())]
    NotCheckedOut(PathBuf),

    /// A record for this file already exists.
    #[error("local file already exists : {}", .0.display())]
    AlreadyCheckedOut(PathBuf),

    /// The persisted record could not be encoded or decoded.
    #[error("corrupt working-area record '{}': {detail}", .path.display())]
    Record { path: PathBuf, detail: String },

    /// The merge tool exited with a status other than 0 or 1.
    #[error("merge tool failed (exit {exit_code}): {stderr}")]
    MergeToolFailure { exit_code: i32, stderr: String },

    /// The diff tool exited with a status other than 0 or 1.
    #[error("diff tool failed (exit {exit_code})")]
    DiffToolFailure { exit_code: i32 },

    /// An external tool is not installed.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The commit precheck found items whose server text moved on.
    #[error("not up-to-date : {}", join_paths(.files))]
    NotUpToDate { files: Vec<PathBuf> },

    /// Underlying repository accessor error.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Generic I/O wrapper.
    #[error("working area I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_paths(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<WebError> for WorkAreaError {
    fn from(err: WebError) -> Self {
        WorkAreaError::Repo(RepoError::Web(err))
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = WebError::AuthChallengeUnresolved {
            uri: "https://wiki.example.org/edit".into(),
            status: 403,
        };
        assert_eq!(err.to_string(), "no handler for 403 in https://wiki.example.org/edit");

        let err = WorkAreaError::NotUpToDate {
            files: vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")],
        };
        assert_eq!(err.to_string(), "not up-to-date : a.txt, b.txt");

        let err = CookieError::Malformed("domain example.org".into());
        assert!(err.to_string().contains("example.org"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err = CredentialError::NotFound { domain: "TypeKey".into() };
        let core_err: CoreError = err.into();
        assert!(matches!(core_err, CoreError::Credential(_)));

        let web_err = WebError::InvalidUrl("::".into());
        let wa_err: WorkAreaError = web_err.into();
        assert!(matches!(wa_err, WorkAreaError::Repo(RepoError::Web(_))));
    }
}
