//! Configuration loading and validation for formsync.
//!
//! The configuration file is TOML and every section is optional; a missing
//! default file yields [`Config::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::web::client::{DEFAULT_MAX_AUTH_ROUNDS, DEFAULT_MAX_REDIRECTS};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub keyring: KeyringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            http: HttpConfig::default(),
            tools: ToolsConfig::default(),
            keyring: KeyringConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "warn".into()
}

// ---------------------------------------------------------------------------
// [http]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout. Unset means no timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    #[serde(default = "default_max_auth_rounds")]
    pub max_auth_rounds: usize,
}

impl HttpConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: None,
            max_redirects: default_max_redirects(),
            max_auth_rounds: default_max_auth_rounds(),
        }
    }
}

fn default_user_agent() -> String {
    format!("formsync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

fn default_max_auth_rounds() -> usize {
    DEFAULT_MAX_AUTH_ROUNDS
}

// ---------------------------------------------------------------------------
// [tools]
// ---------------------------------------------------------------------------

/// External programs, looked up on `$PATH` unless given as paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_diff3")]
    pub diff3: String,

    #[serde(default = "default_diff")]
    pub diff: String,

    #[serde(default = "default_gpg")]
    pub gpg: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { diff3: default_diff3(), diff: default_diff(), gpg: default_gpg() }
    }
}

fn default_diff3() -> String {
    "diff3".into()
}

fn default_diff() -> String {
    "diff".into()
}

fn default_gpg() -> String {
    "gpg".into()
}

// ---------------------------------------------------------------------------
// [keyring]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyringConfig {
    /// Directory of `*.asc` credential files; `~/.keyring` when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl KeyringConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => expand_home(dir),
            None => dirs::home_dir().unwrap_or_default().join(".keyring"),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().unwrap_or_default().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl Config {
    /// `~/.config/formsync/config.toml` (platform config directory).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("formsync").join("config.toml"))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load an explicit file (which must exist), or the default file if it
    /// exists, or fall back to defaults. The result is validated.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => {
                    debug!("no configuration file; using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.max_redirects == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.max_redirects".into(),
                detail: "must be > 0".into(),
            });
        }
        if self.http.max_auth_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.max_auth_rounds".into(),
                detail: "must be > 0".into(),
            });
        }
        if self.http.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "http.timeout_secs".into(),
                detail: "must be > 0 when set".into(),
            });
        }
        for (field, value) in [
            ("tools.diff3", &self.tools.diff3),
            ("tools.diff", &self.tools.diff),
            ("tools.gpg", &self.tools.gpg),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "tool name must not be empty".into(),
                });
            }
        }
        Ok(())
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# formsync configuration

log_level = "warn"

[http]
# user_agent = "formsync/0.1.0"
# timeout_secs = 60        # unset: no timeout
max_redirects = 20
max_auth_rounds = 8

[tools]
diff3 = "diff3"
diff = "diff"
gpg = "gpg"

[keyring]
# dir = "~/.keyring"
"#
    }
}
