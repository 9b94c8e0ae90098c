//! Cookies with RFC 2109 domain and path rules.
//!
//! `Max-Age` and `Expires` are accepted as attributes but never consulted:
//! a cookie lives until it is overwritten or the jar is dropped.

use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::{debug, warn};
use url::{Host, Url};

use crate::errors::CookieError;

/// `name[=value]` followed by `;` (next attribute) or `,` (next cookie).
/// Expiry dates contain a comma, so both the RFC 850 and RFC 1123 forms are
/// matched before the generic value.
static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"([^=;,]+)\s*(?:=\s*([A-Za-z]{3}, \d\d[- ][A-Za-z]{3}[- ]\d\d(?:\d\d+)? \d\d:\d\d:\d\d GMT|"[^"]*"|[^;,]*)\s*)?([;,])?"#,
    )
    .expect("PAIR_RE should compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum DomainMatch {
    /// Host must equal the domain.
    Exact(String),
    /// Host must end with the domain (which starts with a dot).
    Suffix(String),
}

impl DomainMatch {
    fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(domain) => host.eq_ignore_ascii_case(domain),
            Self::Suffix(suffix) => ends_with_ignore_case(host, suffix),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PathMatch {
    prefix: String,
    /// Require `/` or end of path after the prefix.
    boundary: bool,
}

impl PathMatch {
    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => !self.boundary || rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

fn ends_with_ignore_case(s: &str, suffix: &str) -> bool {
    s.len() >= suffix.len()
        && s.is_char_boundary(s.len() - suffix.len())
        && s[s.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Directory portion of a request path: everything up to the last `/`.
pub(crate) fn directory_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    }
}

/// One cookie as received in `Set-Cookie`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub domain: String,
    domain_match: DomainMatch,
    pub path: String,
    path_match: PathMatch,
    pub name: String,
    pub value: Option<String>,
    pub secure: bool,
}

impl Cookie {
    /// Split a `Set-Cookie` field into cookies, validating each against the
    /// request URI. Invalid cookies come back as errors in place.
    pub fn parse(request_uri: &Url, field_value: &str) -> Vec<Result<Cookie, CookieError>> {
        split(field_value)
            .into_iter()
            .map(|pairs| Cookie::from_pairs(request_uri, pairs))
            .collect()
    }

    fn from_pairs(
        request_uri: &Url,
        pairs: Vec<(String, Option<String>)>,
    ) -> Result<Cookie, CookieError> {
        let mut pairs = pairs.into_iter();
        let (name, value) = pairs
            .next()
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| CookieError::Malformed("cookie without a name".into()))?;
        let attrs: Vec<(String, Option<String>)> = pairs.collect();
        let attr = |key: &str| {
            attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone().unwrap_or_default())
        };

        let host = request_uri.host_str().unwrap_or_default();
        let is_ip = matches!(request_uri.host(), Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)));
        let (domain, domain_match) = match attr("domain") {
            Some(cookie_domain) if !is_ip => {
                if !cookie_domain.starts_with('.') {
                    return Err(CookieError::Malformed(format!(
                        "cookie domain must start with a dot: {}",
                        cookie_domain
                    )));
                }
                if cookie_domain.matches('.').count() < 2 {
                    return Err(CookieError::Malformed(format!(
                        "cookie domain needs more dots: {}",
                        cookie_domain
                    )));
                }
                if !ends_with_ignore_case(host, &cookie_domain) {
                    return Err(CookieError::Malformed(format!(
                        "cookie domain {} is not a suffix of {}",
                        cookie_domain, host
                    )));
                }
                (cookie_domain.clone(), DomainMatch::Suffix(cookie_domain))
            }
            _ => (host.to_string(), DomainMatch::Exact(host.to_string())),
        };

        let request_path = request_uri.path();
        let (path, path_match) = match attr("path") {
            Some(cookie_path) => {
                let path_match = PathMatch {
                    boundary: !cookie_path.ends_with('/'),
                    prefix: cookie_path.clone(),
                };
                if !path_match.matches(request_path) {
                    return Err(CookieError::Malformed(format!(
                        "cookie path {} is not a prefix of {}",
                        cookie_path, request_path
                    )));
                }
                (cookie_path, path_match)
            }
            None => {
                let dir = directory_of(request_path).to_string();
                (dir.clone(), PathMatch { prefix: dir, boundary: false })
            }
        };

        let secure = attrs.iter().any(|(k, _)| k.eq_ignore_ascii_case("secure"));

        Ok(Cookie { domain, domain_match, path, path_match, name, value, secure })
    }

    /// Whether this cookie should be sent with a request to `uri`.
    pub fn matches(&self, uri: &Url) -> bool {
        let host = uri.host_str().unwrap_or_default();
        let path = if uri.path().is_empty() { "/" } else { uri.path() };
        self.domain_match.matches(host)
            && self.path_match.matches(path)
            && (!self.secure || uri.scheme() == "https")
    }

    pub fn encode_cookie_field(&self) -> String {
        format!("{}={}", self.name, self.value.as_deref().unwrap_or_default())
    }
}

/// Split a field into per-cookie attribute lists.
fn split(field_value: &str) -> Vec<Vec<(String, Option<String>)>> {
    let mut cookies: Vec<Vec<(String, Option<String>)>> = vec![Vec::new()];
    for caps in PAIR_RE.captures_iter(field_value) {
        let attr = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let value = caps.get(2).map(|m| m.as_str().trim_end().to_string());
        if let Some(current) = cookies.last_mut() {
            current.push((attr.to_string(), value));
        }
        if caps.get(3).is_some_and(|m| m.as_str() == ",") {
            cookies.push(Vec::new());
        }
    }
    if cookies.last().is_some_and(|c| c.is_empty()) {
        cookies.pop();
    }
    cookies
}

/// Cookies keyed by (domain, path, name), kept in arrival order.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn insert(&mut self, cookie: Cookie) {
        let existing = self.cookies.iter_mut().find(|c| {
            c.domain == cookie.domain && c.path == cookie.path && c.name == cookie.name
        });
        match existing {
            Some(slot) => *slot = cookie,
            None => self.cookies.push(cookie),
        }
    }

    /// Store every valid cookie of a `Set-Cookie` field; invalid ones are
    /// logged and dropped.
    pub fn update(&mut self, request_uri: &Url, set_cookie: &str) {
        for parsed in Cookie::parse(request_uri, set_cookie) {
            match parsed {
                Ok(cookie) => {
                    debug!(domain = %cookie.domain, path = %cookie.path, name = %cookie.name, "cookie stored");
                    self.insert(cookie);
                }
                Err(e) => warn!(uri = %request_uri, error = %e, "discarding cookie"),
            }
        }
    }

    /// `Cookie` header value for a request to `uri`, if any cookie matches.
    pub fn cookie_header(&self, uri: &Url) -> Option<String> {
        let fields: Vec<String> = self
            .cookies
            .iter()
            .filter(|c| c.matches(uri))
            .map(Cookie::encode_cookie_field)
            .collect();
        (!fields.is_empty()).then(|| fields.join("; "))
    }
}
