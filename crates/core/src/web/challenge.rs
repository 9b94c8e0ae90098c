//! `WWW-Authenticate` parsing (RFC 2617):
//!
//! ```text
//! challenge  = auth-scheme 1*SP 1#auth-param
//! auth-param = token "=" ( token | quoted-string )
//! ```

use crate::errors::ChallengeError;

/// One authentication challenge. The scheme is lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: Vec<(String, String)>,
}

impl Challenge {
    /// Parameter lookup; names are case-insensitive.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Relative strength of supported schemes. Unknown schemes are unsupported.
pub fn scheme_strength(scheme: &str) -> Option<u8> {
    match scheme {
        "basic" => Some(1),
        "digest" => Some(2),
        _ => None,
    }
}

/// Supported challenges, strongest first; equal strengths keep header order.
pub fn by_strength(challenges: Vec<Challenge>) -> Vec<Challenge> {
    let mut supported: Vec<Challenge> = challenges
        .into_iter()
        .filter(|c| scheme_strength(&c.scheme).is_some())
        .collect();
    supported.sort_by_key(|c| std::cmp::Reverse(scheme_strength(&c.scheme)));
    supported
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_token_char)
}

/// Split on commas that are outside quoted strings.
fn split_items(header: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in header.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                items.push(header[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(header[start..].trim());
    items
}

/// Parse `token=value`, unquoting a quoted-string value.
fn parse_param(item: &str) -> Result<(String, String), ChallengeError> {
    let malformed = || ChallengeError::Malformed(format!("bad auth-param: {}", item));
    let (key, value) = item.split_once('=').ok_or_else(malformed)?;
    let key = key.trim_end();
    if !is_token(key) {
        return Err(malformed());
    }
    let value = value.trim_start();

    let Some(quoted) = value.strip_prefix('"') else {
        if value.chars().all(is_token_char) {
            return Ok((key.to_string(), value.to_string()));
        }
        return Err(malformed());
    };

    let mut out = String::new();
    let mut chars = quoted.chars();
    loop {
        match chars.next() {
            Some('"') => break,
            Some('\\') => out.push(chars.next().ok_or_else(malformed)?),
            Some(c) if c == '\t' || c == '\r' || c == '\n' || (' '..='~').contains(&c) => out.push(c),
            _ => return Err(malformed()),
        }
    }
    if !chars.as_str().is_empty() {
        return Err(malformed());
    }
    Ok((key.to_string(), out))
}

struct Pending {
    scheme: String,
    params: Vec<(String, String)>,
    error: Option<ChallengeError>,
}

impl Pending {
    fn add(&mut self, item: &str) {
        if self.error.is_some() {
            return;
        }
        match parse_param(item) {
            Ok((k, v)) => {
                if self.params.iter().any(|(existing, _)| existing.eq_ignore_ascii_case(&k)) {
                    self.error = Some(ChallengeError::Malformed(format!(
                        "duplicate parameter '{}' in {} challenge",
                        k, self.scheme
                    )));
                } else {
                    self.params.push((k, v));
                }
            }
            Err(e) => self.error = Some(e),
        }
    }

    fn finish(self) -> Result<Challenge, ChallengeError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.params.is_empty() {
            return Err(ChallengeError::Malformed(format!(
                "{} challenge without parameters",
                self.scheme
            )));
        }
        Ok(Challenge { scheme: self.scheme, params: self.params })
    }
}

/// Parse a `WWW-Authenticate` field into its challenges. A malformed
/// challenge is returned as an error in place; the others are unaffected.
pub fn parse_challenges(header: &str) -> Vec<Result<Challenge, ChallengeError>> {
    let mut results = Vec::new();
    let mut current: Option<Pending> = None;

    for item in split_items(header) {
        if item.is_empty() {
            continue;
        }
        let starts_challenge = match item.split_once(|c: char| c == ' ' || c == '\t') {
            Some((head, rest)) => is_token(head) && !rest.trim_start().starts_with('='),
            None => is_token(item),
        };

        if starts_challenge {
            if let Some(done) = current.take() {
                results.push(done.finish());
            }
            let (scheme, rest) = item
                .split_once(|c: char| c == ' ' || c == '\t')
                .unwrap_or((item, ""));
            let mut pending = Pending {
                scheme: scheme.to_ascii_lowercase(),
                params: Vec::new(),
                error: None,
            };
            let rest = rest.trim();
            if !rest.is_empty() {
                pending.add(rest);
            }
            current = Some(pending);
        } else {
            match current.as_mut() {
                Some(pending) => pending.add(item),
                None => results.push(Err(ChallengeError::Malformed(format!(
                    "auth-param before any scheme: {}",
                    item
                )))),
            }
        }
    }
    if let Some(done) = current {
        results.push(done.finish());
    }
    results
}
