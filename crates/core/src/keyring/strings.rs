//! Whitespace-separated string sequences used by keyring comments and
//! encrypted payloads.
//!
//! Each element is either a bare token (`[0-9A-Za-z][!-~]*`) or a
//! double-quoted string holding printable ASCII plus the escapes `\"`,
//! `\\` and `\xHH`.

use crate::errors::CredentialError;
use crate::secret::SecretBuf;

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_bare(s: &str) -> bool {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(first) if first.is_ascii_alphanumeric() => {
            bytes[1..].iter().all(|b| (b'!'..=b'~').contains(b))
        }
        _ => false,
    }
}

/// Encode a sequence so that [`decode_strings`] gives it back unchanged.
pub fn encode_strings<S: AsRef<str>>(strings: &[S]) -> String {
    let mut out = String::new();
    for (i, s) in strings.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let s = s.as_ref();
        if is_bare(s) {
            out.push_str(s);
            continue;
        }
        out.push('"');
        for &b in s.as_bytes() {
            match b {
                b'"' | b'\\' => {
                    out.push('\\');
                    out.push(b as char);
                }
                b' '..=b'~' => out.push(b as char),
                _ => out.push_str(&format!("\\x{:02x}", b)),
            }
        }
        out.push('"');
    }
    out
}

/// Decode a sequence into ordinary strings.
pub fn decode_strings(input: &str) -> Result<Vec<String>, CredentialError> {
    decode_strings_safe(input.as_bytes())?
        .into_iter()
        .map(|buf| {
            buf.as_str()
                .map(str::to_string)
                .ok_or_else(|| CredentialError::Syntax(format!("non UTF-8 element in {:?}", input)))
        })
        .collect()
}

/// Decode a sequence into [`SecretBuf`]s.
///
/// No intermediate copy of any element is left behind: bytes are appended
/// straight into the result buffers, and on a syntax error every buffer
/// decoded so far is dropped (and so wiped) before returning.
pub fn decode_strings_safe(input: &[u8]) -> Result<Vec<SecretBuf>, CredentialError> {
    let mut result: Vec<SecretBuf> = Vec::new();
    let len = input.len();
    let mut i = 0;

    while i < len {
        let ch = input[i];
        i += 1;
        if is_space(ch) {
            continue;
        }
        if ch.is_ascii_alphanumeric() {
            let start = i - 1;
            while i < len && !is_space(input[i]) {
                if !(b'!'..=b'~').contains(&input[i]) {
                    return Err(syntax_error());
                }
                i += 1;
            }
            result.push(SecretBuf::from_slice(&input[start..i]));
            continue;
        }
        if ch != b'"' {
            return Err(syntax_error());
        }

        let mut s = SecretBuf::with_capacity(len - i);
        loop {
            if i == len {
                return Err(syntax_error());
            }
            let ch = input[i];
            i += 1;
            match ch {
                b'"' => break,
                b'\\' => {
                    let esc = *input.get(i).ok_or_else(syntax_error)?;
                    i += 1;
                    match esc {
                        b'"' | b'\\' => s.push(esc),
                        b'x' => {
                            let hi = input.get(i).and_then(|c| hex_value(*c));
                            let lo = input.get(i + 1).and_then(|c| hex_value(*c));
                            match (hi, lo) {
                                (Some(hi), Some(lo)) => s.push(hi * 16 + lo),
                                _ => return Err(syntax_error()),
                            }
                            i += 2;
                        }
                        _ => return Err(syntax_error()),
                    }
                }
                b' ' | b'!' | b'#'..=b'[' | b']'..=b'~' => s.push(ch),
                _ => return Err(syntax_error()),
            }
        }
        if i < len && !is_space(input[i]) {
            return Err(syntax_error());
        }
        result.push(s);
    }

    Ok(result)
}

fn hex_value(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

fn syntax_error() -> CredentialError {
    CredentialError::Syntax("strings syntax error".into())
}
