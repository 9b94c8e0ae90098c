//! Request and response envelopes passed between the client, its
//! authentication agents and the transport.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::errors::WebError;

/// An HTTP request before it is handed to the transport.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, uri: Url) -> Self {
        Self { method, uri, headers: HeaderMap::new(), body: None }
    }

    pub fn get(uri: Url) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: Url, content_type: &str, body: Vec<u8>) -> Result<Self, WebError> {
        let mut request = Self::new(Method::POST, uri);
        request.set_header(CONTENT_TYPE, content_type)?;
        request.body = Some(body);
        Ok(request)
    }

    /// POST `pairs` as `application/x-www-form-urlencoded`.
    pub fn post_form<K, V>(uri: Url, pairs: &[(K, V)]) -> Result<Self, WebError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())))
            .finish();
        Self::post(uri, "application/x-www-form-urlencoded", body.into_bytes())
    }

    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<(), WebError> {
        let value =
            HeaderValue::from_str(value).map_err(|_| WebError::InvalidHeader(name.to_string()))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path plus query, as sent on the request line.
    pub fn request_uri(&self) -> String {
        match self.uri.query() {
            Some(query) => format!("{}?{}", self.uri.path(), query),
            None => self.uri.path().to_string(),
        }
    }
}

/// A response together with the request that produced it.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub request: Request,
}

impl Response {
    pub fn uri(&self) -> &Url {
        &self.request.uri
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of a repeatable header such as `Set-Cookie`.
    pub fn header_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers.get_all(name).iter().filter_map(|v| v.to_str().ok())
    }

    /// The `Location` target of a 301/302/303/307 response.
    pub fn redirect_target(&self) -> Option<&str> {
        match self.status.as_u16() {
            301 | 302 | 303 | 307 => self.headers.get(LOCATION).and_then(|v| v.to_str().ok()),
            _ => None,
        }
    }
}

/// The body of a successful `read`, with the final URI and headers kept for
/// charset detection and relative-link resolution.
#[derive(Debug, Clone)]
pub struct Page {
    pub uri: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Page {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `charset` parameter of `Content-Type`, lowercased.
    pub fn charset(&self) -> Option<String> {
        let content_type = self.header(CONTENT_TYPE.as_str())?;
        content_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
        })
    }

    /// Decode the body as UTF-8.
    pub fn text(&self) -> Result<String, WebError> {
        let charset = self.charset();
        if let Some(cs) = &charset {
            if !matches!(cs.as_str(), "utf-8" | "utf8" | "us-ascii") {
                return Err(WebError::UnsupportedCharset {
                    uri: self.uri.to_string(),
                    charset: cs.clone(),
                });
            }
        }
        String::from_utf8(self.body.clone()).map_err(|_| WebError::UnsupportedCharset {
            uri: self.uri.to_string(),
            charset: charset.unwrap_or_else(|| "undeclared".into()),
        })
    }
}

impl From<Response> for Page {
    fn from(response: Response) -> Self {
        Self {
            uri: response.request.uri,
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}
