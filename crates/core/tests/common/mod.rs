//! Shared fixtures: a scripted in-process transport and a tiny wiki that
//! serves textarea edit forms.

#![allow(dead_code)]

use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

use formsync_core::errors::WebError;
use formsync_core::keyring::MemoryCredentialStore;
use formsync_core::web::{Request, Response, Transport};
use formsync_core::WebClient;

// ===========================================================================
// Helpers
// ===========================================================================

pub fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// A response to `request` with the given status, headers and body.
pub fn respond(request: &Request, status: u16, headers: &[(&str, &str)], body: &str) -> Response {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    Response {
        status: StatusCode::from_u16(status).unwrap(),
        headers: map,
        body: body.as_bytes().to_vec(),
        request: request.clone(),
    }
}

// ===========================================================================
// Scripted transport
// ===========================================================================

/// Answers every request with a closure and records what was sent.
pub struct ScriptedTransport<F> {
    handler: F,
    sent: Mutex<Vec<Request>>,
}

impl<F> ScriptedTransport<F>
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Arc<Self> {
        Arc::new(Self { handler, sent: Mutex::new(Vec::new()) })
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl<F> Transport for ScriptedTransport<F>
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    async fn send(&self, request: Request) -> Result<Response, WebError> {
        let response = (self.handler)(&request);
        self.sent.lock().unwrap().push(request);
        Ok(response)
    }
}

pub fn client_with<F>(transport: Arc<ScriptedTransport<F>>, store: MemoryCredentialStore) -> WebClient
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    WebClient::new(transport, Arc::new(store))
}

// ===========================================================================
// Fake wiki
// ===========================================================================

/// Serves `GET /edit/<page>` as an edit form and accepts `POST /edit/<page>`.
#[derive(Default)]
pub struct FakeWiki {
    pages: Mutex<HashMap<String, String>>,
    saves: Mutex<usize>,
    rewrite: Mutex<Option<fn(&str) -> String>>,
}

impl FakeWiki {
    pub const ROOT: &'static str = "http://wiki.test";

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn page_url(page: &str) -> Url {
        url(&format!("{}/edit/{}", Self::ROOT, page))
    }

    pub fn set(&self, page: &str, text: &str) {
        self.pages.lock().unwrap().insert(page.to_string(), text.to_string());
    }

    pub fn get(&self, page: &str) -> Option<String> {
        self.pages.lock().unwrap().get(page).cloned()
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }

    /// Make the server store `f(text)` instead of the submitted text.
    pub fn rewrite_on_save(&self, f: fn(&str) -> String) {
        *self.rewrite.lock().unwrap() = Some(f);
    }

    pub fn handle(&self, request: &Request) -> Response {
        let Some(page) = request.uri.path().strip_prefix("/edit/") else {
            return respond(request, 404, &[], "not found");
        };
        let page = page.to_string();

        if request.method == Method::POST {
            let body = request.body.clone().unwrap_or_default();
            let fields: HashMap<String, String> =
                url::form_urlencoded::parse(&body).into_owned().collect();
            let Some(text) = fields.get("body") else {
                return respond(request, 400, &[], "missing body");
            };
            let text = match *self.rewrite.lock().unwrap() {
                Some(f) => f(text),
                None => text.clone(),
            };
            self.set(&page, &text);
            *self.saves.lock().unwrap() += 1;
            let location = format!("/edit/{}", page);
            return respond(request, 302, &[("location", &location)], "");
        }

        let Some(text) = self.get(&page) else {
            return respond(request, 404, &[], "no such page");
        };
        let html = format!(
            "<html><body><h1>{page}</h1>\n\
             <form action=\"/edit/{page}\" method=\"post\">\n\
             <input type=\"hidden\" name=\"page\" value=\"{page}\">\n\
             <textarea name=\"body\" rows=\"20\">\n{text}</textarea>\n\
             <input type=\"submit\" name=\"save\" value=\"Save\">\n\
             </form></body></html>",
            page = page,
            text = html_escape::encode_text(&text),
        );
        respond(request, 200, &[("content-type", "text/html; charset=utf-8")], &html)
    }
}

/// A client whose transport is `wiki`.
pub fn wiki_client(wiki: &Arc<FakeWiki>) -> WebClient {
    let wiki = Arc::clone(wiki);
    let transport = ScriptedTransport::new(move |request: &Request| wiki.handle(request));
    client_with(transport, MemoryCredentialStore::new())
}
