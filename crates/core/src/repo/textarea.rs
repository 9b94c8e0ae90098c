//! Generic repository type: the first HTML form on the page that contains a
//! `<textarea>`.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::{RepositoryAccessor, RepositoryType};
use crate::errors::RepoError;
use crate::web::{Page, Request, WebClient};

static FORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form\s*>").expect("FORM_RE should compile"));
static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<input\b([^>]*)>|<textarea\b([^>]*)>(.*?)</textarea\s*>|<select\b([^>]*)>(.*?)</select\s*>",
    )
    .expect("CONTROL_RE should compile")
});
static OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<option\b([^>]*)>").expect("OPTION_RE should compile"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("ATTR_RE should compile")
});

/// Attributes of a start tag, names lowercased and values entity-decoded.
fn parse_attrs(tag: &str) -> Vec<(String, Option<String>)> {
    ATTR_RE
        .captures_iter(tag)
        .map(|caps| {
            let name = caps[1].to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned());
            (name, value)
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, Option<String>)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_deref().unwrap_or_default())
}

fn has_attr(attrs: &[(String, Option<String>)], name: &str) -> bool {
    attrs.iter().any(|(k, _)| k == name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlKind {
    Text,
    Hidden,
    Password,
    Submit,
    Checkbox { checked: bool },
    Radio { checked: bool },
    Textarea,
    Select { options: Vec<(String, bool)> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub name: String,
    pub value: String,
    #[serde(flatten)]
    pub kind: ControlKind,
}

/// An HTML form reduced to what is needed to resubmit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub action: String,
    pub method: String,
    pub enctype: String,
    pub controls: Vec<Control>,
}

impl Form {
    /// Extract a form from its start-tag attributes and inner HTML.
    pub fn parse(base: &Url, form_attrs: &str, inner: &str) -> Self {
        let attrs = parse_attrs(form_attrs);
        let action = match attr(&attrs, "action") {
            Some(a) if !a.is_empty() => base.join(a).map(|u| u.to_string()).unwrap_or_else(|_| base.to_string()),
            _ => base.to_string(),
        };
        let method = attr(&attrs, "method").unwrap_or("get").to_ascii_lowercase();
        let enctype = attr(&attrs, "enctype")
            .unwrap_or("application/x-www-form-urlencoded")
            .to_ascii_lowercase();

        let controls = CONTROL_RE.captures_iter(inner).filter_map(|caps| control(&caps)).collect();
        Self { action, method, enctype, controls }
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.controls.iter().find(|c| c.name == name).map(|c| c.value.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str) -> bool {
        match self.controls.iter_mut().find(|c| c.name == name) {
            Some(control) => {
                control.value = value.to_string();
                true
            }
            None => false,
        }
    }

    pub fn first_textarea(&self) -> Option<&str> {
        self.controls
            .iter()
            .find(|c| c.kind == ControlKind::Textarea)
            .map(|c| c.name.as_str())
    }

    /// The successful controls, in document order. A submit button is only
    /// included when it is the one named.
    pub fn successful(&self, submit: Option<&str>) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut has_submit = false;
        for control in &self.controls {
            match &control.kind {
                ControlKind::Submit => {
                    if !has_submit && submit == Some(control.name.as_str()) {
                        pairs.push((control.name.clone(), control.value.clone()));
                        has_submit = true;
                    }
                }
                ControlKind::Checkbox { checked } | ControlKind::Radio { checked } => {
                    if *checked {
                        pairs.push((control.name.clone(), control.value.clone()));
                    }
                }
                ControlKind::Text | ControlKind::Hidden | ControlKind::Password | ControlKind::Textarea => {
                    pairs.push((control.name.clone(), control.value.clone()));
                }
                ControlKind::Select { options } => {
                    for (option, selected) in options {
                        if *selected {
                            pairs.push((control.name.clone(), option.clone()));
                        }
                    }
                }
            }
        }
        pairs
    }

    pub fn make_request(&self, submit: Option<&str>) -> Result<Request, RepoError> {
        if self.enctype != "application/x-www-form-urlencoded" {
            return Err(RepoError::UnsupportedForm(format!("enctype {}", self.enctype)));
        }
        let mut action = Url::parse(&self.action)
            .map_err(|_| RepoError::UnsupportedForm(format!("action {}", self.action)))?;
        let pairs = self.successful(submit);
        match self.method.as_str() {
            "post" => Ok(Request::post_form(action, &pairs)?),
            "get" => {
                action.query_pairs_mut().extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                Ok(Request::get(action))
            }
            other => Err(RepoError::UnsupportedForm(format!("method {}", other))),
        }
    }
}

fn control(caps: &Captures<'_>) -> Option<Control> {
    if let Some(input) = caps.get(1) {
        let attrs = parse_attrs(input.as_str());
        let name = attr(&attrs, "name")?.to_string();
        if has_attr(&attrs, "disabled") {
            return None;
        }
        let value = attr(&attrs, "value").unwrap_or_default().to_string();
        let checked = has_attr(&attrs, "checked");
        let kind = match attr(&attrs, "type").unwrap_or("text").to_ascii_lowercase().as_str() {
            "text" => ControlKind::Text,
            "hidden" => ControlKind::Hidden,
            "password" => ControlKind::Password,
            "submit" => ControlKind::Submit,
            "checkbox" => ControlKind::Checkbox { checked },
            "radio" => ControlKind::Radio { checked },
            other => {
                debug!(name = %name, input_type = other, "skipping form input");
                return None;
            }
        };
        return Some(Control { name, value, kind });
    }

    if let Some(textarea) = caps.get(2) {
        let attrs = parse_attrs(textarea.as_str());
        let name = attr(&attrs, "name")?.to_string();
        if has_attr(&attrs, "disabled") {
            return None;
        }
        let raw = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        // A newline directly after the start tag is not part of the content.
        let raw = raw.strip_prefix("\r\n").or_else(|| raw.strip_prefix('\n')).unwrap_or(raw);
        let value = html_escape::decode_html_entities(raw).into_owned();
        return Some(Control { name, value, kind: ControlKind::Textarea });
    }

    let select = caps.get(4)?;
    let attrs = parse_attrs(select.as_str());
    let name = attr(&attrs, "name")?.to_string();
    if has_attr(&attrs, "disabled") {
        return None;
    }
    let inner = caps.get(5).map(|m| m.as_str()).unwrap_or_default();
    let options = OPTION_RE
        .captures_iter(inner)
        .filter_map(|opt| {
            let attrs = parse_attrs(&opt[1]);
            if has_attr(&attrs, "disabled") {
                return None;
            }
            let value = attr(&attrs, "value")?.to_string();
            Some((value, has_attr(&attrs, "selected")))
        })
        .collect();
    Some(Control { name, value: String::new(), kind: ControlKind::Select { options } })
}

/// The first form of `html` that has a textarea, with that textarea's name.
pub fn find_textarea_form(base: &Url, html: &str) -> Option<(Form, String)> {
    FORM_RE.captures_iter(html).find_map(|caps| {
        let form = Form::parse(base, &caps[1], &caps[2]);
        let name = form.first_textarea()?.to_string();
        Some((form, name))
    })
}

/// The `textarea` repository type.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextAreaType;

#[async_trait]
impl RepositoryType for TextAreaType {
    fn name(&self) -> &str {
        "textarea"
    }

    fn applicable(&self, page: &Page) -> bool {
        String::from_utf8_lossy(&page.body).to_ascii_lowercase().contains("<textarea")
    }

    #[instrument(skip(self, client), fields(uri = %uri))]
    async fn make_accessor(
        &self,
        client: &mut WebClient,
        uri: &Url,
    ) -> Result<Box<dyn RepositoryAccessor>, RepoError> {
        let page = client.read(uri).await?;
        let html = page.text()?;
        let (form, textarea_name) = find_textarea_form(&page.uri, &html)
            .ok_or_else(|| RepoError::FormNotFound(uri.to_string()))?;
        debug!(action = %form.action, textarea = %textarea_name, "edit form found");
        Ok(Box::new(TextAreaAccessor { uri: uri.clone(), form, textarea_name }))
    }
}

/// Accessor over one textarea form.
#[derive(Debug, Clone)]
pub struct TextAreaAccessor {
    uri: Url,
    form: Form,
    textarea_name: String,
}

#[async_trait]
impl RepositoryAccessor for TextAreaAccessor {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn current_text(&self) -> &str {
        self.form.value(&self.textarea_name).unwrap_or_default()
    }

    fn replace_text(&mut self, text: &str) {
        self.form.set(&self.textarea_name, text);
    }

    #[instrument(skip(self, client), fields(action = %self.form.action))]
    async fn commit(&self, client: &mut WebClient) -> Result<(), RepoError> {
        let request = self.form.make_request(None)?;
        let response = client.do_request(request).await?;
        if !response.status.is_success() {
            return Err(RepoError::CommitRejected {
                uri: response.uri().to_string(),
                status: response.status.as_u16(),
            });
        }
        Ok(())
    }

    async fn reload(&self, client: &mut WebClient) -> Result<Box<dyn RepositoryAccessor>, RepoError> {
        TextAreaType.make_accessor(client, &self.uri).await
    }

    fn recommended_filename(&self) -> String {
        match self.form.action.rfind('/') {
            Some(i) => self.form.action[i + 1..].to_string(),
            None => self.form.action.clone(),
        }
    }

    fn state(&self) -> Result<serde_json::Value, RepoError> {
        Ok(serde_json::to_value(&self.form)?)
    }

    fn field(&self) -> Option<String> {
        Some(self.textarea_name.clone())
    }
}
