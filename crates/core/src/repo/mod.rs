//! Repository types: per-site adapters exposing the editable text of a page.
//!
//! A [`RepositoryType`] recognises a kind of site and builds a
//! [`RepositoryAccessor`] for one page. The accessor holds the text as the
//! server currently has it and knows how to push a replacement back.

pub mod textarea;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use url::Url;

use crate::errors::RepoError;
use crate::web::{AuthHandler, Page, ReauthChecker, WebClient};

pub use textarea::TextAreaType;

/// Access to the remote text of one tracked item.
#[async_trait]
pub trait RepositoryAccessor: Send + Sync {
    /// Stable URI the accessor was built from.
    fn uri(&self) -> &Url;

    /// Text as the server has it (after any local [`replace_text`](Self::replace_text)).
    fn current_text(&self) -> &str;

    fn replace_text(&mut self, text: &str);

    /// Push the current text to the server. Fails unless the server answers 2xx.
    async fn commit(&self, client: &mut WebClient) -> Result<(), RepoError>;

    /// A fresh accessor reflecting the server state now.
    async fn reload(&self, client: &mut WebClient) -> Result<Box<dyn RepositoryAccessor>, RepoError>;

    /// Suggested local file name, without extension.
    fn recommended_filename(&self) -> String;

    /// Opaque state persisted with the working-area record.
    fn state(&self) -> Result<serde_json::Value, RepoError>;

    /// Identifier of the edited field within the page, if the type has one.
    fn field(&self) -> Option<String> {
        None
    }
}

/// A kind of site (wiki engine, blog engine, generic form).
#[async_trait]
pub trait RepositoryType: Send + Sync {
    /// Tag stored in working-area records.
    fn name(&self) -> &str;

    /// Whether this type can handle `page`.
    fn applicable(&self, page: &Page) -> bool;

    /// URI to record for `page`; the final URI after redirects by default.
    fn stable_uri(&self, page: &Page) -> Url {
        page.uri.clone()
    }

    async fn make_accessor(
        &self,
        client: &mut WebClient,
        uri: &Url,
    ) -> Result<Box<dyn RepositoryAccessor>, RepoError>;

    /// Site-specific login handlers to append to the client.
    fn auth_handlers(&self) -> Vec<Arc<dyn AuthHandler>> {
        Vec::new()
    }

    /// Site-specific detectors for login pages served with status 200.
    fn reauth_checkers(&self) -> Vec<Arc<dyn ReauthChecker>> {
        Vec::new()
    }
}

/// Ordered set of repository types. Detection tries them in order.
#[derive(Default, Clone)]
pub struct RepositoryRegistry {
    types: Vec<Arc<dyn RepositoryType>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in types, generic `textarea` last.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextAreaType));
        registry
    }

    pub fn register(&mut self, repo_type: Arc<dyn RepositoryType>) {
        debug!(name = repo_type.name(), "repository type registered");
        self.types.push(repo_type);
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name()).collect()
    }

    pub fn find(&self, name: &str) -> Result<Arc<dyn RepositoryType>, RepoError> {
        self.types
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| RepoError::UnknownType(name.to_string()))
    }

    /// Add every type's checkers and handlers to `client`.
    pub fn install_auth(&self, client: &mut WebClient) {
        for repo_type in &self.types {
            for checker in repo_type.reauth_checkers() {
                client.add_checker(checker);
            }
            for handler in repo_type.auth_handlers() {
                client.add_handler(handler);
            }
        }
    }

    /// Read `url` and pick the repository type for it: the one named by
    /// `type_hint`, or the first applicable one.
    #[instrument(skip(self, client))]
    pub async fn detect(
        &self,
        client: &mut WebClient,
        url: &Url,
        type_hint: Option<&str>,
    ) -> Result<(Arc<dyn RepositoryType>, Url), RepoError> {
        let page = client.read(url).await?;
        let repo_type = match type_hint {
            Some(name) => self.find(name)?,
            None => self
                .types
                .iter()
                .find(|t| t.applicable(&page))
                .cloned()
                .ok_or_else(|| RepoError::NotApplicable(url.to_string()))?,
        };
        let stable_uri = repo_type.stable_uri(&page);
        info!(repository_type = repo_type.name(), uri = %stable_uri, "repository type detected");
        Ok((repo_type, stable_uri))
    }
}
