//! Single-request HTTP transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client};
use tracing::{debug, instrument};

use super::envelope::{Request, Response};
use crate::errors::WebError;

/// Performs exactly one HTTP exchange: no redirects, no cookies, no retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, WebError>;
}

/// [`Transport`] backed by `reqwest` with rustls certificate verification.
///
/// Proxies configured through the usual environment variables are honoured.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self, WebError> {
        let mut builder = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self { client: builder.build()? })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, uri = %request.uri))]
    async fn send(&self, request: Request) -> Result<Response, WebError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.uri.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?.to_vec();
        debug!(status = status.as_u16(), bytes = body.len(), "response received");

        Ok(Response { status, headers, body, request })
    }
}
