//! Stateful authenticated web client.

pub mod agents;
pub mod auth;
pub mod challenge;
pub mod client;
pub mod cookie;
pub mod digest;
pub mod envelope;
pub mod transport;

pub use agents::{AuthAgents, BasicCredential};
pub use auth::{retry_of, AuthHandler, HttpAuthHandler, ReauthChecker};
pub use client::WebClient;
pub use cookie::{Cookie, CookieJar};
pub use digest::DigestAgent;
pub use envelope::{Page, Request, Response};
pub use transport::{ReqwestTransport, Transport};
