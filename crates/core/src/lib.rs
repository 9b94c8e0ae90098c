//! formsync core library.
//!
//! This crate provides the pieces behind the `formsync` command: a stateful
//! web client with cookie and HTTP authentication handling, a credential
//! store, repository types that expose the editable text of a web page, and
//! the working area that keeps local files in sync with those pages.

pub mod config;
pub mod errors;
pub mod keyring;
pub mod repo;
pub mod secret;
pub mod web;
pub mod workarea;

// Re-exports for convenience.
pub use config::Config;
pub use errors::CoreError;
pub use keyring::{CredentialStore, KeyRing, MemoryCredentialStore, ProtectionDomain};
pub use repo::{RepositoryAccessor, RepositoryRegistry, RepositoryType};
pub use secret::SecretBuf;
pub use web::WebClient;
pub use workarea::{CommitOutcome, ItemState, SyncSession, UpdateOutcome, WorkArea};
