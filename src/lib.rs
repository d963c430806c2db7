//! # Caseward (client portal and staff delegated authentication)
//!
//! `caseward` authenticates two populations against one case-management store.
//!
//! ## Client portal
//!
//! A client supplies a case reference and their last name and receives a
//! six-digit one-time code (valid for 10 minutes) through a [`notify::Notifier`].
//! Exchanging the code returns an opaque bearer token (24 hours, or 30 days with
//! `rememberMe`). Code consumption is a single conditional update, so concurrent
//! verifications of the same code yield exactly one token. Tokens are stored as
//! SHA-256 digests and resolved on every portal request by
//! [`portal::SessionGuard`].
//!
//! ## Staff delegated authorization
//!
//! Staff connect their Microsoft 365 mailbox through the authorization-code flow
//! with PKCE (`S256`). The server keeps the verifier next to a random `state`;
//! the callback consumes the state exactly once before exchanging the code.
//!
//! ## Authorization
//!
//! Staff roles map to a fixed permission set ([`rbac`]). Unknown roles are an
//! error, never an empty grant.

pub mod api;
pub mod cli;
pub mod error;
pub mod notify;
pub mod oauth;
pub mod portal;
pub mod rbac;
pub mod store;
pub mod sweep;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
