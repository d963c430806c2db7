//! Client portal login.
//!
//! A client proves knowledge of a case reference and their last name, receives a
//! six-digit code out of band, and trades it for a bearer token. The token is
//! presented on every portal request and resolved by [`SessionGuard`].
//!
//! Session lifecycle: `NONE -> PENDING_CODE -> AUTHENTICATED -> EXPIRED`. A new
//! code request replaces the pending row for the case; authenticated rows for the
//! same case stay valid until their own expiry.

mod codes;
mod config;
mod flow;
mod guard;
mod rate_limit;

pub use codes::{generate_code, generate_session_token, hash_session_token};
pub use config::PortalConfig;
pub use flow::{CodeRequested, IssuedToken, PortalAuth};
pub use guard::{PORTAL_TOKEN_HEADER, PortalPrincipal, SessionGuard, extract_portal_token};
pub use rate_limit::{NoopRateLimiter, RateLimitDecision, StoreRateLimiter, VerifyRateLimiter};
