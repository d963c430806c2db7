//! Staff delegated authorization against Microsoft 365 (authorization code + PKCE).

mod config;
mod flow;
mod pkce;
mod provider;

pub use config::OAuthConfig;
pub use flow::{CallbackParams, ConnectionStatus, DelegatedAuth};
pub use pkce::{CHALLENGE_METHOD, PkcePair, challenge_for, generate_pkce, generate_state};
pub use provider::{IdentityProvider, M365Provider, ProviderProfile, TokenSet};
