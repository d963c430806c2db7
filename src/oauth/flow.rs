//! Delegated authorization for staff mailboxes.
//!
//! Flow Overview:
//! 1) `initiate_authorization` stores `{state -> member, verifier, redirect}` and
//!    returns the provider URL carrying the S256 challenge.
//! 2) `complete_authorization` consumes the state row atomically, exchanges the code
//!    with the verifier, reads the profile, and only then upserts the token row.
//! 3) `connection_status` reports metadata; raw tokens never leave this module.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::config::OAuthConfig;
use super::pkce::{CHALLENGE_METHOD, generate_pkce, generate_state};
use super::provider::IdentityProvider;
use crate::error::AuthError;
use crate::store::{NewOAuthState, NewStaffTokens, SharedStore};

/// Connection metadata for one staff member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    fn disconnected() -> Self {
        Self {
            connected: false,
            email: None,
            display_name: None,
            expires_at: None,
        }
    }
}

/// Parameters the provider sends back to the redirect URI.
#[derive(Clone, Debug, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Clone)]
pub struct DelegatedAuth {
    store: SharedStore,
    provider: Arc<dyn IdentityProvider>,
    config: OAuthConfig,
}

impl DelegatedAuth {
    #[must_use]
    pub fn new(store: SharedStore, provider: Arc<dyn IdentityProvider>, config: OAuthConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the provider authorization URL for a staff member.
    ///
    /// # Errors
    /// `Configuration` without a client id, `NotFound` for an unknown member,
    /// `Validation` for a redirect outside this deployment, `Datastore` on storage failure.
    pub async fn initiate_authorization(
        &self,
        staff_member_id: Uuid,
        redirect_after: Option<&str>,
    ) -> Result<Url, AuthError> {
        let client_id = self
            .config
            .client_id()
            .ok_or(AuthError::Configuration("m365 client id"))?;
        let redirect_after = self.sanitize_redirect(redirect_after)?;

        let member = self
            .store
            .get_staff_member(staff_member_id)
            .await
            .map_err(AuthError::datastore)?
            .ok_or(AuthError::NotFound("staff member"))?;

        let pkce = generate_pkce().map_err(AuthError::datastore)?;
        let state = generate_state().map_err(AuthError::datastore)?;
        self.store
            .insert_oauth_state(&NewOAuthState {
                state: state.clone(),
                staff_member_id: member.id,
                code_verifier: pkce.verifier,
                redirect_after,
            })
            .await
            .map_err(AuthError::datastore)?;

        let url = Url::parse_with_params(
            &self.config.authorize_endpoint(),
            &[
                ("client_id", client_id),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri()),
                ("scope", self.config.scopes()),
                ("state", state.as_str()),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", CHALLENGE_METHOD),
                ("response_mode", "query"),
                ("login_hint", member.email.as_str()),
            ],
        )
        .map_err(|_| AuthError::Configuration("m365 authority url"))?;

        info!(staff_member_id = %member.id, "m365 authorization initiated");
        Ok(url)
    }

    /// Finish the authorization-code exchange; returns the post-login destination.
    ///
    /// # Errors
    /// `Unauthorized` for a missing, unknown, expired or replayed state; `Upstream`
    /// when the provider reports an error or the exchange fails; `Datastore` on
    /// storage failure.
    pub async fn complete_authorization(&self, params: CallbackParams) -> Result<String, AuthError> {
        let state = params
            .state
            .as_deref()
            .map(str::trim)
            .filter(|state| !state.is_empty())
            .ok_or(AuthError::Unauthorized)?;

        let record = self
            .store
            .take_oauth_state(state, self.config.state_ttl())
            .await
            .map_err(AuthError::datastore)?
            .ok_or(AuthError::Unauthorized)?;

        if let Some(error) = params.error {
            warn!(staff_member_id = %record.staff_member_id, "provider returned an authorization error");
            let detail = params
                .error_description
                .map_or_else(|| error.clone(), |description| format!("{error}: {description}"));
            return Err(AuthError::upstream(detail));
        }

        let code = params
            .code
            .filter(|code| !code.trim().is_empty())
            .ok_or(AuthError::Validation("authorization code is required"))?;

        let tokens = self
            .provider
            .exchange_code(&code, &record.code_verifier)
            .await?;
        let profile = self.provider.fetch_profile(&tokens.access_token).await?;

        self.store
            .upsert_staff_tokens(&NewStaffTokens {
                staff_member_id: record.staff_member_id,
                external_user_id: profile.id,
                email: profile.email,
                display_name: profile.display_name,
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                scope: tokens.scope,
                expires_in_seconds: tokens.expires_in,
            })
            .await
            .map_err(AuthError::datastore)?;

        info!(staff_member_id = %record.staff_member_id, "m365 mailbox connected");
        Ok(record.redirect_after)
    }

    /// Connection metadata for a member; absent rows report `connected: false`.
    pub async fn connection_status(
        &self,
        staff_member_id: Uuid,
    ) -> Result<ConnectionStatus, AuthError> {
        let tokens = self
            .store
            .get_staff_tokens(staff_member_id)
            .await
            .map_err(AuthError::datastore)?;
        Ok(tokens.map_or_else(ConnectionStatus::disconnected, |tokens| ConnectionStatus {
            connected: true,
            email: Some(tokens.email),
            display_name: Some(tokens.display_name),
            expires_at: Some(tokens.expires_at),
        }))
    }

    /// Accept relative paths, or absolute URLs on the configured frontend origin.
    fn sanitize_redirect(&self, redirect: Option<&str>) -> Result<String, AuthError> {
        let redirect = redirect.map(str::trim).filter(|value| !value.is_empty());
        let frontend = self.config.frontend_base_url();
        let Some(redirect) = redirect else {
            return Ok(frontend.map_or_else(|| "/".to_string(), |base| format!("{base}/")));
        };

        if redirect.starts_with('/') && !redirect.starts_with("//") && !redirect.contains('\\') {
            return Ok(match frontend {
                Some(base) => format!("{base}{redirect}"),
                None => redirect.to_string(),
            });
        }

        let target = Url::parse(redirect).map_err(|_| AuthError::Validation("invalid redirect"))?;
        let allowed = frontend
            .and_then(|base| Url::parse(base).ok())
            .is_some_and(|base| base.origin() == target.origin());
        if allowed {
            Ok(target.to_string())
        } else {
            Err(AuthError::Validation("redirect must stay on this site"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::pkce::challenge_for;
    use crate::oauth::provider::{ProviderProfile, TokenSet};
    use crate::store::{CredentialStore, MemoryStore};
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use secrecy::{ExposeSecret, SecretString};
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeProvider {
        fail_exchange: bool,
        verifiers: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn exchange_code(
            &self,
            code: &str,
            verifier: &SecretString,
        ) -> Result<TokenSet, AuthError> {
            if self.fail_exchange {
                return Err(AuthError::upstream("invalid_grant"));
            }
            self.verifiers
                .lock()
                .await
                .push(verifier.expose_secret().to_string());
            Ok(TokenSet {
                access_token: SecretString::from(format!("access-{code}")),
                refresh_token: Some(SecretString::from("refresh-1".to_string())),
                scope: "User.Read".to_string(),
                expires_in: 3600,
            })
        }

        async fn fetch_profile(
            &self,
            _access_token: &SecretString,
        ) -> Result<ProviderProfile, AuthError> {
            Ok(ProviderProfile {
                id: "ext-1".to_string(),
                email: "alex@firm.example".to_string(),
                display_name: "Alex Doe".to_string(),
            })
        }
    }

    fn config() -> OAuthConfig {
        OAuthConfig::new()
            .with_client_id(Some("app-id".to_string()))
            .with_redirect_uri("https://api.firm.example/auth/m365/callback".to_string())
            .with_frontend_base_url(Some("https://app.firm.example".to_string()))
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[tokio::test]
    async fn authorize_url_carries_pkce_and_login_hint() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let member = store
            .add_staff_member("Alex Doe", "alex@firm.example", "attorney")
            .await;
        let auth = DelegatedAuth::new(store.clone(), Arc::new(FakeProvider::default()), config());

        let url = auth
            .initiate_authorization(member.id, Some("/inbox"))
            .await?;
        let params = query(&url);
        assert_eq!(params["client_id"], "app-id");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["response_mode"], "query");
        assert_eq!(params["login_hint"], "alex@firm.example");
        assert_eq!(
            params["redirect_uri"],
            "https://api.firm.example/auth/m365/callback"
        );

        let record = store
            .take_oauth_state(&params["state"], Duration::from_secs(600))
            .await?
            .context("state stored")?;
        assert_eq!(record.staff_member_id, member.id);
        assert_eq!(record.redirect_after, "https://app.firm.example/inbox");
        assert_eq!(
            challenge_for(record.code_verifier.expose_secret()),
            params["code_challenge"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_client_id_and_unknown_member() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let unconfigured =
            DelegatedAuth::new(store.clone(), Arc::new(FakeProvider::default()), OAuthConfig::new());
        assert!(matches!(
            unconfigured.initiate_authorization(Uuid::new_v4(), None).await,
            Err(AuthError::Configuration(_))
        ));

        let auth = DelegatedAuth::new(store, Arc::new(FakeProvider::default()), config());
        assert!(matches!(
            auth.initiate_authorization(Uuid::new_v4(), None).await,
            Err(AuthError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn open_redirects_are_rejected() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let member = store
            .add_staff_member("Alex Doe", "alex@firm.example", "attorney")
            .await;
        let auth = DelegatedAuth::new(store, Arc::new(FakeProvider::default()), config());
        for target in ["//evil.example/x", "https://evil.example/", "javascript:alert(1)"] {
            assert!(matches!(
                auth.initiate_authorization(member.id, Some(target)).await,
                Err(AuthError::Validation(_))
            ));
        }
        assert!(
            auth.initiate_authorization(member.id, Some("https://app.firm.example/settings"))
                .await
                .is_ok()
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_initiations_yield_distinct_states() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let member = store
            .add_staff_member("Alex Doe", "alex@firm.example", "attorney")
            .await;
        let auth = DelegatedAuth::new(store.clone(), Arc::new(FakeProvider::default()), config());

        let mut handles = Vec::with_capacity(1_000);
        for _ in 0..1_000 {
            let auth = auth.clone();
            handles.push(tokio::spawn(async move {
                auth.initiate_authorization(member.id, None).await
            }));
        }
        let mut states = HashSet::new();
        for handle in handles {
            let url = handle.await??;
            states.insert(query(&url)["state"].clone());
        }
        assert_eq!(states.len(), 1_000);
        assert_eq!(store.oauth_state_count().await, 1_000);
        Ok(())
    }

    #[tokio::test]
    async fn callback_stores_tokens_and_rejects_replay() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let member = store
            .add_staff_member("Alex Doe", "alex@firm.example", "attorney")
            .await;
        let provider = Arc::new(FakeProvider::default());
        let auth = DelegatedAuth::new(store.clone(), provider.clone(), config());

        let url = auth.initiate_authorization(member.id, Some("/done")).await?;
        let state = query(&url)["state"].clone();
        let params = CallbackParams {
            code: Some("abc".to_string()),
            state: Some(state),
            ..CallbackParams::default()
        };

        let redirect = auth.complete_authorization(params.clone()).await?;
        assert_eq!(redirect, "https://app.firm.example/done");
        assert_eq!(provider.verifiers.lock().await.len(), 1);

        let status = auth.connection_status(member.id).await?;
        assert!(status.connected);
        assert_eq!(status.email.as_deref(), Some("alex@firm.example"));
        assert_eq!(status.display_name.as_deref(), Some("Alex Doe"));

        assert!(matches!(
            auth.complete_authorization(params).await,
            Err(AuthError::Unauthorized)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn expired_or_unknown_state_is_unauthorized() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.freeze_at(Utc::now()).await;
        let member = store
            .add_staff_member("Alex Doe", "alex@firm.example", "attorney")
            .await;
        let auth = DelegatedAuth::new(store.clone(), Arc::new(FakeProvider::default()), config());

        let url = auth.initiate_authorization(member.id, None).await?;
        store.advance(Duration::from_secs(601)).await;
        let result = auth
            .complete_authorization(CallbackParams {
                code: Some("abc".to_string()),
                state: Some(query(&url)["state"].clone()),
                ..CallbackParams::default()
            })
            .await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));

        let result = auth.complete_authorization(CallbackParams::default()).await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));
        Ok(())
    }

    #[tokio::test]
    async fn failed_exchange_leaves_tokens_untouched() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let member = store
            .add_staff_member("Alex Doe", "alex@firm.example", "attorney")
            .await;
        let working = DelegatedAuth::new(store.clone(), Arc::new(FakeProvider::default()), config());
        let url = working.initiate_authorization(member.id, None).await?;
        working
            .complete_authorization(CallbackParams {
                code: Some("first".to_string()),
                state: Some(query(&url)["state"].clone()),
                ..CallbackParams::default()
            })
            .await?;
        let before = store
            .get_staff_tokens(member.id)
            .await?
            .context("tokens stored")?;

        let failing = DelegatedAuth::new(
            store.clone(),
            Arc::new(FakeProvider {
                fail_exchange: true,
                ..FakeProvider::default()
            }),
            config(),
        );
        let url = failing.initiate_authorization(member.id, None).await?;
        let result = failing
            .complete_authorization(CallbackParams {
                code: Some("second".to_string()),
                state: Some(query(&url)["state"].clone()),
                ..CallbackParams::default()
            })
            .await;
        assert!(matches!(result, Err(AuthError::Upstream(_))));

        let after = store
            .get_staff_tokens(member.id)
            .await?
            .context("tokens still stored")?;
        assert_eq!(
            after.access_token.expose_secret(),
            before.access_token.expose_secret()
        );
        assert_eq!(after.updated_at, before.updated_at);
        Ok(())
    }

    #[tokio::test]
    async fn provider_error_parameter_consumes_state() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let member = store
            .add_staff_member("Alex Doe", "alex@firm.example", "attorney")
            .await;
        let auth = DelegatedAuth::new(store.clone(), Arc::new(FakeProvider::default()), config());
        let url = auth.initiate_authorization(member.id, None).await?;

        let result = auth
            .complete_authorization(CallbackParams {
                state: Some(query(&url)["state"].clone()),
                error: Some("access_denied".to_string()),
                ..CallbackParams::default()
            })
            .await;
        assert!(matches!(result, Err(AuthError::Upstream(_))));
        assert_eq!(store.oauth_state_count().await, 0);
        assert!(!auth.connection_status(member.id).await?.connected);
        Ok(())
    }
}
