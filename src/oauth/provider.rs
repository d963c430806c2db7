//! Identity provider client for the Microsoft identity platform (v2 endpoints)
//! and Microsoft Graph.
//!
//! Every request is bounded by the configured timeout. Transport failures,
//! non-2xx answers and malformed bodies all surface as `AuthError::Upstream`.

use async_trait::async_trait;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{Instrument, debug, info_span};

use super::config::OAuthConfig;
use crate::APP_USER_AGENT;
use crate::error::AuthError;

/// Tokens returned by the provider's token endpoint.
#[derive(Clone, Debug)]
pub struct TokenSet {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub scope: String,
    pub expires_in: i64,
}

/// Mailbox identity of the authorizing staff member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization-code grant with the PKCE verifier.
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &SecretString,
    ) -> Result<TokenSet, AuthError>;

    async fn fetch_profile(&self, access_token: &SecretString)
    -> Result<ProviderProfile, AuthError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    expires_in: i64,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphProfile {
    id: String,
    #[serde(default)]
    mail: Option<String>,
    #[serde(default)]
    user_principal_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct M365Provider {
    client: Client,
    config: OAuthConfig,
}

impl M365Provider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: OAuthConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client, config })
    }

    fn client_id(&self) -> Result<&str, AuthError> {
        self.config
            .client_id()
            .ok_or(AuthError::Configuration("m365 client id"))
    }

    async fn token_request(&self, form: Vec<(&str, &str)>) -> Result<TokenSet, AuthError> {
        let endpoint = self.config.token_endpoint();
        let span = info_span!("oauth.token", http.url = %endpoint);
        let response = self
            .client
            .post(&endpoint)
            .form(&form)
            .send()
            .instrument(span)
            .await
            .map_err(|err| transport_error("token", &err))?;

        let response = error_for_status(response, "token").await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| AuthError::upstream(format!("malformed token response: {err}")))?;
        if body.access_token.is_empty() {
            return Err(AuthError::upstream("token response without access_token"));
        }
        debug!(expires_in = body.expires_in, "token endpoint answered");

        Ok(TokenSet {
            access_token: SecretString::from(body.access_token),
            refresh_token: body.refresh_token.map(SecretString::from),
            scope: body.scope.unwrap_or_else(|| self.config.scopes().to_string()),
            expires_in: body.expires_in,
        })
    }
}

fn transport_error(what: &str, err: &reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::upstream(format!("{what} request timed out"))
    } else {
        AuthError::upstream(format!("{what} request failed: {err}"))
    }
}

async fn error_for_status(response: Response, what: &str) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = match response.json::<ErrorResponse>().await {
        Ok(body) => match body.error_description {
            Some(description) => format!("{}: {description}", body.error),
            None => body.error,
        },
        Err(_) => "no error body".to_string(),
    };
    Err(AuthError::upstream(format!("{what} endpoint returned {status} ({detail})")))
}

#[async_trait]
impl IdentityProvider for M365Provider {
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &SecretString,
    ) -> Result<TokenSet, AuthError> {
        let client_id = self.client_id()?;
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri()),
            ("client_id", client_id),
            ("code_verifier", verifier.expose_secret()),
            ("scope", self.config.scopes()),
        ];
        if let Some(secret) = self.config.client_secret() {
            form.push(("client_secret", secret.expose_secret()));
        }
        self.token_request(form).await
    }

    async fn fetch_profile(
        &self,
        access_token: &SecretString,
    ) -> Result<ProviderProfile, AuthError> {
        let endpoint = self.config.profile_endpoint();
        let span = info_span!("oauth.profile", http.url = %endpoint);
        let response = self
            .client
            .get(&endpoint)
            .bearer_auth(access_token.expose_secret())
            .send()
            .instrument(span)
            .await
            .map_err(|err| transport_error("profile", &err))?;

        let response = error_for_status(response, "profile").await?;
        let profile: GraphProfile = response
            .json()
            .await
            .map_err(|err| AuthError::upstream(format!("malformed profile response: {err}")))?;

        let email = profile
            .mail
            .filter(|mail| !mail.is_empty())
            .or(profile.user_principal_name)
            .ok_or_else(|| AuthError::upstream("profile response without mail"))?;
        let display_name = profile.display_name.unwrap_or_else(|| email.clone());
        Ok(ProviderProfile {
            id: profile.id,
            email,
            display_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use serde_json::json;
    use std::net::TcpListener;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn provider(server: &MockServer) -> Result<M365Provider> {
        let config = OAuthConfig::new()
            .with_client_id(Some("app-id".to_string()))
            .with_authority_url(server.uri())
            .with_graph_url(format!("{}/v1.0", server.uri()))
            .with_tenant("contoso".to_string())
            .with_timeout_seconds(1);
        M365Provider::new(config)
    }

    #[tokio::test]
    async fn exchange_code_posts_pkce_grant() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=the-verifier"))
            .and(body_string_contains("client_id=app-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "scope": "User.Read",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let tokens = provider(&server)?
            .exchange_code("auth-code", &SecretString::from("the-verifier".to_string()))
            .await?;
        assert_eq!(tokens.access_token.expose_secret(), "access-1");
        assert_eq!(
            tokens.refresh_token.as_ref().map(ExposeSecret::expose_secret),
            Some("refresh-1")
        );
        assert_eq!(tokens.expires_in, 3600);
        assert_eq!(tokens.scope, "User.Read");
        Ok(())
    }

    #[tokio::test]
    async fn provider_rejection_is_upstream_error() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "code expired"
            })))
            .mount(&server)
            .await;

        let result = provider(&server)?
            .exchange_code("auth-code", &SecretString::from("v".to_string()))
            .await;
        match result {
            Err(AuthError::Upstream(detail)) => assert!(detail.contains("invalid_grant")),
            other => bail!("expected upstream error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn slow_provider_times_out() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "late", "expires_in": 1 }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let result = provider(&server)?
            .exchange_code("auth-code", &SecretString::from("v".to_string()))
            .await;
        match result {
            Err(AuthError::Upstream(detail)) => assert!(detail.contains("timed out")),
            other => bail!("expected timeout, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn malformed_token_body_is_upstream_error() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = provider(&server)?
            .exchange_code("code", &SecretString::from("v".to_string()))
            .await;
        assert!(matches!(result, Err(AuthError::Upstream(_))));
        Ok(())
    }

    #[tokio::test]
    async fn profile_falls_back_to_user_principal_name() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ext-1",
                "mail": null,
                "userPrincipalName": "alex@firm.example",
                "displayName": "Alex Doe"
            })))
            .mount(&server)
            .await;

        let profile = provider(&server)?
            .fetch_profile(&SecretString::from("access-1".to_string()))
            .await?;
        assert_eq!(
            profile,
            ProviderProfile {
                id: "ext-1".to_string(),
                email: "alex@firm.example".to_string(),
                display_name: "Alex Doe".to_string(),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_client_id_is_configuration_error() -> Result<()> {
        let provider = M365Provider::new(OAuthConfig::new())?;
        let result = provider
            .exchange_code("code", &SecretString::from("v".to_string()))
            .await;
        assert!(matches!(result, Err(AuthError::Configuration(_))));
        Ok(())
    }
}
