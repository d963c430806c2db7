use secrecy::SecretString;
use std::time::Duration;

const DEFAULT_TENANT: &str = "common";
const DEFAULT_SCOPES: &str = "offline_access User.Read Mail.ReadWrite Mail.Send";
const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/auth/m365/callback";
const DEFAULT_STATE_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Microsoft 365 delegated authorization settings.
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    tenant: String,
    redirect_uri: String,
    scopes: String,
    authority_url: String,
    graph_url: String,
    frontend_base_url: Option<String>,
    state_ttl: Duration,
    timeout: Duration,
}

impl OAuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            tenant: DEFAULT_TENANT.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.to_string(),
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            frontend_base_url: None,
            state_ttl: Duration::from_secs(DEFAULT_STATE_TTL_SECONDS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id.filter(|value| !value.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_client_secret(mut self, client_secret: Option<SecretString>) -> Self {
        self.client_secret = client_secret;
        self
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant: String) -> Self {
        self.tenant = tenant;
        self
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: String) -> Self {
        self.redirect_uri = redirect_uri;
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: String) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_authority_url(mut self, url: String) -> Self {
        self.authority_url = url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_graph_url(mut self, url: String) -> Self {
        self.graph_url = url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_frontend_base_url(mut self, url: Option<String>) -> Self {
        self.frontend_base_url = url.map(|value| value.trim_end_matches('/').to_string());
        self
    }

    #[must_use]
    pub fn with_state_ttl_seconds(mut self, seconds: u64) -> Self {
        self.state_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&SecretString> {
        self.client_secret.as_ref()
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &str {
        &self.scopes
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> Option<&str> {
        self.frontend_base_url.as_deref()
    }

    #[must_use]
    pub fn state_ttl(&self) -> Duration {
        self.state_ttl
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/authorize", self.authority_url, self.tenant)
    }

    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_url, self.tenant)
    }

    #[must_use]
    pub fn profile_endpoint(&self) -> String {
        format!("{}/me", self.graph_url)
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self::new()
    }
}
