use crate::api::{self, ServerConfig};
use crate::cli::{
    commands::{oauth, portal, sweep},
    telemetry,
};
use anyhow::Result;
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: Option<String>,
    pub portal: portal::Options,
    pub oauth: oauth::Options,
    pub sweep: sweep::Options,
}

impl Args {
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            dsn: self.dsn.clone(),
            frontend_base_url: self.frontend_base_url.clone(),
            portal: self.portal.config(),
            oauth: self.oauth.config(),
            sweep: self.sweep.config(),
        }
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let result = api::new(args.server_config()).await;
    telemetry::shutdown_tracer();
    result
}

fn log_startup_args(args: &Args) {
    info!(
        port = args.port,
        frontend_base_url = args.frontend_base_url.as_deref().unwrap_or("none"),
        m365_configured = args.oauth.client_id.is_some(),
        "starting caseward"
    );
    debug!(
        dsn = %redact_dsn(&args.dsn),
        m365_tenant = %args.oauth.tenant,
        m365_redirect_uri = %args.oauth.redirect_uri,
        portal_code_ttl_seconds = args.portal.code_ttl_seconds,
        portal_verify_max_failures = args.portal.verify_max_failures,
        sweep_interval_seconds = args.sweep.interval_seconds,
        "startup configuration"
    );
}

/// Strip the password from a DSN before it is logged.
fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable dsn>".to_string(),
    }
}
