use crate::{
    notify::LogNotifier,
    oauth::{DelegatedAuth, M365Provider, OAuthConfig},
    portal::{PORTAL_TOKEN_HEADER, PortalAuth, PortalConfig, StoreRateLimiter},
    store::{PgStore, SharedStore},
    sweep::{self, SweepConfig},
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
mod openapi;

pub use handlers::AppState;
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Server settings collected from the command line.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: Option<String>,
    pub portal: PortalConfig,
    pub oauth: OAuthConfig,
    pub sweep: SweepConfig,
}

/// Wire the portal, delegated-auth and RBAC components around one store handle.
///
/// # Errors
/// Returns an error if the identity provider client cannot be built.
pub fn build_state(
    store: SharedStore,
    portal_config: PortalConfig,
    oauth_config: OAuthConfig,
) -> Result<AppState> {
    let limiter = StoreRateLimiter::new(
        store.clone(),
        portal_config.verify_max_failures(),
        portal_config.verify_window(),
    );
    let portal = PortalAuth::new(
        store.clone(),
        Arc::new(LogNotifier),
        Arc::new(limiter),
        portal_config,
    );
    let provider = M365Provider::new(oauth_config.clone())
        .context("Failed to build identity provider client")?;
    let delegated = DelegatedAuth::new(store.clone(), Arc::new(provider), oauth_config);
    Ok(AppState::new(store, portal, delegated))
}

/// Router with request-id, tracing and CORS layers applied.
#[must_use]
pub fn app(state: Arc<AppState>, cors_origin: Option<HeaderValue>) -> Router {
    let mut cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(PORTAL_TOKEN_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST]);
    if let Some(origin) = cors_origin {
        cors = cors.allow_origin(AllowOrigin::exact(origin));
    }

    let (router, _openapi) = router().split_for_parts();
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(state)),
    )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(config: ServerConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&config.dsn)
        .await
        .context("Failed to connect to database")?;

    let store: SharedStore = Arc::new(PgStore::new(pool));

    let sweep_config = config
        .sweep
        .with_oauth_state_ttl(config.oauth.state_ttl())
        .with_attempt_window(config.portal.verify_window());
    sweep::spawn_sweeper(store.clone(), sweep_config);

    let cors_origin = config
        .frontend_base_url
        .as_deref()
        .map(frontend_origin)
        .transpose()?;
    let oauth_config = config
        .oauth
        .with_frontend_base_url(config.frontend_base_url.clone());
    let state = Arc::new(build_state(store, config.portal, oauth_config)?);
    let app = app(state, cors_origin);

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_strips_path_and_keeps_port() -> Result<()> {
        let origin = frontend_origin("https://app.firm.example:8443/portal/")?;
        assert_eq!(origin, "https://app.firm.example:8443");
        Ok(())
    }

    #[test]
    fn frontend_origin_rejects_hostless_urls() {
        assert!(frontend_origin("not a url").is_err());
        assert!(frontend_origin("mailto:team@caseward.dev").is_err());
    }
}
