pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    error_context::{error_context_middleware, ErrorContextConfig},
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::{sync::Arc, time::Duration};
use tower::Layer;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::UserApiConfig;
use crate::middleware::{
    auth_middleware, daily_metrics_middleware, rate_limit_middleware, require_audit_logs,
    response_cache_middleware, version_middleware, CachePolicy, ResponseCache,
};
use crate::services::{
    AuditLog, AuthService, Cache, CredentialStore, InMemoryCache, MetricsService, RedisCache,
    TokenService, UserService,
};
use crate::utils::Password;

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub config: UserApiConfig,
    pub cache: Cache,
    pub store: Arc<CredentialStore>,
    pub tokens: TokenService,
    pub audit: AuditLog,
    pub users: UserService,
    pub auth: AuthService,
    pub metrics: MetricsService,
    pub login_rate_limiter: IpRateLimiter,
    pub prometheus: Option<PrometheusHandle>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire every service over `cache` and seed the primary admin.
    pub async fn build(config: UserApiConfig, cache: Cache) -> Result<Self, AppError> {
        let store = Arc::new(
            CredentialStore::seeded(
                config.password.work_factor,
                &config.admin.name,
                &config.admin.email,
                Password::new(config.admin.password.expose_secret().clone()),
            )
            .await?,
        );

        let audit = AuditLog::new(cache.clone());
        let tokens = TokenService::new(&config.jwt, cache.clone(), store.clone());
        let users = UserService::new(store.clone(), cache.clone(), audit.clone());
        let auth = AuthService::new(store.clone(), tokens.clone(), cache.clone(), audit.clone());
        let metrics = MetricsService::new(cache.clone());
        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );

        Ok(Self {
            config,
            cache,
            store,
            tokens,
            audit,
            users,
            auth,
            metrics,
            login_rate_limiter,
            prometheus: None,
            started_at: Utc::now(),
        })
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

/// Pick the cache backend from configuration.
///
/// Redis when `REDIS_URL` is set, the in-process store otherwise. A Redis
/// that cannot be reached at startup leaves caching disabled instead of
/// failing the boot.
pub async fn connect_cache(config: &UserApiConfig) -> Cache {
    if !config.redis.enabled {
        tracing::warn!("Caching disabled by configuration");
        return Cache::disabled();
    }

    let timeout = Duration::from_millis(config.redis.timeout_ms);
    let Some(url) = config.redis.url.as_deref() else {
        tracing::info!("REDIS_URL not set, using in-process cache");
        return Cache::new(Arc::new(InMemoryCache::new()), timeout);
    };

    match tokio::time::timeout(REDIS_CONNECT_TIMEOUT, RedisCache::connect(url)).await {
        Ok(Ok(redis)) => Cache::new(Arc::new(redis), timeout),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Redis unavailable, running without cache");
            Cache::disabled()
        }
        Err(_) => {
            tracing::error!("Timed out connecting to Redis, running without cache");
            Cache::disabled()
        }
    }
}

/// Authenticate, then rate limit, then hand over to `router`.
fn protect(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    router
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
}

fn response_cache(router: Router<AppState>, state: &AppState, policy: CachePolicy) -> Router<AppState> {
    router.layer(from_fn_with_state(
        ResponseCache::new(state.clone(), policy),
        response_cache_middleware,
    ))
}

fn api_routes(state: &AppState) -> Router<AppState> {
    let login = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let public = Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/metrics", get(handlers::metrics::summary))
        .route("/metrics/daily", get(handlers::metrics::daily))
        .route("/metrics/endpoints", get(handlers::metrics::endpoints))
        .route("/metrics/prometheus", get(handlers::metrics::prometheus))
        .route("/version", get(handlers::version::current))
        .route("/version/all", get(handlers::version::all))
        .route("/version/changelog", get(handlers::version::changelog))
        .route("/version/health", get(handlers::version::health))
        .merge(login)
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware));

    let user_list = response_cache(
        Router::new().route(
            "/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        ),
        state,
        CachePolicy::UserList,
    );
    let user_item = response_cache(
        Router::new().route(
            "/users/:id",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        ),
        state,
        CachePolicy::UserItem,
    );

    let protected = protect(
        Router::new()
            .route("/auth/logout", post(handlers::auth::logout))
            .route("/auth/stats", get(handlers::auth::stats))
            .route("/auth/cleanup", post(handlers::auth::cleanup))
            .merge(user_list)
            .merge(user_item),
        state,
    );

    let audit = protect(
        Router::new()
            .route("/audit", get(handlers::audit::list_audit_logs))
            .route("/audit/stats", get(handlers::audit::audit_stats))
            .route("/audit/export", get(handlers::audit::export_audit_logs))
            .route("/audit/cleanup", post(handlers::audit::cleanup_audit_logs))
            .route("/audit/user/:userId", get(handlers::audit::user_audit_logs))
            .route("/audit/action/:action", get(handlers::audit::action_audit_logs)),
        state,
    )
    .layer(from_fn(require_audit_logs));

    public.merge(protected).merge(audit)
}

async fn route_not_found() -> AppError {
    AppError::NotFound(anyhow::anyhow!("Route not found"))
}

fn cors_layer(config: &UserApiConfig) -> CorsLayer {
    let origins = &config.security.allowed_origins;
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-version"),
            HeaderName::from_static("accept-version"),
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([
            HeaderName::from_static("x-api-version"),
            HeaderName::from_static("x-api-default-version"),
            HeaderName::from_static("x-cache"),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderName::from_static("x-request-id"),
        ])
}

/// Full application: `/health` at the root, everything else through version
/// detection into the API router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/api", api_routes(&state))
        .fallback(route_not_found)
        .layer(from_fn_with_state(state.clone(), daily_metrics_middleware))
        .layer(from_fn(metrics_middleware))
        .with_state(state.clone());

    // Applied around the router rather than with `Router::layer` so that the
    // path rewrite happens before routing.
    let versioned = from_fn_with_state(state.clone(), version_middleware).layer(api);

    let request_timeout = Duration::from_secs(state.config.common.request_timeout_secs);
    let error_context = ErrorContextConfig {
        expose_internal_details: !state.config.is_production(),
    };
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::health))
        .fallback_service(versioned)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(from_fn_with_state(error_context, error_context_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}
