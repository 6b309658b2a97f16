//! Gateway assembly: shared state, routes and the middleware pipeline

use axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use orderly_common::{
    auth::{JwtManager, REQUEST_ID_HEADER},
    config::AppConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{health, proxy};
use crate::middleware::{
    access_log,
    auth::{auth_middleware, AuthorizationGate},
    failure::{failure_middleware, panic_response},
    rate_limit::{
        rate_limit_middleware, AdmissionController, Clock, RATELIMIT_LIMIT, RATELIMIT_REMAINING,
        RATELIMIT_RESET,
    },
    request_id::request_id_middleware,
};
use crate::routes::{PublicRoutes, RouteTable};

/// The gateway verifies tokens but never issues them
const VERIFY_ONLY_EXPIRATION_SECS: u64 = 0;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub limiter: Arc<AdmissionController>,
    pub gate: Arc<AuthorizationGate>,
    pub routes: Arc<RouteTable>,
    pub forwarder: proxy::Forwarder,
    /// `None` allows any origin
    pub cors_origin: Option<HeaderValue>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let jwt = Arc::new(JwtManager::new(config.jwt_secret(), VERIFY_ONLY_EXPIRATION_SECS));
        let gate = AuthorizationGate::new(PublicRoutes::standard()?, jwt);
        let forwarder = proxy::Forwarder::new(config.upstream_timeout(), config.server.max_body_bytes)?;

        let cors_origin = match config.cors.allowed_origin.as_str() {
            "*" => None,
            origin => Some(HeaderValue::from_str(origin)?),
        };

        Ok(Self {
            limiter: Arc::new(AdmissionController::from_config(&config.rate_limit, clock)),
            gate: Arc::new(gate),
            routes: Arc::new(RouteTable::from_config(&config.upstreams)),
            forwarder,
            cors_origin,
            started_at: Instant::now(),
            config: Arc::new(config),
        })
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(health::health).fallback(proxy::proxy_handler))
        .route("/status", get(health::status).fallback(proxy::proxy_handler))
        // Everything else is forwarded or 404
        .fallback(proxy::proxy_handler);

    with_pipeline(routes, state)
}

/// Wrap `routes` in the request pipeline, outermost stage first
fn with_pipeline(routes: Router<AppState>, state: AppState) -> Router {
    let pipeline = ServiceBuilder::new()
        .layer(from_fn(request_id_middleware))
        .layer(cors_layer(&state))
        // `Cors` needs a `Default` response body; the traced body is not one
        .map_response(|response: axum::response::Response<_>| response.map(axum::body::Body::new))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(access_log::make_span)
                .on_request(access_log::on_request)
                .on_response(access_log::on_response)
                .on_failure(()),
        )
        .layer(from_fn_with_state(state.clone(), failure_middleware))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    routes.layer(pipeline).with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, REQUEST_ID_HEADER])
        .expose_headers([
            REQUEST_ID_HEADER,
            RATELIMIT_LIMIT,
            RATELIMIT_REMAINING,
            RATELIMIT_RESET,
        ])
        .max_age(Duration::from_secs(state.config.cors.max_age_secs));

    match &state.cors_origin {
        Some(origin) => cors.allow_origin(origin.clone()).allow_credentials(true),
        None => cors.allow_origin(Any),
    }
}
