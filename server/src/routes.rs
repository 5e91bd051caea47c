use axum::http::{header, HeaderValue, Method};
use axum::{middleware, Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::middleware::JwtSecret;
use crate::auth::routes as auth_routes;
use crate::chat::{messages, people, presence};
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Identity extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Credentialed CORS for the configured browser origin.
fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    match origin.parse::<HeaderValue>() {
        Ok(value) => layer.allow_origin(value),
        Err(e) => {
            tracing::warn!(origin = %origin, error = %e, "Invalid CORS origin, cross-origin requests disabled");
            layer
        }
    }
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Result<Router, ChatError> {
    // Rate limiting: 5 requests per minute per IP on credential endpoints
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5)
            .finish()
            .ok_or_else(|| ChatError::Internal("invalid rate limiter config".to_string()))?,
    );

    // Spawn background task to clean up rate limiter state
    let limiter_for_cleanup = governor_config.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            limiter_for_cleanup.retain_recent();
        }
    });

    let credential_routes = Router::new()
        .route("/register", axum::routing::post(auth_routes::register))
        .route("/login", axum::routing::post(auth_routes::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Session required (Identity extractor validates the token)
    let authenticated_routes = Router::new()
        .route("/profile", axum::routing::get(auth_routes::profile))
        .route("/people", axum::routing::get(people::list_people))
        .route("/online", axum::routing::get(presence::get_online))
        .route(
            "/messages/{user_id}",
            axum::routing::get(messages::get_conversation),
        );

    // Public routes
    let public_routes = Router::new()
        .route("/logout", axum::routing::post(auth_routes::logout))
        .route("/health", axum::routing::get(health_check))
        .route("/test", axum::routing::get(test_check));

    // WebSocket endpoint (token checked during the handshake)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let cors = cors_layer(&state.cors_origin);

    Ok(Router::new()
        .merge(credential_routes)
        .merge(authenticated_routes)
        .merge(public_routes)
        .merge(ws_routes)
        .nest_service("/uploads", ServeDir::new(&state.uploads_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Connectivity probe used by the web client
async fn test_check() -> Json<&'static str> {
    Json("test ok")
}
