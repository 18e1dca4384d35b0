mod config;

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tandem_api::middleware::require_auth;
use tandem_api::{health, messages, AppState};
use tandem_db::Database;
use tandem_gateway::{connection, Coordinator, Registry};
use tandem_identity::{CachingVerifier, IdentityVerifier, JwtVerifier};

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env();

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Identity verification: JWT behind the explicit token cache.
    let verifier: Arc<dyn IdentityVerifier> = Arc::new(CachingVerifier::new(
        JwtVerifier::new(&config.jwt_secret),
        config.token_cache_ttl,
    ));

    // Shared state
    let coordinator = Arc::new(Coordinator::new(
        db.clone(),
        verifier.clone(),
        Registry::new(),
    ));
    let app_state = AppState::new(db, verifier);

    // Routes
    let public_routes = Router::new().route("/health", get(health::health));

    let protected_routes = Router::new()
        .route(
            "/conversations/{chat_id}/messages",
            get(messages::get_history),
        )
        .route("/messages/queued", get(messages::get_queued))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(coordinator);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Tandem server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(coordinator): State<Arc<Coordinator>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, coordinator))
}
